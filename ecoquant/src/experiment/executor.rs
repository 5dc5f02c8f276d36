// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Runs one measured inference and persists its result.
//!
//! An execution moves `Pending -> Tracking -> Scored -> Persisted`, or to `Failed` from
//! any state before `Persisted`. The engine is prepared while still `Pending`, so weight
//! loading and quantization never fall inside the tracking window. The tracker is stopped
//! before leaving `Tracking` whatever the engine returned, and nothing is persisted unless
//! inference succeeded.

use std::fmt;
use tracing::{debug, error, info};

use crate::error::{ExperimentError, InferenceError, StoreError};
use crate::experiment::{Dataset, ExperimentResult, NewExperiment, Precision};
use crate::inference::{InferenceEngine, ModelType};
use crate::io::FeatureTable;
use crate::tracking::{ResourceTracker, TrackingSession};

/// Persists experiment results, assigning their id and creation time.
pub trait ResultStore: Send + Sync {
    fn save(&self, experiment: NewExperiment) -> Result<ExperimentResult, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Tracking,
    Scored,
    Persisted,
    Failed,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Pending => "PENDING",
            ExecutionState::Tracking => "TRACKING",
            ExecutionState::Scored => "SCORED",
            ExecutionState::Persisted => "PERSISTED",
            ExecutionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

pub struct ExperimentExecutor<'a, S: ResultStore + ?Sized, T: ResourceTracker + ?Sized> {
    store: &'a S,
    tracker: &'a mut T,
    state: ExecutionState,
}

impl<'a, S: ResultStore + ?Sized, T: ResourceTracker + ?Sized> ExperimentExecutor<'a, S, T> {
    pub fn new(store: &'a S, tracker: &'a mut T) -> Self {
        ExperimentExecutor {
            store,
            tracker,
            state: ExecutionState::Pending,
        }
    }

    /// State reached by the most recent execution.
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    fn transition(&mut self, next: ExecutionState, dataset_id: &str, precision: Precision) {
        debug!(
            dataset_id,
            precision = %precision,
            from = %self.state,
            to = %next,
            "Experiment state transition"
        );
        self.state = next;
    }

    fn inference_failed(
        &mut self,
        dataset: &Dataset,
        model: ModelType,
        precision: Precision,
        source: InferenceError,
    ) -> ExperimentError {
        self.transition(ExecutionState::Failed, &dataset.id, precision);
        error!(
            dataset_id = %dataset.id,
            model = %model,
            precision = %precision,
            error = %source,
            "Inference failed"
        );
        ExperimentError::InferenceFailed {
            model: model.to_string(),
            precision,
            source,
        }
    }

    /// Runs `engine` over `table` at `precision` inside a tracking window and saves the result.
    ///
    /// # Arguments
    /// * `dataset` - The dataset the table was loaded from, its id is recorded on the result.
    /// * `table` - Numeric rows of the dataset.
    /// * `engine` - The resolved engine for the dataset's model type.
    /// * `precision` - Precision to run the engine in.
    ///
    /// # Returns
    /// * `Result<ExperimentResult, ExperimentError>` - The persisted result, or the failure
    ///   with the active model and precision attached.
    pub fn execute(
        &mut self,
        dataset: &Dataset,
        table: &FeatureTable,
        engine: &dyn InferenceEngine,
        precision: Precision,
    ) -> Result<ExperimentResult, ExperimentError> {
        let model = engine.model_type();
        self.state = ExecutionState::Pending;
        info!(
            dataset_id = %dataset.id,
            model = %model,
            precision = %precision,
            "Starting experiment"
        );

        if let Err(source) = engine.prepare(precision) {
            return Err(self.inference_failed(dataset, model, precision, source));
        }

        self.transition(ExecutionState::Tracking, &dataset.id, precision);
        let session = TrackingSession::start(&mut *self.tracker);
        let outcome = engine.run(table, precision);
        let emissions = session.finish();

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(source) => return Err(self.inference_failed(dataset, model, precision, source)),
        };
        self.transition(ExecutionState::Scored, &dataset.id, precision);

        let record = NewExperiment {
            dataset_id: dataset.id.clone(),
            model_type: model.to_string(),
            precision,
            latency_seconds: outcome.latency_seconds,
            accuracy: outcome.accuracy,
            emissions,
        };
        match self.store.save(record) {
            Ok(result) => {
                self.transition(ExecutionState::Persisted, &dataset.id, precision);
                info!(
                    experiment_id = %result.id,
                    latency_seconds = result.latency_seconds,
                    energy_consumed_kwh = result.energy_consumed_kwh,
                    "Experiment persisted"
                );
                Ok(result)
            }
            Err(source) => {
                self.transition(ExecutionState::Failed, &dataset.id, precision);
                error!(
                    dataset_id = %dataset.id,
                    precision = %precision,
                    error = %source,
                    "Persisting experiment failed"
                );
                Err(ExperimentError::PersistenceFailed { precision, source })
            }
        }
    }
}

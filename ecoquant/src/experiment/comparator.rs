// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

use tracing::info;

use crate::error::ExperimentError;
use crate::experiment::{ComparisonResult, Dataset, ExperimentExecutor, Precision, ResultStore};
use crate::inference::InferenceEngine;
use crate::io::FeatureTable;
use crate::tracking::ResourceTracker;

/// Runs a dataset through FP32 and then INT8 and reports the deltas between the two runs.
pub struct ExperimentComparator<'a, S: ResultStore + ?Sized, T: ResourceTracker + ?Sized> {
    executor: ExperimentExecutor<'a, S, T>,
}

impl<'a, S: ResultStore + ?Sized, T: ResourceTracker + ?Sized> ExperimentComparator<'a, S, T> {
    pub fn new(executor: ExperimentExecutor<'a, S, T>) -> Self {
        ExperimentComparator { executor }
    }

    /// The runs are sequential and share the table, so both see the same input batch.
    /// A failure in either run is returned as is and no comparison is produced.
    pub fn compare(
        &mut self,
        dataset: &Dataset,
        table: &FeatureTable,
        engine: &dyn InferenceEngine,
    ) -> Result<ComparisonResult, ExperimentError> {
        let fp32 = self
            .executor
            .execute(dataset, table, engine, Precision::Fp32)?;
        let int8 = self
            .executor
            .execute(dataset, table, engine, Precision::Int8)?;

        let comparison = ComparisonResult::from_pair(fp32, int8)?;
        info!(
            dataset_id = %comparison.dataset_id,
            energy_saved_kwh = comparison.deltas.energy_saved_kwh,
            energy_saved_pct = comparison.deltas.energy_saved_pct,
            latency_saved_pct = comparison.deltas.latency_saved_pct,
            "Comparison complete"
        );
        Ok(comparison)
    }
}

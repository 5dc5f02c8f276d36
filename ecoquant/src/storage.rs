// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! File-backed store for datasets and experiment results.
//!
//! The whole state lives in memory behind a mutex and is rewritten to disk after every
//! mutation. The write goes to a sibling temporary file which is then renamed over the
//! store file, so readers never observe a half-written document. When the write fails the
//! in-memory change is rolled back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::experiment::{
    Dataset, DatasetPatch, ExperimentResult, NewDataset, NewExperiment, Precision, ResultStore,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    datasets: Vec<Dataset>,
    experiments: Vec<ExperimentResult>,
}

impl StoreState {
    fn is_referenced(&self, dataset_id: &str) -> bool {
        self.experiments.iter().any(|e| e.dataset_id == dataset_id)
    }

    fn dataset_mut(&mut self, id: &str) -> Result<&mut Dataset, StoreError> {
        self.datasets
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| not_found("Dataset", id))
    }
}

fn not_found(resource: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        resource,
        id: id.to_string(),
    }
}

pub struct JsonStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonStore {
    /// Opens the store at `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        info!(
            path = %path.display(),
            datasets = state.datasets.len(),
            experiments = state.experiments.len(),
            "Opened store"
        );
        Ok(JsonStore {
            path,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    fn write_file(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Applies `change` and persists the result, restoring the previous state on any failure.
    fn mutate<R, F>(&self, change: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut StoreState) -> Result<R, StoreError>,
    {
        let mut state = self.lock()?;
        let snapshot = state.clone();
        let outcome = change(&mut state).and_then(|value| {
            self.write_file(&state)?;
            Ok(value)
        });
        if outcome.is_err() {
            *state = snapshot;
        }
        outcome
    }

    pub fn get_dataset(&self, id: &str) -> Result<Dataset, StoreError> {
        self.lock()?
            .datasets
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| not_found("Dataset", id))
    }

    pub fn list_datasets(&self) -> Result<Vec<Dataset>, StoreError> {
        Ok(self.lock()?.datasets.clone())
    }

    pub fn insert_dataset(&self, new: NewDataset) -> Result<Dataset, StoreError> {
        let dataset = Dataset {
            id: Uuid::new_v4().to_string(),
            filename: new.filename,
            filepath: new.filepath,
            description: new.description,
            ai_model: new.ai_model,
            created_at: Utc::now(),
        };
        self.mutate(|state| {
            state.datasets.push(dataset.clone());
            Ok(())
        })?;
        debug!(dataset_id = %dataset.id, "Inserted dataset");
        Ok(dataset)
    }

    /// The description can always change. The model tag is fixed once an experiment references the dataset.
    pub fn update_dataset(&self, id: &str, patch: DatasetPatch) -> Result<Dataset, StoreError> {
        self.mutate(|state| {
            let referenced = state.is_referenced(id);
            let dataset = state.dataset_mut(id)?;
            if let Some(ai_model) = patch.ai_model {
                if ai_model != dataset.ai_model && referenced {
                    return Err(StoreError::Conflict(format!(
                        "dataset {} has experiments, its model type cannot change",
                        id
                    )));
                }
                dataset.ai_model = ai_model;
            }
            if let Some(description) = patch.description {
                dataset.description = Some(description);
            }
            Ok(dataset.clone())
        })
    }

    /// Removes an unreferenced dataset and returns it.
    pub fn delete_dataset(&self, id: &str) -> Result<Dataset, StoreError> {
        self.mutate(|state| {
            if state.is_referenced(id) {
                return Err(StoreError::Conflict(format!(
                    "dataset {} has experiments, delete them first",
                    id
                )));
            }
            let index = state
                .datasets
                .iter()
                .position(|d| d.id == id)
                .ok_or_else(|| not_found("Dataset", id))?;
            Ok(state.datasets.remove(index))
        })
    }

    pub fn list_experiments(&self) -> Result<Vec<ExperimentResult>, StoreError> {
        Ok(self.lock()?.experiments.clone())
    }

    /// Most recent FP32 and INT8 results for a dataset.
    pub fn latest_pair(
        &self,
        dataset_id: &str,
    ) -> Result<(Option<ExperimentResult>, Option<ExperimentResult>), StoreError> {
        let state = self.lock()?;
        let latest = |precision: Precision| {
            state
                .experiments
                .iter()
                .rev()
                .find(|e| e.dataset_id == dataset_id && e.precision == precision)
                .cloned()
        };
        Ok((latest(Precision::Fp32), latest(Precision::Int8)))
    }

    pub fn delete_experiment(&self, id: &str) -> Result<ExperimentResult, StoreError> {
        self.mutate(|state| {
            let index = state
                .experiments
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| not_found("Experiment", id))?;
            Ok(state.experiments.remove(index))
        })
    }
}

impl ResultStore for JsonStore {
    fn save(&self, experiment: NewExperiment) -> Result<ExperimentResult, StoreError> {
        self.mutate(|state| {
            if !state.datasets.iter().any(|d| d.id == experiment.dataset_id) {
                return Err(not_found("Dataset", &experiment.dataset_id));
            }
            let result =
                ExperimentResult::from_new(Uuid::new_v4().to_string(), Utc::now(), experiment);
            state.experiments.push(result.clone());
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::EmissionsData;
    use std::env;

    fn temp_store() -> (JsonStore, PathBuf) {
        let (store, dir, _) = temp_store_with_path();
        (store, dir)
    }

    fn temp_store_with_path() -> (JsonStore, PathBuf, PathBuf) {
        let dir = env::temp_dir().join(format!("ecoquant_store_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");
        let store = JsonStore::open(&path).unwrap();
        (store, dir, path)
    }

    fn new_dataset(ai_model: &str) -> NewDataset {
        NewDataset {
            filename: "machines.csv".to_string(),
            filepath: "/uploads/machines.csv".to_string(),
            description: Some("sensor readings".to_string()),
            ai_model: ai_model.to_string(),
        }
    }

    fn new_experiment(dataset_id: &str, precision: Precision, energy: f64) -> NewExperiment {
        NewExperiment {
            dataset_id: dataset_id.to_string(),
            model_type: "MLP".to_string(),
            precision,
            latency_seconds: 0.2,
            accuracy: Some(0.9),
            emissions: EmissionsData {
                energy_consumed_kwh: energy,
                ..EmissionsData::default()
            },
        }
    }

    #[test]
    fn test_insert_and_reopen() {
        let (store, dir, path) = temp_store_with_path();
        let dataset = store.insert_dataset(new_dataset("MLP")).unwrap();
        let saved = store
            .save(new_experiment(&dataset.id, Precision::Fp32, 0.01))
            .unwrap();

        let reopened = JsonStore::open(&path).unwrap();

        assert_eq!(reopened.get_dataset(&dataset.id).unwrap(), dataset);
        assert_eq!(reopened.list_experiments().unwrap(), vec![saved]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_save_requires_dataset() {
        let (store, dir) = temp_store();

        let result = store.save(new_experiment("missing", Precision::Int8, 0.01));

        assert!(matches!(
            result,
            Err(StoreError::NotFound { resource: "Dataset", .. })
        ));
        assert!(store.list_experiments().unwrap().is_empty());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_latest_pair() {
        let (store, dir) = temp_store();
        let dataset = store.insert_dataset(new_dataset("MLP")).unwrap();
        store
            .save(new_experiment(&dataset.id, Precision::Fp32, 0.01))
            .unwrap();
        store
            .save(new_experiment(&dataset.id, Precision::Fp32, 0.02))
            .unwrap();

        let (fp32, int8) = store.latest_pair(&dataset.id).unwrap();
        assert_eq!(fp32.unwrap().energy_consumed_kwh, 0.02);
        assert!(int8.is_none());

        store
            .save(new_experiment(&dataset.id, Precision::Int8, 0.005))
            .unwrap();
        let (_, int8) = store.latest_pair(&dataset.id).unwrap();
        assert_eq!(int8.unwrap().precision, Precision::Int8);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_referenced_dataset_is_protected() {
        let (store, dir) = temp_store();
        let dataset = store.insert_dataset(new_dataset("MLP")).unwrap();
        let experiment = store
            .save(new_experiment(&dataset.id, Precision::Fp32, 0.01))
            .unwrap();

        assert!(matches!(
            store.delete_dataset(&dataset.id),
            Err(StoreError::Conflict(_))
        ));
        let retag = DatasetPatch {
            ai_model: Some("CNN".to_string()),
            ..DatasetPatch::default()
        };
        assert!(matches!(
            store.update_dataset(&dataset.id, retag),
            Err(StoreError::Conflict(_))
        ));
        let describe = DatasetPatch {
            description: Some("updated".to_string()),
            ..DatasetPatch::default()
        };
        let updated = store.update_dataset(&dataset.id, describe).unwrap();
        assert_eq!(updated.description.as_deref(), Some("updated"));
        assert_eq!(updated.ai_model, "MLP");

        store.delete_experiment(&experiment.id).unwrap();
        assert_eq!(store.delete_dataset(&dataset.id).unwrap().id, dataset.id);
        assert!(store.list_datasets().unwrap().is_empty());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_unreferenced_dataset_can_be_retagged() {
        let (store, dir) = temp_store();
        let dataset = store.insert_dataset(new_dataset("MLP")).unwrap();

        let patch = DatasetPatch {
            ai_model: Some("CNN".to_string()),
            ..DatasetPatch::default()
        };
        let updated = store.update_dataset(&dataset.id, patch).unwrap();

        assert_eq!(updated.ai_model, "CNN");
        assert_eq!(updated.description, dataset.description);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = env::temp_dir().join(format!("ecoquant_store_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        // The store path is a directory, so the final rename fails.
        let blocked = dir.join("blocked");
        fs::create_dir_all(blocked.join("occupied")).unwrap();
        let store = JsonStore {
            path: blocked,
            state: Mutex::new(StoreState::default()),
        };

        assert!(store.insert_dataset(new_dataset("MLP")).is_err());
        assert!(store.list_datasets().unwrap().is_empty());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_records() {
        let (store, dir) = temp_store();
        assert!(matches!(
            store.get_dataset("nope"),
            Err(StoreError::NotFound { resource: "Dataset", .. })
        ));
        assert!(matches!(
            store.delete_experiment("nope"),
            Err(StoreError::NotFound { resource: "Experiment", .. })
        ));
        assert!(matches!(
            store.update_dataset("nope", DatasetPatch::default()),
            Err(StoreError::NotFound { .. })
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}

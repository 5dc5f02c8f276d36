// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::error::StoreError;
use crate::experiment::{
    ComparisonDeltas, ComparisonResult, Dataset, DatasetPatch, ExperimentComparator,
    ExperimentExecutor, ExperimentResult, NewDataset, Precision,
};
use crate::inference::ModelType;
use crate::io::load_table;
use crate::storage::JsonStore;
use crate::tracking::PowercapTracker;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct Banner {
    pub message: &'static str,
}

pub async fn root() -> Json<Banner> {
    Json(Banner {
        message: "EcoQuant FP32 vs INT8 inference benchmark",
    })
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub description: Option<String>,
    pub ai_model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DatasetList {
    pub datasets: Vec<Dataset>,
}

/// Runs `job` on the blocking pool.
async fn blocking<T, F>(job: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(job)
        .await
        .map_err(|e| ApiError::Internal(format!("Blocking task failed: {}", e)))?
}

/// Store calls write the JSON file under a lock, so they stay off the async workers.
async fn with_store<T, F>(state: &AppState, op: F) -> ApiResult<T>
where
    F: FnOnce(&JsonStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    blocking(move || Ok(op(store.as_ref())?)).await
}

/// Runs `job` while holding the measurement lock. The guard lives inside the
/// blocking task, so a dropped request keeps the lock until `job` returns.
async fn measured<T, F>(run_lock: Arc<Mutex<()>>, job: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let guard = run_lock.lock_owned().await;
    blocking(move || {
        let _measurement = guard;
        job()
    })
    .await
}

/// Keeps the final path component and replaces anything outside `[A-Za-z0-9._-]`.
fn sanitize_filename(name: &str) -> String {
    let base = FsPath::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "dataset.csv".to_string()
    } else {
        cleaned
    }
}

/// Stores an uploaded CSV and registers it. The file must parse into at least one numeric column.
pub async fn upload_dataset(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Dataset>)> {
    let model: ModelType = params
        .ai_model
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'ai_model' is required".to_string()))?
        .parse()?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = sanitize_filename(field.file_name().unwrap_or_default());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = upload.ok_or_else(|| {
        ApiError::BadRequest(format!("Multipart field '{}' is required", UPLOAD_FIELD))
    })?;

    let stored_path = state
        .upload_dir
        .join(format!("{}_{}", uuid::Uuid::new_v4(), filename));
    tokio::fs::write(&stored_path, &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to store upload: {}", e)))?;
    let filepath = stored_path.to_string_lossy().to_string();

    let check_path = filepath.clone();
    let validated = task::spawn_blocking(move || load_table(&check_path))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let table = match validated {
        Ok(table) => table,
        Err(e) => {
            discard_file(&filepath).await;
            return Err(ApiError::BadRequest(e.to_string()));
        }
    };

    let new = NewDataset {
        filename,
        filepath: filepath.clone(),
        description: params.description,
        ai_model: model.as_str().to_string(),
    };
    let inserted = with_store(&state, move |store| Ok(store.insert_dataset(new))).await?;
    match inserted {
        Ok(dataset) => {
            info!(
                dataset_id = %dataset.id,
                filename = %dataset.filename,
                bytes = bytes.len(),
                rows = table.n_rows(),
                columns = table.columns().len(),
                "Dataset uploaded"
            );
            Ok((StatusCode::CREATED, Json(dataset)))
        }
        Err(e) => {
            discard_file(&filepath).await;
            Err(e.into())
        }
    }
}

async fn discard_file(path: &str) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path, error = %e, "Failed to remove dataset file");
    }
}

pub async fn list_datasets(State(state): State<AppState>) -> ApiResult<Json<DatasetList>> {
    Ok(Json(DatasetList {
        datasets: with_store(&state, |store| store.list_datasets()).await?,
    }))
}

pub async fn update_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    Json(mut patch): Json<DatasetPatch>,
) -> ApiResult<Json<Dataset>> {
    if let Some(ai_model) = patch.ai_model.take() {
        let model: ModelType = ai_model.parse()?;
        patch.ai_model = Some(model.as_str().to_string());
    }
    let updated = with_store(&state, move |store| store.update_dataset(&dataset_id, patch)).await?;
    Ok(Json(updated))
}

pub async fn delete_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> ApiResult<Json<Dataset>> {
    let dataset = with_store(&state, move |store| store.delete_dataset(&dataset_id)).await?;
    discard_file(&dataset.filepath).await;
    info!(dataset_id = %dataset.id, "Dataset deleted");
    Ok(Json(dataset))
}

#[derive(Debug, Deserialize)]
pub struct RunExperimentRequest {
    pub dataset_id: String,
    #[serde(alias = "model_type")]
    pub precision: String,
}

/// Runs one measured inference of the dataset's model at the requested precision.
pub async fn run_experiment(
    State(state): State<AppState>,
    Json(request): Json<RunExperimentRequest>,
) -> ApiResult<Json<ExperimentResult>> {
    let precision: Precision = request.precision.parse()?;
    let dataset_id = request.dataset_id;
    let dataset = with_store(&state, move |store| store.get_dataset(&dataset_id)).await?;
    let engine = state.resolver.resolve(&dataset.ai_model)?;

    let worker = state.clone();
    let result = measured(Arc::clone(&state.run_lock), move || {
        let table = load_table(&dataset.filepath)?;
        let mut tracker = PowercapTracker::new(worker.tracker_config.as_ref().clone());
        let mut executor = ExperimentExecutor::new(worker.store.as_ref(), &mut tracker);
        Ok(executor.execute(&dataset, &table, engine.as_ref(), precision)?)
    })
    .await?;

    state.publish(&result);
    Ok(Json(result))
}

/// Runs FP32 then INT8 on the dataset and returns both results with their deltas.
pub async fn compare_experiment(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> ApiResult<Json<ComparisonResult>> {
    let dataset = with_store(&state, move |store| store.get_dataset(&dataset_id)).await?;
    let engine = state.resolver.resolve(&dataset.ai_model)?;

    let worker = state.clone();
    let comparison = measured(Arc::clone(&state.run_lock), move || {
        let table = load_table(&dataset.filepath)?;
        let mut tracker = PowercapTracker::new(worker.tracker_config.as_ref().clone());
        let executor = ExperimentExecutor::new(worker.store.as_ref(), &mut tracker);
        let mut comparator = ExperimentComparator::new(executor);
        Ok(comparator.compare(&dataset, &table, engine.as_ref())?)
    })
    .await?;

    state.publish(&comparison.fp32);
    state.publish(&comparison.int8);
    Ok(Json(comparison))
}

pub async fn list_experiments(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ExperimentResult>>> {
    Ok(Json(with_store(&state, |store| store.list_experiments()).await?))
}

#[derive(Debug, Serialize)]
pub struct ExperimentPair {
    pub dataset_id: String,
    pub fp32: Option<ExperimentResult>,
    pub int8: Option<ExperimentResult>,
    pub comparison: Option<ComparisonDeltas>,
}

/// Latest FP32 and INT8 results for a dataset, with deltas once both exist.
pub async fn dataset_experiments(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> ApiResult<Json<ExperimentPair>> {
    let lookup = dataset_id.clone();
    let (fp32, int8) = with_store(&state, move |store| {
        store.get_dataset(&lookup)?;
        store.latest_pair(&lookup)
    })
    .await?;
    let comparison = match (&fp32, &int8) {
        (Some(fp32), Some(int8)) => Some(ComparisonDeltas::between(fp32, int8)),
        _ => None,
    };
    Ok(Json(ExperimentPair {
        dataset_id,
        fp32,
        int8,
        comparison,
    }))
}

pub async fn delete_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> ApiResult<Json<ExperimentResult>> {
    let deleted = with_store(&state, move |store| store.delete_experiment(&experiment_id)).await?;
    info!(experiment_id = %deleted.id, "Experiment deleted");
    Ok(Json(deleted))
}

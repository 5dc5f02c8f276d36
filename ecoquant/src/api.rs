// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! HTTP surface of the benchmark service.
//!
//! - `GET /` - service banner
//! - `POST /datasets` - upload a CSV (`multipart` field `file`, query `ai_model`, `description`)
//! - `GET /datasets` - list datasets
//! - `PATCH /datasets/:id`, `DELETE /datasets/:id`
//! - `POST /run-experiment` - one measured run `{dataset_id, precision}`
//! - `GET /experiments` - all experiment results
//! - `GET /experiments/:id` - latest FP32/INT8 pair of a dataset
//! - `DELETE /experiments/:id` - remove one experiment result
//! - `GET /compare/:id` - run FP32 then INT8 and return the comparison

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::TrackerConfig;
use crate::experiment::ExperimentResult;
use crate::inference::ModelResolver;
use crate::storage::JsonStore;

pub(crate) mod error;
pub(crate) mod handlers;

const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JsonStore>,
    pub resolver: Arc<ModelResolver>,
    pub tracker_config: Arc<TrackerConfig>,
    pub upload_dir: Arc<PathBuf>,
    /// Held by the measuring task until it returns, so runs never overlap.
    pub run_lock: Arc<Mutex<()>>,
    pub metrics: Option<mpsc::Sender<ExperimentResult>>,
}

impl AppState {
    pub fn new(
        store: JsonStore,
        resolver: ModelResolver,
        tracker_config: TrackerConfig,
        upload_dir: PathBuf,
        metrics: Option<mpsc::Sender<ExperimentResult>>,
    ) -> Self {
        AppState {
            store: Arc::new(store),
            resolver: Arc::new(resolver),
            tracker_config: Arc::new(tracker_config),
            upload_dir: Arc::new(upload_dir),
            run_lock: Arc::new(Mutex::new(())),
            metrics,
        }
    }

    /// Hands a persisted result to the metrics sidecar without waiting for it.
    pub(crate) fn publish(&self, result: &ExperimentResult) {
        if let Some(sender) = &self.metrics {
            if let Err(e) = sender.try_send(result.clone()) {
                warn!(experiment_id = %result.id, error = %e, "Dropped experiment metrics");
            }
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route(
            "/datasets",
            get(handlers::list_datasets).post(handlers::upload_dataset),
        )
        .route(
            "/datasets/:id",
            patch(handlers::update_dataset).delete(handlers::delete_dataset),
        )
        .route("/run-experiment", post(handlers::run_experiment))
        .route("/experiments", get(handlers::list_experiments))
        .route("/experiments/", get(handlers::list_experiments))
        .route(
            "/experiments/:id",
            get(handlers::dataset_experiments).delete(handlers::delete_experiment),
        )
        .route("/compare/:id", get(handlers::compare_experiment))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

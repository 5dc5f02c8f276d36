// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

use config::ServiceConfig;
use inference::cnn::CnnWeights;
use inference::mlp::{MlpWeights, MLP_HIDDEN_SIZE, MLP_INPUT_SIZE, MLP_NUM_CLASSES};
use inference::{ModelResolver, ModelType};
use io::FileReader;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::JsonStore;
use tracing::{error, info};

pub(crate) mod api;
pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod experiment;
pub(crate) mod inference;
pub(crate) mod io;
pub(crate) mod logging;
pub(crate) mod storage;
pub(crate) mod tracking;

type MainResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

const USAGE: &str =
    "usage: ecoquant serve [config-path] | ecoquant init-weights <mlp|cnn> <path> [seed]";
const METRICS_CHANNEL_CAPACITY: usize = 200;
const DEFAULT_WEIGHTS_SEED: u64 = 42;

pub fn main() -> MainResult<()> {
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("serve") => serve(args.get(2).map(String::as_str)),
        Some("init-weights") => init_weights(&args[2..]),
        _ => Err(USAGE.into()),
    }
}

/// Writes randomly initialised weights for a model so a fresh install can run experiments.
fn init_weights(args: &[String]) -> MainResult<()> {
    let model: ModelType = args.first().ok_or(USAGE)?.parse()?;
    let path = Path::new(args.get(1).ok_or(USAGE)?);
    let seed = match args.get(2) {
        Some(raw) => raw.parse::<u64>()?,
        None => DEFAULT_WEIGHTS_SEED,
    };

    let mut rng = StdRng::seed_from_u64(seed);
    match model {
        ModelType::Mlp => io::save_weights(
            &MlpWeights::random(MLP_INPUT_SIZE, MLP_HIDDEN_SIZE, MLP_NUM_CLASSES, &mut rng),
            path,
        )?,
        ModelType::Cnn => io::save_weights(&CnnWeights::random(&mut rng), path)?,
    }
    println!("Wrote {} weights to {} (seed {})", model, path.display(), seed);
    Ok(())
}

async fn load_service_config(config_path: Option<&str>) -> MainResult<ServiceConfig> {
    let Some(path) = config_path else {
        return Ok(ServiceConfig::from_env()?);
    };
    let reader = io::reader_for(path).await;
    Ok(ServiceConfig::from_json(&reader.read_string(path).await?)?)
}

/// Replaces `s3://` weight paths with local copies under `<upload_dir>/models/`.
async fn fetch_remote_weights(mut service_config: ServiceConfig) -> MainResult<ServiceConfig> {
    if !io::is_s3_path(&service_config.mlp_model_path)
        && !io::is_s3_path(&service_config.cnn_model_path)
    {
        return Ok(service_config);
    }

    let aws_config = aws_config::load_from_env().await;
    let s3_reader = io::S3Reader::new(aws_sdk_s3::Client::new(&aws_config));
    let models_dir = Path::new(&service_config.upload_dir).join("models");
    for path in [
        &mut service_config.mlp_model_path,
        &mut service_config.cnn_model_path,
    ] {
        if !io::is_s3_path(path) {
            continue;
        }
        let file_name = Path::new(path.as_str())
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| format!("Weights path {} has no file name", path))?;
        let local_path: PathBuf = models_dir.join(file_name);
        s3_reader.download_to_file(path, &local_path).await?;
        info!(source = %path, local = %local_path.display(), "Downloaded model weights");
        *path = local_path.to_string_lossy().to_string();
    }
    Ok(service_config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for the shutdown signal");
    }
    info!("Shutdown signal received");
}

fn serve(config_path: Option<&str>) -> MainResult<()> {
    let config_runtime = tokio::runtime::Builder::new_current_thread()
        .thread_name("ecoquant-config-loader")
        .enable_all()
        .build()?;

    let service_config = config_runtime.block_on(load_service_config(config_path))?;
    service_config.validate()?;
    logging::init_logging(&service_config)?;
    let service_config = config_runtime.block_on(fetch_remote_weights(service_config))?;

    let metrics_client = match &service_config.cloudwatch_namespace {
        Some(_) => {
            let aws_config = config_runtime.block_on(aws_config::load_from_env());
            Some(Arc::new(aws_sdk_cloudwatch::Client::new(&aws_config)))
        }
        None => None,
    };
    config_runtime.shutdown_background();

    let server_addr = service_config.socket_addr()?;
    let store = JsonStore::open(&service_config.database_path)?;
    let resolver = ModelResolver::new(
        &service_config.mlp_model_path,
        &service_config.cnn_model_path,
    );

    let metrics_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("ecoquant-metrics-worker")
        .enable_all()
        .build()?;
    let metrics_sender = match (metrics_client, service_config.cloudwatch_namespace.clone()) {
        (Some(client), Some(namespace)) => {
            let (sender, receiver) = tokio::sync::mpsc::channel(METRICS_CHANNEL_CAPACITY);
            metrics_runtime.spawn(io::experiment_metrics_sidecar(
                service_config.metrics_buffer_capacity,
                client,
                namespace,
                receiver,
            ));
            Some(sender)
        }
        _ => None,
    };

    let state = api::AppState::new(
        store,
        resolver,
        service_config.tracker.clone(),
        PathBuf::from(&service_config.upload_dir),
        metrics_sender,
    );

    let server_runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("ecoquant-server-worker")
        .enable_all()
        .build()?;
    let served: MainResult<()> = server_runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(server_addr).await?;
        info!(address = %server_addr, "EcoQuant API listening");
        axum::serve(listener, api::create_router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok::<(), Box<dyn Error + Send + Sync>>(())
    });

    server_runtime.shutdown_timeout(Duration::from_secs(5));
    metrics_runtime.shutdown_timeout(Duration::from_secs(5));
    served
}

// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub(crate) type FileReaderResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
pub(crate) mod file_reader;
pub(crate) mod model_loader;
pub(crate) mod table_loader;

pub(crate) use file_reader::*;
pub(crate) use model_loader::*;
pub(crate) use table_loader::*;

use crate::experiment::ExperimentResult;

/// Converts a persisted experiment into CloudWatch data points, dimensioned by model and precision.
pub(crate) fn experiment_metric_data(result: &ExperimentResult) -> Vec<MetricDatum> {
    let dimensions = vec![
        Dimension::builder()
            .name("ModelType")
            .value(result.model_type.clone())
            .build(),
        Dimension::builder()
            .name("Precision")
            .value(result.precision.as_str())
            .build(),
    ];
    let datum = |name: &str, value: f64, unit: StandardUnit| {
        MetricDatum::builder()
            .metric_name(name)
            .value(value)
            .unit(unit)
            .set_dimensions(Some(dimensions.clone()))
            .build()
    };

    let mut metric_data = vec![
        datum("EnergyConsumedKwh", result.energy_consumed_kwh, StandardUnit::None),
        datum("CpuEnergyKwh", result.cpu_energy_kwh, StandardUnit::None),
        datum("RamEnergyKwh", result.ram_energy_kwh, StandardUnit::None),
        datum("EmissionsKg", result.emissions_kg, StandardUnit::None),
        datum("InferenceLatency", result.latency_seconds, StandardUnit::Seconds),
    ];
    if let Some(accuracy) = result.accuracy {
        metric_data.push(datum("Accuracy", accuracy, StandardUnit::None));
    }
    metric_data
}

async fn flush_metrics(
    cloudwatch_client: &aws_sdk_cloudwatch::Client,
    namespace: &str,
    metric_data: Vec<MetricDatum>,
) {
    let count = metric_data.len();
    if let Err(e) = cloudwatch_client
        .put_metric_data()
        .namespace(namespace)
        .set_metric_data(Some(metric_data))
        .send()
        .await
    {
        warn!(error = %e, count, "Failed to publish experiment metrics");
    }
}

pub(crate) async fn experiment_metrics_sidecar(
    buffer_capacity: usize,
    cloudwatch_client: Arc<aws_sdk_cloudwatch::Client>,
    namespace: String,
    mut receiver: mpsc::Receiver<ExperimentResult>,
) {
    info!(namespace = %namespace, "Metrics sidecar started");
    let mut metric_buffer = Vec::new();
    while let Some(result) = receiver.recv().await {
        metric_buffer.extend(experiment_metric_data(&result));
        if metric_buffer.len() >= buffer_capacity {
            let metrics_to_send = std::mem::take(&mut metric_buffer);
            flush_metrics(&cloudwatch_client, &namespace, metrics_to_send).await;
        }
    }
    if !metric_buffer.is_empty() {
        flush_metrics(&cloudwatch_client, &namespace, metric_buffer).await;
    }
    info!("Metrics sidecar channel closed, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Precision;
    use chrono::Utc;

    fn sample(accuracy: Option<f64>) -> ExperimentResult {
        ExperimentResult {
            id: "exp-1".to_string(),
            dataset_id: "ds-1".to_string(),
            model_type: "CNN".to_string(),
            precision: Precision::Int8,
            latency_seconds: 0.42,
            accuracy,
            energy_consumed_kwh: 0.002,
            cpu_energy_kwh: 0.0015,
            ram_energy_kwh: 0.0005,
            emissions_kg: 0.00095,
            duration_seconds: 0.5,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_metric_data_with_accuracy() {
        let data = experiment_metric_data(&sample(Some(0.97)));

        assert_eq!(data.len(), 6);
        assert_eq!(data[0].metric_name(), Some("EnergyConsumedKwh"));
        assert_eq!(data[0].value(), Some(0.002));
        assert_eq!(data[4].metric_name(), Some("InferenceLatency"));
        assert_eq!(data[5].value(), Some(0.97));
    }

    #[test]
    fn test_metric_data_without_accuracy() {
        let data = experiment_metric_data(&sample(None));

        assert_eq!(data.len(), 5);
        assert!(data
            .iter()
            .all(|datum| datum.metric_name() != Some("Accuracy")));
    }
}

// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Records produced and consumed by the experiment pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ExperimentError, InferenceError};
use crate::tracking::EmissionsData;

/// Numeric precision an experiment runs the model in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Precision {
    Fp32,
    Int8,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Fp32 => "FP32",
            Precision::Int8 => "INT8",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FP32" => Ok(Precision::Fp32),
            "INT8" => Ok(Precision::Int8),
            _ => Err(InferenceError::InvalidPrecision(s.to_string())),
        }
    }
}

impl TryFrom<String> for Precision {
    type Error = InferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An uploaded dataset and the model family it is meant for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub filename: String,
    pub filepath: String,
    pub description: Option<String>,
    /// Canonical (upper-case) model type tag, e.g. `MLP`.
    pub ai_model: String,
    pub created_at: DateTime<Utc>,
}

/// Dataset fields supplied on upload; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub filename: String,
    pub filepath: String,
    pub description: Option<String>,
    pub ai_model: String,
}

/// Partial update of a dataset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetPatch {
    pub description: Option<String>,
    pub ai_model: Option<String>,
}

/// A scored run waiting to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExperiment {
    pub dataset_id: String,
    pub model_type: String,
    pub precision: Precision,
    pub latency_seconds: f64,
    pub accuracy: Option<f64>,
    pub emissions: EmissionsData,
}

/// One persisted experiment run. Never mutated after the store creates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub id: String,
    pub dataset_id: String,
    pub model_type: String,
    pub precision: Precision,
    pub latency_seconds: f64,
    /// `None` when the dataset carries no label column to score against.
    pub accuracy: Option<f64>,
    pub energy_consumed_kwh: f64,
    pub cpu_energy_kwh: f64,
    pub ram_energy_kwh: f64,
    pub emissions_kg: f64,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl ExperimentResult {
    pub fn from_new(id: String, created_at: DateTime<Utc>, new: NewExperiment) -> Self {
        ExperimentResult {
            id,
            dataset_id: new.dataset_id,
            model_type: new.model_type,
            precision: new.precision,
            latency_seconds: new.latency_seconds,
            accuracy: new.accuracy,
            energy_consumed_kwh: new.emissions.energy_consumed_kwh,
            cpu_energy_kwh: new.emissions.cpu_energy_kwh,
            ram_energy_kwh: new.emissions.ram_energy_kwh,
            emissions_kg: new.emissions.emissions_kg,
            duration_seconds: new.emissions.duration_seconds,
            created_at,
        }
    }
}

/// Relative savings of INT8 over FP32.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonDeltas {
    pub energy_saved_kwh: f64,
    pub energy_saved_pct: f64,
    pub latency_saved_pct: f64,
    /// `None` when either run has no measured accuracy.
    pub accuracy_loss: Option<f64>,
}

impl ComparisonDeltas {
    pub fn between(fp32: &ExperimentResult, int8: &ExperimentResult) -> Self {
        let energy_saved_kwh = fp32.energy_consumed_kwh - int8.energy_consumed_kwh;
        let latency_saved = fp32.latency_seconds - int8.latency_seconds;
        let accuracy_loss = match (fp32.accuracy, int8.accuracy) {
            (Some(full), Some(quantized)) => Some(round_to(full - quantized, 4)),
            _ => None,
        };

        ComparisonDeltas {
            energy_saved_kwh,
            energy_saved_pct: round_to(percent_of(energy_saved_kwh, fp32.energy_consumed_kwh), 2),
            latency_saved_pct: round_to(percent_of(latency_saved, fp32.latency_seconds), 2),
            accuracy_loss,
        }
    }
}

/// FP32 and INT8 runs of one dataset with their deltas. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub dataset_id: String,
    pub fp32: ExperimentResult,
    pub int8: ExperimentResult,
    pub deltas: ComparisonDeltas,
}

impl ComparisonResult {
    /// Pairs two runs, rejecting pairs that are not the same dataset in both precisions.
    pub fn from_pair(
        fp32: ExperimentResult,
        int8: ExperimentResult,
    ) -> Result<Self, ExperimentError> {
        if fp32.precision != Precision::Fp32 || int8.precision != Precision::Int8 {
            return Err(ExperimentError::MismatchedPair(format!(
                "expected FP32 and INT8 runs, got {} and {}",
                fp32.precision, int8.precision
            )));
        }
        if fp32.dataset_id != int8.dataset_id {
            return Err(ExperimentError::MismatchedPair(format!(
                "runs reference different datasets {} and {}",
                fp32.dataset_id, int8.dataset_id
            )));
        }

        let deltas = ComparisonDeltas::between(&fp32, &int8);
        Ok(ComparisonResult {
            dataset_id: fp32.dataset_id.clone(),
            fp32,
            int8,
            deltas,
        })
    }
}

/// Share of `part` in `whole` as a percentage, zero when `whole` is not positive.
fn percent_of(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(
        precision: Precision,
        energy: f64,
        latency: f64,
        accuracy: Option<f64>,
    ) -> ExperimentResult {
        ExperimentResult {
            id: format!("exp-{}", precision),
            dataset_id: "ds-1".to_string(),
            model_type: "MLP".to_string(),
            precision,
            latency_seconds: latency,
            accuracy,
            energy_consumed_kwh: energy,
            cpu_energy_kwh: energy * 0.8,
            ram_energy_kwh: energy * 0.2,
            emissions_kg: energy * 0.475,
            duration_seconds: latency,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_precision_parse_is_case_insensitive() {
        assert_eq!("fp32".parse::<Precision>().unwrap(), Precision::Fp32);
        assert_eq!(" Int8 ".parse::<Precision>().unwrap(), Precision::Int8);
        assert!(matches!(
            "fp16".parse::<Precision>(),
            Err(InferenceError::InvalidPrecision(_))
        ));
    }

    #[test]
    fn test_precision_serde() {
        assert_eq!(serde_json::to_string(&Precision::Int8).unwrap(), "\"INT8\"");
        let parsed: Precision = serde_json::from_str("\"fp32\"").unwrap();
        assert_eq!(parsed, Precision::Fp32);
        assert!(serde_json::from_str::<Precision>("\"bf16\"").is_err());
    }

    #[test]
    fn test_deltas_rounding() {
        let fp32 = result(Precision::Fp32, 0.003, 0.3, Some(0.912345));
        let int8 = result(Precision::Int8, 0.001, 0.1, Some(0.9));

        let deltas = ComparisonDeltas::between(&fp32, &int8);

        assert_eq!(deltas.energy_saved_kwh, 0.003 - 0.001);
        assert_eq!(deltas.energy_saved_pct, 66.67);
        assert_eq!(deltas.latency_saved_pct, 66.67);
        assert_eq!(deltas.accuracy_loss, Some(0.0123));
    }

    #[test]
    fn test_deltas_zero_baseline() {
        let fp32 = result(Precision::Fp32, 0.0, 0.0, None);
        let int8 = result(Precision::Int8, 0.0, 0.0, None);

        let deltas = ComparisonDeltas::between(&fp32, &int8);

        assert_eq!(deltas.energy_saved_pct, 0.0);
        assert_eq!(deltas.latency_saved_pct, 0.0);
        assert!(!deltas.energy_saved_pct.is_nan());
        assert_eq!(deltas.accuracy_loss, None);
    }

    #[test]
    fn test_from_pair_rejects_mismatch() {
        let fp32 = result(Precision::Fp32, 1.0, 1.0, None);
        let mut other = result(Precision::Int8, 1.0, 1.0, None);
        other.dataset_id = "ds-2".to_string();
        assert!(matches!(
            ComparisonResult::from_pair(fp32.clone(), other),
            Err(ExperimentError::MismatchedPair(_))
        ));

        let swapped = result(Precision::Fp32, 1.0, 1.0, None);
        assert!(ComparisonResult::from_pair(fp32, swapped).is_err());
    }
}

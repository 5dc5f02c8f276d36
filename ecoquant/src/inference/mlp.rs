// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Two-layer perceptron over flat tabular feature rows.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use tract_onnx::prelude::tract_ndarray::Array2;

use crate::error::InferenceError;
use crate::experiment::Precision;
use crate::inference::layers::{relu, DenseWeights, Linear};
use crate::inference::scoring::{accuracy, check_finite, timed_forward};
use crate::inference::{InferenceEngine, InferenceOutcome, LazyNetwork, ModelType};
use crate::io::{load_weights, FeatureTable};

/// Forward passes per measurement, identical for both precisions.
pub const MLP_REPETITIONS: usize = 10;

pub const MLP_INPUT_SIZE: usize = 512;
pub const MLP_HIDDEN_SIZE: usize = 1024;
pub const MLP_NUM_CLASSES: usize = 2;

/// Persisted MLP weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpWeights {
    pub layer1: DenseWeights,
    pub layer2: DenseWeights,
}

impl MlpWeights {
    pub fn random<R: Rng>(input: usize, hidden: usize, classes: usize, rng: &mut R) -> Self {
        MlpWeights {
            layer1: DenseWeights::random(input, hidden, rng),
            layer2: DenseWeights::random(hidden, classes, rng),
        }
    }
}

#[derive(Debug)]
pub(crate) struct MlpNetwork {
    layer1: Linear,
    layer2: Linear,
}

impl MlpNetwork {
    pub(crate) fn from_weights(weights: &MlpWeights, path: &str) -> Result<Self, InferenceError> {
        let layer1 = Linear::from_weights(&weights.layer1, path)?;
        let layer2 = Linear::from_weights(&weights.layer2, path)?;
        if layer1.out_features() != layer2.in_features() {
            return Err(InferenceError::CorruptWeights {
                path: path.to_string(),
                reason: format!(
                    "layer1 produces {} features but layer2 expects {}",
                    layer1.out_features(),
                    layer2.in_features()
                ),
            });
        }
        Ok(MlpNetwork { layer1, layer2 })
    }

    fn load(path: &str) -> Result<Self, InferenceError> {
        let weights: MlpWeights = load_weights(ModelType::Mlp.as_str(), path)?;
        Self::from_weights(&weights, path)
    }

    pub(crate) fn input_size(&self) -> usize {
        self.layer1.in_features()
    }

    pub(crate) fn quantized(&self) -> Self {
        MlpNetwork {
            layer1: self.layer1.quantized(),
            layer2: self.layer2.quantized(),
        }
    }

    pub(crate) fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        self.layer2.forward(&relu(self.layer1.forward(x)))
    }
}

/// Tabular engine. A `target` or `label` column, when present, is used as ground truth.
pub struct MlpEngine {
    network: LazyNetwork<MlpNetwork>,
}

impl MlpEngine {
    pub fn new(weights_path: impl Into<String>) -> Self {
        MlpEngine {
            network: LazyNetwork::new(ModelType::Mlp, weights_path),
        }
    }

    fn network(&self, precision: Precision) -> Result<Arc<MlpNetwork>, InferenceError> {
        self.network
            .get(precision, MlpNetwork::load, MlpNetwork::quantized)
    }
}

impl InferenceEngine for MlpEngine {
    fn model_type(&self) -> ModelType {
        ModelType::Mlp
    }

    fn prepare(&self, precision: Precision) -> Result<(), InferenceError> {
        self.network(precision).map(|_| ())
    }

    fn run(
        &self,
        table: &FeatureTable,
        precision: Precision,
    ) -> Result<InferenceOutcome, InferenceError> {
        if table.n_rows() == 0 {
            return Err(InferenceError::EmptyBatch);
        }
        let network = self.network(precision)?;

        let (features, labels) = match table.label_column() {
            Some(index) => {
                let (features, labels) = table.split_column(index);
                (features, Some(labels))
            }
            None => (table.values().clone(), None),
        };
        if features.ncols() != network.input_size() {
            return Err(InferenceError::ShapeMismatch {
                expected: network.input_size().to_string(),
                found: features.ncols(),
            });
        }

        debug!(
            path = self.network.path(),
            precision = %precision,
            rows = features.nrows(),
            "Running MLP forward passes"
        );
        let (latency_seconds, logits) =
            timed_forward(MLP_REPETITIONS, || network.forward(&features));
        check_finite(&logits)?;

        Ok(InferenceOutcome {
            latency_seconds,
            accuracy: accuracy(&logits, labels.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::save_weights;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    fn weights_file(weights: &MlpWeights) -> PathBuf {
        let path = env::temp_dir().join(format!("ecoquant_mlp_{}.json", uuid::Uuid::new_v4()));
        save_weights(weights, &path).unwrap();
        path
    }

    fn table(columns: &[&str], rows: Vec<Vec<f32>>) -> FeatureTable {
        let n_rows = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        FeatureTable::new(
            columns.iter().map(|c| c.to_string()).collect(),
            Array2::from_shape_vec((n_rows, columns.len()), flat).unwrap(),
        )
    }

    /// Two inputs, identity hidden layer, output picks the larger input.
    fn argmax_weights() -> MlpWeights {
        MlpWeights {
            layer1: DenseWeights {
                weight: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                bias: vec![0.0, 0.0],
            },
            layer2: DenseWeights {
                weight: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                bias: vec![0.0, 0.0],
            },
        }
    }

    #[test]
    fn test_run_scores_against_label_column() {
        let path = weights_file(&argmax_weights());
        let engine = MlpEngine::new(path.to_str().unwrap());
        let data = table(
            &["a", "b", "target"],
            vec![
                vec![0.9, 0.1, 0.0],
                vec![0.2, 0.8, 1.0],
                vec![0.7, 0.3, 1.0],
                vec![0.1, 0.6, 1.0],
            ],
        );

        for precision in [Precision::Fp32, Precision::Int8] {
            let outcome = engine.run(&data, precision).unwrap();
            assert_eq!(outcome.accuracy, Some(0.75));
            assert!(outcome.latency_seconds >= 0.0);
        }

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_run_without_labels_reports_no_accuracy() {
        let mut rng = StdRng::seed_from_u64(1);
        let weights = MlpWeights::random(MLP_INPUT_SIZE, 16, MLP_NUM_CLASSES, &mut rng);
        let path = weights_file(&weights);
        let engine = MlpEngine::new(path.to_str().unwrap());
        let columns: Vec<String> = (0..MLP_INPUT_SIZE)
            .map(|i| format!("feature_{}", i))
            .collect();
        let data = FeatureTable::new(
            columns,
            Array2::from_shape_fn((10, MLP_INPUT_SIZE), |(r, c)| ((r * c) % 7) as f32 / 7.0),
        );

        let outcome = engine.run(&data, Precision::Int8).unwrap();

        assert_eq!(outcome.accuracy, None);
        assert!(outcome.latency_seconds > 0.0);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_feature_count_mismatch() {
        let path = weights_file(&argmax_weights());
        let engine = MlpEngine::new(path.to_str().unwrap());
        let data = table(&["a", "b", "c"], vec![vec![1.0, 2.0, 3.0]]);

        let result = engine.run(&data, Precision::Fp32);

        assert!(matches!(
            result,
            Err(InferenceError::ShapeMismatch { ref expected, found: 3 }) if expected == "2"
        ));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_weights() {
        let engine = MlpEngine::new("/definitely/not/here/mlp.json");
        let data = table(&["a", "b"], vec![vec![1.0, 2.0]]);

        assert!(matches!(
            engine.run(&data, Precision::Fp32),
            Err(InferenceError::ModelNotFound { ref model, .. }) if model == "MLP"
        ));
    }

    #[test]
    fn test_prepared_engine_runs_without_disk() {
        let path = weights_file(&argmax_weights());
        let engine = MlpEngine::new(path.to_str().unwrap());
        let data = table(&["a", "b", "label"], vec![vec![0.9, 0.1, 0.0], vec![0.2, 0.8, 1.0]]);

        engine.prepare(Precision::Fp32).unwrap();
        engine.prepare(Precision::Int8).unwrap();
        fs::remove_file(&path).unwrap();

        for precision in [Precision::Fp32, Precision::Int8] {
            assert_eq!(engine.run(&data, precision).unwrap().accuracy, Some(1.0));
        }
    }

    #[test]
    fn test_prepare_reports_missing_weights() {
        let engine = MlpEngine::new("/definitely/not/here/mlp.json");

        assert!(matches!(
            engine.prepare(Precision::Int8),
            Err(InferenceError::ModelNotFound { ref model, .. }) if model == "MLP"
        ));
    }

    #[test]
    fn test_mismatched_layers_rejected() {
        let mut weights = argmax_weights();
        weights.layer2.weight = vec![vec![1.0, 0.0, 0.0]];
        weights.layer2.bias = vec![0.0];

        assert!(matches!(
            MlpNetwork::from_weights(&weights, "bad.json"),
            Err(InferenceError::CorruptWeights { .. })
        ));
    }
}

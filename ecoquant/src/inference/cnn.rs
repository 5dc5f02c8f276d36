// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Small convolutional network over 28x28 greyscale images, one image per row.
//!
//! Rows carry 784 pixel values in row-major order. A row of 785 values is read as a
//! label followed by the pixels.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use tract_onnx::prelude::tract_ndarray::{s, Array2};

use crate::error::InferenceError;
use crate::experiment::Precision;
use crate::inference::layers::{
    max_pool2, relu_map, ConvWeights, Conv2d, DenseWeights, FeatureMap, Linear,
};
use crate::inference::scoring::{accuracy, check_finite, timed_forward};
use crate::inference::{InferenceEngine, InferenceOutcome, LazyNetwork, ModelType};
use crate::io::{load_weights, FeatureTable};

/// Forward passes per measurement, identical for both precisions.
pub const CNN_REPETITIONS: usize = 5;

pub const IMAGE_SIDE: usize = 28;
pub const IMAGE_PIXELS: usize = IMAGE_SIDE * IMAGE_SIDE;
pub const CNN_NUM_CLASSES: usize = 10;

const PIXEL_SCALE: f32 = 255.0;

/// Persisted CNN weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CnnWeights {
    pub conv1: ConvWeights,
    pub conv2: ConvWeights,
    pub fc: DenseWeights,
}

impl CnnWeights {
    /// `conv(1->16) pool conv(16->32) pool fc(32*7*7->10)`
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let pooled = IMAGE_SIDE / 4;
        CnnWeights {
            conv1: ConvWeights::random(1, 16, 3, 1, rng),
            conv2: ConvWeights::random(16, 32, 3, 1, rng),
            fc: DenseWeights::random(32 * pooled * pooled, CNN_NUM_CLASSES, rng),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CnnNetwork {
    conv1: Conv2d,
    conv2: Conv2d,
    fc: Linear,
}

impl CnnNetwork {
    pub(crate) fn from_weights(weights: &CnnWeights, path: &str) -> Result<Self, InferenceError> {
        let conv1 = Conv2d::from_weights(&weights.conv1, path)?;
        let conv2 = Conv2d::from_weights(&weights.conv2, path)?;
        let fc = Linear::from_weights(&weights.fc, path)?;
        let corrupt = |reason: String| InferenceError::CorruptWeights {
            path: path.to_string(),
            reason,
        };

        if conv1.in_channels() != 1 {
            return Err(corrupt(format!(
                "conv1 expects {} input channels, images have 1",
                conv1.in_channels()
            )));
        }
        if conv2.in_channels() != conv1.out_channels() {
            return Err(corrupt(format!(
                "conv2 expects {} channels but conv1 produces {}",
                conv2.in_channels(),
                conv1.out_channels()
            )));
        }
        let side = conv2.output_side(conv1.output_side(IMAGE_SIDE) / 2) / 2;
        let flattened = conv2.out_channels() * side * side;
        if flattened == 0 || fc.in_features() != flattened {
            return Err(corrupt(format!(
                "fc expects {} features but the convolutions produce {}",
                fc.in_features(),
                flattened
            )));
        }
        Ok(CnnNetwork { conv1, conv2, fc })
    }

    fn load(path: &str) -> Result<Self, InferenceError> {
        let weights: CnnWeights = load_weights(ModelType::Cnn.as_str(), path)?;
        Self::from_weights(&weights, path)
    }

    pub(crate) fn quantized(&self) -> Self {
        CnnNetwork {
            conv1: self.conv1.quantized(),
            conv2: self.conv2.quantized(),
            fc: self.fc.quantized(),
        }
    }

    pub(crate) fn forward(&self, images: &FeatureMap) -> Array2<f32> {
        let x = max_pool2(&relu_map(self.conv1.forward(images)));
        let x = max_pool2(&relu_map(self.conv2.forward(&x)));
        self.fc.forward(&x.flatten())
    }
}

/// Splits off the optional label column and reshapes pixels into single-channel images scaled to `[0, 1]`.
pub(crate) fn preprocess(
    table: &FeatureTable,
) -> Result<(FeatureMap, Option<Vec<f32>>), InferenceError> {
    let values = table.values();
    let (pixels, labels) = match values.ncols() {
        IMAGE_PIXELS => (values.view(), None),
        width if width == IMAGE_PIXELS + 1 => (
            values.slice(s![.., 1..]),
            Some(values.column(0).to_vec()),
        ),
        found => {
            return Err(InferenceError::ShapeMismatch {
                expected: format!("{} or {}", IMAGE_PIXELS, IMAGE_PIXELS + 1),
                found,
            })
        }
    };

    let batch = pixels.nrows();
    let scaled: Vec<f32> = pixels.iter().map(|p| p / PIXEL_SCALE).collect();
    let data = Array2::from_shape_vec((batch * IMAGE_PIXELS, 1), scaled)
        .map_err(|e| InferenceError::Forward(format!("Failed to reshape image batch: {}", e)))?;

    Ok((
        FeatureMap {
            batch,
            height: IMAGE_SIDE,
            width: IMAGE_SIDE,
            data,
        },
        labels,
    ))
}

/// Image engine for MNIST-style pixel tables.
pub struct CnnEngine {
    network: LazyNetwork<CnnNetwork>,
}

impl CnnEngine {
    pub fn new(weights_path: impl Into<String>) -> Self {
        CnnEngine {
            network: LazyNetwork::new(ModelType::Cnn, weights_path),
        }
    }

    fn network(&self, precision: Precision) -> Result<Arc<CnnNetwork>, InferenceError> {
        self.network
            .get(precision, CnnNetwork::load, CnnNetwork::quantized)
    }
}

impl InferenceEngine for CnnEngine {
    fn model_type(&self) -> ModelType {
        ModelType::Cnn
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
        let (images, labels) = preprocess(table)?;
        let network = self.network(precision)?;

        debug!(
            path = self.network.path(),
            precision = %precision,
            images = images.batch,
            "Running CNN forward passes"
        );
        let (latency_seconds, logits) =
            timed_forward(CNN_REPETITIONS, || network.forward(&images));
        check_finite(&logits)?;

        Ok(InferenceOutcome {
            latency_seconds,
            accuracy: accuracy(&logits, labels.as_deref()),
        })
    }
}

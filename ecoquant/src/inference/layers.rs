// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Network building blocks shared by the MLP and CNN engines.
//!
//! Feature maps are stored channels-last: one row per `(sample, y, x)` position and one
//! column per channel, so convolutions reduce to a patch matrix times a dense kernel.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tract_onnx::prelude::tract_ndarray::{Array1, Array2};

use crate::error::InferenceError;
use crate::inference::quantization::QuantizedLinear;

/// Persisted dense layer: `weight` is `[out][in]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseWeights {
    pub weight: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl DenseWeights {
    /// Uniform initialisation in `±1/sqrt(in_features)`.
    pub fn random<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features as f32).sqrt();
        DenseWeights {
            weight: (0..out_features)
                .map(|_| (0..in_features).map(|_| rng.random_range(-bound..bound)).collect())
                .collect(),
            bias: (0..out_features)
                .map(|_| rng.random_range(-bound..bound))
                .collect(),
        }
    }
}

/// Persisted 2D convolution: `weight` is flattened `[out][in][kh][kw]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvWeights {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub padding: usize,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

impl ConvWeights {
    pub fn random<R: Rng>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: usize,
        rng: &mut R,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;
        let bound = 1.0 / (fan_in as f32).sqrt();
        ConvWeights {
            in_channels,
            out_channels,
            kernel_size,
            padding,
            weight: (0..out_channels * fan_in)
                .map(|_| rng.random_range(-bound..bound))
                .collect(),
            bias: (0..out_channels)
                .map(|_| rng.random_range(-bound..bound))
                .collect(),
        }
    }
}

/// A dense kernel in either precision.
#[derive(Debug, Clone)]
pub(crate) enum Linear {
    Float {
        /// `(in, out)`
        weight_t: Array2<f32>,
        bias: Array1<f32>,
    },
    Int8(QuantizedLinear),
}

impl Linear {
    /// Builds a float kernel from a `(out, in)` weight matrix.
    fn from_matrix(weight: Array2<f32>, bias: Vec<f32>, path: &str) -> Result<Self, InferenceError> {
        if bias.len() != weight.nrows() {
            return Err(InferenceError::CorruptWeights {
                path: path.to_string(),
                reason: format!(
                    "bias has {} values for {} output features",
                    bias.len(),
                    weight.nrows()
                ),
            });
        }
        Ok(Linear::Float {
            weight_t: weight.reversed_axes(),
            bias: Array1::from(bias),
        })
    }

    pub(crate) fn from_weights(weights: &DenseWeights, path: &str) -> Result<Self, InferenceError> {
        let out_features = weights.weight.len();
        let in_features = weights.weight.first().map(Vec::len).unwrap_or(0);
        if out_features == 0 || in_features == 0 {
            return Err(InferenceError::CorruptWeights {
                path: path.to_string(),
                reason: "dense layer has no weights".to_string(),
            });
        }
        if weights.weight.iter().any(|row| row.len() != in_features) {
            return Err(InferenceError::CorruptWeights {
                path: path.to_string(),
                reason: "dense weight rows have different lengths".to_string(),
            });
        }

        let flat: Vec<f32> = weights.weight.iter().flatten().copied().collect();
        let matrix = Array2::from_shape_vec((out_features, in_features), flat).map_err(|e| {
            InferenceError::CorruptWeights {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::from_matrix(matrix, weights.bias.clone(), path)
    }

    pub(crate) fn in_features(&self) -> usize {
        match self {
            Linear::Float { weight_t, .. } => weight_t.nrows(),
            Linear::Int8(q) => q.in_features(),
        }
    }

    pub(crate) fn out_features(&self) -> usize {
        match self {
            Linear::Float { weight_t, .. } => weight_t.ncols(),
            Linear::Int8(q) => q.out_features(),
        }
    }

    pub(crate) fn quantized(&self) -> Linear {
        match self {
            Linear::Float { weight_t, bias } => {
                Linear::Int8(QuantizedLinear::from_float(weight_t, bias))
            }
            Linear::Int8(q) => Linear::Int8(q.clone()),
        }
    }

    pub(crate) fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        match self {
            Linear::Float { weight_t, bias } => {
                let mut output = x.dot(weight_t);
                output += bias;
                output
            }
            Linear::Int8(q) => q.forward(x),
        }
    }
}

/// A batch of channels-last feature maps.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FeatureMap {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    /// `(batch * height * width, channels)`
    pub data: Array2<f32>,
}

impl FeatureMap {
    pub(crate) fn channels(&self) -> usize {
        self.data.ncols()
    }

    fn row(&self, sample: usize, y: usize, x: usize) -> usize {
        (sample * self.height + y) * self.width + x
    }

    pub(crate) fn get(&self, sample: usize, y: usize, x: usize, channel: usize) -> f32 {
        self.data[[self.row(sample, y, x), channel]]
    }

    /// Flattens each sample in `(channel, y, x)` order.
    pub(crate) fn flatten(&self) -> Array2<f32> {
        let plane = self.height * self.width;
        let channels = self.channels();
        let mut flat = Array2::<f32>::zeros((self.batch, channels * plane));
        for sample in 0..self.batch {
            for y in 0..self.height {
                for x in 0..self.width {
                    let row = self.row(sample, y, x);
                    for c in 0..channels {
                        flat[[sample, c * plane + y * self.width + x]] = self.data[[row, c]];
                    }
                }
            }
        }
        flat
    }
}

/// Stride-1 2D convolution executed as patch matrix times kernel.
#[derive(Debug, Clone)]
pub(crate) struct Conv2d {
    in_channels: usize,
    kernel_size: usize,
    padding: usize,
    kernel: Linear,
}

impl Conv2d {
    pub(crate) fn from_weights(weights: &ConvWeights, path: &str) -> Result<Self, InferenceError> {
        let fan_in = weights.in_channels * weights.kernel_size * weights.kernel_size;
        let expected = weights.out_channels * fan_in;
        if fan_in == 0 || weights.out_channels == 0 || weights.weight.len() != expected {
            return Err(InferenceError::CorruptWeights {
                path: path.to_string(),
                reason: format!(
                    "convolution expects {} weights, found {}",
                    expected,
                    weights.weight.len()
                ),
            });
        }
        let matrix = Array2::from_shape_vec((weights.out_channels, fan_in), weights.weight.clone())
            .map_err(|e| InferenceError::CorruptWeights {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Conv2d {
            in_channels: weights.in_channels,
            kernel_size: weights.kernel_size,
            padding: weights.padding,
            kernel: Linear::from_matrix(matrix, weights.bias.clone(), path)?,
        })
    }

    pub(crate) fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub(crate) fn out_channels(&self) -> usize {
        self.kernel.out_features()
    }

    pub(crate) fn output_side(&self, side: usize) -> usize {
        (side + 2 * self.padding + 1).saturating_sub(self.kernel_size)
    }

    pub(crate) fn quantized(&self) -> Conv2d {
        Conv2d {
            kernel: self.kernel.quantized(),
            ..self.clone()
        }
    }

    pub(crate) fn forward(&self, input: &FeatureMap) -> FeatureMap {
        let out_height = self.output_side(input.height);
        let out_width = self.output_side(input.width);
        let patches = self.im2col(input, out_height, out_width);
        FeatureMap {
            batch: input.batch,
            height: out_height,
            width: out_width,
            data: self.kernel.forward(&patches),
        }
    }

    /// One row per output position, columns ordered `(channel, ky, kx)` to match the kernel.
    fn im2col(&self, input: &FeatureMap, out_height: usize, out_width: usize) -> Array2<f32> {
        let k = self.kernel_size;
        let mut patches =
            Array2::<f32>::zeros((input.batch * out_height * out_width, self.in_channels * k * k));

        for sample in 0..input.batch {
            for oy in 0..out_height {
                for ox in 0..out_width {
                    let row = (sample * out_height + oy) * out_width + ox;
                    for ky in 0..k {
                        let Some(iy) = (oy + ky).checked_sub(self.padding) else {
                            continue;
                        };
                        if iy >= input.height {
                            continue;
                        }
                        for kx in 0..k {
                            let Some(ix) = (ox + kx).checked_sub(self.padding) else {
                                continue;
                            };
                            if ix >= input.width {
                                continue;
                            }
                            let source = input.row(sample, iy, ix);
                            for c in 0..self.in_channels {
                                patches[[row, (c * k + ky) * k + kx]] = input.data[[source, c]];
                            }
                        }
                    }
                }
            }
        }
        patches
    }
}

pub(crate) fn relu(mut x: Array2<f32>) -> Array2<f32> {
    x.mapv_inplace(|v| v.max(0.0));
    x
}

pub(crate) fn relu_map(map: FeatureMap) -> FeatureMap {
    FeatureMap {
        data: relu(map.data),
        ..map
    }
}

/// 2x2 max pooling with stride 2; odd trailing rows and columns are dropped.
pub(crate) fn max_pool2(input: &FeatureMap) -> FeatureMap {
    let out_height = input.height / 2;
    let out_width = input.width / 2;
    let channels = input.channels();
    let mut data = Array2::<f32>::zeros((input.batch * out_height * out_width, channels));

    for sample in 0..input.batch {
        for oy in 0..out_height {
            for ox in 0..out_width {
                let row = (sample * out_height + oy) * out_width + ox;
                for c in 0..channels {
                    let mut best = f32::NEG_INFINITY;
                    for dy in 0..2 {
                        for dx in 0..2 {
                            best = best.max(input.get(sample, oy * 2 + dy, ox * 2 + dx, c));
                        }
                    }
                    data[[row, c]] = best;
                }
            }
        }
    }

    FeatureMap {
        batch: input.batch,
        height: out_height,
        width: out_width,
        data,
    }
}

// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

use crate::error::InferenceError;
use crate::experiment::Precision;
use crate::io::FeatureTable;

pub(crate) mod cnn;
pub(crate) mod layers;
pub(crate) mod mlp;
pub(crate) mod quantization;
pub(crate) mod resolver;
pub(crate) mod scoring;

pub(crate) use cnn::CnnEngine;
pub(crate) use mlp::MlpEngine;
pub(crate) use resolver::ModelResolver;

/// Supported networks. Identifiers are matched after trimming and upper-casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelType {
    Mlp,
    Cnn,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Mlp => "MLP",
            ModelType::Cnn => "CNN",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MLP" => Ok(ModelType::Mlp),
            "CNN" => Ok(ModelType::Cnn),
            _ => Err(InferenceError::UnsupportedModel(s.to_string())),
        }
    }
}

/// Measured result of one engine invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceOutcome {
    /// Total seconds spent in the repeated forward passes.
    pub latency_seconds: f64,
    /// `None` when the batch carries no ground truth.
    pub accuracy: Option<f64>,
}

/// A model-specific forward pass over a numeric table.
pub trait InferenceEngine: Send + Sync {
    fn model_type(&self) -> ModelType;

    /// Loads the weights and builds the network for `precision` so that a
    /// following `run` performs no I/O and no weight conversion.
    fn prepare(&self, precision: Precision) -> Result<(), InferenceError>;

    /// Runs the network at the requested precision over every row of `table`.
    fn run(&self, table: &FeatureTable, precision: Precision)
        -> Result<InferenceOutcome, InferenceError>;
}

/// Network weights loaded on first use and shared afterwards.
/// The INT8 variant is derived from the cached FP32 network once.
pub(crate) struct LazyNetwork<N> {
    model: ModelType,
    path: String,
    float: Mutex<Option<Arc<N>>>,
    int8: Mutex<Option<Arc<N>>>,
}

impl<N> LazyNetwork<N> {
    pub(crate) fn new(model: ModelType, path: impl Into<String>) -> Self {
        LazyNetwork {
            model,
            path: path.into(),
            float: Mutex::new(None),
            int8: Mutex::new(None),
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Returns the cached FP32 network, loading it with `load` when absent.
    /// A failed load is not cached, so a later call retries.
    pub(crate) fn get_or_load<F>(&self, load: F) -> Result<Arc<N>, InferenceError>
    where
        F: FnOnce(&str) -> Result<N, InferenceError>,
    {
        let mut cached = self.float.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(network) = cached.as_ref() {
            return Ok(Arc::clone(network));
        }
        let network = Arc::new(load(&self.path)?);
        info!(model = %self.model, path = %self.path, "Loaded model weights");
        *cached = Some(Arc::clone(&network));
        Ok(network)
    }

    /// Returns the network for `precision`, quantizing the FP32 network on
    /// the first INT8 request.
    pub(crate) fn get<L, Q>(
        &self,
        precision: Precision,
        load: L,
        quantize: Q,
    ) -> Result<Arc<N>, InferenceError>
    where
        L: FnOnce(&str) -> Result<N, InferenceError>,
        Q: FnOnce(&N) -> N,
    {
        match precision {
            Precision::Fp32 => self.get_or_load(load),
            Precision::Int8 => {
                let mut cached = self.int8.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(network) = cached.as_ref() {
                    return Ok(Arc::clone(network));
                }
                let network = Arc::new(quantize(self.get_or_load(load)?.as_ref()));
                info!(model = %self.model, path = %self.path, "Quantized model weights");
                *cached = Some(Arc::clone(&network));
                Ok(network)
            }
        }
    }
}

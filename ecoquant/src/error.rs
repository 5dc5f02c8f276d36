// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Error taxonomy shared by the inference, tracking, storage and experiment layers.
//!
//! Lower layers return their own error enum; the experiment layer wraps them with the
//! model and precision that were active, and the API layer maps them to HTTP statuses.

use crate::experiment::Precision;
use thiserror::Error;

/// Errors raised while resolving or running an inference engine.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Unsupported model type: {0}")]
    UnsupportedModel(String),

    #[error("Invalid precision: {0}, expected FP32 or INT8")]
    InvalidPrecision(String),

    #[error("Shape mismatch: expected {expected} feature columns, got {found}")]
    ShapeMismatch { expected: String, found: usize },

    #[error("Input batch has no rows")]
    EmptyBatch,

    #[error("{model} weights not found at {path}")]
    ModelNotFound { model: String, path: String },

    #[error("Weights at {path} are unusable: {reason}")]
    CorruptWeights { path: String, reason: String },

    #[error("Forward pass failed: {0}")]
    Forward(String),
}

impl InferenceError {
    /// True when the caller sent something the engine cannot accept.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedModel(_)
                | Self::InvalidPrecision(_)
                | Self::ShapeMismatch { .. }
                | Self::EmptyBatch
        )
    }
}

/// Errors raised by the tabular data loader.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("Failed to read table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed table {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Table {0} has no numeric columns")]
    NoNumericColumns(String),

    #[error("Table {0} has no data rows")]
    NoRows(String),
}

/// Errors raised by the dataset and experiment store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Errors raised by the experiment executor and comparator.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Inference failed for {model}/{precision}: {source}")]
    InferenceFailed {
        model: String,
        precision: Precision,
        #[source]
        source: InferenceError,
    },

    #[error("Persisting {precision} result failed: {source}")]
    PersistenceFailed {
        precision: Precision,
        #[source]
        source: StoreError,
    },

    #[error("Results cannot be compared: {0}")]
    MismatchedPair(String),
}

impl ExperimentError {
    /// The inference error underneath, if the run failed inside the engine.
    pub fn inference_source(&self) -> Option<&InferenceError> {
        match self {
            Self::InferenceFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors raised while loading or validating the service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

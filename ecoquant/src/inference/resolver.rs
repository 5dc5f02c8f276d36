// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

use std::sync::Arc;
use tracing::debug;

use crate::error::InferenceError;
use crate::inference::{CnnEngine, InferenceEngine, MlpEngine, ModelType};

/// Maps model identifiers to engines. Engines are built once and shared so their weights load once.
pub struct ModelResolver {
    mlp: Arc<MlpEngine>,
    cnn: Arc<CnnEngine>,
}

impl ModelResolver {
    pub fn new(mlp_model_path: &str, cnn_model_path: &str) -> Self {
        ModelResolver {
            mlp: Arc::new(MlpEngine::new(mlp_model_path)),
            cnn: Arc::new(CnnEngine::new(cnn_model_path)),
        }
    }

    /// Resolves `model_id` case-insensitively. Unknown identifiers fail with `UnsupportedModel`.
    pub fn resolve(&self, model_id: &str) -> Result<Arc<dyn InferenceEngine>, InferenceError> {
        let model_type: ModelType = model_id.parse()?;
        debug!(model_id, model = %model_type, "Resolved inference engine");
        let engine: Arc<dyn InferenceEngine> = match model_type {
            ModelType::Mlp => self.mlp.clone() as Arc<dyn InferenceEngine>,
            ModelType::Cnn => self.cnn.clone() as Arc<dyn InferenceEngine>,
        };
        Ok(engine)
    }
}

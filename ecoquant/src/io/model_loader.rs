// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Reads and writes persisted model weights.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use crate::error::InferenceError;

/// Loads a JSON weights document, reporting an absent file as [`InferenceError::ModelNotFound`].
pub fn load_weights<T: DeserializeOwned>(model: &str, path: &str) -> Result<T, InferenceError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => InferenceError::ModelNotFound {
            model: model.to_string(),
            path: path.to_string(),
        },
        _ => InferenceError::CorruptWeights {
            path: path.to_string(),
            reason: e.to_string(),
        },
    })?;

    serde_json::from_reader(BufReader::new(file)).map_err(|e| InferenceError::CorruptWeights {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Writes a weights document, creating parent directories.
pub fn save_weights<T: Serialize>(weights: &T, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, weights)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::env;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tiny {
        weight: Vec<f32>,
    }

    #[test]
    fn test_round_trip_and_missing() {
        let path = env::temp_dir()
            .join(format!("ecoquant_weights_{}", uuid::Uuid::new_v4()))
            .join("tiny.json");
        let tiny = Tiny {
            weight: vec![0.25, -1.0],
        };

        save_weights(&tiny, &path).unwrap();
        let loaded: Tiny = load_weights("TINY", path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, tiny);

        fs::remove_dir_all(path.parent().unwrap()).unwrap();

        let missing = load_weights::<Tiny>("TINY", path.to_str().unwrap());
        assert!(matches!(
            missing,
            Err(InferenceError::ModelNotFound { ref model, .. }) if model == "TINY"
        ));
    }

    #[test]
    fn test_corrupt_weights() {
        let path = env::temp_dir().join(format!("ecoquant_corrupt_{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, "{ not json").unwrap();

        let result = load_weights::<Tiny>("TINY", path.to_str().unwrap());
        assert!(matches!(result, Err(InferenceError::CorruptWeights { .. })));

        fs::remove_file(path).unwrap();
    }
}

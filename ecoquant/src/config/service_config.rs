// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Service configuration module to read the configurations from a JSON string or the environment.

use serde::Deserialize;
use std::fmt::Display;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::config::TrackerConfig;
use crate::error::ConfigError;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port_number() -> u16 {
    8000
}

fn default_database_path() -> String {
    "ecoquant-store.json".to_string()
}

fn default_mlp_model_path() -> String {
    "trained_models/mlp_maintenance_v1.json".to_string()
}

fn default_cnn_model_path() -> String {
    "trained_models/cnn_mnist_v1.json".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file() -> String {
    "app.log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_buffer_capacity() -> usize {
    60
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port_number")]
    pub port_number: u16,
    pub upload_dir: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_mlp_model_path")]
    pub mlp_model_path: String,
    #[serde(default = "default_cnn_model_path")]
    pub cnn_model_path: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub cloudwatch_namespace: Option<String>,
    #[serde(default = "default_metrics_buffer_capacity")]
    pub metrics_buffer_capacity: usize,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

impl ServiceConfig {
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_json::from_str(json_str)?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `KEY -> value` lookups, using the variable names the
    /// service is deployed with.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let tracker_defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            powercap_root: get("TRACKER_POWERCAP_ROOT").unwrap_or(tracker_defaults.powercap_root),
            meminfo_path: get("TRACKER_MEMINFO_PATH").unwrap_or(tracker_defaults.meminfo_path),
            cpu_fallback_watts: parse_or(
                &get,
                "TRACKER_CPU_FALLBACK_WATTS",
                tracker_defaults.cpu_fallback_watts,
            )?,
            ram_watts_per_gb: parse_or(
                &get,
                "TRACKER_RAM_WATTS_PER_GB",
                tracker_defaults.ram_watts_per_gb,
            )?,
            carbon_intensity_kg_per_kwh: parse_or(
                &get,
                "TRACKER_CARBON_INTENSITY",
                tracker_defaults.carbon_intensity_kg_per_kwh,
            )?,
        };

        Ok(ServiceConfig {
            host: get("HOST").unwrap_or_else(default_host),
            port_number: parse_or(&get, "PORT", default_port_number())?,
            upload_dir: get("UPLOAD_DIR").ok_or(ConfigError::Missing("UPLOAD_DIR"))?,
            database_path: get("DATABASE_PATH").unwrap_or_else(default_database_path),
            mlp_model_path: get("MODEL_PATH").unwrap_or_else(default_mlp_model_path),
            cnn_model_path: get("CNN_MODEL_PATH").unwrap_or_else(default_cnn_model_path),
            log_dir: get("LOG_DIR").unwrap_or_else(default_log_dir),
            log_file: get("LOG_FILE").unwrap_or_else(default_log_file),
            log_level: get("LOG_LEVEL").unwrap_or_else(default_log_level),
            cloudwatch_namespace: get("CLOUDWATCH_NAMESPACE"),
            metrics_buffer_capacity: parse_or(
                &get,
                "METRICS_BUFFER_CAPACITY",
                default_metrics_buffer_capacity(),
            )?,
            tracker,
        })
    }

    /// Checks the values and creates the upload and log directories.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_dir.trim().is_empty() {
            return Err(ConfigError::Missing("UPLOAD_DIR"));
        }
        self.socket_addr()?;
        if self.metrics_buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "METRICS_BUFFER_CAPACITY",
                reason: "must be at least 1".to_string(),
            });
        }
        self.tracker.validate()?;

        for dir in [&self.upload_dir, &self.log_dir] {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|e| ConfigError::Invalid {
            key: "HOST",
            reason: format!("{}", e),
        })?;
        Ok(SocketAddr::new(ip, self.port_number))
    }
}

fn parse_or<T, F>(get: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_parse_valid_json() {
        let json = r#"{
            "host": "0.0.0.0",
            "port_number": 8080,
            "upload_dir": "/var/ecoquant/uploads",
            "mlp_model_path": "s3://ecoquant-models/mlp_maintenance_v2.json",
            "cloudwatch_namespace": "EcoQuant",
            "tracker": { "carbon_intensity_kg_per_kwh": 0.233 }
        }"#;

        let config = ServiceConfig::from_json(json).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port_number, 8080);
        assert_eq!(config.upload_dir, "/var/ecoquant/uploads");
        assert_eq!(
            config.mlp_model_path,
            "s3://ecoquant-models/mlp_maintenance_v2.json"
        );
        assert_eq!(config.cloudwatch_namespace.as_deref(), Some("EcoQuant"));
        assert_eq!(config.tracker.carbon_intensity_kg_per_kwh, 0.233);
        assert_eq!(config.tracker.cpu_fallback_watts, 42.5);
    }

    #[test]
    fn test_default_values() {
        let json = r#"{ "upload_dir": "uploads" }"#;

        let config = ServiceConfig::from_json(json).unwrap();

        assert_eq!(config.port_number, default_port_number());
        assert_eq!(config.database_path, default_database_path());
        assert_eq!(config.cnn_model_path, default_cnn_model_path());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.cloudwatch_namespace, None);
        assert_eq!(config.tracker, TrackerConfig::default());
    }

    #[test]
    fn test_missing_required_fields() {
        let result = ServiceConfig::from_json(r#"{ "port_number": 8000 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_types() {
        let json = r#"{ "upload_dir": "uploads", "port_number": "not-a-number" }"#;
        assert!(ServiceConfig::from_json(json).is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("UPLOAD_DIR", "/tmp/uploads"),
            ("PORT", "9000"),
            ("MODEL_PATH", "weights/mlp.json"),
            ("LOG_LEVEL", "debug"),
            ("TRACKER_CARBON_INTENSITY", "0.1"),
        ]))
        .unwrap();

        assert_eq!(config.upload_dir, "/tmp/uploads");
        assert_eq!(config.port_number, 9000);
        assert_eq!(config.mlp_model_path, "weights/mlp.json");
        assert_eq!(config.cnn_model_path, default_cnn_model_path());
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.tracker.carbon_intensity_kg_per_kwh, 0.1);
    }

    #[test]
    fn test_from_lookup_missing_upload_dir() {
        let result = ServiceConfig::from_lookup(lookup_from(&[("PORT", "9000")]));
        assert!(matches!(result, Err(ConfigError::Missing("UPLOAD_DIR"))));

        let blank = ServiceConfig::from_lookup(lookup_from(&[("UPLOAD_DIR", "  ")]));
        assert!(matches!(blank, Err(ConfigError::Missing("UPLOAD_DIR"))));
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let result =
            ServiceConfig::from_lookup(lookup_from(&[("UPLOAD_DIR", "u"), ("PORT", "eighty")]));
        assert!(matches!(result, Err(ConfigError::Invalid { key: "PORT", .. })));
    }

    #[test]
    fn test_validate_rejects_bad_host() {
        let mut config = ServiceConfig::from_json(r#"{ "upload_dir": "uploads" }"#).unwrap();
        config.host = "not an ip".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "HOST", .. })
        ));
    }

    #[test]
    fn test_validate_creates_directories() {
        let root = std::env::temp_dir().join(format!("ecoquant_config_{}", uuid::Uuid::new_v4()));
        let mut config = ServiceConfig::from_json(r#"{ "upload_dir": "uploads" }"#).unwrap();
        config.upload_dir = root.join("uploads").to_string_lossy().to_string();
        config.log_dir = root.join("logs").to_string_lossy().to_string();

        config.validate().unwrap();

        assert!(root.join("uploads").is_dir());
        assert!(root.join("logs").is_dir());
        fs::remove_dir_all(root).unwrap();
    }
}

// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Energy tracker configuration.

use serde::Deserialize;

use crate::error::ConfigError;

fn default_powercap_root() -> String {
    "/sys/class/powercap".to_string()
}

fn default_meminfo_path() -> String {
    "/proc/meminfo".to_string()
}

/// Half of an 85 W TDP, used when no RAPL counter is readable.
fn default_cpu_fallback_watts() -> f64 {
    42.5
}

/// 3 W per 8 GB of installed memory.
fn default_ram_watts_per_gb() -> f64 {
    0.375
}

/// World average grid intensity in kg CO2-eq per kWh.
fn default_carbon_intensity() -> f64 {
    0.475
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackerConfig {
    #[serde(default = "default_powercap_root")]
    pub powercap_root: String,
    #[serde(default = "default_meminfo_path")]
    pub meminfo_path: String,
    #[serde(default = "default_cpu_fallback_watts")]
    pub cpu_fallback_watts: f64,
    #[serde(default = "default_ram_watts_per_gb")]
    pub ram_watts_per_gb: f64,
    #[serde(default = "default_carbon_intensity")]
    pub carbon_intensity_kg_per_kwh: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            powercap_root: default_powercap_root(),
            meminfo_path: default_meminfo_path(),
            cpu_fallback_watts: default_cpu_fallback_watts(),
            ram_watts_per_gb: default_ram_watts_per_gb(),
            carbon_intensity_kg_per_kwh: default_carbon_intensity(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("TRACKER_CPU_FALLBACK_WATTS", self.cpu_fallback_watts),
            ("TRACKER_RAM_WATTS_PER_GB", self.ram_watts_per_gb),
            ("TRACKER_CARBON_INTENSITY", self.carbon_intensity_kg_per_kwh),
        ];
        for (key, value) in checks {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("must be a non-negative number, got {}", value),
                });
            }
        }
        Ok(())
    }
}

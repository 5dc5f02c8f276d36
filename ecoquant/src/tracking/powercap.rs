// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

//! Host energy tracker backed by the Linux powercap (RAPL) interface.
//!
//! CPU energy comes from the package-level `energy_uj` counters when they are readable,
//! otherwise from a constant fallback wattage over the window. RAM power is estimated
//! from the installed memory size. Emissions are energy times the configured carbon
//! intensity of the grid.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::TrackerConfig;
use crate::tracking::{EmissionsData, ResourceTracker};

const MICROJOULES_PER_KWH: f64 = 3.6e12;
const SECONDS_PER_HOUR: f64 = 3600.0;
const KIB_PER_GIB: f64 = 1024.0 * 1024.0;

/// One RAPL package domain.
#[derive(Debug, Clone)]
struct RaplDomain {
    energy_path: PathBuf,
    max_energy_uj: u64,
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    counters: Option<Vec<u64>>,
}

#[derive(Debug)]
pub struct PowercapTracker {
    config: TrackerConfig,
    domains: Vec<RaplDomain>,
    ram_watts: f64,
    window: Option<Window>,
}

impl PowercapTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let domains = discover_domains(Path::new(&config.powercap_root));
        let ram_watts = match total_memory_gib(Path::new(&config.meminfo_path)) {
            Some(gib) => gib * config.ram_watts_per_gb,
            None => {
                warn!(
                    path = %config.meminfo_path,
                    "Could not read total memory, RAM energy will be reported as zero"
                );
                0.0
            }
        };
        debug!(
            rapl_domains = domains.len(),
            ram_watts, "Powercap tracker initialised"
        );

        PowercapTracker {
            config,
            domains,
            ram_watts,
            window: None,
        }
    }

    fn read_counters(&self) -> Option<Vec<u64>> {
        if self.domains.is_empty() {
            return None;
        }
        self.domains
            .iter()
            .map(|domain| read_u64(&domain.energy_path))
            .collect()
    }

    fn cpu_energy_kwh(&self, start: Option<&[u64]>, end: Option<&[u64]>, seconds: f64) -> f64 {
        match (start, end) {
            (Some(start), Some(end)) if start.len() == end.len() => {
                let microjoules: u64 = self
                    .domains
                    .iter()
                    .zip(start.iter().zip(end.iter()))
                    .map(|(domain, (&before, &after))| {
                        counter_delta(before, after, domain.max_energy_uj)
                    })
                    .sum();
                microjoules as f64 / MICROJOULES_PER_KWH
            }
            _ => self.config.cpu_fallback_watts * seconds / SECONDS_PER_HOUR / 1000.0,
        }
    }
}

impl ResourceTracker for PowercapTracker {
    fn start(&mut self) {
        if self.window.is_some() {
            warn!("Tracker started twice, restarting the measurement window");
        }
        self.window = Some(Window {
            started_at: Instant::now(),
            counters: self.read_counters(),
        });
    }

    fn stop(&mut self) -> EmissionsData {
        let Some(window) = self.window.take() else {
            warn!("Tracker stopped without being started");
            return EmissionsData::default();
        };
        let seconds = window.started_at.elapsed().as_secs_f64();
        let end_counters = self.read_counters();

        let cpu_energy_kwh =
            self.cpu_energy_kwh(window.counters.as_deref(), end_counters.as_deref(), seconds);
        let ram_energy_kwh = self.ram_watts * seconds / SECONDS_PER_HOUR / 1000.0;
        let energy_consumed_kwh = cpu_energy_kwh + ram_energy_kwh;

        EmissionsData {
            duration_seconds: seconds,
            energy_consumed_kwh,
            cpu_energy_kwh,
            ram_energy_kwh,
            emissions_kg: energy_consumed_kwh * self.config.carbon_intensity_kg_per_kwh,
        }
    }
}

/// Package domains are the top-level `intel-rapl:N` zones; sub-zones are counted inside them.
fn discover_domains(root: &Path) -> Vec<RaplDomain> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut domains: Vec<RaplDomain> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("intel-rapl:") && name.matches(':').count() == 1)
                .unwrap_or(false)
        })
        .filter_map(|path| {
            let energy_path = path.join("energy_uj");
            read_u64(&energy_path)?;
            let max_energy_uj = read_u64(&path.join("max_energy_range_uj")).unwrap_or(u64::MAX);
            Some(RaplDomain {
                energy_path,
                max_energy_uj,
            })
        })
        .collect();
    domains.sort_by(|a, b| a.energy_path.cmp(&b.energy_path));
    domains
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn total_memory_gib(meminfo: &Path) -> Option<f64> {
    let content = fs::read_to_string(meminfo).ok()?;
    content
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kib| kib.parse::<f64>().ok())
        .map(|kib| kib / KIB_PER_GIB)
}

/// Energy between two counter reads, allowing for a single wraparound.
fn counter_delta(before: u64, after: u64, max: u64) -> u64 {
    if after >= before {
        after - before
    } else {
        max.saturating_sub(before).saturating_add(after)
    }
}

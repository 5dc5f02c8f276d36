// Copyright (c) 2025 Pratik Barhate
// Licensed under the MIT License. See the LICENSE file in the project root for more information.

use std::error::Error;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ServiceConfig;

pub(crate) fn log_file_path(config: &ServiceConfig) -> PathBuf {
    Path::new(&config.log_dir).join(&config.log_file)
}

/// Installs the global subscriber: stdout plus an appending plain-text log file.
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &ServiceConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(config))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .try_init()?;
    Ok(())
}

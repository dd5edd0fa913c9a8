//! Structured logging setup
//!
//! Console output on stderr plus a daily-rotating JSON log file under the
//! platform config directory. `RUST_LOG` overrides the default level.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the logging system; returns the log directory.
pub fn init_logging(verbose: bool) -> Result<PathBuf> {
    let log_dir = log_directory()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "nscan.log");

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .json();

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("building log filter")?;

    let init_result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = init_result {
        // Tests and embedders may have installed a subscriber already.
        if e.to_string().contains("already been set") {
            return Ok(log_dir);
        }
        return Err(anyhow::anyhow!(e.to_string()));
    }

    Ok(log_dir)
}

fn log_directory() -> Result<PathBuf> {
    let base = if cfg!(target_os = "windows") {
        dirs::data_local_dir().context("no local data directory")?
    } else {
        dirs::config_dir().context("no config directory")?
    };
    Ok(base.join("nscan").join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_directory_is_under_app_name() {
        let dir = log_directory().expect("log directory");
        assert!(dir.to_string_lossy().contains("nscan"));
        assert!(dir.to_string_lossy().contains("logs"));
    }
}

//! Structured logging via `tracing`.
//!
//! Reads `LOG_LEVEL`/`RUST_LOG` for verbosity and `LOG_FORMAT` (`pretty` or
//! `json`) for the sink format, with an optional rotating file appender.
//! `ENABLE_BLOCKCHAIN_LOGS`/`ENABLE_DATABASE_LOGS` are consulted by the
//! chain client and persistence layer respectively to decide whether to emit
//! their debug-level spans; both default to the `EnvFilter` behavior when
//! unset.

use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: String,
    pub log_file: Option<String>,
    pub rotation: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: std::env::var("RUST_LOG")
                .or_else(|_| std::env::var("LOG_LEVEL"))
                .unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            log_file: std::env::var("LOG_FILE").ok(),
            rotation: "daily".to_string(),
        }
    }
}

/// Installs the global `tracing` subscriber. Must be called once, before any
/// other module logs.
pub fn init_tracing(config: TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if let Some(log_file_path) = config.log_file {
        let path = std::path::Path::new(&log_file_path);
        let directory = path.parent().ok_or("invalid log file path: no parent directory")?;
        let filename_prefix = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or("invalid log file path: no filename")?;

        let file_appender = match config.rotation.as_str() {
            "daily" => rolling::daily(directory, filename_prefix),
            "hourly" => rolling::hourly(directory, filename_prefix),
            "never" => rolling::never(directory, path.file_name().unwrap()),
            _ => rolling::daily(directory, filename_prefix),
        };

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        std::mem::forget(guard);

        if config.log_format == "json" {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_current_span(true).with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(true)
                        .with_line_number(true)
                        .with_writer(non_blocking),
                )
                .init();
        }
    } else if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_file(true).with_line_number(true))
            .init();
    }

    Ok(())
}

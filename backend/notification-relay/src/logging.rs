use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Config, LogFormat};
use crate::error::AppError;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. With a non-empty `log_path`
/// output is appended to that file instead of stdout.
pub fn init_tracing(config: &Config) -> Result<(), AppError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},actix_server=warn,h2=warn", config.log_level)));

    let writer = if config.log_path.is_empty() {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_path)
            .map_err(|e| AppError::Config(format!("log file {}: {e}", config.log_path)))?;
        BoxMakeWriter::new(Mutex::new(file))
    };

    let builder = fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_target(false);

    let result = match config.log_format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    result.map_err(|e| AppError::Config(format!("tracing subscriber: {e}")))
}

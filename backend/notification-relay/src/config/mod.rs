use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::broker::{BrokerConfig, DEFAULT_INBOX_CAPACITY, DEFAULT_INTAKE_CAPACITY};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // SSE listener
    pub http_host: String,
    pub http_port: u16,

    // PushMessage listener
    pub grpc_host: String,
    pub grpc_port: u16,

    /// Internal API used to verify tokens; reported at startup only
    pub internal_api_addr: String,
    pub service_version: String,

    // Observability
    pub log_path: String,
    pub log_level: String,
    pub log_format: LogFormat,

    // Backpressure
    pub intake_capacity: usize,
    pub inbox_capacity: usize,
    pub intake_timeout_ms: u64,

    /// Idle period before a stream gets a keep-alive comment
    pub keep_alive_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .set_default("http_host", "0.0.0.0")?
            .set_default("http_port", 55102)?
            .set_default("grpc_host", "0.0.0.0")?
            .set_default("grpc_port", 55100)?
            .set_default("internal_api_addr", "")?
            .set_default("service_version", env!("CARGO_PKG_VERSION"))?
            .set_default("log_path", "")?
            .set_default("log_level", "info")?
            .set_default("log_format", "json")?
            .set_default("intake_capacity", DEFAULT_INTAKE_CAPACITY as u64)?
            .set_default("inbox_capacity", DEFAULT_INBOX_CAPACITY as u64)?
            .set_default("intake_timeout_ms", 100)?
            .set_default("keep_alive_secs", 15)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.http_port == 0 {
            return Err(AppError::Config("HTTP port must be greater than 0".into()));
        }

        if self.grpc_port == 0 {
            return Err(AppError::Config("gRPC port must be greater than 0".into()));
        }

        if self.http_port == self.grpc_port && self.http_host == self.grpc_host {
            return Err(AppError::Config(
                "HTTP and gRPC listeners must not share an address".into(),
            ));
        }

        if self.intake_capacity == 0 {
            return Err(AppError::Config("intake capacity must be greater than 0".into()));
        }

        if self.inbox_capacity == 0 {
            return Err(AppError::Config("inbox capacity must be greater than 0".into()));
        }

        if self.keep_alive_secs == 0 {
            return Err(AppError::Config("keep-alive interval must be greater than 0".into()));
        }

        Ok(())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn grpc_addr(&self) -> String {
        format!("{}:{}", self.grpc_host, self.grpc_port)
    }

    pub fn intake_timeout(&self) -> Duration {
        Duration::from_millis(self.intake_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig {
            intake_capacity: self.intake_capacity,
            inbox_capacity: self.inbox_capacity,
        }
    }
}

pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod grpc;
pub mod handlers;
pub mod ingress;
pub mod logging;
pub mod metrics;
pub mod models;


pub use auth::{Authenticator, QueryTokenAuthenticator};
pub use broker::{Broker, BrokerConfig, BrokerError, Session};
pub use config::Config;
pub use error::{AppError, Result};
pub use ingress::{IngressAdapter, PushOutcome, RejectReason};
pub use models::{ChannelId, DispatchEvent, Message};

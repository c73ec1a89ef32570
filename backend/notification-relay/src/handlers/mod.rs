/// HTTP handlers for the relay
pub mod sse;
pub mod status;

pub use sse::{event_stream, streaming_capability, subscribe, StreamState};
pub use status::ServiceInfo;

use actix_web::web;

/// Register every HTTP route
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    status::register_routes(cfg);
    sse::register_routes(cfg);
}

/// Server-Sent Events endpoint: one long-lived stream per client
///
/// Endpoint: GET /?token=<token>
///
/// Lifecycle of a connection:
/// 1. Capability check (HTTP/1.0 peers cannot hold an open chunked body)
/// 2. Authentication through the configured [`Authenticator`]
/// 3. Registration with the broker core, which also takes a counter slot
/// 4. Stream headers, then one SSE frame per inbox message
/// 5. Teardown when the peer goes away, the inbox is closed or the broker
///    shuts down; the [`Session`] drop runs it on every path
///
/// actix only notices a closed socket when it writes to it, so an idle
/// stream emits an SSE comment every keep-alive period.
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    http::{header, Version},
    web, HttpRequest, HttpResponse, HttpResponseBuilder,
};
use bytes::Bytes;
use futures::{stream, FutureExt, Stream};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::auth::Authenticator;
use crate::broker::{Broker, Session};
use crate::error::{AppError, Result};

pub const ALLOW_METHODS: &str = "GET, HEAD, OPTIONS, POST, PUT";
pub const ALLOW_HEADERS: &str = "Cache-Control, Access-Control-Allow-Headers, Origin, \
X-Requested-With, Content-Type, Access-Control-Request-Method, \
Access-Control-Request-Headers, Access-Control-Allow-Methods, Access-Control-Allow-Origin";

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// SSE comment line; clients ignore it
pub const KEEP_ALIVE_FRAME: &[u8] = b": ping\n\n";

/// Shared state of the streaming endpoint
#[derive(Clone)]
pub struct StreamState {
    pub broker: Broker,
    pub authenticator: Arc<dyn Authenticator>,
    pub keep_alive: Duration,
}

impl StreamState {
    pub fn new(broker: Broker, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            broker,
            authenticator,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Whether this connection can carry an open-ended event stream
pub fn streaming_capability(req: &HttpRequest) -> Result<()> {
    match req.version() {
        Version::HTTP_09 | Version::HTTP_10 => Err(AppError::StreamingUnsupported),
        _ => Ok(()),
    }
}

pub async fn subscribe(req: HttpRequest, state: web::Data<StreamState>) -> Result<HttpResponse> {
    if let Err(e) = streaming_capability(&req) {
        warn!(version = ?req.version(), "streaming unsupported by client");
        return Err(e);
    }

    let channel_id = state.authenticator.authenticate(&req).map_err(|e| {
        warn!(error = %e, "failed to authenticate connection");
        AppError::from(e)
    })?;

    let session = state.broker.register(channel_id)?;
    info!(
        channel_id = %session.channel_id(),
        connection_id = %session.id(),
        "waiting for messages"
    );

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("*")
        .to_string();

    let mut response = HttpResponse::Ok();
    stream_headers(&mut response, &origin);
    Ok(response.streaming(event_stream(session, state.keep_alive)))
}

fn stream_headers(builder: &mut HttpResponseBuilder, origin: &str) {
    builder
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.to_string()))
        .insert_header((header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOW_HEADERS));
}

/// Turn a session into the response body.
///
/// The stream ends when the session does. Without traffic a keep-alive
/// comment goes out every `keep_alive`. A panic while producing a frame ends
/// this stream only.
pub fn event_stream(
    session: Session,
    keep_alive: Duration,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> {
    let period = keep_alive.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    stream::unfold((session, ticker), |(mut session, mut ticker)| async move {
        match AssertUnwindSafe(next_frame(&mut session, &mut ticker))
            .catch_unwind()
            .await
        {
            Ok(Some(frame)) => Some((Ok(frame), (session, ticker))),
            Ok(None) => {
                info!(channel_id = %session.channel_id(), "stream closed");
                None
            }
            Err(_) => {
                error!(channel_id = %session.channel_id(), "stream panicked, closing connection");
                None
            }
        }
    })
}

async fn next_frame(session: &mut Session, ticker: &mut Interval) -> Option<Bytes> {
    loop {
        let message = tokio::select! {
            biased;
            message = session.recv() => message?,
            _ = ticker.tick() => {
                trace!(channel_id = %session.channel_id(), "keep-alive");
                return Some(Bytes::from_static(KEEP_ALIVE_FRAME));
            }
        };
        ticker.reset();

        match message.to_event_frame() {
            Ok(frame) => {
                debug!(channel_id = %session.channel_id(), topic = message.topic(), "push message");
                return Some(frame);
            }
            Err(e) => {
                warn!(channel_id = %session.channel_id(), error = %e, "failed to encode message");
            }
        }
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(subscribe));
}

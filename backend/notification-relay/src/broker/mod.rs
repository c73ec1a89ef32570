/// Broker core: the single serialization point of the relay
///
/// Architecture:
/// 1. `Broker`: cheap cloneable handle passed to the ingress adapter and to
///    every connection handler
/// 2. `BrokerCore`: coordinator task that owns the [`Registry`] and applies
///    register / deregister / dispatch one at a time
/// 3. `Session`: what a connection handler holds while its stream is open;
///    dropping it deregisters the connection and releases its counter slot
///
/// Lifecycle commands travel on an unbounded channel so teardown can never
/// be lost to intake pressure; dispatch events travel on the bounded intake
/// queue. The coordinator always drains pending lifecycle commands before
/// the next dispatch event.
pub mod counter;
pub mod registry;

pub use counter::{ConnectionCounter, ConnectionPermit};
pub use registry::{ConnectionHandle, ConnectionId, DispatchOutcome, Registry};

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::models::{ChannelId, DispatchEvent, Message};

pub const DEFAULT_INTAKE_CAPACITY: usize = 1000;
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker is shut down")]
    Closed,

    #[error("intake queue is full")]
    IntakeFull,
}

#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// Bound of the intake queue shared by all producers
    pub intake_capacity: usize,
    /// Bound of each connection's inbox
    pub inbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

enum Control {
    Register(ConnectionHandle),
    Deregister {
        channel_id: ChannelId,
        id: ConnectionId,
    },
}

/// Handle to the broker core
#[derive(Clone)]
pub struct Broker {
    intake: mpsc::Sender<DispatchEvent>,
    control: mpsc::UnboundedSender<Control>,
    shutdown: Arc<watch::Sender<bool>>,
    counter: ConnectionCounter,
    inbox_capacity: usize,
}

impl Broker {
    /// Build a broker handle and its not-yet-running coordinator
    pub fn new(config: BrokerConfig) -> (Self, BrokerCore) {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let broker = Self {
            intake: intake_tx,
            control: control_tx,
            shutdown: Arc::new(shutdown_tx),
            counter: ConnectionCounter::new(),
            inbox_capacity: config.inbox_capacity.max(1),
        };
        let core = BrokerCore {
            registry: Registry::new(),
            intake: intake_rx,
            control: control_rx,
            shutdown: shutdown_rx,
        };

        (broker, core)
    }

    /// Build a broker and spawn its coordinator on the current runtime
    pub fn start(config: BrokerConfig) -> (Self, JoinHandle<()>) {
        let (broker, core) = Self::new(config);
        let handle = tokio::spawn(core.run());
        (broker, handle)
    }

    /// Open a connection under `channel_id`.
    ///
    /// Any connection already registered under the same channel is closed by
    /// the coordinator when it installs this one.
    pub fn register(&self, channel_id: ChannelId) -> Result<Session, BrokerError> {
        if self.is_shutting_down() {
            return Err(BrokerError::Closed);
        }

        let (handle, inbox) = ConnectionHandle::new(channel_id.clone(), self.inbox_capacity);
        let id = handle.id();
        self.control
            .send(Control::Register(handle))
            .map_err(|_| BrokerError::Closed)?;

        // counted from submission; a connection superseded before the core
        // installs it still holds its slot until its session drops
        let lease = Lease {
            control: self.control.clone(),
            channel_id: channel_id.clone(),
            id,
            _permit: self.counter.acquire(),
        };

        Ok(Session {
            lease,
            channel_id,
            id,
            inbox,
            shutdown: self.shutdown.subscribe(),
        })
    }

    /// Place an event on the intake queue.
    ///
    /// With a zero `wait` a full queue rejects immediately; otherwise the call
    /// waits at most `wait` for room.
    pub async fn submit(&self, event: DispatchEvent, wait: Duration) -> Result<(), BrokerError> {
        if self.is_shutting_down() {
            return Err(BrokerError::Closed);
        }

        if wait.is_zero() {
            self.intake.try_send(event).map_err(|e| match e {
                TrySendError::Full(_) => BrokerError::IntakeFull,
                TrySendError::Closed(_) => BrokerError::Closed,
            })
        } else {
            self.intake
                .send_timeout(event, wait)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => BrokerError::IntakeFull,
                    SendTimeoutError::Closed(_) => BrokerError::Closed,
                })
        }
    }

    /// Broadcast the shutdown signal to the coordinator and every session
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("broker shutdown requested");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once shutdown has been requested
    pub fn shutdown_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            // an Err means every sender is gone, which is shutdown as well
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }

    pub fn live_connections(&self) -> usize {
        self.counter.current()
    }

    pub fn counter(&self) -> &ConnectionCounter {
        &self.counter
    }
}

/// Deregisters its connection and releases the counter slot when dropped.
struct Lease {
    control: mpsc::UnboundedSender<Control>,
    channel_id: ChannelId,
    id: ConnectionId,
    _permit: ConnectionPermit,
}

impl Drop for Lease {
    fn drop(&mut self) {
        // the coordinator may already be gone during shutdown
        let _ = self.control.send(Control::Deregister {
            channel_id: self.channel_id.clone(),
            id: self.id,
        });
        debug!(channel_id = %self.channel_id, connection_id = %self.id, "connection released");
    }
}

/// Connection-side view of one registered connection
pub struct Session {
    // dropped first: deregister, then release the counter, then the inbox
    lease: Lease,
    channel_id: ChannelId,
    id: ConnectionId,
    inbox: mpsc::Receiver<Message>,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the inbox is closed (superseded or broker stopped)
    /// or the shutdown signal fires.
    pub async fn recv(&mut self) -> Option<Message> {
        if *self.shutdown.borrow() {
            return None;
        }

        tokio::select! {
            biased;
            msg = self.inbox.recv() => msg,
            _ = self.shutdown.changed() => None,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel_id", &self.channel_id)
            .field("id", &self.id)
            .field("lease", &self.lease.id)
            .finish()
    }
}

/// Coordinator task owning the registry
pub struct BrokerCore {
    registry: Registry,
    intake: mpsc::Receiver<DispatchEvent>,
    control: mpsc::UnboundedReceiver<Control>,
    shutdown: watch::Receiver<bool>,
}

impl BrokerCore {
    pub async fn run(mut self) {
        info!("broker core started");

        if !*self.shutdown.borrow() {
            loop {
                tokio::select! {
                    biased;
                    Some(cmd) = self.control.recv() => self.apply(cmd),
                    Some(event) = self.intake.recv() => self.dispatch(event),
                    _ = self.shutdown.changed() => break,
                    else => break,
                }
            }
        }

        // stop intake first so producers see Closed instead of a silent queue
        self.intake.close();
        self.control.close();
        let closed = self.registry.close_all();
        info!(closed_connections = closed, "broker core stopped");
    }

    fn apply(&mut self, cmd: Control) {
        match cmd {
            Control::Register(handle) => {
                let channel_id = handle.channel_id().clone();
                let id = handle.id();
                if let Some(previous) = self.registry.register(handle) {
                    metrics::record_superseded();
                    info!(
                        channel_id = %channel_id,
                        previous = %previous.id(),
                        "closing superseded connection"
                    );
                    drop(previous);
                }
                info!(channel_id = %channel_id, connection_id = %id, "client registered");
            }
            Control::Deregister { channel_id, id } => {
                if self.registry.deregister(&channel_id, id) {
                    info!(channel_id = %channel_id, connection_id = %id, "client deregistered");
                }
            }
        }
    }

    fn dispatch(&mut self, event: DispatchEvent) {
        let channel_id = event.channel_id.clone();
        let registry = &mut self.registry;

        match panic::catch_unwind(AssertUnwindSafe(|| registry.dispatch(event))) {
            Ok(outcome) => {
                metrics::record_dispatch(outcome.as_str());
                match outcome {
                    DispatchOutcome::Delivered => {
                        debug!(channel_id = %channel_id, "message dispatched")
                    }
                    DispatchOutcome::NoConnection => {
                        debug!(channel_id = %channel_id, "no live connection, message discarded")
                    }
                    DispatchOutcome::InboxFull => {
                        warn!(channel_id = %channel_id, "client inbox full, message dropped")
                    }
                    DispatchOutcome::InboxClosed => {
                        debug!(channel_id = %channel_id, "client already gone, message discarded")
                    }
                }
            }
            Err(_) => {
                metrics::record_dispatch("panicked");
                error!(channel_id = %channel_id, "dispatch panicked, event discarded");
            }
        }
    }
}

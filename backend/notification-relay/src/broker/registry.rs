/// Connection registry owned by the broker core
///
/// Maps a channel to the one connection currently allowed to receive its
/// messages. The registry is plain data: it is only ever touched from the
/// coordinator task, so it needs no lock.
///
/// Policies:
/// - Last registration wins; the connection it replaces has its inbox closed
/// - Deregistration is by connection identity, so a stale close cannot evict
///   a newer connection under the same channel
/// - Delivery never blocks: a full inbox drops the message
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::models::{ChannelId, DispatchEvent, Message};

/// Unique identifier of one streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Routing entry for one open connection
///
/// Holds the sending half of the connection's inbox. Dropping the handle
/// closes the inbox, which the owning connection observes as termination.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    channel_id: ChannelId,
    inbox: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    /// Create a handle together with the receiving half of its bounded inbox
    pub fn new(channel_id: ChannelId, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            channel_id,
            inbox: tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// False once the owning connection has dropped its inbox receiver
    pub fn is_active(&self) -> bool {
        !self.inbox.is_closed()
    }
}

/// Result of routing one dispatch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    NoConnection,
    InboxFull,
    InboxClosed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered => "delivered",
            DispatchOutcome::NoConnection => "no_connection",
            DispatchOutcome::InboxFull => "inbox_full",
            DispatchOutcome::InboxClosed => "inbox_closed",
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ChannelId, ConnectionHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the live connection for its channel.
    ///
    /// Returns the handle it replaced, if any. The caller decides when to
    /// drop it; dropping closes that connection's inbox.
    pub fn register(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.channel_id.clone(), handle)
    }

    /// Remove the entry for `channel_id` only if it still belongs to `id`.
    pub fn deregister(&mut self, channel_id: &ChannelId, id: ConnectionId) -> bool {
        match self.connections.get(channel_id) {
            Some(handle) if handle.id == id => {
                self.connections.remove(channel_id);
                true
            }
            _ => false,
        }
    }

    /// Route one event to the live connection of its channel
    pub fn dispatch(&mut self, event: DispatchEvent) -> DispatchOutcome {
        let DispatchEvent {
            channel_id,
            message,
        } = event;

        #[cfg(test)]
        if message.topic() == crate::test_support::PANIC_ON_DISPATCH {
            panic!("dispatch failed");
        }

        let Some(handle) = self.connections.get(&channel_id) else {
            return DispatchOutcome::NoConnection;
        };

        match handle.inbox.try_send(message) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(TrySendError::Full(_)) => DispatchOutcome::InboxFull,
            Err(TrySendError::Closed(_)) => {
                // the connection is gone but its deregistration has not arrived yet
                self.connections.remove(&channel_id);
                DispatchOutcome::InboxClosed
            }
        }
    }

    pub fn contains(&self, channel_id: &ChannelId) -> bool {
        self.connections.contains_key(channel_id)
    }

    pub fn connection_id(&self, channel_id: &ChannelId) -> Option<ConnectionId> {
        self.connections.get(channel_id).map(|h| h.id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Drop every handle, closing all inboxes. Returns how many were closed.
    pub fn close_all(&mut self) -> usize {
        let closed = self.connections.len();
        self.connections.clear();
        closed
    }
}

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SSE event name used for every relayed message
pub const EVENT_NAME: &str = "message";

/// Opaque identity of a recipient channel (usually a user ID).
///
/// Matching is exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Payload pushed to a streaming client
///
/// Empty fields are left out of the JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    data: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Render one complete SSE frame:
    /// `event: message\ndata: <json>\n\n`
    pub fn to_event_frame(&self) -> Result<Bytes, serde_json::Error> {
        #[cfg(test)]
        if self.topic == crate::test_support::PANIC_ON_ENCODE {
            panic!("frame encoding failed");
        }

        let json = self.to_json()?;
        Ok(Bytes::from(format!("event: {}\ndata: {}\n\n", EVENT_NAME, json)))
    }
}

/// Unit of work placed on the broker intake queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEvent {
    pub channel_id: ChannelId,
    pub message: Message,
}

impl DispatchEvent {
    pub fn new(channel_id: ChannelId, message: Message) -> Self {
        Self {
            channel_id,
            message,
        }
    }
}

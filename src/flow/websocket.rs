//! WebSocket and raw TCP message streams attached to flows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of WebSocket message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Binary,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "Text",
            MessageType::Binary => "Binary",
        }
    }
}

/// A captured WebSocket message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketMessage {
    pub message_type: MessageType,
    pub from_client: bool,
    pub content: Vec<u8>,
    pub timestamp: DateTime<Utc>,

    /// Set when the operator dropped the message instead of forwarding it
    pub dropped: bool,
}

impl WebSocketMessage {
    pub fn new(message_type: MessageType, from_client: bool, content: &[u8]) -> Self {
        Self {
            message_type,
            from_client,
            content: content.to_vec(),
            timestamp: Utc::now(),
            dropped: false,
        }
    }

    pub fn direction(&self) -> &'static str {
        if self.from_client {
            "→"
        } else {
            "←"
        }
    }
}

/// WebSocket state of an upgraded HTTP flow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebSocketData {
    pub messages: Vec<WebSocketMessage>,
    pub closed_by_client: Option<bool>,
    pub close_code: Option<u16>,
    pub close_reason: Option<String>,
    pub timestamp_end: Option<DateTime<Utc>>,
}

impl WebSocketData {
    pub fn push(&mut self, message: WebSocketMessage) {
        self.messages.push(message);
    }

    /// Mark the session as closed
    pub fn close(&mut self, by_client: bool, code: u16, reason: &str) {
        self.closed_by_client = Some(by_client);
        self.close_code = Some(code);
        self.close_reason = Some(reason.to_string());
        self.timestamp_end = Some(Utc::now());
    }
}

/// A chunk of data on a raw TCP flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpMessage {
    pub from_client: bool,
    pub content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl TcpMessage {
    pub fn new(from_client: bool, content: &[u8]) -> Self {
        Self {
            from_client,
            content: content.to_vec(),
            timestamp: Utc::now(),
        }
    }
}

/// Summary of a message stream, as shown in flow listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagesMeta {
    #[serde(rename = "contentLength")]
    pub content_length: usize,
    pub count: usize,
    pub timestamp_last: Option<f64>,
}

impl MessagesMeta {
    pub fn from_parts<'a>(parts: impl Iterator<Item = (&'a [u8], DateTime<Utc>)>) -> Self {
        let mut meta = MessagesMeta {
            content_length: 0,
            count: 0,
            timestamp_last: None,
        };
        for (content, timestamp) in parts {
            meta.content_length += content.len();
            meta.count += 1;
            meta.timestamp_last = Some(super::epoch_secs(&timestamp));
        }
        meta
    }
}

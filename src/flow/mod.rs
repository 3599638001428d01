//! Flows: the unit of observed traffic
//!
//! A [`Flow`] is one exchange seen by the proxy (HTTP, raw TCP or DNS).
//! Flows are mutated in place by the interception machinery and by observer
//! edits. Edits are reversible through a backup snapshot of the mutable
//! fields, and [`FlowEdit`] gives a scoped two-phase edit on top of that.

mod connection;
mod dns;
mod http;
mod json;
mod update;
mod websocket;

#[cfg(test)]
pub mod testing;

use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use connection::{CertificateInfo, Connection};
pub use dns::{DnsMessage, Question, ResourceRecord};
pub use http::{Headers, Message, Request, Response};
pub use json::flow_to_json;
pub use update::{set_message_content, FlowUpdate};
pub use websocket::{MessageType, MessagesMeta, TcpMessage, WebSocketData, WebSocketMessage};

/// Error message set on flows killed by the operator
pub const KILLED_MESSAGE: &str = "Connection killed";

/// Seconds since the epoch, as exposed to observers
pub(crate) fn epoch_secs(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

/// Terminal error attached to a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub msg: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Protocol-specific part of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FlowData {
    Http {
        request: Request,
        response: Option<Response>,
        websocket: Option<WebSocketData>,
    },
    Tcp {
        messages: Vec<TcpMessage>,
    },
    Dns {
        request: DnsMessage,
        response: Option<DnsMessage>,
    },
}

/// Operator-editable part of a flow, as captured by a backup
///
/// Interception state (`intercepted` and the kill error) is left out: it
/// follows decisions already delivered to the engine and cannot be undone.
#[derive(Debug, Clone, PartialEq)]
struct FlowState {
    data: FlowData,
    comment: String,
    marked: String,
}

/// One observed exchange
#[derive(Debug, Clone)]
pub struct Flow {
    /// Unique ID, never changes
    pub id: String,

    pub client_conn: Connection,
    pub server_conn: Connection,
    pub data: FlowData,
    pub error: Option<ErrorInfo>,

    /// Operator comment
    pub comment: String,

    /// Operator marker (empty when unmarked)
    pub marked: String,

    /// Held by the interception controller
    pub intercepted: bool,

    /// Set by the engine on flows it created for a replay
    pub is_replay: Option<String>,

    pub timestamp_created: DateTime<Utc>,

    backup: Option<Box<FlowState>>,
}

impl Flow {
    fn with_data(data: FlowData, client_conn: Connection, server_conn: Connection) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_conn,
            server_conn,
            data,
            error: None,
            comment: String::new(),
            marked: String::new(),
            intercepted: false,
            is_replay: None,
            timestamp_created: Utc::now(),
            backup: None,
        }
    }

    /// Create an HTTP flow for a request
    pub fn new_http(client_conn: Connection, server_conn: Connection, request: Request) -> Self {
        Self::with_data(
            FlowData::Http {
                request,
                response: None,
                websocket: None,
            },
            client_conn,
            server_conn,
        )
    }

    /// Create an empty raw TCP flow
    pub fn new_tcp(client_conn: Connection, server_conn: Connection) -> Self {
        Self::with_data(FlowData::Tcp { messages: Vec::new() }, client_conn, server_conn)
    }

    /// Create a DNS flow for a query
    pub fn new_dns(client_conn: Connection, server_conn: Connection, request: DnsMessage) -> Self {
        Self::with_data(
            FlowData::Dns {
                request,
                response: None,
            },
            client_conn,
            server_conn,
        )
    }

    /// Flow type name: `http`, `tcp` or `dns`
    pub fn kind(&self) -> &'static str {
        match self.data {
            FlowData::Http { .. } => "http",
            FlowData::Tcp { .. } => "tcp",
            FlowData::Dns { .. } => "dns",
        }
    }

    pub fn request(&self) -> Option<&Request> {
        match &self.data {
            FlowData::Http { request, .. } => Some(request),
            _ => None,
        }
    }

    pub fn request_mut(&mut self) -> Option<&mut Request> {
        match &mut self.data {
            FlowData::Http { request, .. } => Some(request),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match &self.data {
            FlowData::Http { response, .. } => response.as_ref(),
            _ => None,
        }
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        match &mut self.data {
            FlowData::Http { response, .. } => response.as_mut(),
            _ => None,
        }
    }

    /// Attach or replace the response of an HTTP flow
    pub fn set_response(&mut self, new_response: Response) -> bool {
        match &mut self.data {
            FlowData::Http { response, .. } => {
                *response = Some(new_response);
                true
            }
            _ => false,
        }
    }

    pub fn websocket(&self) -> Option<&WebSocketData> {
        match &self.data {
            FlowData::Http { websocket, .. } => websocket.as_ref(),
            _ => None,
        }
    }

    pub fn websocket_mut(&mut self) -> Option<&mut WebSocketData> {
        match &mut self.data {
            FlowData::Http { websocket, .. } => websocket.as_mut(),
            _ => None,
        }
    }

    /// Killed by the operator
    pub fn is_killed(&self) -> bool {
        self.error
            .as_ref()
            .map(|e| e.msg == KILLED_MESSAGE)
            .unwrap_or(false)
    }

    /// Held and not yet resolved
    pub fn killable(&self) -> bool {
        self.intercepted && !self.is_killed()
    }

    /// Hold the flow. Returns false if it already was held or was killed.
    pub fn intercept(&mut self) -> bool {
        if self.intercepted || self.is_killed() {
            return false;
        }
        self.intercepted = true;
        true
    }

    /// Release the flow. Returns false if it was not held.
    pub fn resume(&mut self) -> bool {
        if !self.intercepted {
            return false;
        }
        self.intercepted = false;
        true
    }

    /// Abort the flow. Returns false if it was not killable.
    pub fn kill(&mut self) -> bool {
        if !self.killable() {
            return false;
        }
        self.error = Some(ErrorInfo::new(KILLED_MESSAGE));
        self.intercepted = false;
        true
    }

    fn state(&self) -> FlowState {
        FlowState {
            data: self.data.clone(),
            comment: self.comment.clone(),
            marked: self.marked.clone(),
        }
    }

    fn restore(&mut self, state: FlowState) {
        self.data = state.data;
        self.comment = state.comment;
        self.marked = state.marked;
    }

    /// Snapshot the mutable fields. Does nothing if a backup already exists.
    pub fn backup(&mut self) {
        if self.backup.is_none() {
            self.backup = Some(Box::new(self.state()));
        }
    }

    /// Restore the mutable fields from the backup and drop it
    pub fn revert(&mut self) {
        if let Some(state) = self.backup.take() {
            self.restore(*state);
        }
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// True iff a backup exists and the flow differs from it
    pub fn modified(&self) -> bool {
        match &self.backup {
            Some(state) => **state != self.state(),
            None => false,
        }
    }

    /// Drop the backup, keeping the current state
    pub fn discard_backup(&mut self) {
        self.backup = None;
    }

    /// Open a scoped edit. The flow is restored unless [`FlowEdit::commit`]
    /// is called.
    pub fn begin_edit(&mut self) -> FlowEdit<'_> {
        let pre_image = self.state();
        FlowEdit {
            flow: self,
            pre_image: Some(pre_image),
        }
    }

    /// Copy of this flow under a fresh id, not held and without backup
    pub fn duplicate(&self) -> Flow {
        let mut copy = self.clone();
        copy.id = uuid::Uuid::new_v4().to_string();
        copy.intercepted = false;
        copy.backup = None;
        copy.timestamp_created = Utc::now();
        copy
    }
}

/// Two-phase edit of a flow
///
/// Holds the pre-image of the mutable fields. The guard borrows the flow
/// mutably, so no second edit can be opened while it is alive.
pub struct FlowEdit<'a> {
    flow: &'a mut Flow,
    pre_image: Option<FlowState>,
}

impl FlowEdit<'_> {
    /// Keep the changes
    pub fn commit(mut self) {
        self.pre_image = None;
    }

    /// Throw the changes away
    pub fn abort(mut self) {
        if let Some(state) = self.pre_image.take() {
            self.flow.restore(state);
        }
    }
}

impl Deref for FlowEdit<'_> {
    type Target = Flow;

    fn deref(&self) -> &Flow {
        self.flow
    }
}

impl DerefMut for FlowEdit<'_> {
    fn deref_mut(&mut self) -> &mut Flow {
        self.flow
    }
}

impl Drop for FlowEdit<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.pre_image.take() {
            self.flow.restore(state);
        }
    }
}

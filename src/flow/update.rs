//! Observer edits of a flow's mutable fields
//!
//! Updates are parsed strictly: any unknown top-level or nested field is
//! rejected before the flow is touched.

use serde::Deserialize;

use super::{Flow, Headers, Message};
use crate::contentview;
use crate::error::FlowError;

/// Marker value; the web UI sends either a flag or an emoji shortcode
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Marker {
    Flag(bool),
    Text(String),
}

impl Marker {
    fn into_string(self) -> String {
        match self {
            Marker::Flag(true) => ":default:".to_string(),
            Marker::Flag(false) => String::new(),
            Marker::Text(text) => text,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestUpdate {
    pub method: Option<String>,
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub http_version: Option<String>,
    pub headers: Option<Vec<(String, String)>>,
    pub trailers: Option<Vec<(String, String)>>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseUpdate {
    pub msg: Option<String>,
    pub code: Option<u16>,
    pub http_version: Option<String>,
    pub headers: Option<Vec<(String, String)>>,
    pub trailers: Option<Vec<(String, String)>>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowUpdate {
    pub request: Option<RequestUpdate>,
    pub response: Option<ResponseUpdate>,
    pub comment: Option<String>,
    pub marked: Option<Marker>,
}

/// Replace the decoded body of a message, re-applying its content encoding
pub fn set_message_content<M: Message>(message: &mut M, content: &[u8]) {
    let encoded = contentview::encode_content(content, message.content_encoding());
    let body = match encoded {
        Some(bytes) => bytes,
        None => {
            // unknown encoding: store plain and drop the header
            message.headers_mut().remove("content-encoding");
            content.to_vec()
        }
    };
    if message.headers().contains("content-length") {
        let len = body.len().to_string();
        message.headers_mut().set("content-length", &len);
    }
    message.set_raw_content(Some(body));
}

impl FlowUpdate {
    pub fn from_json(value: serde_json::Value) -> Result<Self, FlowError> {
        serde_json::from_value(value).map_err(|e| FlowError::InvalidArgument(e.to_string()))
    }

    /// Apply every field or none of them
    pub fn apply(self, flow: &mut Flow) -> Result<(), FlowError> {
        let mut edit = flow.begin_edit();

        if let Some(upd) = self.request {
            let request = edit
                .request_mut()
                .ok_or_else(|| FlowError::InvalidArgument("flow has no request".into()))?;
            if let Some(method) = upd.method {
                request.method = method;
            }
            if let Some(scheme) = upd.scheme {
                request.scheme = scheme;
            }
            if let Some(host) = upd.host {
                request.host = host;
            }
            if let Some(port) = upd.port {
                request.port = port;
            }
            if let Some(path) = upd.path {
                request.path = path;
            }
            if let Some(version) = upd.http_version {
                request.http_version = version;
            }
            if let Some(headers) = upd.headers {
                request.headers = Headers::from(headers);
            }
            if let Some(trailers) = upd.trailers {
                request.trailers = Some(Headers::from(trailers));
            }
            if let Some(content) = upd.content {
                set_message_content(request, content.as_bytes());
            }
        }

        if let Some(upd) = self.response {
            let response = edit
                .response_mut()
                .ok_or_else(|| FlowError::InvalidArgument("flow has no response".into()))?;
            if let Some(msg) = upd.msg {
                response.reason = msg;
            }
            if let Some(code) = upd.code {
                response.status_code = code;
            }
            if let Some(version) = upd.http_version {
                response.http_version = version;
            }
            if let Some(headers) = upd.headers {
                response.headers = Headers::from(headers);
            }
            if let Some(trailers) = upd.trailers {
                response.trailers = Some(Headers::from(trailers));
            }
            if let Some(content) = upd.content {
                set_message_content(response, content.as_bytes());
            }
        }

        if let Some(comment) = self.comment {
            edit.comment = comment;
        }
        if let Some(marker) = self.marked {
            edit.marked = marker.into_string();
        }

        edit.commit();
        Ok(())
    }
}

//! Route handlers

use std::sync::{Arc, OnceLock};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{self, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use super::extract::{command_arguments, JsonBody};
use crate::commands::CommandOutcome;
use crate::contentview::{self, ContentHints, ContentView};
use crate::error::{ApiError, FlowError};
use crate::flow::{Flow, FlowData, FlowUpdate, Message};
use crate::session::{MessagePart, Session};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub(super) struct LinesQuery {
    lines: Option<usize>,
}

impl LinesQuery {
    /// `lines=0` means no limit
    fn max_lines(&self) -> Option<usize> {
        self.lines.filter(|&n| n > 0)
    }
}

/// Owned copy of one message body and the headers that steer decoding
struct Body {
    content: Option<Vec<u8>>,
    content_type: Option<String>,
    content_encoding: Option<String>,
    disposition: Option<String>,
}

impl Body {
    fn of(message: &dyn Message) -> Self {
        Self {
            content: message.content().map(<[u8]>::to_vec),
            content_type: message.content_type().map(str::to_string),
            content_encoding: message.content_encoding().map(str::to_string),
            disposition: message.headers().get("content-disposition").map(str::to_string),
        }
    }

    fn hints(&self) -> ContentHints<'_> {
        ContentHints {
            content_type: self.content_type.as_deref(),
            content_encoding: self.content_encoding.as_deref(),
        }
    }
}

fn message_of(flow: &Flow, part: MessagePart) -> Result<&dyn Message, FlowError> {
    let message = match part {
        MessagePart::Request => flow.request().map(|m| m as &dyn Message),
        MessagePart::Response => flow.response().map(|m| m as &dyn Message),
    };
    message.ok_or_else(|| FlowError::InvalidArgument(format!("flow has no {}", part)))
}

/// Copy a message body out of the store so the lock is not held while
/// decoding. Also returns the request path for download file names.
fn copy_body(session: &Session, id: &str, part: MessagePart) -> ApiResult<(Body, String)> {
    let copied = session.with_flow(id, |flow| {
        let body = Body::of(message_of(flow, part)?);
        let path = flow.request().map(|r| r.path.clone()).unwrap_or_default();
        Ok::<_, FlowError>((body, path))
    })??;
    Ok(copied)
}

// --- flows ---------------------------------------------------------------

pub(super) async fn flows(State(session): State<Arc<Session>>) -> Json<Value> {
    Json(session.flows_json())
}

pub(super) async fn delete_flow(
    State(session): State<Arc<Session>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    session.remove_flow(&id)?;
    Ok(StatusCode::OK)
}

pub(super) async fn update_flow(
    State(session): State<Arc<Session>>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<StatusCode> {
    let update = FlowUpdate::from_json(body)?;
    session.update_flow(&id, update)?;
    Ok(StatusCode::OK)
}

pub(super) async fn duplicate_flow(
    State(session): State<Arc<Session>>,
    Path(id): Path<String>,
) -> ApiResult<String> {
    Ok(session.duplicate_flow(&id)?)
}

pub(super) async fn revert_flow(
    State(session): State<Arc<Session>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    session.revert_flow(&id)?;
    Ok(StatusCode::OK)
}

pub(super) async fn replay_flow(
    State(session): State<Arc<Session>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    session.with_flow(&id, |_| ())?;
    session.replay(&id).await?;
    Ok(StatusCode::OK)
}

pub(super) async fn resume_flow(
    State(session): State<Arc<Session>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    session.resume_flow(&id)?;
    Ok(StatusCode::OK)
}

pub(super) async fn kill_flow(
    State(session): State<Arc<Session>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    session.kill_flow(&id)?;
    Ok(StatusCode::OK)
}

pub(super) async fn resume_all(State(session): State<Arc<Session>>) -> StatusCode {
    let resumed = session.resume_all();
    tracing::debug!(resumed, "resumed all intercepted flows");
    StatusCode::OK
}

pub(super) async fn kill_all(State(session): State<Arc<Session>>) -> StatusCode {
    let killed = session.kill_all();
    tracing::debug!(killed, "killed all killable flows");
    StatusCode::OK
}

pub(super) async fn clear(State(session): State<Arc<Session>>) -> StatusCode {
    session.clear();
    StatusCode::OK
}

// --- content -------------------------------------------------------------

fn disposition_filename(disposition: &str) -> Option<String> {
    static FILENAME: OnceLock<Option<Regex>> = OnceLock::new();
    FILENAME
        .get_or_init(|| Regex::new(r#"filename=([-\w" .()]+)"#).ok())
        .as_ref()?
        .captures(disposition)
        .map(|c| c[1].to_string())
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '"' | ' ' | '.' | '(' | ')'))
        .collect()
}

/// `attachment; filename=...`, taken from the message's own
/// Content-Disposition or else the last segment of the request path
fn attachment_header(body: &Body, request_path: &str) -> String {
    let filename = body
        .disposition
        .as_deref()
        .and_then(disposition_filename)
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| {
            let path = request_path.split('?').next().unwrap_or_default();
            path.rsplit('/').next().unwrap_or_default().to_string()
        });
    format!("attachment; filename={}", sanitize_filename(&filename))
}

pub(super) async fn content_data(
    State(session): State<Arc<Session>>,
    Path((id, part)): Path<(String, String)>,
) -> ApiResult<Response> {
    let part: MessagePart = part.parse()?;
    let (body, path) = copy_body(&session, &id, part)?;

    let bytes = match &body.content {
        Some(raw) => contentview::decoded_or_raw(raw, body.content_encoding.as_deref()),
        None => Vec::new(),
    };
    let disposition = HeaderValue::from_str(&attachment_header(&body, &path))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/text")),
        (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, bytes).into_response())
}

/// Replace a body with an upload: the first part of a multipart form, or
/// the request body as is
pub(super) async fn replace_content_data(
    State(session): State<Arc<Session>>,
    Path((id, part)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let part: MessagePart = part.parse()?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let content = contentview::parse_multipart(content_type, &body)
        .and_then(|parts| parts.into_iter().next())
        .map(|first| first.content)
        .unwrap_or_else(|| body.to_vec());

    session.replace_content(&id, part, &content)?;
    Ok(StatusCode::OK)
}

pub(super) async fn content_view(
    State(session): State<Arc<Session>>,
    Path((id, part, view)): Path<(String, String, String)>,
    Query(query): Query<LinesQuery>,
) -> ApiResult<Json<ContentView>> {
    let part: MessagePart = part.parse()?;
    let (body, _) = copy_body(&session, &id, part)?;
    let rendered = contentview::render(body.content.as_deref(), &body.hints(), &view, query.max_lines());
    Ok(Json(rendered))
}

/// WebSocket or TCP messages of a flow, rendered one by one. `lines` caps
/// the total over all messages. Timestamps are whole epoch seconds.
pub(super) async fn messages_view(
    State(session): State<Arc<Session>>,
    Path((id, view)): Path<(String, String)>,
    Query(query): Query<LinesQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let messages: Option<Vec<(bool, Vec<u8>, i64)>> = session.with_flow(&id, |flow| match &flow.data {
        FlowData::Http {
            websocket: Some(ws), ..
        } => Some(
            ws.messages
                .iter()
                .map(|m| (m.from_client, m.content.clone(), m.timestamp.timestamp()))
                .collect(),
        ),
        FlowData::Tcp { messages } => Some(
            messages
                .iter()
                .map(|m| (m.from_client, m.content.clone(), m.timestamp.timestamp()))
                .collect(),
        ),
        _ => None,
    })?;
    let messages =
        messages.ok_or_else(|| ApiError::InvalidArgument("This flow has no messages.".into()))?;

    let mut remaining = query.max_lines();
    let mut out = Vec::with_capacity(messages.len());
    for (from_client, content, timestamp) in messages {
        let rendered = contentview::render(Some(content.as_slice()), &ContentHints::default(), &view, remaining);
        let count = rendered.lines.len();
        out.push(json!({
            "from_client": from_client,
            "description": rendered.description,
            "lines": rendered.lines,
            "timestamp": timestamp,
        }));
        if let Some(left) = remaining.as_mut() {
            *left = left.saturating_sub(count);
            if *left == 0 {
                break;
            }
        }
    }
    Ok(Json(out))
}

// --- commands, events, options ------------------------------------------

pub(super) async fn list_commands(State(session): State<Arc<Session>>) -> Json<Value> {
    Json(session.commands().to_json())
}

/// 200 once the call is well-formed: command failures are reported in the
/// `error` field
pub(super) async fn execute_command(
    State(session): State<Arc<Session>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CommandOutcome>, ApiError> {
    let args = command_arguments(&headers, &body)?;
    let outcome = session.execute(&name, args).await;
    if let CommandOutcome::Error(message) = &outcome {
        tracing::debug!(command = %name, error = %message, "command failed");
    }
    Ok(Json(outcome))
}

pub(super) async fn events(State(session): State<Arc<Session>>) -> Json<Value> {
    Json(session.events_json())
}

pub(super) async fn options(State(session): State<Arc<Session>>) -> Json<Value> {
    Json(session.options_json())
}

pub(super) async fn set_options(
    State(session): State<Arc<Session>>,
    JsonBody(body): JsonBody,
) -> ApiResult<StatusCode> {
    let Value::Object(changes) = body else {
        return Err(ApiError::InvalidArgument("expected a JSON object of options".into()));
    };
    session.set_options(changes)?;
    Ok(StatusCode::OK)
}

pub(super) async fn save_options(State(session): State<Arc<Session>>) -> ApiResult<StatusCode> {
    session.save_options()?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_with(disposition: Option<&str>) -> Body {
        Body {
            content: None,
            content_type: None,
            content_encoding: None,
            disposition: disposition.map(str::to_string),
        }
    }

    #[test]
    fn test_attachment_header() {
        let body = body_with(Some(r#"inline; filename="filename.jpg""#));
        assert_eq!(attachment_header(&body, "/x"), r#"attachment; filename="filename.jpg""#);

        let body = body_with(None);
        assert_eq!(attachment_header(&body, "/foo/bar.jpg?x=1"), "attachment; filename=bar.jpg");
        assert_eq!(attachment_header(&body, "/a/<evil>;"), "attachment; filename=evil");
    }

    #[test]
    fn test_lines_zero_is_unlimited() {
        assert_eq!(LinesQuery { lines: Some(0) }.max_lines(), None);
        assert_eq!(LinesQuery { lines: Some(3) }.max_lines(), Some(3));
        assert_eq!(LinesQuery::default().max_lines(), None);
    }
}

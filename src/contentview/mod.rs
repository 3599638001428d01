//! Content views
//!
//! Turns message bodies into styled lines for display. Every view is a
//! pure strategy over `(bytes, hints)`; whatever goes wrong inside a view
//! (bad encoding, malformed structure, even a panic) is handled here and
//! the caller gets the raw bytes rendered as text instead.

mod encoding;
mod form;
mod json;
mod raw;

use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use thiserror::Error;

pub use encoding::{
    decode_content, decode_content_capped, decoded_or_raw, encode_content, ContentEncoding,
    DecodeError, MAX_DECODED_SIZE,
};
pub use form::{header_param, multipart_boundary, parse_multipart, MultipartPart};

use form::{MultipartView, UrlEncodedView};
use json::JsonView;
use raw::{text_lines, HexView, RawView};

/// `(style, text)` pair
pub type Segment = (String, String);

/// One rendered line
pub type Line = Vec<Segment>;

/// Failure inside a single view. Never leaves this module.
#[derive(Error, Debug)]
pub enum ViewError {
    #[error("malformed content: {0}")]
    Malformed(String),

    #[error("unsupported content: {0}")]
    Unsupported(String),
}

/// Headers that steer decoding
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHints<'a> {
    pub content_type: Option<&'a str>,
    pub content_encoding: Option<&'a str>,
}

/// Output of a view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendered {
    pub description: String,
    pub lines: Vec<Line>,
}

/// What observers receive
pub type ContentView = Rendered;

impl Rendered {
    pub fn new(description: &str, lines: Vec<Line>) -> Self {
        Self {
            description: description.to_string(),
            lines,
        }
    }

    fn raw(data: &[u8]) -> Self {
        Self::new("Raw", text_lines(data))
    }

    fn truncate(mut self, max_lines: Option<usize>) -> Self {
        if let Some(max) = max_lines {
            self.lines.truncate(max);
        }
        self
    }
}

/// A named decoding strategy
pub trait View: Send + Sync {
    fn name(&self) -> &'static str;
    fn render(&self, data: &[u8], hints: &ContentHints<'_>) -> Result<Rendered, ViewError>;
}

/// Picks a view from the content type, then from the bytes themselves
pub struct AutoView;

impl View for AutoView {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn render(&self, data: &[u8], hints: &ContentHints<'_>) -> Result<Rendered, ViewError> {
        let content_type = hints
            .content_type
            .map(|ct| ct.to_ascii_lowercase())
            .unwrap_or_default();

        let typed: Option<&dyn View> = if content_type.contains("json") {
            Some(&JsonView)
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            Some(&UrlEncodedView)
        } else if content_type.starts_with("multipart/form-data") {
            Some(&MultipartView)
        } else {
            None
        };
        if let Some(view) = typed {
            if let Ok(rendered) = view.render(data, hints) {
                return Ok(rendered);
            }
        }

        if std::str::from_utf8(data).is_ok() {
            RawView.render(data, hints)
        } else {
            HexView.render(data, hints)
        }
    }
}

static VIEWS: &[&dyn View] = &[
    &AutoView,
    &RawView,
    &HexView,
    &JsonView,
    &UrlEncodedView,
    &MultipartView,
];

/// Names of all registered views
pub fn view_names() -> Vec<&'static str> {
    VIEWS.iter().map(|v| v.name()).collect()
}

/// Look a view up by name. Case-insensitive, `_` and ` ` are equivalent.
pub fn get_view(name: &str) -> Option<&'static dyn View> {
    let wanted = name.trim().to_ascii_lowercase().replace(['_', ' '], "");
    VIEWS.iter().copied().find(|v| v.name() == wanted)
}

/// Render a body with the named view
///
/// `content` is the raw body as stored on the flow; `None` means it was
/// never captured. Unknown view names render as raw text. The result is cut
/// to `max_lines` lines when given.
pub fn render(
    content: Option<&[u8]>,
    hints: &ContentHints<'_>,
    view_name: &str,
    max_lines: Option<usize>,
) -> ContentView {
    render_capped(content, hints, view_name, max_lines, MAX_DECODED_SIZE)
}

fn render_capped(
    content: Option<&[u8]>,
    hints: &ContentHints<'_>,
    view_name: &str,
    max_lines: Option<usize>,
    limit: usize,
) -> ContentView {
    let Some(raw) = content else {
        return Rendered::new("No content", Vec::new());
    };

    let decoded = match decode_content_capped(raw, hints.content_encoding, limit) {
        Ok(decoded) => decoded,
        Err(e @ DecodeError::TooLarge { .. }) => {
            tracing::warn!(error = %e, "refusing to expand content, showing raw bytes");
            return Rendered::new("Raw (decoded content too large)", text_lines(raw))
                .truncate(max_lines);
        }
        Err(e) => {
            tracing::debug!(error = %e, "content decoding failed, showing raw bytes");
            return Rendered::raw(raw).truncate(max_lines);
        }
    };

    let view = get_view(view_name).unwrap_or(&RawView);
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| view.render(&decoded, hints)));
    let rendered = match attempt {
        Ok(Ok(rendered)) => rendered,
        Ok(Err(e)) => {
            tracing::debug!(view = view.name(), error = %e, "view failed, showing raw content");
            Rendered::raw(&decoded)
        }
        Err(_) => {
            tracing::warn!(view = view.name(), "view panicked, showing raw content");
            Rendered::raw(&decoded)
        }
    };
    rendered.truncate(max_lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(style: &str, text: &str) -> Segment {
        (style.to_string(), text.to_string())
    }

    #[test]
    fn test_raw_view_and_line_limit() {
        let hints = ContentHints::default();
        let full = render(Some(&b"foo\nbar"[..]), &hints, "raw", None);
        assert_eq!(full.description, "Raw");
        assert_eq!(full.lines, vec![vec![seg("text", "foo")], vec![seg("text", "bar")]]);

        let limited = render(Some(&b"foo\nbar"[..]), &hints, "raw", Some(1));
        assert_eq!(limited.lines, vec![vec![seg("text", "foo")]]);

        let json = serde_json::to_value(&limited).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"lines": [[["text", "foo"]]], "description": "Raw"})
        );
    }

    #[test]
    fn test_empty_and_missing_content() {
        let hints = ContentHints::default();
        assert!(render(Some(&b""[..]), &hints, "auto", None).lines.is_empty());
        let missing = render(None, &hints, "raw", None);
        assert!(missing.lines.is_empty());
        assert_eq!(missing.description, "No content");
    }

    #[test]
    fn test_corrupt_gzip_falls_back_to_raw() {
        let mut body = encode_content(b"Hello world!", Some("gzip")).unwrap();
        body[0] = 0xff;
        body[1] = 0xff;
        let hints = ContentHints {
            content_type: Some("text/plain"),
            content_encoding: Some("gzip"),
        };
        let view = render(Some(body.as_slice()), &hints, "auto", None);
        assert_eq!(view.description, "Raw");
        assert!(!view.lines.is_empty());
    }

    #[test]
    fn test_gzip_is_decoded_before_viewing() {
        let body = encode_content(br#"{"a": 1}"#, Some("gzip")).unwrap();
        let hints = ContentHints {
            content_type: Some("application/json"),
            content_encoding: Some("gzip"),
        };
        let view = render(Some(body.as_slice()), &hints, "auto", None);
        assert_eq!(view.description, "JSON");
    }

    #[test]
    fn test_oversized_expansion_shows_raw() {
        let body = encode_content(&vec![b'a'; 256 * 1024], Some("gzip")).unwrap();
        let hints = ContentHints {
            content_type: Some("text/plain"),
            content_encoding: Some("gzip"),
        };
        let view = render_capped(Some(body.as_slice()), &hints, "auto", Some(3), 4096);
        assert_eq!(view.description, "Raw (decoded content too large)");
        assert!(view.lines.len() <= 3);

        let view = render_capped(Some(body.as_slice()), &hints, "raw", Some(1), 1 << 20);
        assert_eq!(view.description, "Raw");
        assert_eq!(view.lines[0][0].1.len(), 256 * 1024);
    }

    #[test]
    fn test_view_failure_falls_back_to_raw() {
        let hints = ContentHints::default();
        let view = render(Some(&b"not json"[..]), &hints, "json", None);
        assert_eq!(view.description, "Raw");
        assert_eq!(view.lines, vec![vec![seg("text", "not json")]]);
    }

    #[test]
    fn test_unknown_view_name_renders_raw() {
        let view = render(Some(&b"x"[..]), &ContentHints::default(), "no-such-view", None);
        assert_eq!(view.description, "Raw");
    }

    #[test]
    fn test_auto_selection() {
        let form = ContentHints {
            content_type: Some("application/x-www-form-urlencoded"),
            content_encoding: None,
        };
        assert_eq!(render(Some(&b"a=b"[..]), &form, "auto", None).description, "URLEncoded form");
        assert_eq!(
            render(Some(&[0xffu8, 0x00, 0xfe][..]), &ContentHints::default(), "auto", None).description,
            "Hex"
        );
    }

    #[test]
    fn test_view_lookup() {
        assert_eq!(get_view("RAW").map(|v| v.name()), Some("raw"));
        assert_eq!(get_view("url_encoded").map(|v| v.name()), Some("urlencoded"));
        assert!(view_names().contains(&"multipart"));
    }
}

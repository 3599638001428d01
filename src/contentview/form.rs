//! Form bodies: urlencoded and multipart/form-data

use super::{ContentHints, Line, Rendered, View, ViewError};

fn field_line(name: &str, value: &str) -> Line {
    vec![
        ("header".to_string(), format!("{}: ", name)),
        ("text".to_string(), value.to_string()),
    ]
}

pub struct UrlEncodedView;

impl View for UrlEncodedView {
    fn name(&self) -> &'static str {
        "urlencoded"
    }

    fn render(&self, data: &[u8], _hints: &ContentHints<'_>) -> Result<Rendered, ViewError> {
        if std::str::from_utf8(data).is_err() {
            return Err(ViewError::Malformed("form data is not valid UTF-8".into()));
        }
        let lines: Vec<Line> = url::form_urlencoded::parse(data)
            .map(|(k, v)| field_line(&k, &v))
            .collect();
        if lines.is_empty() {
            return Err(ViewError::Malformed("no form fields".into()));
        }
        Ok(Rendered::new("URLEncoded form", lines))
    }
}

/// One part of a multipart body
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

/// Extract the boundary parameter of a multipart content type
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    params.find_map(|p| {
        let (key, value) = p.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Value of a `key=value` parameter in a header such as Content-Disposition
pub fn header_param(header: &str, key: &str) -> Option<String> {
    header.split(';').skip(1).find_map(|p| {
        let (k, v) = p.split_once('=')?;
        if k.trim().eq_ignore_ascii_case(key) {
            Some(v.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn parse_part(segment: &[u8]) -> Option<MultipartPart> {
    let segment = segment.strip_prefix(b"\r\n").unwrap_or(segment);
    let split = find(segment, b"\r\n\r\n", 0)
        .map(|p| (p, p + 4))
        .or_else(|| segment.starts_with(b"\r\n").then_some((0, 2)))?;
    let head = String::from_utf8_lossy(&segment[..split.0]);
    let body = &segment[split.1..];
    let body = body.strip_suffix(b"\r\n").unwrap_or(body);

    let mut part = MultipartPart {
        name: None,
        filename: None,
        content_type: None,
        content: body.to_vec(),
    };
    for line in head.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            part.name = header_param(value, "name");
            part.filename = header_param(value, "filename");
        } else if key.eq_ignore_ascii_case("content-type") {
            part.content_type = Some(value.trim().to_string());
        }
    }
    Some(part)
}

/// Split a multipart body into its parts. `None` if the content type has no
/// boundary or the body contains no part.
pub fn parse_multipart(content_type: &str, body: &[u8]) -> Option<Vec<MultipartPart>> {
    let boundary = multipart_boundary(content_type)?;
    let delimiter = format!("--{}", boundary).into_bytes();

    let mut parts = Vec::new();
    let mut pos = find(body, &delimiter, 0)? + delimiter.len();
    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        let end = find(body, &delimiter, pos).unwrap_or(body.len());
        if let Some(part) = parse_part(&body[pos..end]) {
            parts.push(part);
        }
        if end >= body.len() {
            break;
        }
        pos = end + delimiter.len();
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

pub struct MultipartView;

impl View for MultipartView {
    fn name(&self) -> &'static str {
        "multipart"
    }

    fn render(&self, data: &[u8], hints: &ContentHints<'_>) -> Result<Rendered, ViewError> {
        let content_type = hints
            .content_type
            .ok_or_else(|| ViewError::Unsupported("multipart view needs a content type".into()))?;
        let parts = parse_multipart(content_type, data)
            .ok_or_else(|| ViewError::Malformed("no multipart parts found".into()))?;
        let lines = parts
            .iter()
            .map(|p| {
                let name = p.name.as_deref().unwrap_or("");
                field_line(name, &String::from_utf8_lossy(&p.content))
            })
            .collect();
        Ok(Rendered::new("Multipart form", lines))
    }
}

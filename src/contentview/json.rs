//! Pretty-printed JSON view

use super::{ContentHints, Line, Rendered, View, ViewError};

pub struct JsonView;

/// Split a leading JSON string literal off `s`
fn split_string_literal(s: &str) -> Option<(&str, &str)> {
    if !s.starts_with('"') {
        return None;
    }
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some((&s[..=i], &s[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}

fn value_style(value: &str) -> &'static str {
    match value.chars().next() {
        Some('"') => "json_string",
        Some('t') | Some('f') => "json_boolean",
        Some('n') => "json_null",
        Some(c) if c == '-' || c.is_ascii_digit() => "json_number",
        _ => "text",
    }
}

fn style_line(line: &str) -> Line {
    let mut segments = Vec::new();
    let body = line.trim_start();
    let indent = &line[..line.len() - body.len()];
    if !indent.is_empty() {
        segments.push(("text".to_string(), indent.to_string()));
    }

    let mut rest = body;
    if let Some((key, after)) = split_string_literal(body) {
        if let Some(after) = after.strip_prefix(": ") {
            segments.push(("json_key".to_string(), key.to_string()));
            segments.push(("text".to_string(), ": ".to_string()));
            rest = after;
        }
    }

    let (value, comma) = match rest.strip_suffix(',') {
        Some(v) => (v, ","),
        None => (rest, ""),
    };
    if !value.is_empty() {
        segments.push((value_style(value).to_string(), value.to_string()));
    }
    if !comma.is_empty() {
        segments.push(("text".to_string(), comma.to_string()));
    }
    segments
}

impl View for JsonView {
    fn name(&self) -> &'static str {
        "json"
    }

    fn render(&self, data: &[u8], _hints: &ContentHints<'_>) -> Result<Rendered, ViewError> {
        let value: serde_json::Value =
            serde_json::from_slice(data).map_err(|e| ViewError::Malformed(e.to_string()))?;
        let pretty =
            serde_json::to_string_pretty(&value).map_err(|e| ViewError::Malformed(e.to_string()))?;
        Ok(Rendered::new("JSON", pretty.lines().map(style_line).collect()))
    }
}

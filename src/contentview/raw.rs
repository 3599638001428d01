//! Plain text and hexdump views

use super::{Line, Rendered, View, ViewError, ContentHints};

/// Split text into one `text` segment per line
pub fn text_lines(data: &[u8]) -> Vec<Line> {
    String::from_utf8_lossy(data)
        .lines()
        .map(|line| vec![("text".to_string(), line.to_string())])
        .collect()
}

pub struct RawView;

impl View for RawView {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn render(&self, data: &[u8], _hints: &ContentHints<'_>) -> Result<Rendered, ViewError> {
        Ok(Rendered::new("Raw", text_lines(data)))
    }
}

pub struct HexView;

impl HexView {
    const WIDTH: usize = 16;

    fn line(offset: usize, chunk: &[u8]) -> Line {
        let hex = chunk
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        vec![
            ("offset".to_string(), format!("{:010x}", offset)),
            ("text".to_string(), format!(" {:<width$}", hex, width = Self::WIDTH * 3 - 1)),
            ("text".to_string(), format!("  {}", ascii)),
        ]
    }
}

impl View for HexView {
    fn name(&self) -> &'static str {
        "hex"
    }

    fn render(&self, data: &[u8], _hints: &ContentHints<'_>) -> Result<Rendered, ViewError> {
        let lines = data
            .chunks(Self::WIDTH)
            .enumerate()
            .map(|(i, chunk)| Self::line(i * Self::WIDTH, chunk))
            .collect();
        Ok(Rendered::new("Hex", lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_lines() {
        let lines = text_lines(b"foo\nbar\r\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], vec![("text".to_string(), "bar".to_string())]);
        assert!(text_lines(b"").is_empty());
    }

    #[test]
    fn test_hexdump() {
        let data: Vec<u8> = (0u8..20).collect();
        let rendered = HexView.render(&data, &ContentHints::default()).unwrap();
        assert_eq!(rendered.lines.len(), 2);
        assert_eq!(rendered.lines[1][0].1, "0000000010");
        assert!(rendered.lines[0][1].1.starts_with(" 00 01 02"));
        assert_eq!(rendered.lines[1][2].1, "  ....");
    }
}

//! HTTP Content-Encoding support
//!
//! Bodies are stored as they travelled on the wire. Views and downloads
//! work on the decoded form.

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported content encoding: {0}")]
    Unsupported(String),

    #[error("failed to decode {encoding} content: {source}")]
    Corrupt {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("decoded {encoding} content exceeds {limit} bytes")]
    TooLarge { encoding: &'static str, limit: usize },
}

/// Largest body a compressed stream may expand to
pub const MAX_DECODED_SIZE: usize = 64 * 1024 * 1024;

/// Read a decoder to the end, stopping one byte past `limit`
fn read_capped(reader: impl Read, encoding: &'static str, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|source| DecodeError::Corrupt { encoding, source })?;
    if out.len() > limit {
        return Err(DecodeError::TooLarge { encoding, limit });
    }
    Ok(out)
}

/// Supported content encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    pub fn all() -> &'static [ContentEncoding] {
        &[
            ContentEncoding::Identity,
            ContentEncoding::Gzip,
            ContentEncoding::Deflate,
        ]
    }

    /// Header token
    pub fn name(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
        }
    }

    /// Parse a Content-Encoding header value. `None` for unknown codings.
    pub fn parse(header: Option<&str>) -> Option<Self> {
        let value = header.map(|h| h.trim().to_ascii_lowercase()).unwrap_or_default();
        match value.as_str() {
            "" | "identity" | "none" => Some(ContentEncoding::Identity),
            "gzip" | "x-gzip" => Some(ContentEncoding::Gzip),
            "deflate" => Some(ContentEncoding::Deflate),
            _ => None,
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        self.decode_capped(data, MAX_DECODED_SIZE)
    }

    /// Decode, refusing output larger than `limit` bytes
    pub fn decode_capped(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
        match self {
            ContentEncoding::Identity => Ok(data.to_vec()),
            ContentEncoding::Gzip => read_capped(GzDecoder::new(data), "gzip", limit),
            ContentEncoding::Deflate => {
                // servers send both zlib-wrapped and raw deflate streams
                match read_capped(ZlibDecoder::new(data), "deflate", limit) {
                    Err(DecodeError::Corrupt { .. }) => {
                        read_capped(DeflateDecoder::new(data), "deflate", limit)
                    }
                    other => other,
                }
            }
        }
    }

    pub fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            ContentEncoding::Identity => Ok(data.to_vec()),
            ContentEncoding::Gzip => {
                let mut enc = GzEncoder::new(Vec::new(), Compression::default());
                enc.write_all(data)?;
                enc.finish()
            }
            ContentEncoding::Deflate => {
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
                enc.write_all(data)?;
                enc.finish()
            }
        }
    }
}

/// Decode a body according to its Content-Encoding header
pub fn decode_content(data: &[u8], encoding: Option<&str>) -> Result<Vec<u8>, DecodeError> {
    decode_content_capped(data, encoding, MAX_DECODED_SIZE)
}

pub fn decode_content_capped(
    data: &[u8],
    encoding: Option<&str>,
    limit: usize,
) -> Result<Vec<u8>, DecodeError> {
    let coding = ContentEncoding::parse(encoding)
        .ok_or_else(|| DecodeError::Unsupported(encoding.unwrap_or_default().to_string()))?;
    coding.decode_capped(data, limit)
}

/// Decoded body, or the raw bytes if decoding fails
pub fn decoded_or_raw(data: &[u8], encoding: Option<&str>) -> Vec<u8> {
    match decode_content(data, encoding) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!(error = %e, "serving undecoded content");
            data.to_vec()
        }
    }
}

/// Encode a body for the given Content-Encoding header.
/// `None` if the encoding is not supported.
pub fn encode_content(data: &[u8], encoding: Option<&str>) -> Option<Vec<u8>> {
    ContentEncoding::parse(encoding).and_then(|coding| coding.encode(data).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_magic() {
        let encoded = encode_content(b"Hello world!", Some("gzip")).unwrap();
        assert_eq!(encoded[..2], [0x1f, 0x8b]);
    }

    #[test]
    fn test_every_coding_decodes_its_own_output() {
        for coding in ContentEncoding::all() {
            let encoded = coding.encode(b"Hello world!").unwrap();
            let header = Some(coding.name());
            assert_eq!(decode_content(&encoded, header).unwrap(), b"Hello world!");
        }
    }

    #[test]
    fn test_corrupt_gzip_fails_and_falls_back() {
        let mut encoded = encode_content(b"Hello world!", Some("gzip")).unwrap();
        encoded[0] = 0xff;
        encoded[1] = 0xff;
        assert!(matches!(
            decode_content(&encoded, Some("gzip")),
            Err(DecodeError::Corrupt { .. })
        ));
        assert_eq!(decoded_or_raw(&encoded, Some("gzip")), encoded);
    }

    #[test]
    fn test_raw_deflate_is_accepted() {
        let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"raw deflate").unwrap();
        let raw = enc.finish().unwrap();
        assert_eq!(decode_content(&raw, Some("deflate")).unwrap(), b"raw deflate");
    }

    #[test]
    fn test_expansion_is_capped() {
        let bomb = encode_content(&vec![0u8; 1 << 20], Some("gzip")).unwrap();
        assert!(bomb.len() < 8 * 1024);
        assert!(matches!(
            decode_content_capped(&bomb, Some("gzip"), 64 * 1024),
            Err(DecodeError::TooLarge { encoding: "gzip", .. })
        ));
        assert_eq!(decode_content_capped(&bomb, Some("gzip"), 1 << 20).unwrap().len(), 1 << 20);

        let zlib = encode_content(&vec![b'a'; 1 << 20], Some("deflate")).unwrap();
        assert!(matches!(
            decode_content_capped(&zlib, Some("deflate"), 1024),
            Err(DecodeError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_unknown_encoding() {
        assert!(matches!(
            decode_content(b"x", Some("br")),
            Err(DecodeError::Unsupported(_))
        ));
        assert!(encode_content(b"x", Some("br")).is_none());
        assert_eq!(decode_content(b"x", None).unwrap(), b"x");
    }
}

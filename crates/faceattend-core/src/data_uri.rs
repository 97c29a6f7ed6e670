//! `data:<mime>;base64,<payload>` image URIs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

pub const JPEG_MIME: &str = "image/jpeg";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DataUriError {
    #[error("missing `data:` scheme")]
    MissingScheme,
    #[error("missing `,` separator")]
    MissingSeparator,
    #[error("only base64 data URIs are supported")]
    NotBase64,
    #[error("empty media type")]
    EmptyMime,
    #[error("invalid base64 payload: {0}")]
    Payload(String),
    #[error("empty payload")]
    Empty,
}

/// A decoded data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    pub fn parse(uri: &str) -> Result<Self, DataUriError> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or(DataUriError::MissingScheme)?;
        let (header, payload) = rest.split_once(',').ok_or(DataUriError::MissingSeparator)?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or(DataUriError::NotBase64)?;
        if mime.is_empty() {
            return Err(DataUriError::EmptyMime);
        }
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| DataUriError::Payload(e.to_string()))?;
        if bytes.is_empty() {
            return Err(DataUriError::Empty);
        }
        Ok(Self {
            mime: mime.to_string(),
            bytes,
        })
    }

    /// File extension matching the media type, for exports.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "bin",
        }
    }
}

/// Encode `bytes` as a base64 data URI.
pub fn encode(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Encode JPEG bytes as a data URI.
pub fn from_jpeg(bytes: &[u8]) -> String {
    encode(JPEG_MIME, bytes)
}

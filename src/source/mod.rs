//! Upstream voice source abstractions.
//!
//! The acquisition pipeline only sees this trait; the HTTP wiki adapter lives
//! in [`prts`].

pub mod prts;

use std::fmt;

use crate::language::LanguageCode;

/// One `(language tag, asset key)` pair published by the upstream for a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceVoiceKey {
    /// Free-text upstream language tag, e.g. `中文` or `日语(新春)`.
    pub tag: String,
    /// Opaque token used to build clip URLs.
    pub key: String,
}

impl SourceVoiceKey {
    /// Skin voice sets carry a parenthesized qualifier in their tag.
    pub fn is_skin(&self) -> bool {
        self.tag.contains('(') || self.tag.contains('（')
    }

    pub fn language(&self) -> LanguageCode {
        LanguageCode::from_source_tag(&self.tag)
    }
}

/// Raw clip response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Failure of a character lookup against the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The upstream has no voice record (or an empty one) for the character.
    NotFoundUpstream,
    /// Network, timeout, or unexpected HTTP status after retries.
    Transport(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFoundUpstream => f.write_str("no voice record upstream"),
            Self::Transport(message) => write!(f, "voice record request failed: {message}"),
        }
    }
}

/// Failure of a single clip or portrait fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The numeric slot does not exist upstream.
    NotFound,
    /// Non-success status that is neither "absent" nor transient.
    Status(u16),
    /// Timeout, connection failure, or transient status; retryable.
    Transport(String),
    /// The response was not audio (or not an image, for portraits).
    ContentMismatch(String),
}

impl FetchFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Maps an HTTP status onto the failure taxonomy.
    pub fn from_status(code: u16) -> Self {
        match code {
            404 | 410 => Self::NotFound,
            408 | 429 | 500 | 502 | 503 | 504 => Self::Transport(format!("HTTP {code}")),
            _ => Self::Status(code),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::ContentMismatch(content_type) => {
                write!(f, "unexpected content type: {content_type}")
            }
        }
    }
}

/// Interface implemented by concrete voice sources.
pub trait VoiceSource: Send + Sync {
    /// Language-tag to asset-key pairs for `character`, in upstream order.
    fn voice_keys(&self, character: &str) -> Result<Vec<SourceVoiceKey>, SourceError>;

    /// Whether the 1-based numeric slot `index` of `asset_key` exists upstream,
    /// without transferring the clip.
    fn probe_clip(&self, asset_key: &str, index: u32) -> Result<bool, FetchFailure>;

    /// Clip bytes for the 1-based numeric slot `index` of `asset_key`.
    fn fetch_clip(&self, asset_key: &str, index: u32) -> Result<ClipPayload, FetchFailure>;

    /// Portrait image bytes; `Ok(None)` when the upstream has none.
    fn fetch_portrait(&self, _character: &str) -> Result<Option<Vec<u8>>, FetchFailure> {
        Ok(None)
    }
}

const AUDIO_CONTENT_TYPE_MARKERS: [&str; 3] = ["audio", "video", "application/octet-stream"];

fn looks_like_audio(bytes: &[u8]) -> bool {
    if bytes.len() >= 12 && bytes[0..4] == *b"RIFF" && bytes[8..12] == *b"WAVE" {
        return true;
    }
    if bytes.len() >= 3 && bytes[0..3] == *b"ID3" {
        return true;
    }
    if bytes.len() >= 4 && (bytes[0..4] == *b"OggS" || bytes[0..4] == *b"fLaC") {
        return true;
    }
    bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0
}

/// A payload counts as audio by content type or by a known audio signature.
pub fn is_audio_payload(content_type: &str, bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let lowered = content_type.to_ascii_lowercase();
    AUDIO_CONTENT_TYPE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
        || looks_like_audio(bytes)
}

pub fn detect_image_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 8 && bytes[0..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("png");
    }
    if bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF {
        return Some("jpg");
    }
    if bytes.len() >= 12 && bytes[0..4] == *b"RIFF" && bytes[8..12] == *b"WEBP" {
        return Some("webp");
    }
    if bytes.len() >= 6 && (&bytes[0..6] == b"GIF87a" || &bytes[0..6] == b"GIF89a") {
        return Some("gif");
    }
    None
}

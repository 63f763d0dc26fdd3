//! Artifact normalizer: turns a guest program's trailing value into something a host can render.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::runtime::GuestValue;

/// MIME type assumed for image payloads; guest programs standardize on PNG.
pub const PNG_MIME: &str = "image/png";

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// What the caller expects the program to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactExpectation {
    #[default]
    Text,
    /// The program returns a base64-encoded PNG.
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Text { text: String },
    BinaryImage { mime_type: String, payload: String },
}

impl Artifact {
    pub fn text(text: impl Into<String>) -> Self {
        Artifact::Text { text: text.into() }
    }

    pub fn png(payload: impl Into<String>) -> Self {
        Artifact::BinaryImage { mime_type: PNG_MIME.to_string(), payload: payload.into() }
    }

    /// `data:<mime>;base64,<payload>` for image artifacts.
    pub fn data_uri(&self) -> Option<String> {
        match self {
            Artifact::BinaryImage { mime_type, payload } => {
                Some(format!("data:{};base64,{}", mime_type, payload))
            }
            Artifact::Text { .. } => None,
        }
    }

    /// Raw image bytes, for hosts that write the figure to disk.
    pub fn decode_image(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        match self {
            Artifact::BinaryImage { payload, .. } => Some(BASE64.decode(payload)),
            Artifact::Text { .. } => None,
        }
    }
}

/// Classify `raw` under the caller's declared `expectation`.
///
/// Only a string that decodes as standard base64 becomes an image; anything
/// else passes through as text.
pub fn normalize(raw: GuestValue, expectation: ArtifactExpectation) -> Artifact {
    match (raw, expectation) {
        (GuestValue::Str(s), ArtifactExpectation::Image) => match image_payload(&s) {
            Some(payload) => Artifact::png(payload),
            None => Artifact::text(s),
        },
        (GuestValue::Str(s), _) | (GuestValue::Repr(s), _) => Artifact::text(s),
        (GuestValue::None, _) => Artifact::text(String::new()),
    }
}

fn image_payload(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let payload = trimmed.strip_prefix(PNG_DATA_URI_PREFIX).unwrap_or(trimmed);
    if payload.is_empty() {
        return None;
    }
    BASE64.decode(payload).ok().map(|_| payload)
}

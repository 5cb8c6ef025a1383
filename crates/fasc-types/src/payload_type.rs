use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The role a payload plays within its object.
///
/// The textual form (`Display`/`FromStr`) is the exact spelling persisted in
/// payload sidecar files, so it must never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadType {
    /// Descriptions of an object.
    Annotation,
    /// Content derived from another payload.
    Enrichment,
    /// Error feedback attached by harvesters and transformers.
    Error,
    /// The single payload used for preview display.
    Preview,
    /// Original or source content.
    Source,
    /// Secondary previews; an object may carry several.
    AltPreview,
    /// Thumbnail image of the object.
    Thumbnail,
}

impl PayloadType {
    /// Every payload type, in declaration order.
    pub const ALL: [PayloadType; 7] = [
        Self::Annotation,
        Self::Enrichment,
        Self::Error,
        Self::Preview,
        Self::Source,
        Self::AltPreview,
        Self::Thumbnail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annotation => "Annotation",
            Self::Enrichment => "Enrichment",
            Self::Error => "Error",
            Self::Preview => "Preview",
            Self::Source => "Source",
            Self::AltPreview => "AltPreview",
            Self::Thumbnail => "Thumbnail",
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypeError::UnknownPayloadType(s.to_string()))
    }
}

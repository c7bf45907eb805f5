//! Content requests and the assets attached to them.

use crate::errors::ValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Longest accepted content type identifier, in characters.
pub const MAX_CONTENT_TYPE_LEN: usize = 50;
/// Longest accepted title, in characters.
pub const MAX_TITLE_LEN: usize = 200;

static CONTENT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("content type pattern compiles"));

/// Media kind of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Still image.
    Image,
    /// Audio clip.
    Audio,
    /// Video clip.
    Video,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// An asset attached to a content request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Caller-assigned identifier.
    pub id: String,
    /// Media kind.
    pub kind: AssetKind,
    /// Declared MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Location of the stored asset, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl AssetDescriptor {
    /// Creates a new descriptor.
    pub fn new(
        id: impl Into<String>,
        kind: AssetKind,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            mime_type: mime_type.into(),
            size_bytes,
            uri: None,
        }
    }

    /// Sets the storage location.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

/// A request to produce one piece of content.
///
/// Requests are immutable once handed to an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Content type identifier, e.g. `"explainer"`.
    pub content_type: String,
    /// Working title.
    pub title: String,
    /// Free-form generation parameters.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Media assets to process alongside the content.
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,
}

impl PipelineRequest {
    /// Creates a request with no parameters or assets.
    pub fn new(content_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            title: title.into(),
            parameters: HashMap::new(),
            assets: Vec::new(),
        }
    }

    /// Adds a generation parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Attaches an asset.
    #[must_use]
    pub fn with_asset(mut self, asset: AssetDescriptor) -> Self {
        self.assets.push(asset);
        self
    }

    /// Checks the request before any external call is made.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content_type.is_empty() {
            return Err(ValidationError::for_field(
                "content_type",
                "content_type is required",
            ));
        }
        if self.content_type.chars().count() > MAX_CONTENT_TYPE_LEN {
            return Err(ValidationError::for_field(
                "content_type",
                format!("content_type must be at most {MAX_CONTENT_TYPE_LEN} characters"),
            ));
        }
        if !CONTENT_TYPE_RE.is_match(&self.content_type) {
            return Err(ValidationError::for_field(
                "content_type",
                format!(
                    "content_type '{}' must be a lowercase identifier",
                    self.content_type
                ),
            ));
        }

        if self.title.trim().is_empty() {
            return Err(ValidationError::for_field("title", "title is required"));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(ValidationError::for_field(
                "title",
                format!("title must be at most {MAX_TITLE_LEN} characters"),
            ));
        }

        Ok(())
    }
}

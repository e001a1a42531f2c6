//! Artifact references flowing between steps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A reference to an artifact produced by a step.
///
/// An artifact is a URI-like reference plus a kind tag (e.g. `dataset`,
/// `model`, `metrics`) and free-form string metadata. Artifacts are
/// produced by at most one step and are read-only once produced; any
/// number of downstream steps may consume the same reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// The URI-like reference (e.g. `gs://bucket/path`).
    pub uri: String,

    /// The kind tag.
    pub kind: String,

    /// Free-form metadata about the artifact.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ArtifactRef {
    /// Creates a new artifact reference.
    #[must_use]
    pub fn new(uri: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind: kind.into(),
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

use serde::{Deserialize, Serialize};

use crate::ids::TargetId;

fn default_required_threads() -> u32 {
    1
}

/// A named recipe for producing one transcoded rendition: the container
/// extension, the argument blob handed verbatim to the external transcoder,
/// and how many threads of the global budget an invocation consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeTarget {
    pub id: TargetId,
    /// Unique human-facing label.
    pub label: String,
    pub extension: String,
    /// Opaque transcoder options, passed through untouched.
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default = "default_required_threads")]
    pub required_threads: u32,
}

impl TranscodeTarget {
    pub fn new(label: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            id: TargetId::new(),
            label: label.into(),
            extension: extension.into(),
            arguments: Vec::new(),
            required_threads: default_required_threads(),
        }
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_video_extensions() -> Vec<String> {
    ["mkv", "mp4", "avi", "mov", "webm", "m4v", "mpg", "mpeg", "ts", "wmv"]
        .iter()
        .map(|ext| (*ext).to_string())
        .collect()
}

/// Settings for the ingest pipeline. Use these to tune how quickly new files
/// are picked up, how long a file must sit unmodified before it is touched,
/// and how many files are ingested in parallel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory watched for arriving source files.
    pub ingest_path: PathBuf,
    /// Period (seconds) of the forced discovery sweep. Filesystem
    /// notifications trigger an extra sweep in between; the periodic sweep is
    /// the safety net for events the watcher missed.
    pub force_sync_seconds: u64,
    /// A discovered file is held until its modification time is at least this
    /// many seconds old, protecting against files still being written.
    pub required_modtime_age_seconds: u64,
    /// Number of ingestion workers. Each worker owns one item at a time.
    pub ingestion_parallelism: usize,
    /// Case-insensitive substrings matched against file names; matching files
    /// are never tracked.
    pub blacklist: Vec<String>,
    /// File extensions treated as ingestable video assets.
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ingest_path: PathBuf::from("/media/ingest"),
            force_sync_seconds: 300,
            required_modtime_age_seconds: 120,
            ingestion_parallelism: 2,
            blacklist: Vec::new(),
            video_extensions: default_video_extensions(),
        }
    }
}

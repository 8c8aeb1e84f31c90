use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings for the transcode scheduler and its external tools.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Root under which completed renditions are written, laid out as
    /// `<output_path>/<media-id>/<target-id>.<ext>`.
    pub output_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Global thread budget shared by all concurrently working tasks. The sum
    /// of the working targets' thread requirements never exceeds this.
    pub max_thread_consumption: u32,
    /// Capacity of the scheduler's subscription queue on the event bus.
    pub event_queue_capacity: usize,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("/media/transcoded"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            max_thread_consumption: 4,
            event_queue_capacity: 64,
        }
    }
}

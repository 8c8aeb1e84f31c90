use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Latest progress snapshot reported by a running transcoder invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeProgress {
    pub frames: Option<u64>,
    pub fps: Option<f32>,
    /// Normalised to kbit/s.
    pub bitrate_kbps: Option<f64>,
    /// Transcode position as a fraction of the source runtime, 0.0..=1.0.
    pub percentage: Option<f32>,
    /// Encoder speed relative to realtime (1.0 = realtime).
    pub speed: Option<f32>,
    pub elapsed: Option<Duration>,
}

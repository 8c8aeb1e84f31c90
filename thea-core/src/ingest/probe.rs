//! Technical metadata probing via the external `ffprobe` binary.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;

use crate::{CoreError, Result};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Frame geometry and runtime of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedVideo {
    pub width: u32,
    pub height: u32,
    pub runtime_secs: u32,
}

#[derive(Debug, Clone)]
pub struct Prober {
    ffprobe_path: PathBuf,
}

impl Prober {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Run ffprobe against `path` and pull the first video stream's geometry
    /// plus the container duration.
    pub async fn probe(&self, path: &Path) -> Result<ProbedVideo> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Scrape {
                path: path.display().to_string(),
                message: format!(
                    "ffprobe exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)?;
        extract_video(&parsed).ok_or_else(|| CoreError::Scrape {
            path: path.display().to_string(),
            message: "no video stream found".to_string(),
        })
    }
}

fn extract_video(parsed: &ProbeOutput) -> Option<ProbedVideo> {
    let stream = parsed
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))?;
    let width = stream.width?;
    let height = stream.height?;

    let duration = stream
        .duration
        .as_deref()
        .or(parsed.format.as_ref().and_then(|format| format.duration.as_deref()))
        .and_then(|raw| raw.parse::<f64>().ok())
        .unwrap_or(0.0);

    Some(ProbedVideo {
        width,
        height,
        runtime_secs: duration.round() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_video_stream_and_format_duration() {
        let parsed: ProbeOutput = serde_json::from_str(
            r#"{
                "streams": [
                    {"codec_type": "audio", "duration": "10.0"},
                    {"codec_type": "video", "width": 1920, "height": 1080}
                ],
                "format": {"duration": "5400.72"}
            }"#,
        )
        .unwrap();

        let video = extract_video(&parsed).unwrap();
        assert_eq!(video.width, 1920);
        assert_eq!(video.height, 1080);
        assert_eq!(video.runtime_secs, 5401);
    }

    #[test]
    fn stream_duration_wins_over_format() {
        let parsed: ProbeOutput = serde_json::from_str(
            r#"{
                "streams": [
                    {"codec_type": "video", "width": 640, "height": 480, "duration": "60.0"}
                ],
                "format": {"duration": "99.0"}
            }"#,
        )
        .unwrap();

        assert_eq!(extract_video(&parsed).unwrap().runtime_secs, 60);
    }

    #[test]
    fn missing_video_stream_is_none() {
        let parsed: ProbeOutput =
            serde_json::from_str(r#"{"streams": [{"codec_type": "audio"}]}"#).unwrap();
        assert!(extract_video(&parsed).is_none());
    }
}

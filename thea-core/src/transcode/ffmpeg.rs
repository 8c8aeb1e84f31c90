//! External transcoder invocation: spawn ffmpeg, stream its progress, and
//! classify the exit.
//!
//! Progress arrives on stdout via `-progress pipe:1` as `key=value` blocks
//! terminated by a `progress=` line. stderr is collected for failure
//! classification; the transcoder wraps its real complaint in a nested JSON
//! shape (`{"error":{"string":"..."}}`) buried in the noise, which is
//! extracted for the operator when present.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use thea_model::TranscodeProgress;

/// Everything one transcoder run needs.
#[derive(Debug, Clone)]
pub struct TranscodeInvocation {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Target options, passed through verbatim between input and output.
    pub arguments: Vec<String>,
    /// Source runtime, used to turn positions into percentages.
    pub runtime_secs: u32,
}

/// How a transcoder run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}

/// Callback receiving each progress snapshot as it is parsed.
pub type ProgressSink = Arc<dyn Fn(TranscodeProgress) + Send + Sync>;

#[async_trait]
pub trait TranscodeRunner: Send + Sync {
    /// Run one transcode to completion, cancellation, or failure. `pid`
    /// carries the live child's process id (0 when none) so the owner can
    /// signal it for suspend/resume.
    async fn run(
        &self,
        invocation: TranscodeInvocation,
        progress: ProgressSink,
        cancel: CancellationToken,
        pid: Arc<AtomicU32>,
    ) -> Result<RunOutcome>;
}

#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    ffmpeg_path: PathBuf,
}

impl FfmpegRunner {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl TranscodeRunner for FfmpegRunner {
    async fn run(
        &self,
        invocation: TranscodeInvocation,
        progress: ProgressSink,
        cancel: CancellationToken,
        pid: Arc<AtomicU32>,
    ) -> Result<RunOutcome> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(&invocation.source)
            .args(&invocation.arguments)
            .arg("-progress")
            .arg("pipe:1")
            .arg(&invocation.output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = ?cmd, "starting transcoder");
        let mut child = cmd.spawn()?;
        pid.store(child.id().unwrap_or(0), Ordering::SeqCst);

        let started = Instant::now();
        let runtime_secs = invocation.runtime_secs;

        let stdout = child.stdout.take();
        let progress_handle = stdout.map(|stdout| {
            let progress = Arc::clone(&progress);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut block = ProgressBlock::default();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(snapshot) = block.feed(&line, runtime_secs, started.elapsed()) {
                        progress(snapshot);
                    }
                }
            })
        });

        let stderr = child.stderr.take();
        let stderr_handle = stderr.map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut collected = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    collected.push(line);
                    // The interesting lines are at the tail.
                    if collected.len() > 256 {
                        collected.remove(0);
                    }
                }
                collected
            })
        });

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancel.cancelled() => {
                warn!("transcoder interrupted by cancellation");
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };
        pid.store(0, Ordering::SeqCst);

        if let Some(handle) = progress_handle {
            let _ = handle.await;
        }
        let stderr_lines = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        let Some(status) = status else {
            return Ok(RunOutcome::Cancelled);
        };

        if status.success() {
            Ok(RunOutcome::Completed)
        } else {
            Ok(RunOutcome::Failed {
                message: failure_message(&stderr_lines, status.code()),
            })
        }
    }
}

/// Accumulates one `-progress` key=value block and emits a snapshot when the
/// terminating `progress=` line arrives.
#[derive(Debug, Default)]
struct ProgressBlock {
    frames: Option<u64>,
    fps: Option<f32>,
    bitrate_kbps: Option<f64>,
    out_time_secs: Option<f64>,
    speed: Option<f32>,
}

impl ProgressBlock {
    fn feed(
        &mut self,
        line: &str,
        runtime_secs: u32,
        elapsed: Duration,
    ) -> Option<TranscodeProgress> {
        let (key, value) = line.split_once('=')?;
        let value = value.trim();
        match key.trim() {
            "frame" => self.frames = value.parse().ok(),
            "fps" => self.fps = value.parse().ok(),
            "bitrate" => self.bitrate_kbps = parse_bitrate(value),
            // ffmpeg's out_time_us is microseconds; so is out_time_ms.
            "out_time_us" | "out_time_ms" => {
                self.out_time_secs = value.parse::<f64>().ok().map(|us| us / 1_000_000.0);
            }
            "out_time" => {
                if self.out_time_secs.is_none() {
                    self.out_time_secs = parse_clock(value);
                }
            }
            "speed" => {
                self.speed = value.trim_end_matches(['x', 'X']).trim().parse().ok();
            }
            "progress" => {
                let percentage = self.out_time_secs.and_then(|position| {
                    (runtime_secs > 0)
                        .then(|| ((position / f64::from(runtime_secs)) as f32).clamp(0.0, 1.0))
                });
                let snapshot = TranscodeProgress {
                    frames: self.frames,
                    fps: self.fps,
                    bitrate_kbps: self.bitrate_kbps,
                    percentage,
                    speed: self.speed,
                    elapsed: Some(elapsed),
                };
                *self = Self::default();
                return Some(snapshot);
            }
            _ => {}
        }
        None
    }
}

/// `1264.5kbits/s` → 1264.5; `N/A` → None.
fn parse_bitrate(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        return None;
    }
    let digits_end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(trimmed.len());
    let value: f64 = trimmed[..digits_end].parse().ok()?;
    let unit = &trimmed[digits_end..];
    Some(match unit {
        u if u.starts_with("kbit") || u.starts_with("kb") => value,
        u if u.starts_with("mbit") || u.starts_with("mb") => value * 1000.0,
        u if u.starts_with("bit") => value / 1000.0,
        _ => value,
    })
}

/// `00:42:30.48` → seconds.
fn parse_clock(raw: &str) -> Option<f64> {
    let mut parts = raw.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[derive(Debug, Deserialize)]
struct NestedError {
    error: NestedErrorBody,
}

#[derive(Debug, Deserialize)]
struct NestedErrorBody {
    string: String,
}

/// Pull the transcoder's nested JSON error out of its noisy stderr; fall back
/// to the last non-empty line, then the bare exit code.
fn failure_message(stderr_lines: &[String], exit_code: Option<i32>) -> String {
    for line in stderr_lines.iter().rev() {
        if let Some(start) = line.find(r#"{"error""#) {
            // Deserialize one value and ignore whatever noise trails it.
            let mut stream =
                serde_json::Deserializer::from_str(&line[start..]).into_iter::<NestedError>();
            if let Some(Ok(nested)) = stream.next() {
                return nested.error.string;
            }
        }
    }

    stderr_lines
        .iter()
        .rev()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("transcoder exited with status {code}"),
            None => "transcoder terminated by signal".to_string(),
        })
}

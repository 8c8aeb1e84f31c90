//! State machine around one transcoder invocation for one (media, target)
//! pair.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transcode::ffmpeg::{ProgressSink, RunOutcome, TranscodeInvocation, TranscodeRunner};
use crate::trouble::{Trouble, TroubleKind};
use crate::{CoreError, Result};
use thea_model::{MediaContainer, MediaId, TargetId, TaskId, TranscodeProgress, TranscodeTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Queued; not yet admitted under the thread budget.
    Waiting,
    /// The transcoder process is running.
    Working,
    /// The transcoder process is stopped mid-flight.
    Suspended,
    /// Failed recoverably; waiting on operator resolution.
    Troubled,
    Cancelled,
    Complete,
}

impl TaskState {
    /// Terminal tasks are removed from the queue (complete ones after their
    /// record is persisted).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Complete)
    }
}

/// In-memory tracking record for one external transcoder invocation.
pub struct TranscodeTask {
    pub id: TaskId,
    media: MediaContainer,
    target: TranscodeTarget,
    output_path: PathBuf,
    state: Mutex<TaskState>,
    progress: Mutex<Option<TranscodeProgress>>,
    trouble: Mutex<Option<Trouble>>,
    cancel: CancellationToken,
    pid: Arc<AtomicU32>,
}

impl std::fmt::Debug for TranscodeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeTask")
            .field("id", &self.id)
            .field("media", &self.media.id())
            .field("target", &self.target.id)
            .field("state", &self.state())
            .finish()
    }
}

impl TranscodeTask {
    pub fn new(
        media: MediaContainer,
        target: TranscodeTarget,
        output_root: &Path,
        cancel: CancellationToken,
    ) -> Self {
        let output_path = output_root
            .join(media.id().to_string())
            .join(format!("{}.{}", target.id, target.extension));
        Self {
            id: TaskId::new(),
            media,
            target,
            output_path,
            state: Mutex::new(TaskState::Waiting),
            progress: Mutex::new(None),
            trouble: Mutex::new(None),
            cancel,
            pid: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn media_id(&self) -> MediaId {
        self.media.id()
    }

    pub fn target_id(&self) -> TargetId {
        self.target.id
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn required_threads(&self) -> u32 {
        self.target.required_threads.max(1)
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().expect("task state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock().expect("task state lock poisoned") = state;
    }

    pub fn progress(&self) -> Option<TranscodeProgress> {
        self.progress.lock().expect("task progress lock poisoned").clone()
    }

    pub fn trouble(&self) -> Option<Trouble> {
        self.trouble.lock().expect("task trouble lock poisoned").clone()
    }

    pub(crate) fn clear_trouble(&self) {
        *self.trouble.lock().expect("task trouble lock poisoned") = None;
    }

    /// Interrupt the running transcoder. The task cleans up its partial
    /// output on the way to `Cancelled`. Suspended processes are continued
    /// first so they can observe the kill.
    pub fn cancel(&self) {
        if self.state() == TaskState::Suspended {
            let _ = self.signal_child(ChildSignal::Continue);
        }
        self.cancel.cancel();
    }

    /// Stop the transcoder process without giving up the thread budget.
    pub fn suspend(&self) -> Result<()> {
        if self.state() != TaskState::Working {
            return Err(CoreError::Internal("only working tasks can suspend".to_string()));
        }
        self.signal_child(ChildSignal::Stop)?;
        self.set_state(TaskState::Suspended);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if self.state() != TaskState::Suspended {
            return Err(CoreError::Internal("only suspended tasks can resume".to_string()));
        }
        self.signal_child(ChildSignal::Continue)?;
        self.set_state(TaskState::Working);
        Ok(())
    }

    #[cfg(unix)]
    fn signal_child(&self, signal: ChildSignal) -> Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            return Err(CoreError::Internal("no transcoder process to signal".to_string()));
        }
        let signal = match signal {
            ChildSignal::Stop => Signal::SIGTSTP,
            ChildSignal::Continue => Signal::SIGCONT,
        };
        kill(Pid::from_raw(pid as i32), signal)
            .map_err(|err| CoreError::Internal(format!("failed to signal transcoder: {err}")))
    }

    #[cfg(not(unix))]
    fn signal_child(&self, _signal: ChildSignal) -> Result<()> {
        Err(CoreError::Internal(
            "transcoder suspension is unsupported on this platform".to_string(),
        ))
    }

    /// Drive the external transcoder to a terminal or troubled state. Each
    /// parsed progress snapshot lands on the task and tickles `changes`; the
    /// caller observes the final state through the same channel once this
    /// returns.
    pub(crate) async fn run(
        self: &Arc<Self>,
        runner: Arc<dyn TranscodeRunner>,
        changes: mpsc::Sender<TaskId>,
    ) {
        let outcome = self.execute(runner, changes).await;

        match outcome {
            Ok(RunOutcome::Completed) => match tokio::fs::metadata(&self.output_path).await {
                Ok(meta) if meta.len() > 0 => self.set_state(TaskState::Complete),
                _ => self.fail("transcoder exited cleanly but produced no output"),
            },
            Ok(RunOutcome::Cancelled) => {
                if let Err(err) = tokio::fs::remove_file(&self.output_path).await
                    && err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(task = %self.id, error = %err, "failed to remove partial output");
                }
                self.set_state(TaskState::Cancelled);
            }
            Ok(RunOutcome::Failed { message }) => self.fail(message),
            Err(err) => self.fail(err.to_string()),
        }
    }

    async fn execute(
        self: &Arc<Self>,
        runner: Arc<dyn TranscodeRunner>,
        changes: mpsc::Sender<TaskId>,
    ) -> Result<RunOutcome> {
        self.preflight().await?;

        let task = Arc::clone(self);
        let sink: ProgressSink = Arc::new(move |snapshot| {
            *task.progress.lock().expect("task progress lock poisoned") = Some(snapshot);
            // Full channels mean the scheduler is already about to look.
            let _ = changes.try_send(task.id);
        });

        let invocation = TranscodeInvocation {
            source: self.media.source_path().to_path_buf(),
            output: self.output_path.clone(),
            arguments: self.target.arguments.clone(),
            runtime_secs: source_runtime_secs(&self.media),
        };

        runner
            .run(invocation, sink, self.cancel.clone(), Arc::clone(&self.pid))
            .await
    }

    /// Output-side checks before spawning: only mp4 containers are produced,
    /// the source must still exist, and a stale output from an earlier failed
    /// run is removed.
    async fn preflight(&self) -> Result<()> {
        if !self.target.extension.eq_ignore_ascii_case("mp4") {
            return Err(CoreError::Transcoder(format!(
                "target {} wants a .{} container; only mp4 output is supported",
                self.target.label, self.target.extension
            )));
        }

        if !tokio::fs::try_exists(self.media.source_path()).await? {
            return Err(CoreError::Transcoder(format!(
                "source file {} no longer exists",
                self.media.source_path().display()
            )));
        }

        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::try_exists(&self.output_path).await? {
            debug!(output = %self.output_path.display(), "removing stale output file");
            tokio::fs::remove_file(&self.output_path).await?;
        }
        Ok(())
    }

    fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        *self.trouble.lock().expect("task trouble lock poisoned") =
            Some(Trouble::new(TroubleKind::TranscodeFailure, message));
        self.set_state(TaskState::Troubled);
    }
}

enum ChildSignal {
    Stop,
    Continue,
}

fn source_runtime_secs(media: &MediaContainer) -> u32 {
    match media {
        MediaContainer::Movie(movie) => movie.runtime_secs,
        MediaContainer::Episode { episode, .. } => episode.runtime_secs,
    }
}

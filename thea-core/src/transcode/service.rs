//! The transcode scheduler: one event loop owning the live task queue,
//! admitting tasks under the global thread budget, and persisting
//! completions.
//!
//! The loop selects over queue-change tickles, task-change notifications, the
//! bus's new-media subscription, and shutdown. The task list and the
//! consumed-thread counter share one mutex; thread release and the follow-up
//! task-change happen inside the per-task wrapper so admission always sees a
//! consistent budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventBus, EventKind};
use crate::store::{MediaStore, TargetStore, TranscodeStore, WorkflowStore};
use crate::transcode::ffmpeg::TranscodeRunner;
use crate::transcode::task::{TaskState, TranscodeTask};
use crate::trouble::{Resolution, ResolutionContext, ResolutionMethod};
use crate::workflow::first_matching;
use crate::{CoreError, Result};
use thea_config::TranscodeConfig;
use thea_model::{CompletedTranscode, MediaContainer, MediaId, TargetId, TaskId, TranscodeTarget};

pub type TranscodeServiceHandle = Arc<TranscodeService>;

#[derive(Default)]
struct SchedulerState {
    /// Insertion order is admission order.
    tasks: Vec<Arc<TranscodeTask>>,
    consumed_threads: u32,
    inflight: HashMap<TaskId, JoinHandle<()>>,
}

pub struct TranscodeService {
    config: TranscodeConfig,
    bus: Arc<EventBus>,
    media_store: Arc<dyn MediaStore>,
    workflow_store: Arc<dyn WorkflowStore>,
    target_store: Arc<dyn TargetStore>,
    transcode_store: Arc<dyn TranscodeStore>,
    runner: Arc<dyn TranscodeRunner>,
    state: Mutex<SchedulerState>,
    queue_tx: mpsc::Sender<()>,
    task_tx: mpsc::Sender<TaskId>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl std::fmt::Debug for TranscodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeService")
            .field("output_path", &self.config.output_path)
            .field("max_threads", &self.config.max_thread_consumption)
            .finish()
    }
}

impl TranscodeService {
    /// Build the service and start its event loop.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        config: TranscodeConfig,
        bus: Arc<EventBus>,
        media_store: Arc<dyn MediaStore>,
        workflow_store: Arc<dyn WorkflowStore>,
        target_store: Arc<dyn TargetStore>,
        transcode_store: Arc<dyn TranscodeStore>,
        runner: Arc<dyn TranscodeRunner>,
        shutdown: CancellationToken,
    ) -> TranscodeServiceHandle {
        let (queue_tx, queue_rx) = mpsc::channel(1);
        let (task_tx, task_rx) = mpsc::channel(128);
        let media_rx = bus.subscribe(EventKind::NewMedia, config.event_queue_capacity);

        let service = Arc::new(Self {
            config,
            bus,
            media_store,
            workflow_store,
            target_store,
            transcode_store,
            runner,
            state: Mutex::new(SchedulerState::default()),
            queue_tx,
            task_tx,
            shutdown,
            stopped: AtomicBool::new(false),
        });

        let looped = Arc::clone(&service);
        tokio::spawn(async move { looped.run_loop(queue_rx, task_rx, media_rx).await });

        service
    }

    async fn run_loop(
        self: Arc<Self>,
        mut queue_rx: mpsc::Receiver<()>,
        mut task_rx: mpsc::Receiver<TaskId>,
        mut media_rx: mpsc::Receiver<Event>,
    ) {
        info!("transcode scheduler started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(()) = queue_rx.recv() => self.admit().await,
                Some(task_id) = task_rx.recv() => self.handle_task_change(task_id).await,
                Some(event) = media_rx.recv() => {
                    if let Event::NewMedia { media_id } = event {
                        self.on_new_media(media_id).await;
                    }
                }
            }
        }
        self.drain().await;
        self.stopped.store(true, Ordering::SeqCst);
        info!("transcode scheduler stopped");
    }

    /// Wait for every in-flight task wrapper to return. Their cancellation
    /// tokens descend from the scheduler's, so by now each transcoder has
    /// been interrupted.
    async fn drain(&self) {
        let handles: Vec<(TaskId, JoinHandle<()>)> = {
            let mut state = self.state.lock().await;
            state.inflight.drain().collect()
        };
        for (task_id, handle) in handles {
            if let Err(err) = handle.await {
                warn!(task = %task_id, error = %err, "task wrapper panicked during drain");
            }
        }
    }

    // ---- task creation ---------------------------------------------------

    /// React to newly persisted media: evaluate workflows in declared order
    /// and spawn one task per target of the first enabled match.
    async fn on_new_media(&self, media_id: MediaId) {
        let container = match self.media_store.media(media_id).await {
            Ok(Some(container)) => container,
            Ok(None) => {
                warn!(media = %media_id, "new-media event for unknown container");
                return;
            }
            Err(err) => {
                error!(media = %media_id, error = %err, "failed to load container");
                return;
            }
        };

        let workflows = match self.workflow_store.all_workflows().await {
            Ok(workflows) => workflows,
            Err(err) => {
                error!(error = %err, "failed to load workflows");
                return;
            }
        };

        let Some(workflow) = first_matching(&container, &workflows) else {
            debug!(media = %media_id, "no workflow matches, nothing to transcode");
            return;
        };
        info!(media = %media_id, workflow = %workflow.label, "matched workflow");

        for target_id in &workflow.target_ids {
            let target = match self.target_store.target(*target_id).await {
                Ok(Some(target)) => target,
                Ok(None) => {
                    warn!(target = %target_id, "workflow references missing target");
                    continue;
                }
                Err(err) => {
                    error!(target = %target_id, error = %err, "failed to load target");
                    continue;
                }
            };
            if let Err(err) = self.spawn_task(container.clone(), target).await {
                debug!(media = %media_id, target = %target_id, error = %err, "skipping target");
            }
        }
    }

    /// Operator-initiated creation; the same admission path the workflow
    /// route uses.
    pub async fn new_task(&self, media_id: MediaId, target_id: TargetId) -> Result<TaskId> {
        let container = self
            .media_store
            .media(media_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("no media {media_id}")))?;
        let target = self
            .target_store
            .target(target_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("no transcode target {target_id}")))?;
        self.spawn_task(container, target).await
    }

    /// Append a waiting task for (media, target) unless the pair already has
    /// an active task or a persisted completion.
    async fn spawn_task(
        &self,
        container: MediaContainer,
        target: TranscodeTarget,
    ) -> Result<TaskId> {
        let media_id = container.id();
        let target_id = target.id;

        let mut state = self.state.lock().await;
        if state
            .tasks
            .iter()
            .any(|task| task.media_id() == media_id && task.target_id() == target_id)
        {
            return Err(CoreError::DuplicateTranscode { media_id, target_id });
        }
        if self
            .transcode_store
            .transcode_for_media_and_target(media_id, target_id)
            .await?
            .is_some()
        {
            return Err(CoreError::DuplicateTranscode { media_id, target_id });
        }

        let task = Arc::new(TranscodeTask::new(
            container,
            target,
            &self.config.output_path,
            self.shutdown.child_token(),
        ));
        let task_id = task.id;
        info!(task = %task_id, media = %media_id, target = %target_id, "queued transcode task");
        state.tasks.push(task);
        drop(state);

        let _ = self.queue_tx.try_send(());
        Ok(task_id)
    }

    // ---- admission -------------------------------------------------------

    /// Admit waiting tasks in insertion order while the budget holds. A task
    /// that does not fit stops admission outright; later, smaller tasks never
    /// jump the queue.
    async fn admit(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        let max = self.config.max_thread_consumption;

        let queue: Vec<Arc<TranscodeTask>> = state.tasks.clone();
        for task in queue {
            if task.state() != TaskState::Waiting {
                continue;
            }
            let required = task.required_threads();
            if state.consumed_threads + required > max {
                break;
            }
            state.consumed_threads += required;
            task.set_state(TaskState::Working);
            debug!(
                task = %task.id,
                required,
                consumed = state.consumed_threads,
                "admitting task"
            );
            self.launch(&mut state, task, required);
        }
    }

    fn launch(self: &Arc<Self>, state: &mut SchedulerState, task: Arc<TranscodeTask>, required: u32) {
        let service = Arc::clone(self);
        let task_id = task.id;
        let handle = tokio::spawn(async move {
            task.run(Arc::clone(&service.runner), service.task_tx.clone()).await;

            let mut state = service.state.lock().await;
            state.consumed_threads = state.consumed_threads.saturating_sub(required);
            state.inflight.remove(&task.id);
            drop(state);

            if service.task_tx.try_send(task.id).is_err() {
                warn!(task = %task.id, "task-change channel full at completion");
            }
            let _ = service.queue_tx.try_send(());
        });
        state.inflight.insert(task_id, handle);
    }

    // ---- task updates ----------------------------------------------------

    async fn handle_task_change(&self, task_id: TaskId) {
        let task = {
            let state = self.state.lock().await;
            state.tasks.iter().find(|task| task.id == task_id).cloned()
        };
        let Some(task) = task else {
            return;
        };

        match task.state() {
            TaskState::Complete => {
                let record = CompletedTranscode {
                    id: task.id,
                    media_id: task.media_id(),
                    target_id: task.target_id(),
                    output_path: task.output_path().to_path_buf(),
                    completed_at: Utc::now(),
                };
                match self.transcode_store.save_transcode(&record).await {
                    Ok(()) => {
                        self.remove_task(task_id).await;
                        self.bus.dispatch(Event::TranscodeComplete { task_id });
                    }
                    Err(err) => {
                        // The task stays queued in Complete state; the
                        // operator discards it with cancel once the store
                        // recovers or the record is written by hand.
                        error!(task = %task_id, error = %err, "failed to persist completed transcode");
                    }
                }
            }
            TaskState::Cancelled => {
                self.remove_task(task_id).await;
            }
            _ => {
                self.bus.dispatch(Event::TranscodeUpdate { task_id });
            }
        }
    }

    async fn remove_task(&self, task_id: TaskId) {
        let mut state = self.state.lock().await;
        state.tasks.retain(|task| task.id != task_id);
    }

    // ---- operator surface ------------------------------------------------

    /// Snapshot of the live tasks, for operators and tests.
    pub async fn tasks(&self) -> Vec<Arc<TranscodeTask>> {
        self.state.lock().await.tasks.clone()
    }

    /// Cancel a task: working and suspended tasks get their context
    /// resolved and clean themselves up; anything else leaves the queue
    /// immediately and nothing is persisted.
    pub async fn cancel(&self, task_id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(position) = state.tasks.iter().position(|task| task.id == task_id) else {
            return Err(CoreError::NotFound(format!("no transcode task {task_id}")));
        };
        let task = Arc::clone(&state.tasks[position]);

        match task.state() {
            TaskState::Working | TaskState::Suspended => {
                drop(state);
                task.cancel();
            }
            _ => {
                state.tasks.remove(position);
            }
        }
        Ok(())
    }

    /// Apply an operator resolution to a troubled task.
    pub async fn resolve(
        &self,
        task_id: TaskId,
        method: ResolutionMethod,
        context: ResolutionContext,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(position) = state.tasks.iter().position(|task| task.id == task_id) else {
            return Err(CoreError::NotFound(format!("no transcode task {task_id}")));
        };
        let task = Arc::clone(&state.tasks[position]);
        let trouble = task
            .trouble()
            .ok_or_else(|| CoreError::Internal(format!("task {task_id} has no trouble")))?;

        match trouble.resolve(method, &context)? {
            Resolution::Retry => {
                task.clear_trouble();
                task.set_state(TaskState::Waiting);
                drop(state);
                let _ = self.queue_tx.try_send(());
                self.bus.dispatch(Event::TranscodeUpdate { task_id });
            }
            Resolution::Abort => {
                state.tasks.remove(position);
                drop(state);
                self.bus.dispatch(Event::TranscodeUpdate { task_id });
            }
            Resolution::Override(_) => {
                return Err(CoreError::Internal(
                    "transcode troubles accept no external id".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Pause a working task's transcoder without releasing its threads.
    pub async fn suspend(&self, task_id: TaskId) -> Result<()> {
        let task = self.find_task(task_id).await?;
        task.suspend()?;
        self.bus.dispatch(Event::TranscodeUpdate { task_id });
        Ok(())
    }

    pub async fn resume(&self, task_id: TaskId) -> Result<()> {
        let task = self.find_task(task_id).await?;
        task.resume()?;
        self.bus.dispatch(Event::TranscodeUpdate { task_id });
        Ok(())
    }

    async fn find_task(&self, task_id: TaskId) -> Result<Arc<TranscodeTask>> {
        let state = self.state.lock().await;
        state
            .tasks
            .iter()
            .find(|task| task.id == task_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("no transcode task {task_id}")))
    }

    /// Stop the event loop and wait for in-flight tasks to unwind.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        // The loop performs the drain and raises the flag once every task
        // wrapper has returned.
        while !self.stopped.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        MockMediaStore, MockTargetStore, MockTranscodeStore, MockWorkflowStore,
    };
    use crate::transcode::ffmpeg::{ProgressSink, RunOutcome, TranscodeInvocation};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;
    use std::time::{Duration, Instant};
    use tokio::time::timeout;
    use thea_model::{Movie, Workflow, WorkflowId};

    /// Sleeps for `delay`, writes the output, and logs when each invocation
    /// ran; cancellation wins the race cleanly.
    struct RecordingRunner {
        delay: Duration,
        log: StdMutex<Vec<(PathBuf, Instant, Instant)>>,
    }

    impl RecordingRunner {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                log: StdMutex::new(Vec::new()),
            }
        }

        fn interval_for(&self, target_id: TargetId) -> (Instant, Instant) {
            let marker = target_id.to_string();
            let log = self.log.lock().unwrap();
            log.iter()
                .find(|(path, _, _)| path.to_string_lossy().contains(&marker))
                .map(|(_, start, end)| (*start, *end))
                .unwrap_or_else(|| panic!("no run recorded for target {marker}"))
        }
    }

    #[async_trait]
    impl TranscodeRunner for RecordingRunner {
        async fn run(
            &self,
            invocation: TranscodeInvocation,
            _progress: ProgressSink,
            cancel: CancellationToken,
            _pid: Arc<AtomicU32>,
        ) -> Result<RunOutcome> {
            let start = Instant::now();
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
            }
            tokio::fs::write(&invocation.output, b"rendition").await?;
            self.log
                .lock()
                .unwrap()
                .push((invocation.output, start, Instant::now()));
            Ok(RunOutcome::Completed)
        }
    }

    fn movie_container(source: &Path) -> MediaContainer {
        let now = Utc::now();
        MediaContainer::Movie(Movie {
            id: MediaId::new(),
            external_id: "M1".into(),
            title: "Heat".to_string(),
            adult: false,
            source_path: source.to_path_buf(),
            frame_width: 1920,
            frame_height: 1080,
            runtime_secs: 6000,
            created_at: now,
            updated_at: now,
        })
    }

    fn target(required_threads: u32) -> TranscodeTarget {
        let mut target = TranscodeTarget::new(format!("t{required_threads}"), "mp4");
        target.required_threads = required_threads;
        target
    }

    fn config(dir: &Path, max_threads: u32) -> TranscodeConfig {
        TranscodeConfig {
            output_path: dir.join("out"),
            max_thread_consumption: max_threads,
            ..TranscodeConfig::default()
        }
    }

    fn media_store_with(container: MediaContainer) -> MockMediaStore {
        let mut store = MockMediaStore::new();
        let id = container.id();
        store
            .expect_media()
            .withf(move |wanted| *wanted == id)
            .returning(move |_| Ok(Some(container.clone())));
        store
    }

    fn target_store_with(targets: Vec<TranscodeTarget>) -> MockTargetStore {
        let mut store = MockTargetStore::new();
        store.expect_target().returning(move |id| {
            Ok(targets.iter().find(|target| target.id == id).cloned())
        });
        store
    }

    fn no_records() -> MockTranscodeStore {
        let mut store = MockTranscodeStore::new();
        store
            .expect_transcode_for_media_and_target()
            .returning(|_, _| Ok(None));
        store
    }

    #[tokio::test]
    async fn admission_respects_the_thread_budget_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"src").unwrap();

        let container = movie_container(&source);
        let target_a = target(1);
        let target_b = target(2);

        let workflow = Workflow {
            id: WorkflowId::new(),
            label: "everything".to_string(),
            enabled: true,
            criteria: Vec::new(),
            target_ids: vec![target_a.id, target_b.id],
        };
        let mut workflow_store = MockWorkflowStore::new();
        workflow_store
            .expect_all_workflows()
            .returning(move || Ok(vec![workflow.clone()]));

        let mut transcode_store = no_records();
        transcode_store
            .expect_save_transcode()
            .times(2)
            .returning(|_| Ok(()));

        let runner = Arc::new(RecordingRunner::new(Duration::from_millis(200)));
        let bus = Arc::new(EventBus::new());
        let mut complete_rx = bus.subscribe(EventKind::TranscodeComplete, 8);

        let media_id = container.id();
        let service = TranscodeService::start(
            config(dir.path(), 2),
            Arc::clone(&bus),
            Arc::new(media_store_with(container)),
            Arc::new(workflow_store),
            Arc::new(target_store_with(vec![target_a.clone(), target_b.clone()])),
            Arc::new(transcode_store),
            Arc::clone(&runner) as Arc<dyn TranscodeRunner>,
            CancellationToken::new(),
        );

        bus.dispatch(Event::NewMedia { media_id });

        for _ in 0..2 {
            timeout(Duration::from_secs(5), complete_rx.recv())
                .await
                .expect("transcode-complete within deadline")
                .unwrap();
        }

        // The 2-thread target must not have been co-scheduled with the
        // 1-thread one: it starts only after the first releases its budget.
        let (_, end_a) = runner.interval_for(target_a.id);
        let (start_b, _) = runner.interval_for(target_b.id);
        assert!(end_a <= start_b, "targets were co-scheduled over budget");

        assert!(service.tasks().await.is_empty());
        service.stop().await;
    }

    #[tokio::test]
    async fn persisted_record_rejects_a_new_task_naming_the_pair() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"src").unwrap();

        let container = movie_container(&source);
        let media_id = container.id();
        let the_target = target(1);
        let target_id = the_target.id;

        let mut transcode_store = MockTranscodeStore::new();
        transcode_store
            .expect_transcode_for_media_and_target()
            .returning(move |media_id, target_id| {
                Ok(Some(CompletedTranscode {
                    id: TaskId::new(),
                    media_id,
                    target_id,
                    output_path: PathBuf::from("/out/x.mp4"),
                    completed_at: Utc::now(),
                }))
            });

        let service = TranscodeService::start(
            config(dir.path(), 2),
            Arc::new(EventBus::new()),
            Arc::new(media_store_with(container)),
            Arc::new(MockWorkflowStore::new()),
            Arc::new(target_store_with(vec![the_target])),
            Arc::new(transcode_store),
            Arc::new(RecordingRunner::new(Duration::from_millis(10))),
            CancellationToken::new(),
        );

        let err = service.new_task(media_id, target_id).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains(&media_id.to_string()));
        assert!(message.contains(&target_id.to_string()));
        assert!(service.tasks().await.is_empty());

        service.stop().await;
    }

    #[tokio::test]
    async fn active_pair_rejects_a_second_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"src").unwrap();

        let container = movie_container(&source);
        let media_id = container.id();
        let the_target = target(1);
        let target_id = the_target.id;

        let service = TranscodeService::start(
            config(dir.path(), 2),
            Arc::new(EventBus::new()),
            Arc::new(media_store_with(container)),
            Arc::new(MockWorkflowStore::new()),
            Arc::new(target_store_with(vec![the_target])),
            Arc::new(no_records()),
            Arc::new(RecordingRunner::new(Duration::from_secs(10))),
            CancellationToken::new(),
        );

        service.new_task(media_id, target_id).await.unwrap();
        let err = service.new_task(media_id, target_id).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTranscode { .. }));

        service.stop().await;
    }

    #[tokio::test]
    async fn cancelling_a_waiting_task_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"src").unwrap();

        let container = movie_container(&source);
        let media_id = container.id();
        let the_target = target(1);
        let target_id = the_target.id;

        // Budget of zero keeps the task waiting forever; save_transcode has
        // no expectation, so persisting anything would fail the test.
        let service = TranscodeService::start(
            config(dir.path(), 0),
            Arc::new(EventBus::new()),
            Arc::new(media_store_with(container)),
            Arc::new(MockWorkflowStore::new()),
            Arc::new(target_store_with(vec![the_target])),
            Arc::new(no_records()),
            Arc::new(RecordingRunner::new(Duration::from_millis(10))),
            CancellationToken::new(),
        );

        let task_id = service.new_task(media_id, target_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.tasks().await[0].state(), TaskState::Waiting);

        service.cancel(task_id).await.unwrap();
        assert!(service.tasks().await.is_empty());

        service.stop().await;
    }

    #[tokio::test]
    async fn shutdown_interrupts_and_drains_working_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"src").unwrap();

        let container = movie_container(&source);
        let media_id = container.id();
        let the_target = target(1);
        let target_id = the_target.id;

        let service = TranscodeService::start(
            config(dir.path(), 2),
            Arc::new(EventBus::new()),
            Arc::new(media_store_with(container)),
            Arc::new(MockWorkflowStore::new()),
            Arc::new(target_store_with(vec![the_target])),
            Arc::new(no_records()),
            Arc::new(RecordingRunner::new(Duration::from_secs(60))),
            CancellationToken::new(),
        );

        service.new_task(media_id, target_id).await.unwrap();
        // Give admission a moment to put the task to work.
        for _ in 0..50 {
            let tasks = service.tasks().await;
            if !tasks.is_empty() && tasks[0].state() == TaskState::Working {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        timeout(Duration::from_secs(2), service.stop())
            .await
            .expect("shutdown must drain promptly");
    }

    #[tokio::test]
    async fn retry_resolution_requeues_a_troubled_task() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"src").unwrap();

        let container = movie_container(&source);
        let media_id = container.id();
        // A non-mp4 target troubles in preflight on every attempt.
        let mut bad_target = target(1);
        bad_target.extension = "webm".to_string();
        let target_id = bad_target.id;

        let service = TranscodeService::start(
            config(dir.path(), 2),
            Arc::new(EventBus::new()),
            Arc::new(media_store_with(container)),
            Arc::new(MockWorkflowStore::new()),
            Arc::new(target_store_with(vec![bad_target])),
            Arc::new(no_records()),
            Arc::new(RecordingRunner::new(Duration::from_millis(10))),
            CancellationToken::new(),
        );

        let task_id = service.new_task(media_id, target_id).await.unwrap();
        for _ in 0..50 {
            let tasks = service.tasks().await;
            if !tasks.is_empty() && tasks[0].state() == TaskState::Troubled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.tasks().await[0].state(), TaskState::Troubled);

        service
            .resolve(task_id, ResolutionMethod::Retry, ResolutionContext::default())
            .await
            .unwrap();
        for _ in 0..50 {
            let tasks = service.tasks().await;
            if !tasks.is_empty() && tasks[0].state() == TaskState::Troubled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.tasks().await[0].state(), TaskState::Troubled);

        service
            .resolve(task_id, ResolutionMethod::Abort, ResolutionContext::default())
            .await
            .unwrap();
        assert!(service.tasks().await.is_empty());

        service.stop().await;
    }
}

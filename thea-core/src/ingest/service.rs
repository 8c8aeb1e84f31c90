//! The ingest service: a discovery loop, a worker pool, and the per-item
//! pipeline that turns a stabilised file into persisted media.
//!
//! One mutex guards the item queue, the import-hold timers, and the
//! idle→ingesting claim transition; the atomic claim is the only concurrency
//! guarantee workers rely on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};
use crate::ingest::item::{IngestItem, ItemState};
use crate::ingest::scraper::{FileMetadata, MediaScraper};
use crate::ingest::searcher::{CatalogueSearcher, SearchError};
use crate::store::MediaStore;
use crate::trouble::{Resolution, ResolutionContext, ResolutionMethod, Trouble, TroubleKind};
use crate::workers::{WorkerPool, WorkerSignal};
use crate::{CoreError, Result};
use thea_config::IngestConfig;
use thea_model::{Episode, ExternalId, ItemId, MediaId, Movie, Season, SeasonId, Series, SeriesId};

pub type IngestServiceHandle = Arc<IngestService>;

#[derive(Debug, Default)]
struct IngestQueue {
    items: Vec<IngestItem>,
    hold_timers: HashMap<ItemId, JoinHandle<()>>,
}

pub struct IngestService {
    config: IngestConfig,
    bus: Arc<EventBus>,
    store: Arc<dyn MediaStore>,
    scraper: Arc<dyn MediaScraper>,
    searcher: Arc<dyn CatalogueSearcher>,
    queue: Mutex<IngestQueue>,
    pool: WorkerPool,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService")
            .field("ingest_path", &self.config.ingest_path)
            .field("parallelism", &self.config.ingestion_parallelism)
            .finish()
    }
}

impl IngestService {
    /// Build the service and start its discovery loop and worker pool. The
    /// returned handle drives operator commands and shutdown.
    pub async fn start(
        config: IngestConfig,
        bus: Arc<EventBus>,
        store: Arc<dyn MediaStore>,
        scraper: Arc<dyn MediaScraper>,
        searcher: Arc<dyn CatalogueSearcher>,
        shutdown: CancellationToken,
    ) -> IngestServiceHandle {
        let service = Arc::new(Self {
            config,
            bus,
            store,
            scraper,
            searcher,
            queue: Mutex::new(IngestQueue::default()),
            pool: WorkerPool::new(),
            shutdown,
        });

        let discovery = Arc::clone(&service);
        tokio::spawn(async move { discovery.discovery_loop().await });

        let worker = Arc::clone(&service);
        service
            .pool
            .start(service.config.ingestion_parallelism.max(1), move || {
                let service = Arc::clone(&worker);
                async move { service.work_once().await }
            })
            .await;

        service
    }

    /// Cancel pending hold timers, stop discovery, and drain the workers.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        {
            let mut queue = self.queue.lock().await;
            for (_, timer) in queue.hold_timers.drain() {
                timer.abort();
            }
        }
        self.pool.close().await;
        info!("ingest service stopped");
    }

    /// Snapshot of the tracked items, for operators and tests.
    pub async fn items(&self) -> Vec<IngestItem> {
        self.queue.lock().await.items.clone()
    }

    // ---- discovery -------------------------------------------------------

    async fn discovery_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.force_sync_seconds.max(1)));

        // Filesystem notifications trigger an extra sweep between ticks. The
        // watcher thread must not block, so it only tickles the channel.
        let (fs_tx, mut fs_rx) = mpsc::channel::<()>(4);
        let _watcher = match notify::recommended_watcher(
            move |result: std::result::Result<notify::Event, notify::Error>| {
                if result.is_ok() {
                    let _ = fs_tx.try_send(());
                }
            },
        ) {
            Ok(mut watcher) => match watcher.watch(&self.config.ingest_path, RecursiveMode::Recursive)
            {
                Ok(()) => Some(watcher),
                Err(err) => {
                    warn!(error = %err, "filesystem watch unavailable, relying on periodic sweep");
                    None
                }
            },
            Err(err) => {
                warn!(error = %err, "failed to build filesystem watcher");
                None
            }
        };

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("discovery loop shutting down");
                    break;
                }
                _ = interval.tick() => self.sweep().await,
                Some(()) = fs_rx.recv() => self.sweep().await,
            }
        }
    }

    /// Walk the ingest directory and track every new regular video file that
    /// is neither blacklisted nor already known to the store.
    async fn sweep(self: &Arc<Self>) {
        let known_paths = match self.store.all_source_paths().await {
            Ok(paths) => paths,
            Err(err) => {
                warn!(error = %err, "skipping sweep, store unavailable");
                return;
            }
        };

        let mut discovered = Vec::new();
        for entry in walkdir::WalkDir::new(&self.config.ingest_path)
            .follow_links(true)
            .into_iter()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // Transient: unreadable subtrees are retried next sweep.
                    debug!(error = %err, "discovery walk error");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !self.is_ingestable(path) {
                continue;
            }
            if known_paths.iter().any(|known| known == path) {
                continue;
            }
            discovered.push(path.to_path_buf());
        }

        for path in discovered {
            self.track(path).await;
        }
    }

    fn is_ingestable(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        let name_lower = name.to_lowercase();
        if self
            .config
            .blacklist
            .iter()
            .any(|pattern| name_lower.contains(&pattern.to_lowercase()))
        {
            return false;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.config.video_extensions.iter().any(|known| known.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false)
    }

    async fn track(self: &Arc<Self>, path: PathBuf) {
        let modified_at = match file_modified_at(&path) {
            Some(modified_at) => modified_at,
            None => return, // vanished between walk and stat
        };

        let mut queue = self.queue.lock().await;
        if queue.items.iter().any(|item| item.path == path) {
            return;
        }

        let required = Duration::from_secs(self.config.required_modtime_age_seconds);
        let age = age_of(modified_at);

        let state = if age >= required {
            ItemState::Idle
        } else {
            ItemState::ImportHold
        };
        let item = IngestItem::new(path.clone(), state, modified_at);
        let item_id = item.id;
        info!(item = %item_id, path = %path.display(), ?state, "tracking new file");
        queue.items.push(item);

        match state {
            ItemState::Idle => {
                drop(queue);
                self.bus.dispatch(Event::IngestUpdate { item_id });
                self.pool.wake_all();
            }
            _ => {
                let remaining = required.saturating_sub(age);
                let service = Arc::clone(self);
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(remaining).await;
                    service.recheck_hold(item_id).await;
                });
                queue.hold_timers.insert(item_id, timer);
                drop(queue);
                self.bus.dispatch(Event::IngestUpdate { item_id });
            }
        }
    }

    /// One-shot timer body: by now the file should be old enough. A file that
    /// vanished while held is dropped without trouble; a file rewritten in
    /// the meantime is re-held.
    fn recheck_hold(
        self: Arc<Self>,
        item_id: ItemId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut queue = self.queue.lock().await;
            queue.hold_timers.remove(&item_id);

            let Some(position) = queue.items.iter().position(|item| item.id == item_id) else {
                return;
            };
            if queue.items[position].state != ItemState::ImportHold {
                return;
            }

            let path = queue.items[position].path.clone();
            let Some(modified_at) = file_modified_at(&path) else {
                debug!(item = %item_id, "held file vanished, dropping item");
                queue.items.remove(position);
                return;
            };

            let required = Duration::from_secs(self.config.required_modtime_age_seconds);
            let age = age_of(modified_at);
            if age >= required {
                queue.items[position].state = ItemState::Idle;
                queue.items[position].modified_at = modified_at;
                drop(queue);
                self.bus.dispatch(Event::IngestUpdate { item_id });
                self.pool.wake_all();
            } else {
                // Still being written; rearm for the remaining window.
                queue.items[position].modified_at = modified_at;
                let remaining = required.saturating_sub(age);
                let service = Arc::clone(&self);
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(remaining).await;
                    service.recheck_hold(item_id).await;
                });
                queue.hold_timers.insert(item_id, timer);
            }
        })
    }

    // ---- work claiming ---------------------------------------------------

    /// Atomically hand the first idle item to the calling worker.
    async fn claim_idle(&self) -> Option<(ItemId, PathBuf, Option<ExternalId>)> {
        let mut queue = self.queue.lock().await;
        let item = queue
            .items
            .iter_mut()
            .find(|item| item.state == ItemState::Idle)?;
        item.state = ItemState::Ingesting;
        Some((item.id, item.path.clone(), item.override_id.clone()))
    }

    async fn work_once(self: &Arc<Self>) -> Result<WorkerSignal> {
        let Some((item_id, path, override_id)) = self.claim_idle().await else {
            return Ok(WorkerSignal::Sleep);
        };

        self.bus.dispatch(Event::IngestUpdate { item_id });

        match self.run_pipeline(&path, override_id).await {
            Ok(media_id) => {
                self.finish_item(item_id).await;
                self.bus.dispatch(Event::IngestComplete { item_id });
                self.bus.dispatch(Event::NewMedia { media_id });
            }
            Err(trouble) => {
                warn!(item = %item_id, kind = ?trouble.kind, message = %trouble.message, "ingestion troubled");
                self.trouble_item(item_id, trouble).await;
                self.bus.dispatch(Event::IngestUpdate { item_id });
            }
        }
        Ok(WorkerSignal::Continue)
    }

    async fn finish_item(&self, item_id: ItemId) {
        let mut queue = self.queue.lock().await;
        if let Some(position) = queue.items.iter().position(|item| item.id == item_id) {
            queue.items[position].state = ItemState::Complete;
            queue.items.remove(position);
        }
    }

    async fn trouble_item(&self, item_id: ItemId, trouble: Trouble) {
        let mut queue = self.queue.lock().await;
        if let Some(item) = queue.items.iter_mut().find(|item| item.id == item_id) {
            item.state = ItemState::Troubled;
            item.trouble = Some(trouble);
        }
    }

    // ---- the per-item pipeline ------------------------------------------

    /// Scrape, resolve, fetch, persist. Every failure on this path is
    /// recoverable and comes back as the trouble to attach.
    async fn run_pipeline(
        &self,
        path: &Path,
        override_id: Option<ExternalId>,
    ) -> std::result::Result<MediaId, Trouble> {
        let meta = self.scraper.scrape(path).await.map_err(|err| {
            Trouble::new(TroubleKind::MetadataFailure, scrape_message(&err))
        })?;

        if meta.episodic {
            self.ingest_episode(&meta, override_id).await
        } else {
            self.ingest_movie(&meta, override_id).await
        }
    }

    async fn resolve_external_id(
        &self,
        meta: &FileMetadata,
        override_id: Option<ExternalId>,
    ) -> std::result::Result<ExternalId, Trouble> {
        if let Some(id) = override_id {
            return Ok(id);
        }
        let searched = if meta.episodic {
            self.searcher.search_series(meta).await
        } else {
            self.searcher.search_movie(meta).await
        };
        searched.map_err(search_trouble)
    }

    async fn ingest_movie(
        &self,
        meta: &FileMetadata,
        override_id: Option<ExternalId>,
    ) -> std::result::Result<MediaId, Trouble> {
        let external_id = self.resolve_external_id(meta, override_id).await?;
        let record = self
            .searcher
            .get_movie(&external_id)
            .await
            .map_err(search_trouble)?;

        let existing = self
            .store
            .movie_with_external_id(&record.external_id)
            .await
            .map_err(store_trouble)?;

        let now = Utc::now();
        let movie = Movie {
            id: existing.as_ref().map(|movie| movie.id).unwrap_or_default(),
            external_id: record.external_id,
            title: record.title,
            adult: record.adult,
            source_path: meta.path.clone(),
            frame_width: meta.frame_width,
            frame_height: meta.frame_height,
            runtime_secs: meta.runtime_secs,
            created_at: existing.as_ref().map(|movie| movie.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.store.save_movie(&movie).await.map_err(store_trouble)?;
        Ok(movie.id)
    }

    async fn ingest_episode(
        &self,
        meta: &FileMetadata,
        override_id: Option<ExternalId>,
    ) -> std::result::Result<MediaId, Trouble> {
        let (season_number, episode_number) = match (meta.season, meta.episode) {
            (Some(season), Some(episode)) => (season, episode),
            _ => {
                return Err(Trouble::new(
                    TroubleKind::MetadataFailure,
                    "episodic file lacks season or episode numbering",
                ));
            }
        };

        let series_external = self.resolve_external_id(meta, override_id).await?;
        let series_record = self
            .searcher
            .get_series(&series_external)
            .await
            .map_err(search_trouble)?;
        let season_record = self
            .searcher
            .get_season(&series_external, season_number)
            .await
            .map_err(search_trouble)?;
        let episode_record = self
            .searcher
            .get_episode(&series_external, season_number, episode_number)
            .await
            .map_err(search_trouble)?;

        let existing_series = self
            .store
            .series_with_external_id(&series_record.external_id)
            .await
            .map_err(store_trouble)?;
        let existing_season = self
            .store
            .season_with_external_id(&season_record.external_id)
            .await
            .map_err(store_trouble)?;
        let existing_episode = self
            .store
            .episode_with_external_id(&episode_record.external_id)
            .await
            .map_err(store_trouble)?;

        let now = Utc::now();
        let series_id = existing_series
            .as_ref()
            .map(|series| series.id)
            .unwrap_or_else(SeriesId::new);
        let series = Series {
            id: series_id,
            external_id: series_record.external_id,
            title: series_record.title,
            adult: series_record.adult,
            created_at: existing_series.as_ref().map(|series| series.created_at).unwrap_or(now),
            updated_at: now,
        };

        let season_id = existing_season
            .as_ref()
            .map(|season| season.id)
            .unwrap_or_else(SeasonId::new);
        let season = Season {
            id: season_id,
            series_id,
            external_id: season_record.external_id,
            title: season_record.title,
            number: season_record.number,
            created_at: existing_season.as_ref().map(|season| season.created_at).unwrap_or(now),
            updated_at: now,
        };

        let episode = Episode {
            id: existing_episode.as_ref().map(|episode| episode.id).unwrap_or_default(),
            season_id,
            external_id: episode_record.external_id,
            title: episode_record.title,
            number: episode_record.number,
            source_path: meta.path.clone(),
            frame_width: meta.frame_width,
            frame_height: meta.frame_height,
            runtime_secs: meta.runtime_secs,
            created_at: existing_episode
                .as_ref()
                .map(|episode| episode.created_at)
                .unwrap_or(now),
            updated_at: now,
        };

        self.store
            .save_episode(&episode, &season, &series)
            .await
            .map_err(store_trouble)?;
        Ok(episode.id)
    }

    // ---- operator surface ------------------------------------------------

    /// Apply an operator resolution to a troubled item.
    pub async fn resolve(
        &self,
        item_id: ItemId,
        method: ResolutionMethod,
        context: ResolutionContext,
    ) -> Result<()> {
        let mut queue = self.queue.lock().await;
        let Some(position) = queue.items.iter().position(|item| item.id == item_id) else {
            return Err(CoreError::NotFound(format!("no ingest item {item_id}")));
        };

        let trouble = queue.items[position]
            .trouble
            .clone()
            .ok_or_else(|| CoreError::Internal(format!("item {item_id} has no trouble")))?;

        match trouble.resolve(method, &context)? {
            Resolution::Retry => {
                let item = &mut queue.items[position];
                item.trouble = None;
                item.state = ItemState::Idle;
                drop(queue);
                self.bus.dispatch(Event::IngestUpdate { item_id });
                self.pool.wake_all();
            }
            Resolution::Abort => {
                queue.items.remove(position);
                if let Some(timer) = queue.hold_timers.remove(&item_id) {
                    timer.abort();
                }
                drop(queue);
                self.bus.dispatch(Event::IngestUpdate { item_id });
            }
            Resolution::Override(external_id) => {
                let item = &mut queue.items[position];
                item.trouble = None;
                item.override_id = Some(external_id);
                item.state = ItemState::Idle;
                drop(queue);
                self.bus.dispatch(Event::IngestUpdate { item_id });
                self.pool.wake_all();
            }
        }
        Ok(())
    }

    /// Operator removal of a tracked item. Items being ingested cannot be
    /// removed.
    pub async fn remove(&self, item_id: ItemId) -> Result<()> {
        let mut queue = self.queue.lock().await;
        let Some(position) = queue.items.iter().position(|item| item.id == item_id) else {
            return Err(CoreError::NotFound(format!("no ingest item {item_id}")));
        };
        if queue.items[position].state == ItemState::Ingesting {
            return Err(CoreError::Internal(
                "cannot remove an item while it is being ingested".to_string(),
            ));
        }
        queue.items.remove(position);
        if let Some(timer) = queue.hold_timers.remove(&item_id) {
            timer.abort();
        }
        drop(queue);
        self.bus.dispatch(Event::IngestUpdate { item_id });
        Ok(())
    }
}

fn file_modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn age_of(modified_at: DateTime<Utc>) -> Duration {
    (Utc::now() - modified_at).to_std().unwrap_or(Duration::ZERO)
}

fn scrape_message(err: &CoreError) -> String {
    match err {
        CoreError::Scrape { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn search_trouble(err: SearchError) -> Trouble {
    match err {
        SearchError::NoResult => {
            Trouble::new(TroubleKind::CatalogueNoResult, "the catalogue returned no match")
        }
        SearchError::MultiResult { candidates } => {
            let message = format!("{} catalogue matches", candidates.len());
            Trouble::new(TroubleKind::CatalogueMultiResult { candidates }, message)
        }
        SearchError::IllegalRequest(message) => {
            Trouble::new(TroubleKind::CatalogueUnknown, message)
        }
        SearchError::Provider(message) => Trouble::new(TroubleKind::CatalogueUnknown, message),
    }
}

fn store_trouble(err: CoreError) -> Trouble {
    Trouble::new(TroubleKind::UnknownFailure, err.to_string())
}

//! Port traits for the durable store.
//!
//! Both cores reach persistence exclusively through these traits; the
//! Postgres implementation lives in [`postgres`] and tests substitute mocks.
//! The store serialises its own writes and is safe for concurrent use.

mod postgres;

pub use postgres::PostgresStore;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::Result;
use thea_model::{
    CompletedTranscode, Episode, ExternalId, MediaContainer, MediaId, Movie, Season, Series,
    TargetId, TranscodeTarget, Workflow,
};

#[cfg(test)]
use mockall::automock;

/// Persistence operations for media entities.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Every source path known to the store, across movies and episodes.
    /// Discovery consults this set so a file is never ingested twice.
    async fn all_source_paths(&self) -> Result<Vec<PathBuf>>;

    async fn movie_with_external_id(&self, external_id: &ExternalId) -> Result<Option<Movie>>;
    async fn series_with_external_id(&self, external_id: &ExternalId) -> Result<Option<Series>>;
    async fn season_with_external_id(&self, external_id: &ExternalId) -> Result<Option<Season>>;
    async fn episode_with_external_id(&self, external_id: &ExternalId) -> Result<Option<Episode>>;

    async fn save_movie(&self, movie: &Movie) -> Result<()>;

    /// Persist an episode together with its season and series. Transactional:
    /// afterwards either all three rows exist or none do.
    async fn save_episode(&self, episode: &Episode, season: &Season, series: &Series) -> Result<()>;

    /// Fetch a persisted container by its media identifier, rebuilding the
    /// episode/season/series triple when the id names an episode.
    async fn media(&self, id: MediaId) -> Result<Option<MediaContainer>>;
}

/// Persistence operations for workflows.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn all_workflows(&self) -> Result<Vec<Workflow>>;

    /// Persist a workflow after validating every criterion against the
    /// key/type compatibility matrix.
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;
}

/// Persistence operations for transcode targets.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn target(&self, id: TargetId) -> Result<Option<TranscodeTarget>>;
    async fn all_targets(&self) -> Result<Vec<TranscodeTarget>>;
    async fn save_target(&self, target: &TranscodeTarget) -> Result<()>;
}

/// Persistence operations for completed transcode records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TranscodeStore: Send + Sync {
    /// Persist a completed transcode. Rejects a second record for the same
    /// (media, target) pair with [`crate::CoreError::DuplicateTranscode`].
    async fn save_transcode(&self, record: &CompletedTranscode) -> Result<()>;

    async fn transcode_for_media_and_target(
        &self,
        media_id: MediaId,
        target_id: TargetId,
    ) -> Result<Option<CompletedTranscode>>;
}

//! Core data model definitions shared across Thea crates.
#![allow(missing_docs)]

pub mod ids;
pub mod media;
pub mod progress;
pub mod target;
pub mod transcode;
pub mod workflow;

// Intentionally curated re-exports for downstream consumers.
pub use ids::{ExternalId, ItemId, MediaId, SeasonId, SeriesId, TargetId, TaskId, WorkflowId};
pub use media::{Episode, MediaContainer, Movie, Season, Series};
pub use progress::TranscodeProgress;
pub use target::TranscodeTarget;
pub use transcode::CompletedTranscode;
pub use workflow::{CombineOp, CriterionKey, CriterionKind, CriterionValue, MatchCriterion, Workflow};

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trouble::Trouble;
use thea_model::{ExternalId, ItemId};

/// Lifecycle of a tracked source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemState {
    /// Recently modified; held until writes have settled.
    ImportHold,
    /// Ready for a worker to claim.
    Idle,
    /// Owned by exactly one worker.
    Ingesting,
    /// Failed recoverably; waiting on operator resolution.
    Troubled,
    /// Persisted; about to leave the queue.
    Complete,
}

/// In-memory tracking record for one discovered file progressing toward
/// persistence.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub id: ItemId,
    pub path: PathBuf,
    pub state: ItemState,
    pub trouble: Option<Trouble>,
    /// Operator-specified catalogue id; when set, the search step is skipped.
    pub override_id: Option<ExternalId>,
    pub modified_at: DateTime<Utc>,
}

impl IngestItem {
    pub fn new(path: PathBuf, state: ItemState, modified_at: DateTime<Utc>) -> Self {
        Self {
            id: ItemId::new(),
            path,
            state,
            trouble: None,
            override_id: None,
            modified_at,
        }
    }
}

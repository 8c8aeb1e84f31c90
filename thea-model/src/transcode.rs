use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MediaId, TargetId, TaskId};

/// Persisted record of one finished transcode. At most one exists per
/// (media, target) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTranscode {
    pub id: TaskId,
    pub media_id: MediaId,
    pub target_id: TargetId,
    pub output_path: PathBuf,
    pub completed_at: DateTime<Utc>,
}

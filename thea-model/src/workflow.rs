use serde::{Deserialize, Serialize};

use crate::ids::{TargetId, WorkflowId};

/// Field of a media container a criterion inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CriterionKey {
    MediaTitle,
    SeriesTitle,
    SeasonTitle,
    Resolution,
    SeasonNumber,
    EpisodeNumber,
    SourcePath,
    SourceName,
    SourceExtension,
}

impl CriterionKey {
    /// Numeric keys accept the integer comparison kinds; everything else is a
    /// string key and only accepts the pattern kinds.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Resolution | Self::SeasonNumber | Self::EpisodeNumber
        )
    }
}

/// Comparison applied by a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CriterionKind {
    Equals,
    NotEquals,
    Matches,
    DoesNotMatch,
    LessThan,
    GreaterThan,
    IsPresent,
    IsNotPresent,
}

/// Operand carried by a criterion. Presence checks carry none; integer
/// comparisons carry an integer; pattern comparisons carry a string, which is
/// treated as a regex when wrapped in `/.../`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionValue {
    Int(i64),
    Str(String),
    None,
}

/// How a criterion joins with the one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CombineOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCriterion {
    pub key: CriterionKey,
    pub kind: CriterionKind,
    pub value: CriterionValue,
    pub combine: CombineOp,
}

/// Named, ordered list of match criteria plus the targets to transcode to
/// when a container matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub label: String,
    pub enabled: bool,
    pub criteria: Vec<MatchCriterion>,
    pub target_ids: Vec<TargetId>,
}

//! Workflow criterion validation and match evaluation.
//!
//! Criteria are evaluated left to right as AND-groups separated by OR: each
//! criterion's boolean folds into the running group; an OR combine closes the
//! group, and a closed true group matches the workflow immediately. A
//! workflow with no criteria matches every container. Fields a container does
//! not have (episode numbering on a movie) satisfy only the presence checks;
//! every other comparison on an absent field is false.

use regex::Regex;

use crate::{CoreError, Result};
use thea_model::{
    CombineOp, CriterionKey, CriterionKind, CriterionValue, MatchCriterion, MediaContainer,
    Workflow,
};

/// A container field under comparison: an integer, a string, or absent.
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Int(i64),
    Str(String),
    Absent,
}

fn field_value(container: &MediaContainer, key: CriterionKey) -> FieldValue {
    let opt_str = |value: Option<&str>| {
        value
            .map(|value| FieldValue::Str(value.to_string()))
            .unwrap_or(FieldValue::Absent)
    };
    match key {
        CriterionKey::MediaTitle => FieldValue::Str(container.title().to_string()),
        CriterionKey::SeriesTitle => opt_str(container.series_title()),
        CriterionKey::SeasonTitle => opt_str(container.season_title()),
        CriterionKey::Resolution => FieldValue::Int(i64::from(container.frame_height())),
        CriterionKey::SeasonNumber => container
            .season_number()
            .map(|number| FieldValue::Int(i64::from(number)))
            .unwrap_or(FieldValue::Absent),
        CriterionKey::EpisodeNumber => container
            .episode_number()
            .map(|number| FieldValue::Int(i64::from(number)))
            .unwrap_or(FieldValue::Absent),
        CriterionKey::SourcePath => {
            FieldValue::Str(container.source_path().display().to_string())
        }
        CriterionKey::SourceName => opt_str(container.source_name()),
        CriterionKey::SourceExtension => opt_str(container.source_extension()),
    }
}

/// Validate one criterion against the key/type compatibility matrix: integer
/// comparisons only on numeric keys, pattern comparisons only on string keys,
/// presence checks anywhere. Pattern operands wrapped in `/.../` must compile.
pub fn validate_criterion(criterion: &MatchCriterion) -> Result<()> {
    use CriterionKind::*;

    let legal = match criterion.kind {
        Equals | NotEquals | LessThan | GreaterThan => criterion.key.is_numeric(),
        Matches | DoesNotMatch => !criterion.key.is_numeric(),
        IsPresent | IsNotPresent => true,
    };
    if !legal {
        return Err(CoreError::InvalidWorkflow(format!(
            "{:?} cannot be applied to {:?}",
            criterion.kind, criterion.key
        )));
    }

    match criterion.kind {
        Equals | NotEquals | LessThan | GreaterThan => match criterion.value {
            CriterionValue::Int(_) => Ok(()),
            _ => Err(CoreError::InvalidWorkflow(format!(
                "{:?} requires an integer operand",
                criterion.kind
            ))),
        },
        Matches | DoesNotMatch => match &criterion.value {
            CriterionValue::Str(pattern) => {
                if let Some(inner) = regex_body(pattern) {
                    Regex::new(inner).map_err(|err| {
                        CoreError::InvalidWorkflow(format!("bad pattern {pattern}: {err}"))
                    })?;
                }
                Ok(())
            }
            _ => Err(CoreError::InvalidWorkflow(format!(
                "{:?} requires a string operand",
                criterion.kind
            ))),
        },
        IsPresent | IsNotPresent => match criterion.value {
            CriterionValue::None => Ok(()),
            _ => Err(CoreError::InvalidWorkflow(format!(
                "{:?} takes no operand",
                criterion.kind
            ))),
        },
    }
}

/// Validate a whole workflow before it is written.
pub fn validate_workflow(workflow: &Workflow) -> Result<()> {
    for criterion in &workflow.criteria {
        validate_criterion(criterion)?;
    }
    Ok(())
}

/// `/body/` → `Some(body)`; anything else is a literal.
fn regex_body(pattern: &str) -> Option<&str> {
    pattern
        .strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
        .filter(|body| !body.is_empty())
}

fn criterion_holds(container: &MediaContainer, criterion: &MatchCriterion) -> bool {
    use CriterionKind::*;

    let field = field_value(container, criterion.key);

    match criterion.kind {
        IsPresent => field != FieldValue::Absent,
        IsNotPresent => field == FieldValue::Absent,
        Equals | NotEquals | LessThan | GreaterThan => {
            let (FieldValue::Int(actual), CriterionValue::Int(wanted)) =
                (&field, &criterion.value)
            else {
                return false;
            };
            match criterion.kind {
                Equals => actual == wanted,
                NotEquals => actual != wanted,
                LessThan => actual < wanted,
                GreaterThan => actual > wanted,
                _ => unreachable!(),
            }
        }
        Matches | DoesNotMatch => {
            let (FieldValue::Str(actual), CriterionValue::Str(pattern)) =
                (&field, &criterion.value)
            else {
                return false;
            };
            let matched = match regex_body(pattern) {
                // Legality was checked at write time; a pattern that fails to
                // compile here simply never matches.
                Some(body) => Regex::new(body)
                    .map(|regex| regex.is_match(actual))
                    .unwrap_or(false),
                None => actual.eq_ignore_ascii_case(pattern),
            };
            if criterion.kind == Matches { matched } else { !matched }
        }
    }
}

/// Pure: identical (container, criteria) inputs always produce the same
/// verdict.
pub fn workflow_matches(container: &MediaContainer, workflow: &Workflow) -> bool {
    let mut running = true;
    for criterion in &workflow.criteria {
        running = running && criterion_holds(container, criterion);
        if criterion.combine == CombineOp::Or {
            if running {
                return true;
            }
            running = true;
        }
    }
    running
}

/// First enabled workflow, in declared order, whose criteria accept the
/// container.
pub fn first_matching<'a>(
    container: &MediaContainer,
    workflows: &'a [Workflow],
) -> Option<&'a Workflow> {
    workflows
        .iter()
        .find(|workflow| workflow.enabled && workflow_matches(container, workflow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use thea_model::{Episode, MediaId, Movie, Season, SeasonId, Series, SeriesId, WorkflowId};

    fn movie(height: u32) -> MediaContainer {
        let now = Utc::now();
        MediaContainer::Movie(Movie {
            id: MediaId::new(),
            external_id: "M1".into(),
            title: "Heat".to_string(),
            adult: false,
            source_path: "/ingest/Heat.1995.mkv".into(),
            frame_width: height * 16 / 9,
            frame_height: height,
            runtime_secs: 10200,
            created_at: now,
            updated_at: now,
        })
    }

    fn episode() -> MediaContainer {
        let now = Utc::now();
        let series_id = SeriesId::new();
        let season_id = SeasonId::new();
        MediaContainer::Episode {
            episode: Episode {
                id: MediaId::new(),
                season_id,
                external_id: "E1".into(),
                title: "Pilot".to_string(),
                number: 3,
                source_path: "/ingest/Show.S02E03.mkv".into(),
                frame_width: 1920,
                frame_height: 1080,
                runtime_secs: 2700,
                created_at: now,
                updated_at: now,
            },
            season: Season {
                id: season_id,
                series_id,
                external_id: "SE1".into(),
                title: "Season 2".to_string(),
                number: 2,
                created_at: now,
                updated_at: now,
            },
            series: Series {
                id: series_id,
                external_id: "S1".into(),
                title: "The Show".to_string(),
                adult: false,
                created_at: now,
                updated_at: now,
            },
        }
    }

    fn criterion(
        key: CriterionKey,
        kind: CriterionKind,
        value: CriterionValue,
        combine: CombineOp,
    ) -> MatchCriterion {
        MatchCriterion {
            key,
            kind,
            value,
            combine,
        }
    }

    fn workflow(criteria: Vec<MatchCriterion>) -> Workflow {
        Workflow {
            id: WorkflowId::new(),
            label: "test".to_string(),
            enabled: true,
            criteria,
            target_ids: Vec::new(),
        }
    }

    #[test]
    fn empty_criteria_match_everything() {
        assert!(workflow_matches(&movie(1080), &workflow(Vec::new())));
        assert!(workflow_matches(&episode(), &workflow(Vec::new())));
    }

    #[test]
    fn and_group_requires_every_criterion() {
        let flow = workflow(vec![
            criterion(
                CriterionKey::Resolution,
                CriterionKind::GreaterThan,
                CriterionValue::Int(700),
                CombineOp::And,
            ),
            criterion(
                CriterionKey::MediaTitle,
                CriterionKind::Matches,
                CriterionValue::Str("heat".to_string()),
                CombineOp::And,
            ),
        ]);
        assert!(workflow_matches(&movie(1080), &flow));
        assert!(!workflow_matches(&movie(480), &flow));
    }

    #[test]
    fn or_short_circuits_on_a_true_group() {
        let flow = workflow(vec![
            criterion(
                CriterionKey::Resolution,
                CriterionKind::Equals,
                CriterionValue::Int(1080),
                CombineOp::Or,
            ),
            // This group would be false, but the first already matched.
            criterion(
                CriterionKey::MediaTitle,
                CriterionKind::Matches,
                CriterionValue::Str("no such film".to_string()),
                CombineOp::And,
            ),
        ]);
        assert!(workflow_matches(&movie(1080), &flow));
    }

    #[test]
    fn failed_group_resets_for_the_next_one() {
        let flow = workflow(vec![
            criterion(
                CriterionKey::Resolution,
                CriterionKind::Equals,
                CriterionValue::Int(2160),
                CombineOp::Or,
            ),
            criterion(
                CriterionKey::MediaTitle,
                CriterionKind::Matches,
                CriterionValue::Str("/(?i)^hea/".to_string()),
                CombineOp::And,
            ),
        ]);
        assert!(workflow_matches(&movie(1080), &flow));
    }

    #[test]
    fn regex_and_literal_patterns() {
        let regex_flow = workflow(vec![criterion(
            CriterionKey::SourceExtension,
            CriterionKind::Matches,
            CriterionValue::Str("/^mk[av]$/".to_string()),
            CombineOp::And,
        )]);
        assert!(workflow_matches(&movie(1080), &regex_flow));

        let literal_flow = workflow(vec![criterion(
            CriterionKey::SourceExtension,
            CriterionKind::Matches,
            CriterionValue::Str("MKV".to_string()),
            CombineOp::And,
        )]);
        assert!(workflow_matches(&movie(1080), &literal_flow));
    }

    #[test]
    fn absent_fields_only_satisfy_presence_checks() {
        let container = movie(1080);

        let present = workflow(vec![criterion(
            CriterionKey::EpisodeNumber,
            CriterionKind::IsNotPresent,
            CriterionValue::None,
            CombineOp::And,
        )]);
        assert!(workflow_matches(&container, &present));

        let compare = workflow(vec![criterion(
            CriterionKey::EpisodeNumber,
            CriterionKind::Equals,
            CriterionValue::Int(3),
            CombineOp::And,
        )]);
        assert!(!workflow_matches(&container, &compare));

        let episode_compare = workflow(vec![criterion(
            CriterionKey::EpisodeNumber,
            CriterionKind::Equals,
            CriterionValue::Int(3),
            CombineOp::And,
        )]);
        assert!(workflow_matches(&episode(), &episode_compare));
    }

    #[test]
    fn evaluation_is_pure() {
        let flow = workflow(vec![criterion(
            CriterionKey::SeriesTitle,
            CriterionKind::Matches,
            CriterionValue::Str("/(?i)show/".to_string()),
            CombineOp::And,
        )]);
        let container = episode();
        let first = workflow_matches(&container, &flow);
        for _ in 0..10 {
            assert_eq!(workflow_matches(&container, &flow), first);
        }
    }

    #[test]
    fn matrix_rejects_integer_ops_on_string_keys() {
        let bad = criterion(
            CriterionKey::MediaTitle,
            CriterionKind::LessThan,
            CriterionValue::Int(5),
            CombineOp::And,
        );
        assert!(validate_criterion(&bad).is_err());
    }

    #[test]
    fn matrix_rejects_regex_ops_on_numeric_keys() {
        let bad = criterion(
            CriterionKey::SeasonNumber,
            CriterionKind::Matches,
            CriterionValue::Str("1".to_string()),
            CombineOp::And,
        );
        assert!(validate_criterion(&bad).is_err());
    }

    #[test]
    fn matrix_enforces_operand_shapes() {
        let missing_int = criterion(
            CriterionKey::Resolution,
            CriterionKind::Equals,
            CriterionValue::None,
            CombineOp::And,
        );
        assert!(validate_criterion(&missing_int).is_err());

        let stray_operand = criterion(
            CriterionKey::Resolution,
            CriterionKind::IsPresent,
            CriterionValue::Int(1),
            CombineOp::And,
        );
        assert!(validate_criterion(&stray_operand).is_err());

        let bad_regex = criterion(
            CriterionKey::MediaTitle,
            CriterionKind::Matches,
            CriterionValue::Str("/[unclosed/".to_string()),
            CombineOp::And,
        );
        assert!(validate_criterion(&bad_regex).is_err());
    }

    #[test]
    fn first_matching_honors_order_and_enabled_flag() {
        let mut disabled = workflow(Vec::new());
        disabled.enabled = false;
        let fallback = workflow(Vec::new());
        let workflows = vec![disabled.clone(), fallback.clone()];

        let found = first_matching(&movie(1080), &workflows).unwrap();
        assert_eq!(found.id, fallback.id);
    }
}

//! Classified, resolvable failures attached to ingest items and transcode
//! tasks. A trouble lives on its owner until the operator resolves it; each
//! kind admits a fixed set of resolution methods.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use thea_model::ExternalId;

/// One candidate from an ambiguous catalogue search, carried on a
/// `CatalogueMultiResult` trouble so the operator can pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub external_id: ExternalId,
    pub title: String,
    pub year: Option<u16>,
}

/// What went wrong, with per-kind payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TroubleKind {
    /// The scraper could not derive metadata from the source file.
    MetadataFailure,
    /// The catalogue request failed for a reason other than result counting.
    CatalogueUnknown,
    /// The catalogue returned several plausible matches.
    CatalogueMultiResult { candidates: Vec<SearchCandidate> },
    /// The catalogue returned nothing.
    CatalogueNoResult,
    /// The external transcoder exited with an error.
    TranscodeFailure,
    /// Anything the pipeline could not classify.
    UnknownFailure,
}

/// How the operator may answer a trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMethod {
    Retry,
    Abort,
    SpecifyExternalId,
}

/// Operator-supplied detail accompanying a resolution request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionContext {
    pub external_id: Option<ExternalId>,
}

/// Internal outcome of a validated resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Return the owner to its runnable state and wake the workers.
    Retry,
    /// Remove the owner.
    Abort,
    /// Return the owner to its runnable state carrying an override id.
    Override(ExternalId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trouble {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: TroubleKind,
    pub message: String,
}

impl Trouble {
    pub fn new(kind: TroubleKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            message: message.into(),
        }
    }

    /// Resolution methods this trouble accepts.
    pub fn allowed_methods(&self) -> &'static [ResolutionMethod] {
        use ResolutionMethod::*;
        match self.kind {
            TroubleKind::MetadataFailure => &[Retry, Abort],
            TroubleKind::CatalogueUnknown => &[Retry, Abort, SpecifyExternalId],
            TroubleKind::CatalogueMultiResult { .. } => &[Retry, Abort, SpecifyExternalId],
            TroubleKind::CatalogueNoResult => &[Retry, Abort, SpecifyExternalId],
            TroubleKind::TranscodeFailure => &[Retry, Abort],
            TroubleKind::UnknownFailure => &[Retry, Abort],
        }
    }

    /// Validate a resolution request against this trouble, producing the
    /// internal outcome the owner applies.
    pub fn resolve(
        &self,
        method: ResolutionMethod,
        context: &ResolutionContext,
    ) -> crate::Result<Resolution> {
        if !self.allowed_methods().contains(&method) {
            return Err(crate::CoreError::Internal(format!(
                "resolution {method:?} is not valid for this trouble"
            )));
        }

        match method {
            ResolutionMethod::Retry => Ok(Resolution::Retry),
            ResolutionMethod::Abort => Ok(Resolution::Abort),
            ResolutionMethod::SpecifyExternalId => {
                let external_id = context
                    .external_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        crate::CoreError::Internal(
                            "specify-external-id requires a non-empty external id".to_string(),
                        )
                    })?;
                Ok(Resolution::Override(external_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_failure_rejects_override() {
        let trouble = Trouble::new(TroubleKind::MetadataFailure, "no streams");
        let err = trouble
            .resolve(ResolutionMethod::SpecifyExternalId, &ResolutionContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("not valid"));
    }

    #[test]
    fn multi_result_accepts_override_with_id() {
        let trouble = Trouble::new(
            TroubleKind::CatalogueMultiResult {
                candidates: vec![SearchCandidate {
                    external_id: "tmdb-1".into(),
                    title: "A".into(),
                    year: Some(1999),
                }],
            },
            "2 matches",
        );

        let resolution = trouble
            .resolve(
                ResolutionMethod::SpecifyExternalId,
                &ResolutionContext {
                    external_id: Some("tmdb-1".into()),
                },
            )
            .unwrap();
        assert_eq!(resolution, Resolution::Override("tmdb-1".into()));
    }

    #[test]
    fn override_requires_non_empty_id() {
        let trouble = Trouble::new(TroubleKind::CatalogueNoResult, "nothing");
        let err = trouble
            .resolve(
                ResolutionMethod::SpecifyExternalId,
                &ResolutionContext {
                    external_id: Some("".into()),
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn retry_is_always_available() {
        for kind in [
            TroubleKind::MetadataFailure,
            TroubleKind::CatalogueUnknown,
            TroubleKind::CatalogueNoResult,
            TroubleKind::TranscodeFailure,
            TroubleKind::UnknownFailure,
        ] {
            let trouble = Trouble::new(kind, "x");
            assert_eq!(
                trouble
                    .resolve(ResolutionMethod::Retry, &ResolutionContext::default())
                    .unwrap(),
                Resolution::Retry
            );
        }
    }
}

//! External-catalogue lookup. The capability trait is what the pipeline
//! consumes; `TmdbSearcher` implements it against the TMDB v3 API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::trouble::SearchCandidate;
use crate::ingest::scraper::FileMetadata;
use thea_model::ExternalId;

#[cfg(test)]
use mockall::automock;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";

/// Tagged failure modes of catalogue operations. `NoResult` and `MultiResult`
/// map onto distinct trouble kinds; everything else is opaque to the operator.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("no catalogue match")]
    NoResult,

    #[error("{} catalogue matches", candidates.len())]
    MultiResult { candidates: Vec<SearchCandidate> },

    #[error("illegal catalogue request: {0}")]
    IllegalRequest(String),

    #[error("catalogue provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

/// Catalogue record for a movie; combined with file metadata at persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueMovie {
    pub external_id: ExternalId,
    pub title: String,
    pub adult: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueSeries {
    pub external_id: ExternalId,
    pub title: String,
    pub adult: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueSeason {
    pub external_id: ExternalId,
    pub title: String,
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEpisode {
    pub external_id: ExternalId,
    pub title: String,
    pub number: u32,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CatalogueSearcher: Send + Sync {
    async fn search_movie(&self, meta: &FileMetadata) -> Result<ExternalId, SearchError>;
    async fn search_series(&self, meta: &FileMetadata) -> Result<ExternalId, SearchError>;

    async fn get_movie(&self, id: &ExternalId) -> Result<CatalogueMovie, SearchError>;
    async fn get_series(&self, id: &ExternalId) -> Result<CatalogueSeries, SearchError>;
    async fn get_season(
        &self,
        series_id: &ExternalId,
        season: u32,
    ) -> Result<CatalogueSeason, SearchError>;
    async fn get_episode(
        &self,
        series_id: &ExternalId,
        season: u32,
        episode: u32,
    ) -> Result<CatalogueEpisode, SearchError>;
}

#[derive(Debug, Deserialize)]
struct TmdbSearchResponse {
    #[serde(default)]
    results: Vec<TmdbSearchResult>,
}

#[derive(Debug, Deserialize)]
struct TmdbSearchResult {
    id: u64,
    title: Option<String>,
    name: Option<String>, // TV search uses "name" instead of "title"
    release_date: Option<String>,
    first_air_date: Option<String>,
}

impl TmdbSearchResult {
    fn display_title(&self) -> &str {
        self.title.as_deref().or(self.name.as_deref()).unwrap_or_default()
    }

    fn year(&self) -> Option<u16> {
        self.release_date
            .as_deref()
            .or(self.first_air_date.as_deref())
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok())
    }

    fn candidate(&self) -> SearchCandidate {
        SearchCandidate {
            external_id: self.id.to_string().into(),
            title: self.display_title().to_string(),
            year: self.year(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TmdbMovieDetails {
    id: u64,
    title: String,
    #[serde(default)]
    adult: bool,
}

#[derive(Debug, Deserialize)]
struct TmdbTvDetails {
    id: u64,
    name: String,
    #[serde(default)]
    adult: bool,
}

#[derive(Debug, Deserialize)]
struct TmdbSeasonDetails {
    id: u64,
    name: String,
    season_number: u32,
}

#[derive(Debug, Deserialize)]
struct TmdbEpisodeDetails {
    id: u64,
    name: String,
    episode_number: u32,
}

/// TMDB-backed searcher. One reqwest client, api-key query auth.
#[derive(Debug, Clone)]
pub struct TmdbSearcher {
    api_key: String,
    base_url: String,
    client: Client,
}

impl TmdbSearcher {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, TMDB_API_BASE.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            client: Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        extra_query: &[(&str, String)],
    ) -> Result<T, SearchError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("api_key", self.api_key.as_str())])
            .query(extra_query)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(SearchError::NoResult),
            StatusCode::UNAUTHORIZED => {
                Err(SearchError::IllegalRequest("rejected api key".to_string()))
            }
            status => Err(SearchError::Provider(format!(
                "catalogue returned {status} for {path}"
            ))),
        }
    }

    /// Reduce a search response to one id: a unique result wins, and so does
    /// a unique exact (case-insensitive) title match among several. Anything
    /// else is ambiguous and surfaces the candidate list.
    fn disambiguate(
        results: Vec<TmdbSearchResult>,
        wanted_title: &str,
    ) -> Result<ExternalId, SearchError> {
        match results.len() {
            0 => Err(SearchError::NoResult),
            1 => Ok(results[0].id.to_string().into()),
            _ => {
                let exact: Vec<&TmdbSearchResult> = results
                    .iter()
                    .filter(|result| result.display_title().eq_ignore_ascii_case(wanted_title))
                    .collect();
                if let [only] = exact.as_slice() {
                    return Ok(only.id.to_string().into());
                }
                Err(SearchError::MultiResult {
                    candidates: results.iter().map(TmdbSearchResult::candidate).collect(),
                })
            }
        }
    }

    fn numeric_id(id: &ExternalId) -> Result<u64, SearchError> {
        id.as_str()
            .parse()
            .map_err(|_| SearchError::IllegalRequest(format!("malformed catalogue id {id}")))
    }
}

#[async_trait]
impl CatalogueSearcher for TmdbSearcher {
    async fn search_movie(&self, meta: &FileMetadata) -> Result<ExternalId, SearchError> {
        let mut query = vec![("query", meta.title.clone())];
        if let Some(year) = meta.year {
            query.push(("year", year.to_string()));
        }
        let response: TmdbSearchResponse = self.get_json("/search/movie", &query).await?;
        Self::disambiguate(response.results, &meta.title)
    }

    async fn search_series(&self, meta: &FileMetadata) -> Result<ExternalId, SearchError> {
        let query = vec![("query", meta.title.clone())];
        let response: TmdbSearchResponse = self.get_json("/search/tv", &query).await?;
        Self::disambiguate(response.results, &meta.title)
    }

    async fn get_movie(&self, id: &ExternalId) -> Result<CatalogueMovie, SearchError> {
        let numeric = Self::numeric_id(id)?;
        let details: TmdbMovieDetails = self.get_json(&format!("/movie/{numeric}"), &[]).await?;
        Ok(CatalogueMovie {
            external_id: details.id.to_string().into(),
            title: details.title,
            adult: details.adult,
        })
    }

    async fn get_series(&self, id: &ExternalId) -> Result<CatalogueSeries, SearchError> {
        let numeric = Self::numeric_id(id)?;
        let details: TmdbTvDetails = self.get_json(&format!("/tv/{numeric}"), &[]).await?;
        Ok(CatalogueSeries {
            external_id: details.id.to_string().into(),
            title: details.name,
            adult: details.adult,
        })
    }

    async fn get_season(
        &self,
        series_id: &ExternalId,
        season: u32,
    ) -> Result<CatalogueSeason, SearchError> {
        let numeric = Self::numeric_id(series_id)?;
        let details: TmdbSeasonDetails = self
            .get_json(&format!("/tv/{numeric}/season/{season}"), &[])
            .await?;
        Ok(CatalogueSeason {
            external_id: details.id.to_string().into(),
            title: details.name,
            number: details.season_number,
        })
    }

    async fn get_episode(
        &self,
        series_id: &ExternalId,
        season: u32,
        episode: u32,
    ) -> Result<CatalogueEpisode, SearchError> {
        let numeric = Self::numeric_id(series_id)?;
        let details: TmdbEpisodeDetails = self
            .get_json(&format!("/tv/{numeric}/season/{season}/episode/{episode}"), &[])
            .await?;
        Ok(CatalogueEpisode {
            external_id: details.id.to_string().into(),
            title: details.name,
            number: details.episode_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: u64, title: &str, date: Option<&str>) -> TmdbSearchResult {
        TmdbSearchResult {
            id,
            title: Some(title.to_string()),
            name: None,
            release_date: date.map(str::to_string),
            first_air_date: None,
        }
    }

    #[test]
    fn empty_results_are_no_result() {
        assert!(matches!(
            TmdbSearcher::disambiguate(Vec::new(), "Heat"),
            Err(SearchError::NoResult)
        ));
    }

    #[test]
    fn single_result_wins_regardless_of_title() {
        let id = TmdbSearcher::disambiguate(vec![result(949, "Heat", None)], "The Heat").unwrap();
        assert_eq!(id, "949".into());
    }

    #[test]
    fn unique_exact_title_match_beats_ambiguity() {
        let results = vec![
            result(949, "Heat", Some("1995-12-15")),
            result(123, "Heat Wave", Some("2009-01-01")),
        ];
        let id = TmdbSearcher::disambiguate(results, "heat").unwrap();
        assert_eq!(id, "949".into());
    }

    #[test]
    fn multiple_exact_matches_surface_candidates() {
        let results = vec![
            result(1, "Heat", Some("1995-12-15")),
            result(2, "Heat", Some("1972-06-01")),
        ];
        match TmdbSearcher::disambiguate(results, "Heat") {
            Err(SearchError::MultiResult { candidates }) => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[0].year, Some(1995));
            }
            other => panic!("expected MultiResult, got {other:?}"),
        }
    }
}

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ExternalId, MediaId, SeasonId, SeriesId};

/// A standalone feature film backed by one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: MediaId,
    /// Catalogue identifier, unique among movies.
    pub external_id: ExternalId,
    pub title: String,
    pub adult: bool,
    /// Absolute path of the ingested source file, unique across all media.
    pub source_path: PathBuf,
    pub frame_width: u32,
    pub frame_height: u32,
    pub runtime_secs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A television series. Carries no source file of its own; episodes do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: SeriesId,
    /// Catalogue identifier, unique among series.
    pub external_id: ExternalId,
    pub title: String,
    pub adult: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One season of a series. References its series upward by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub series_id: SeriesId,
    pub external_id: ExternalId,
    pub title: String,
    pub number: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One episode backed by one source file. References its season upward by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: MediaId,
    pub season_id: SeasonId,
    pub external_id: ExternalId,
    pub title: String,
    pub number: u32,
    pub source_path: PathBuf,
    pub frame_width: u32,
    pub frame_height: u32,
    pub runtime_secs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Polymorphic wrapper treated uniformly by workflow matching and the
/// transcode scheduler. A container is either movie-shaped or episode-shaped;
/// the episode shape carries its season and series so evaluation never has to
/// chase references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaContainer {
    Movie(Movie),
    Episode {
        episode: Episode,
        season: Season,
        series: Series,
    },
}

impl MediaContainer {
    pub fn id(&self) -> MediaId {
        match self {
            Self::Movie(movie) => movie.id,
            Self::Episode { episode, .. } => episode.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Movie(movie) => &movie.title,
            Self::Episode { episode, .. } => &episode.title,
        }
    }

    pub fn source_path(&self) -> &Path {
        match self {
            Self::Movie(movie) => &movie.source_path,
            Self::Episode { episode, .. } => &episode.source_path,
        }
    }

    /// File name component of the source path, if it has one.
    pub fn source_name(&self) -> Option<&str> {
        self.source_path().file_name().and_then(|name| name.to_str())
    }

    pub fn source_extension(&self) -> Option<&str> {
        self.source_path().extension().and_then(|ext| ext.to_str())
    }

    pub fn frame_height(&self) -> u32 {
        match self {
            Self::Movie(movie) => movie.frame_height,
            Self::Episode { episode, .. } => episode.frame_height,
        }
    }

    pub fn frame_width(&self) -> u32 {
        match self {
            Self::Movie(movie) => movie.frame_width,
            Self::Episode { episode, .. } => episode.frame_width,
        }
    }

    pub fn series_title(&self) -> Option<&str> {
        match self {
            Self::Movie(_) => None,
            Self::Episode { series, .. } => Some(&series.title),
        }
    }

    pub fn season_title(&self) -> Option<&str> {
        match self {
            Self::Movie(_) => None,
            Self::Episode { season, .. } => Some(&season.title),
        }
    }

    pub fn season_number(&self) -> Option<u32> {
        match self {
            Self::Movie(_) => None,
            Self::Episode { season, .. } => Some(season.number),
        }
    }

    pub fn episode_number(&self) -> Option<u32> {
        match self {
            Self::Movie(_) => None,
            Self::Episode { episode, .. } => Some(episode.number),
        }
    }

    pub fn is_movie(&self) -> bool {
        matches!(self, Self::Movie(_))
    }
}

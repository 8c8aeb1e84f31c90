//! File-derived metadata scraping: filename parsing plus an ffprobe pass.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::ingest::parser;
use crate::ingest::probe::Prober;
use crate::{CoreError, Result};

#[cfg(test)]
use mockall::automock;

/// Everything the pipeline can learn about a source file without asking the
/// external catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub title: String,
    pub episodic: bool,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<u16>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub runtime_secs: u32,
    pub path: PathBuf,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaScraper: Send + Sync {
    async fn scrape(&self, path: &Path) -> Result<FileMetadata>;
}

/// Production scraper: the release-name parser supplies title and numbering,
/// ffprobe supplies frame geometry and runtime.
#[derive(Debug, Clone)]
pub struct FfprobeScraper {
    prober: Prober,
}

impl FfprobeScraper {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            prober: Prober::new(ffprobe_path),
        }
    }
}

#[async_trait]
impl MediaScraper for FfprobeScraper {
    async fn scrape(&self, path: &Path) -> Result<FileMetadata> {
        let parsed = parser::parse_file_name(path).ok_or_else(|| CoreError::Scrape {
            path: path.display().to_string(),
            message: "file name yields no usable title".to_string(),
        })?;

        let video = self.prober.probe(path).await?;

        Ok(FileMetadata {
            title: parsed.title,
            episodic: parsed.episodic,
            season: parsed.season,
            episode: parsed.episode,
            year: parsed.year,
            frame_width: video.width,
            frame_height: video.height,
            runtime_secs: video.runtime_secs,
            path: path.to_path_buf(),
        })
    }
}

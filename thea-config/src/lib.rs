//! Configuration loading for the Thea server.
//!
//! Configuration is resolved in layers: an explicit file named by
//! `THEA_CONFIG_PATH`, then inline JSON in `THEA_CONFIG_JSON`, then the first
//! default file candidate found on disk, then built-in defaults. Files may be
//! TOML or JSON; when the extension is ambiguous TOML is tried first.

pub mod models;

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

pub use models::{DatabaseConfig, IngestConfig, ProviderConfig, TranscodeConfig};

/// Source that produced the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Top-level server settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TheaConfig {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub ingest: IngestConfig,
    pub transcode: TranscodeConfig,
}

impl TheaConfig {
    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$THEA_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$THEA_CONFIG_JSON` (inline JSON),
    /// 3) the first default file candidate,
    /// 4) defaults if none is set.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        if let Ok(path_str) = env::var("THEA_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var("THEA_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw).context("failed to parse THEA_CONFIG_JSON")?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid config {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // Try TOML first, then JSON for convenience.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "thea.toml",
            "thea.json",
            "config/thea.toml",
            "config/thea.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = TheaConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed = TheaConfig::parse_from_str(&serialized, "inline").unwrap();
        assert_eq!(parsed.ingest.force_sync_seconds, config.ingest.force_sync_seconds);
        assert_eq!(parsed.transcode.max_thread_consumption, config.transcode.max_thread_consumption);
    }

    #[test]
    fn json_contents_parse_without_extension_hint() {
        let parsed = TheaConfig::parse_from_str(
            r#"{"ingest":{"force_sync_seconds":7,"ingestion_parallelism":3}}"#,
            "inline",
        )
        .unwrap();
        assert_eq!(parsed.ingest.force_sync_seconds, 7);
        assert_eq!(parsed.ingest.ingestion_parallelism, 3);
    }

    #[test]
    fn toml_file_loads_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[transcode]\nmax_thread_consumption = 6\noutput_path = \"/srv/out\""
        )
        .unwrap();

        let parsed = TheaConfig::load_from_file(file.path()).unwrap();
        assert_eq!(parsed.transcode.max_thread_consumption, 6);
        assert_eq!(parsed.transcode.output_path.to_str(), Some("/srv/out"));
    }

    #[test]
    fn malformed_file_surfaces_both_parse_errors() {
        let err = TheaConfig::parse_from_str("not = [valid", "inline").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("toml error"));
        assert!(message.contains("json error"));
    }
}

//! Postgres implementation of the store ports.
//!
//! Queries are runtime-bound (no compile-time database), rows are mapped by
//! hand, and upserts key on the catalogue external id. The episode path runs
//! inside one transaction so the series/season/episode triple is all-or-
//! nothing.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::store::{MediaStore, TargetStore, TranscodeStore, WorkflowStore};
use crate::{CoreError, Result};
use thea_model::{
    CompletedTranscode, Episode, ExternalId, MatchCriterion, MediaContainer, MediaId, Movie,
    Season, SeasonId, Series, SeriesId, TargetId, TaskId, TranscodeTarget, Workflow, WorkflowId,
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables this store uses when they do not exist yet. Schema
    /// evolution beyond that is the deployment's concern.
    pub async fn ensure_schema(&self) -> Result<()> {
        const SCHEMA: &str = r#"
        CREATE TABLE IF NOT EXISTS series (
            id UUID PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            adult BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );
        CREATE TABLE IF NOT EXISTS seasons (
            id UUID PRIMARY KEY,
            series_id UUID NOT NULL REFERENCES series(id),
            external_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            number INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );
        CREATE TABLE IF NOT EXISTS episodes (
            id UUID PRIMARY KEY,
            season_id UUID NOT NULL REFERENCES seasons(id),
            external_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            number INTEGER NOT NULL,
            source_path TEXT NOT NULL UNIQUE,
            frame_width INTEGER NOT NULL,
            frame_height INTEGER NOT NULL,
            runtime_secs INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );
        CREATE TABLE IF NOT EXISTS movies (
            id UUID PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            adult BOOLEAN NOT NULL DEFAULT FALSE,
            source_path TEXT NOT NULL UNIQUE,
            frame_width INTEGER NOT NULL,
            frame_height INTEGER NOT NULL,
            runtime_secs INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );
        CREATE TABLE IF NOT EXISTS workflows (
            id UUID PRIMARY KEY,
            label TEXT NOT NULL UNIQUE,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            criteria JSONB NOT NULL DEFAULT '[]',
            target_ids JSONB NOT NULL DEFAULT '[]',
            sort_index INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS targets (
            id UUID PRIMARY KEY,
            label TEXT NOT NULL UNIQUE,
            extension TEXT NOT NULL,
            arguments JSONB NOT NULL DEFAULT '[]',
            required_threads INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS transcodes (
            id UUID PRIMARY KEY,
            media_id UUID NOT NULL,
            target_id UUID NOT NULL REFERENCES targets(id),
            output_path TEXT NOT NULL,
            completed_at TIMESTAMPTZ NOT NULL,
            UNIQUE (media_id, target_id)
        );
        "#;

        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn movie_from_row(row: &PgRow) -> Movie {
    Movie {
        id: MediaId(row.get::<Uuid, _>("id")),
        external_id: ExternalId(row.get("external_id")),
        title: row.get("title"),
        adult: row.get("adult"),
        source_path: PathBuf::from(row.get::<String, _>("source_path")),
        frame_width: row.get::<i32, _>("frame_width") as u32,
        frame_height: row.get::<i32, _>("frame_height") as u32,
        runtime_secs: row.get::<i32, _>("runtime_secs") as u32,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

fn series_from_row(row: &PgRow) -> Series {
    Series {
        id: SeriesId(row.get::<Uuid, _>("id")),
        external_id: ExternalId(row.get("external_id")),
        title: row.get("title"),
        adult: row.get("adult"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

fn season_from_row(row: &PgRow) -> Season {
    Season {
        id: SeasonId(row.get::<Uuid, _>("id")),
        series_id: SeriesId(row.get::<Uuid, _>("series_id")),
        external_id: ExternalId(row.get("external_id")),
        title: row.get("title"),
        number: row.get::<i32, _>("number") as u32,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

fn episode_from_row(row: &PgRow) -> Episode {
    Episode {
        id: MediaId(row.get::<Uuid, _>("id")),
        season_id: SeasonId(row.get::<Uuid, _>("season_id")),
        external_id: ExternalId(row.get("external_id")),
        title: row.get("title"),
        number: row.get::<i32, _>("number") as u32,
        source_path: PathBuf::from(row.get::<String, _>("source_path")),
        frame_width: row.get::<i32, _>("frame_width") as u32,
        frame_height: row.get::<i32, _>("frame_height") as u32,
        runtime_secs: row.get::<i32, _>("runtime_secs") as u32,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

async fn upsert_series(tx: &mut Transaction<'_, Postgres>, series: &Series) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO series (id, external_id, title, adult, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (external_id) DO UPDATE
        SET title = EXCLUDED.title, adult = EXCLUDED.adult, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(series.id.0)
    .bind(series.external_id.as_str())
    .bind(&series.title)
    .bind(series.adult)
    .bind(series.created_at)
    .bind(series.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_season(tx: &mut Transaction<'_, Postgres>, season: &Season) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO seasons (id, series_id, external_id, title, number, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (external_id) DO UPDATE
        SET title = EXCLUDED.title, number = EXCLUDED.number, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(season.id.0)
    .bind(season.series_id.0)
    .bind(season.external_id.as_str())
    .bind(&season.title)
    .bind(season.number as i32)
    .bind(season.created_at)
    .bind(season.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_episode(tx: &mut Transaction<'_, Postgres>, episode: &Episode) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO episodes
            (id, season_id, external_id, title, number, source_path,
             frame_width, frame_height, runtime_secs, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (external_id) DO UPDATE
        SET title = EXCLUDED.title,
            number = EXCLUDED.number,
            source_path = EXCLUDED.source_path,
            frame_width = EXCLUDED.frame_width,
            frame_height = EXCLUDED.frame_height,
            runtime_secs = EXCLUDED.runtime_secs,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(episode.id.0)
    .bind(episode.season_id.0)
    .bind(episode.external_id.as_str())
    .bind(&episode.title)
    .bind(episode.number as i32)
    .bind(episode.source_path.display().to_string())
    .bind(episode.frame_width as i32)
    .bind(episode.frame_height as i32)
    .bind(episode.runtime_secs as i32)
    .bind(episode.created_at)
    .bind(episode.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl MediaStore for PostgresStore {
    async fn all_source_paths(&self) -> Result<Vec<PathBuf>> {
        let rows = sqlx::query(
            "SELECT source_path FROM movies UNION ALL SELECT source_path FROM episodes",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| PathBuf::from(row.get::<String, _>("source_path")))
            .collect())
    }

    async fn movie_with_external_id(&self, external_id: &ExternalId) -> Result<Option<Movie>> {
        let row = sqlx::query("SELECT * FROM movies WHERE external_id = $1")
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(movie_from_row))
    }

    async fn series_with_external_id(&self, external_id: &ExternalId) -> Result<Option<Series>> {
        let row = sqlx::query("SELECT * FROM series WHERE external_id = $1")
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(series_from_row))
    }

    async fn season_with_external_id(&self, external_id: &ExternalId) -> Result<Option<Season>> {
        let row = sqlx::query("SELECT * FROM seasons WHERE external_id = $1")
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(season_from_row))
    }

    async fn episode_with_external_id(&self, external_id: &ExternalId) -> Result<Option<Episode>> {
        let row = sqlx::query("SELECT * FROM episodes WHERE external_id = $1")
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(episode_from_row))
    }

    async fn save_movie(&self, movie: &Movie) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO movies
                (id, external_id, title, adult, source_path,
                 frame_width, frame_height, runtime_secs, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (external_id) DO UPDATE
            SET title = EXCLUDED.title,
                adult = EXCLUDED.adult,
                source_path = EXCLUDED.source_path,
                frame_width = EXCLUDED.frame_width,
                frame_height = EXCLUDED.frame_height,
                runtime_secs = EXCLUDED.runtime_secs,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(movie.id.0)
        .bind(movie.external_id.as_str())
        .bind(&movie.title)
        .bind(movie.adult)
        .bind(movie.source_path.display().to_string())
        .bind(movie.frame_width as i32)
        .bind(movie.frame_height as i32)
        .bind(movie.runtime_secs as i32)
        .bind(movie.created_at)
        .bind(movie.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_episode(
        &self,
        episode: &Episode,
        season: &Season,
        series: &Series,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_series(&mut tx, series).await?;
        upsert_season(&mut tx, season).await?;
        upsert_episode(&mut tx, episode).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn media(&self, id: MediaId) -> Result<Option<MediaContainer>> {
        if let Some(row) = sqlx::query("SELECT * FROM movies WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(Some(MediaContainer::Movie(movie_from_row(&row))));
        }

        let Some(episode_row) = sqlx::query("SELECT * FROM episodes WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let episode = episode_from_row(&episode_row);

        let season_row = sqlx::query("SELECT * FROM seasons WHERE id = $1")
            .bind(episode.season_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                CoreError::Internal(format!("episode {id} references a missing season"))
            })?;
        let season = season_from_row(&season_row);

        let series_row = sqlx::query("SELECT * FROM series WHERE id = $1")
            .bind(season.series_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                CoreError::Internal(format!("season {} references a missing series", season.id))
            })?;
        let series = series_from_row(&series_row);

        Ok(Some(MediaContainer::Episode {
            episode,
            season,
            series,
        }))
    }
}

#[async_trait]
impl WorkflowStore for PostgresStore {
    async fn all_workflows(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY sort_index, label")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Workflow {
                id: WorkflowId(row.get::<Uuid, _>("id")),
                label: row.get("label"),
                enabled: row.get("enabled"),
                criteria: row.get::<Json<Vec<MatchCriterion>>, _>("criteria").0,
                target_ids: row.get::<Json<Vec<TargetId>>, _>("target_ids").0,
            })
            .collect())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        crate::workflow::validate_workflow(workflow)?;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, label, enabled, criteria, target_ids)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET label = EXCLUDED.label,
                enabled = EXCLUDED.enabled,
                criteria = EXCLUDED.criteria,
                target_ids = EXCLUDED.target_ids
            "#,
        )
        .bind(workflow.id.0)
        .bind(&workflow.label)
        .bind(workflow.enabled)
        .bind(Json(&workflow.criteria))
        .bind(Json(&workflow.target_ids))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TargetStore for PostgresStore {
    async fn target(&self, id: TargetId) -> Result<Option<TranscodeTarget>> {
        let row = sqlx::query("SELECT * FROM targets WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(target_from_row))
    }

    async fn all_targets(&self) -> Result<Vec<TranscodeTarget>> {
        let rows = sqlx::query("SELECT * FROM targets ORDER BY label")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(target_from_row).collect())
    }

    async fn save_target(&self, target: &TranscodeTarget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO targets (id, label, extension, arguments, required_threads)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET label = EXCLUDED.label,
                extension = EXCLUDED.extension,
                arguments = EXCLUDED.arguments,
                required_threads = EXCLUDED.required_threads
            "#,
        )
        .bind(target.id.0)
        .bind(&target.label)
        .bind(&target.extension)
        .bind(Json(&target.arguments))
        .bind(target.required_threads as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn target_from_row(row: PgRow) -> TranscodeTarget {
    TranscodeTarget {
        id: TargetId(row.get::<Uuid, _>("id")),
        label: row.get("label"),
        extension: row.get("extension"),
        arguments: row.get::<Json<Vec<String>>, _>("arguments").0,
        required_threads: row.get::<i32, _>("required_threads") as u32,
    }
}

#[async_trait]
impl TranscodeStore for PostgresStore {
    async fn save_transcode(&self, record: &CompletedTranscode) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO transcodes (id, media_id, target_id, output_path, completed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (media_id, target_id) DO NOTHING
            "#,
        )
        .bind(record.id.0)
        .bind(record.media_id.0)
        .bind(record.target_id.0)
        .bind(record.output_path.display().to_string())
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::DuplicateTranscode {
                media_id: record.media_id,
                target_id: record.target_id,
            });
        }
        Ok(())
    }

    async fn transcode_for_media_and_target(
        &self,
        media_id: MediaId,
        target_id: TargetId,
    ) -> Result<Option<CompletedTranscode>> {
        let row = sqlx::query(
            "SELECT * FROM transcodes WHERE media_id = $1 AND target_id = $2",
        )
        .bind(media_id.0)
        .bind(target_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CompletedTranscode {
            id: TaskId(row.get::<Uuid, _>("id")),
            media_id: MediaId(row.get::<Uuid, _>("media_id")),
            target_id: TargetId(row.get::<Uuid, _>("target_id")),
            output_path: PathBuf::from(row.get::<String, _>("output_path")),
            completed_at: row.get::<DateTime<Utc>, _>("completed_at"),
        }))
    }
}

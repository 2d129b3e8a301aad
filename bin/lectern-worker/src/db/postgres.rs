//! Postgres implementation of the worker's store traits.
//!
//! The schema belongs to the backend service; the worker connects to the
//! same database and never migrates. The columns touched here:
//!
//! - `jobs (id uuid, project_id uuid, kind text, prompt text, done bool)`
//! - `projects (id uuid, owner_id uuid, origin_file_id uuid,
//!   transcription_file_id uuid, summary_file_id uuid, slides_extracted bool)`
//! - `artifacts (id uuid, owner_id uuid, project_id uuid, job_id uuid,
//!   name text, media_type text, storage_key text, timecode double precision,
//!   caption text, hidden bool, created_at timestamptz)`
//! - `notes (id uuid, file_id uuid, timecode double precision, body text)`
//!
//! # Queries
//!
//! The `sqlx::query` (runtime-verified) form is used deliberately so that no
//! `DATABASE_URL` environment variable is needed at compile time.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ArtifactRecord, ArtifactStore, JobRecord, JobStore, NewArtifact, NoteRecord, NoteStore};

/// Postgres-backed store shared by all job handlers.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the backend database at `url`.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(url).await?;
        Ok(Self { pool })
    }
}

type ArtifactRow = (Uuid, String, String, String, Option<f64>, String, bool);

fn artifact_from_row(
    (id, name, media_type, storage_key, timecode, caption, hidden): ArtifactRow,
) -> ArtifactRecord {
    ArtifactRecord {
        id,
        name,
        media_type,
        storage_key,
        timecode,
        caption,
        hidden,
    }
}

impl JobStore for PgStore {
    async fn get_job(&self, id: Uuid) -> Result<Option<JobRecord>, sqlx::Error> {
        let row: Option<(
            Uuid,
            String,
            Option<String>,
            Uuid,
            Uuid,
            Option<Uuid>,
            Option<Uuid>,
        )> = sqlx::query_as(
            "SELECT j.id, j.kind, j.prompt, p.owner_id, j.project_id, \
                    p.origin_file_id, p.transcription_file_id \
             FROM jobs j JOIN projects p ON p.id = j.project_id \
             WHERE j.id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, kind, prompt, user_id, project_id, origin_file_id, transcription_file_id)| {
                JobRecord {
                    id,
                    kind,
                    prompt,
                    user_id,
                    project_id,
                    origin_file_id,
                    transcription_file_id,
                }
            },
        ))
    }

    async fn mark_done(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET done = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── ArtifactStore ─────────────────────────────────────────────────────────────

impl ArtifactStore for PgStore {
    async fn create_artifact(&self, new: NewArtifact<'_>) -> Result<ArtifactRecord, sqlx::Error> {
        let id = Uuid::new_v4();
        let storage_key = format!("{}/{}/{}", new.project_id, id, new.name);
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO artifacts \
             (id, owner_id, project_id, job_id, name, media_type, storage_key, \
              timecode, caption, hidden, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(id)
        .bind(new.owner_id)
        .bind(new.project_id)
        .bind(new.job_id)
        .bind(new.name)
        .bind(new.media_type)
        .bind(&storage_key)
        .bind(new.timecode)
        .bind(new.caption)
        .bind(new.hidden)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(ArtifactRecord {
            id,
            name: new.name.to_owned(),
            media_type: new.media_type.to_owned(),
            storage_key,
            timecode: new.timecode,
            caption: new.caption.to_owned(),
            hidden: new.hidden,
        })
    }

    async fn artifact_by_id(&self, id: Uuid) -> Result<Option<ArtifactRecord>, sqlx::Error> {
        let row: Option<ArtifactRow> = sqlx::query_as(
            "SELECT id, name, media_type, storage_key, timecode, caption, hidden \
             FROM artifacts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(artifact_from_row))
    }

    async fn active_images(&self, project_id: Uuid) -> Result<Vec<ArtifactRecord>, sqlx::Error> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            "SELECT id, name, media_type, storage_key, timecode, caption, hidden \
             FROM artifacts \
             WHERE project_id = $1 AND media_type = 'image/png' AND hidden = FALSE \
             ORDER BY timecode",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(artifact_from_row).collect())
    }

    async fn set_transcription(
        &self,
        project_id: Uuid,
        artifact_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE projects SET transcription_file_id = $2 WHERE id = $1")
            .bind(project_id)
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_summary(&self, project_id: Uuid, artifact_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE projects SET summary_file_id = $2 WHERE id = $1")
            .bind(project_id)
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_slides_extracted(&self, project_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE projects SET slides_extracted = TRUE WHERE id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── NoteStore ─────────────────────────────────────────────────────────────────

impl NoteStore for PgStore {
    async fn notes_for_file(&self, file_id: Uuid) -> Result<Vec<NoteRecord>, sqlx::Error> {
        let rows: Vec<(f64, String)> = sqlx::query_as(
            "SELECT timecode, body FROM notes WHERE file_id = $1 ORDER BY timecode",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(timecode, text)| NoteRecord { timecode, text })
            .collect())
    }
}

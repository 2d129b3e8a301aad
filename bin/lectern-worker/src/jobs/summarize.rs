//! The summary pipeline: stored transcript, slide images, and notes in,
//! `summary.md` out.

use std::path::Path;

use tracing::info;
use uuid::Uuid;

use lectern_pipeline::summary::{self, SlideImage, TimedNote};
use lectern_pipeline::{transcript, StagePlan};

use crate::db::{ArtifactStore, JobRecord, NewArtifact, NoteStore};
use crate::error::WorkerError;

use super::{ProgressReporter, WorkerContext};

pub(super) async fn run<S>(
    ctx: &WorkerContext<S>,
    job: &JobRecord,
    workspace: &Path,
) -> Result<Vec<Uuid>, WorkerError>
where
    S: ArtifactStore + NoteStore,
{
    let chat = ctx.models.chat()?;
    let mut reporter = ProgressReporter::new(
        ctx.publisher.clone(),
        job.id,
        StagePlan::single(),
        ctx.emit_interval(),
    );

    let transcript_id = job
        .transcription_file_id
        .ok_or_else(|| WorkerError::MissingInput("project has no transcript yet".to_owned()))?;
    let stored = ctx.store.artifact_by_id(transcript_id).await?.ok_or_else(|| {
        WorkerError::Persistence(format!("transcript artifact {transcript_id} is gone"))
    })?;

    let local = workspace.join("input.json");
    ctx.storage.fetch(&stored.storage_key, &local).await?;
    let raw = tokio::fs::read_to_string(&local).await?;
    let segments = transcript::from_json(&raw)?;

    let images: Vec<SlideImage> = ctx
        .store
        .active_images(job.project_id)
        .await?
        .into_iter()
        .map(|row| SlideImage {
            name: row.name,
            caption: row.caption,
            timestamp_secs: row.timecode.unwrap_or(0.0),
            file_key: row.storage_key,
        })
        .collect();

    // Notes hang off the uploaded recording; a project without one simply
    // has no notes to weave in.
    let notes: Vec<TimedNote> = match job.origin_file_id {
        Some(origin) => ctx
            .store
            .notes_for_file(origin)
            .await?
            .into_iter()
            .map(|row| TimedNote {
                timestamp_secs: row.timecode,
                text: row.text,
            })
            .collect(),
        None => Vec::new(),
    };

    let user_prompt = job.prompt.as_deref().unwrap_or("");
    let markdown =
        summary::compose_summary(chat.as_ref(), user_prompt, &segments, &notes, &images).await?;

    let out = workspace.join("output.md");
    tokio::fs::write(&out, &markdown).await?;

    let artifact = ctx
        .store
        .create_artifact(NewArtifact {
            owner_id: job.user_id,
            project_id: job.project_id,
            job_id: job.id,
            name: "summary.md",
            media_type: "text/markdown",
            timecode: None,
            caption: "",
            hidden: false,
        })
        .await?;
    ctx.storage
        .store(&artifact.storage_key, &out, "text/markdown")
        .await?;
    ctx.store.set_summary(job.project_id, artifact.id).await?;

    reporter.finish_stage().await;
    info!(
        segments = segments.len(),
        images = images.len(),
        notes = notes.len(),
        "summary stored"
    );
    Ok(vec![artifact.id])
}

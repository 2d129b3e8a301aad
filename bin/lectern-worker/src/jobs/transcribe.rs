//! The transcription pipeline: uploaded recording in, `transcript.json` out.

use std::path::Path;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use lectern_pipeline::{media, transcript, StagePlan};

use crate::db::{ArtifactStore, JobRecord, NewArtifact};
use crate::error::WorkerError;

use super::{fetch_origin, ProgressReporter, WorkerContext};

pub(super) async fn run<S>(
    ctx: &WorkerContext<S>,
    job: &JobRecord,
    workspace: &Path,
) -> Result<Vec<Uuid>, WorkerError>
where
    S: ArtifactStore,
{
    let speech = ctx.models.speech()?;
    let input = fetch_origin(ctx, job, workspace).await?;

    let audio = workspace.join("converted.wav");
    media::extract_audio(&input, &audio).await?;

    let mut reporter = ProgressReporter::new(
        ctx.publisher.clone(),
        job.id,
        StagePlan::single(),
        ctx.emit_interval(),
    );

    // The model pushes (reached, total) second pairs while segments decode;
    // relay them as fractions until the transcription future resolves.
    let (tx, mut rx) = mpsc::channel(32);
    let mut transcription = speech.transcribe(&audio, tx);
    let segments = loop {
        tokio::select! {
            result = &mut transcription => break result?,
            reached = rx.recv() => match reached {
                Some((reached, total)) if total > 0.0 => {
                    reporter.update(reached / total).await;
                }
                Some(_) => {}
                // Sender dropped early; nothing more to relay.
                None => break (&mut transcription).await?,
            },
        }
    };
    while let Ok((reached, total)) = rx.try_recv() {
        if total > 0.0 {
            reporter.update(reached / total).await;
        }
    }

    let local = workspace.join("output.json");
    tokio::fs::write(&local, transcript::to_json(&segments)?).await?;

    let artifact = ctx
        .store
        .create_artifact(NewArtifact {
            owner_id: job.user_id,
            project_id: job.project_id,
            job_id: job.id,
            name: "transcript.json",
            media_type: "application/json",
            timecode: None,
            caption: "",
            hidden: false,
        })
        .await?;
    ctx.storage
        .store(&artifact.storage_key, &local, "application/json")
        .await?;
    ctx.store
        .set_transcription(job.project_id, artifact.id)
        .await?;

    reporter.finish_stage().await;
    info!(segments = segments.len(), "transcript stored");
    Ok(vec![artifact.id])
}

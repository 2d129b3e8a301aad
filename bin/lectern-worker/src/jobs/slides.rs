//! The slide pipeline: uploaded recording in, one stored PNG per unique
//! slide out.
//!
//! Three stages when a localizer is configured (frame extraction, cropping,
//! dedup plus persistence), otherwise extraction folds into a single dedup
//! stage. The scan itself is CPU-bound and runs on the blocking pool; slides
//! stream back over a channel and are uploaded as they arrive, so a failed
//! upload stops the scan instead of letting it run to completion.

use std::path::Path;

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use lectern_pipeline::slides::{
    crop, EmbeddingCosine, RegionRaster, SimilarityStrategy, SlideExtractor, UniqueSlide,
};
use lectern_pipeline::{media, PipelineError, StagePlan};

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
    let input = fetch_origin(ctx, job, workspace).await?;
    let frames_dir = workspace.join("frames");
    let slides_dir = workspace.join("slides");

    let localizer = ctx.models.localizer();
    let plan = if localizer.is_some() {
        StagePlan::equal(3)
    } else {
        StagePlan::single()
    };
    let mut reporter = ProgressReporter::new(
        ctx.publisher.clone(),
        job.id,
        plan,
        ctx.emit_interval(),
    );

    let stats = media::video_statistics(&input).await?;
    let extracted = media::extract_key_frames(&input, &frames_dir).await?;
    debug!(frames = extracted, "key frames extracted");

    let mut scan_dir = frames_dir;
    if let Some(localizer) = localizer {
        reporter.finish_stage().await;

        let cropped_dir = workspace.join("cropped");
        let (tx, mut rx) = mpsc::channel(32);
        let crop_in = scan_dir.clone();
        let crop_out = cropped_dir.clone();
        let cropping = tokio::task::spawn_blocking(move || {
            crop::crop_frames(localizer.as_ref(), &crop_in, &crop_out, |done, total| {
                let _ = tx.blocking_send((done, total));
            })
        });
        while let Some((done, total)) = rx.recv().await {
            if total > 0 {
                reporter.update(done as f64 / total as f64).await;
            }
        }
        let kept = cropping
            .await
            .map_err(|_| WorkerError::Internal("crop task panicked".to_owned()))??;
        reporter.finish_stage().await;

        debug!(kept, "scanning cropped frames for unique slides");
        scan_dir = cropped_dir;
    }

    // Embedding similarity when an embedder was loaded, raster fallback
    // otherwise.
    let strategy: Box<dyn SimilarityStrategy> = if ctx.models.has_embedder() {
        Box::new(EmbeddingCosine::new(
            ctx.models.embedder()?,
            ctx.config.cosine_threshold,
        ))
    } else {
        Box::new(RegionRaster::new(ctx.config.mse_threshold))
    };

    let (slide_tx, mut slide_rx) = mpsc::channel::<UniqueSlide>(8);
    let scan = tokio::task::spawn_blocking(move || {
        let mut extractor = SlideExtractor::new(strategy);
        extractor.extract(&scan_dir, &slides_dir, &stats, |slide| {
            slide_tx
                .blocking_send(slide.clone())
                .map_err(|_| PipelineError::Inference("slide consumer hung up".to_owned()))
        })
    });

    let mut artifact_ids = Vec::new();
    let mut persist_err = None;
    while let Some(slide) = slide_rx.recv().await {
        match persist_slide(ctx, job, &slide).await {
            Ok(artifact_id) => {
                artifact_ids.push(artifact_id);
                if slide.duration_secs > 0.0 {
                    reporter
                        .update(slide.timestamp_secs / slide.duration_secs)
                        .await;
                }
            }
            Err(e) => {
                persist_err = Some(e);
                break;
            }
        }
    }
    drop(slide_rx);

    let scanned = scan
        .await
        .map_err(|_| WorkerError::Internal("slide scan task panicked".to_owned()))?;
    // A persistence failure cancels the scan through the closed channel;
    // report the root cause, not the hang-up it provoked.
    if let Some(e) = persist_err {
        return Err(e);
    }
    let slides = scanned?;

    ctx.store.mark_slides_extracted(job.project_id).await?;
    reporter.finish_stage().await;
    info!(slides = slides.len(), "slides stored");
    Ok(artifact_ids)
}

async fn persist_slide<S>(
    ctx: &WorkerContext<S>,
    job: &JobRecord,
    slide: &UniqueSlide,
) -> Result<Uuid, WorkerError>
where
    S: ArtifactStore,
{
    let name = slide
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            WorkerError::Persistence(format!("unusable slide path {}", slide.path.display()))
        })?;

    let artifact = ctx
        .store
        .create_artifact(NewArtifact {
            owner_id: job.user_id,
            project_id: job.project_id,
            job_id: job.id,
            name,
            media_type: "image/png",
            timecode: Some(slide.timestamp_secs),
            caption: "",
            hidden: false,
        })
        .await?;
    ctx.storage
        .store(&artifact.storage_key, &slide.path, "image/png")
        .await?;
    Ok(artifact.id)
}

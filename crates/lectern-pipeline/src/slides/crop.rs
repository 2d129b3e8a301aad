//! Optional pre-dedup pass that tightens every key frame to the detected
//! presentation surface. Frames where the localizer sees nothing are dropped
//! before deduplication ever looks at them.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::models::{ObjectLocalizer, Region};
use crate::slides::sorted_frames;

/// Frames handed to the localizer per call. Detection models amortize much
/// better over a batch than frame-by-frame.
pub const LOCALIZE_BATCH: usize = 10;

/// Crop every key frame in `frames_dir` to its detected region and write the
/// result under `out_dir` with the same file name. `on_progress` is invoked
/// after each written crop with `(frames_processed, frames_total)`, where
/// `frames_processed` also counts frames that were dropped for lack of a
/// detection. Returns how many crops were written.
pub fn crop_frames(
    localizer: &dyn ObjectLocalizer,
    frames_dir: &Path,
    out_dir: &Path,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<usize, PipelineError> {
    std::fs::create_dir_all(out_dir)?;
    let frames = sorted_frames(frames_dir)?;
    let total = frames.len();
    let mut processed = 0usize;
    let mut written = 0usize;

    for batch in frames.chunks(LOCALIZE_BATCH) {
        let paths: Vec<PathBuf> = batch.iter().map(|(_, path)| path.clone()).collect();
        let regions = localizer.locate(&paths)?;
        if regions.len() != paths.len() {
            return Err(PipelineError::Inference(format!(
                "localizer returned {} regions for {} frames",
                regions.len(),
                paths.len()
            )));
        }

        for (path, region) in paths.iter().zip(regions) {
            processed += 1;
            let Some(region) = region else {
                debug!(frame = %path.display(), "no region detected; frame dropped");
                continue;
            };
            let Some(file_name) = path.file_name() else {
                continue;
            };
            let frame = image::open(path)?;
            let Some(cropped) = crop_to_region(&frame, region) else {
                debug!(frame = %path.display(), "region outside frame bounds; dropped");
                continue;
            };
            cropped.save(out_dir.join(file_name))?;
            written += 1;
            on_progress(processed, total);
        }
    }

    info!(written, dropped = total - written, "frame cropping finished");
    Ok(written)
}

/// Intersect the region with the frame; `None` when nothing is left.
fn crop_to_region(frame: &image::DynamicImage, region: Region) -> Option<image::DynamicImage> {
    if region.x >= frame.width() || region.y >= frame.height() {
        return None;
    }
    let width = region.width.min(frame.width() - region.x);
    let height = region.height.min(frame.height() - region.y);
    if width == 0 || height == 0 {
        return None;
    }
    Some(frame.crop_imm(region.x, region.y, width, height))
}

//! Slide derivation from extracted key frames: optional subject cropping,
//! then near-duplicate scanning over a bounded window.

pub mod crop;
pub mod extractor;
pub mod similarity;

pub use extractor::{DEDUP_WINDOW, SlideExtractor, UniqueSlide};
pub use similarity::{
    DEFAULT_COSINE_THRESHOLD, DEFAULT_MSE_THRESHOLD, EmbeddingCosine, Fingerprint, RegionRaster,
    SimilarityStrategy,
};

use std::path::{Path, PathBuf};

/// Parse the frame index out of a key-frame file name
/// (`keyframe_00042.jpg` → 42). `None` for foreign files.
pub(crate) fn frame_index(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (_, index) = stem.split_once('_')?;
    index.parse().ok()
}

/// Key frames in `dir` in ascending frame-index order. Files whose names
/// carry no parseable index are skipped silently.
pub(crate) fn sorted_frames(dir: &Path) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(index) = frame_index(&path) {
            frames.push((index, path));
        }
    }
    frames.sort_by_key(|(index, _)| *index);
    Ok(frames)
}

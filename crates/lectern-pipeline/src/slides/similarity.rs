//! Pluggable near-duplicate detection for the slide scanner.
//!
//! The two production strategies carry *opposite* threshold senses: cosine
//! similarity rejects when the score is strictly greater than its threshold,
//! while the region-raster strategy rejects when the mean-squared error is
//! below its threshold. The trait hides both senses behind one
//! `is_duplicate` question so the scanner never needs to know which way
//! "too similar" points.

use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use tracing::debug;

use crate::error::PipelineError;
use crate::models::{ImageEmbedder, Region};

/// Cosine similarity above which a frame counts as a near-duplicate.
pub const DEFAULT_COSINE_THRESHOLD: f32 = 0.97;

/// Mean-squared error below which two region rasters count as the same.
pub const DEFAULT_MSE_THRESHOLD: f64 = 100.0;

/// Edge length of the square canvas a tracked region is resampled to.
const RASTER_CANVAS: u32 = 64;

/// Width the frame is downscaled to before the content-region search.
const REGION_SEARCH_WIDTH: u32 = 320;

/// Relative area drift beyond which the tracked region is re-adopted.
const REGION_DRIFT_LIMIT: f64 = 0.10;

/// Comparable representation of one accepted frame.
#[derive(Debug, Clone)]
pub enum Fingerprint {
    /// Visual embedding vector.
    Embedding(Vec<f32>),
    /// Region-normalized grayscale canvas, row-major.
    Raster(Vec<u8>),
}

pub trait SimilarityStrategy: Send {
    /// Compute the comparable representation of `frame`, or `None` when the
    /// frame offers nothing to compare (the scanner then skips it entirely).
    fn fingerprint(&mut self, frame: &DynamicImage)
    -> Result<Option<Fingerprint>, PipelineError>;

    /// Whether `candidate` is a near-duplicate of the accepted `previous`.
    fn is_duplicate(&self, candidate: &Fingerprint, previous: &Fingerprint) -> bool;
}

// ── Embedding cosine ─────────────────────────────────────────────────────────

/// Rejects frames whose embedding is strictly *more* similar than the
/// threshold to a recent acceptance. Similarity exactly at the threshold is
/// an acceptance.
pub struct EmbeddingCosine {
    embedder: Arc<dyn ImageEmbedder>,
    threshold: f32,
}

impl EmbeddingCosine {
    pub fn new(embedder: Arc<dyn ImageEmbedder>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }
}

impl SimilarityStrategy for EmbeddingCosine {
    fn fingerprint(
        &mut self,
        frame: &DynamicImage,
    ) -> Result<Option<Fingerprint>, PipelineError> {
        let embedding = self.embedder.embed(frame)?;
        Ok(Some(Fingerprint::Embedding(embedding)))
    }

    fn is_duplicate(&self, candidate: &Fingerprint, previous: &Fingerprint) -> bool {
        match (candidate, previous) {
            (Fingerprint::Embedding(a), Fingerprint::Embedding(b)) => {
                cosine_similarity(a, b) > self.threshold
            }
            _ => false,
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ── Region raster ────────────────────────────────────────────────────────────

/// Region-stability strategy: locate the dominant content region, track it
/// across frames (re-adopting only when its area drifts more than 10 %),
/// and compare grayscale rasters of the tracked region by mean-squared
/// error. An MSE *below* the threshold rejects the candidate.
///
/// A frame with no locatable region yields no fingerprint at all.
pub struct RegionRaster {
    mse_threshold: f64,
    foreground_cutoff: u8,
    tracked: Option<Region>,
}

impl RegionRaster {
    pub fn new(mse_threshold: f64) -> Self {
        Self {
            mse_threshold,
            foreground_cutoff: 127,
            tracked: None,
        }
    }

    /// Override the luma value at which a pixel counts as foreground.
    pub fn with_foreground_cutoff(mut self, cutoff: u8) -> Self {
        self.foreground_cutoff = cutoff;
        self
    }
}

impl SimilarityStrategy for RegionRaster {
    fn fingerprint(
        &mut self,
        frame: &DynamicImage,
    ) -> Result<Option<Fingerprint>, PipelineError> {
        let gray = frame.to_luma8();
        let Some(region) = dominant_region(&gray, self.foreground_cutoff) else {
            debug!("no content region located; frame skipped");
            return Ok(None);
        };

        let tracked = match self.tracked {
            Some(current) => {
                let drift =
                    (region.area() as f64 - current.area() as f64).abs() / current.area() as f64;
                if drift > REGION_DRIFT_LIMIT {
                    debug!(drift, "content region drifted; re-adopting");
                    self.tracked = Some(region);
                    region
                } else {
                    current
                }
            }
            None => {
                self.tracked = Some(region);
                region
            }
        };

        Ok(Some(Fingerprint::Raster(raster_canvas(&gray, tracked))))
    }

    fn is_duplicate(&self, candidate: &Fingerprint, previous: &Fingerprint) -> bool {
        match (candidate, previous) {
            (Fingerprint::Raster(a), Fingerprint::Raster(b)) => {
                mean_squared_error(a, b) < self.mse_threshold
            }
            _ => false,
        }
    }
}

/// Bounding box of the largest connected foreground component, in full-frame
/// coordinates. The search runs on a downscaled copy for speed; `None` when
/// no pixel clears the cutoff.
fn dominant_region(gray: &GrayImage, cutoff: u8) -> Option<Region> {
    let (full_w, full_h) = gray.dimensions();
    if full_w == 0 || full_h == 0 {
        return None;
    }

    let scale = if full_w > REGION_SEARCH_WIDTH {
        full_w as f64 / REGION_SEARCH_WIDTH as f64
    } else {
        1.0
    };
    let w = ((full_w as f64 / scale).round() as u32).max(1);
    let h = ((full_h as f64 / scale).round() as u32).max(1);
    let small = image::imageops::resize(gray, w, h, FilterType::Triangle);

    let mask: Vec<bool> = small.pixels().map(|p| p.0[0] >= cutoff).collect();
    let stride = w as usize;
    let mut visited = vec![false; mask.len()];
    let mut stack: Vec<usize> = Vec::new();
    // (bbox area, min_x, min_y, max_x, max_y) of the best component so far.
    let mut best: Option<(u64, u32, u32, u32, u32)> = None;

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        let mut min_x = (start % stride) as u32;
        let mut min_y = (start / stride) as u32;
        let mut max_x = min_x;
        let mut max_y = min_y;
        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let x = (idx % stride) as u32;
            let y = (idx / stride) as u32;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            if x > 0 {
                let n = idx - 1;
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
            if x + 1 < w {
                let n = idx + 1;
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
            if y > 0 {
                let n = idx - stride;
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
            if y + 1 < h {
                let n = idx + stride;
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }

        let bbox_area = (max_x - min_x + 1) as u64 * (max_y - min_y + 1) as u64;
        if best.map_or(true, |(area, ..)| bbox_area > area) {
            best = Some((bbox_area, min_x, min_y, max_x, max_y));
        }
    }

    let (_, min_x, min_y, max_x, max_y) = best?;

    // Scale back up, clamping to the frame.
    let x = ((min_x as f64) * scale).floor() as u32;
    let y = ((min_y as f64) * scale).floor() as u32;
    let x2 = (((max_x + 1) as f64) * scale).ceil().min(full_w as f64) as u32;
    let y2 = (((max_y + 1) as f64) * scale).ceil().min(full_h as f64) as u32;
    if x2 <= x || y2 <= y {
        return None;
    }
    Some(Region {
        x,
        y,
        width: x2 - x,
        height: y2 - y,
    })
}

/// Crop `gray` to `region`, resample to the fixed square canvas, and return
/// the raw row-major bytes.
fn raster_canvas(gray: &GrayImage, region: Region) -> Vec<u8> {
    let (w, h) = gray.dimensions();
    let x = region.x.min(w.saturating_sub(1));
    let y = region.y.min(h.saturating_sub(1));
    let cw = region.width.min(w - x).max(1);
    let ch = region.height.min(h - y).max(1);
    let cropped = image::imageops::crop_imm(gray, x, y, cw, ch).to_image();
    image::imageops::resize(&cropped, RASTER_CANVAS, RASTER_CANVAS, FilterType::Triangle)
        .into_raw()
}

fn mean_squared_error(a: &[u8], b: &[u8]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::MAX;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    sum / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    struct NullEmbedder;

    impl ImageEmbedder for NullEmbedder {
        fn embed(&self, _image: &DynamicImage) -> Result<Vec<f32>, PipelineError> {
            Ok(Vec::new())
        }
    }

    fn cosine_strategy(threshold: f32) -> EmbeddingCosine {
        EmbeddingCosine::new(Arc::new(NullEmbedder), threshold)
    }

    fn gray_canvas(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    fn paint_rect(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, value: u8) {
        for py in y..y + h {
            for px in x..x + w {
                img.put_pixel(px, py, Luma([value]));
            }
        }
    }

    // ── Cosine ───────────────────────────────────────────────────────────────

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5f32, 0.25, -0.5];
        assert_eq!(cosine_similarity(&v, &v), 1.0);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn similarity_exactly_at_threshold_is_accepted() {
        // The convention is strict: only scores *above* the threshold reject.
        let strategy = cosine_strategy(1.0);
        let a = Fingerprint::Embedding(vec![1.0, 0.0]);
        let b = Fingerprint::Embedding(vec![1.0, 0.0]);
        assert!(
            !strategy.is_duplicate(&a, &b),
            "similarity equal to the threshold must not reject"
        );
    }

    #[test]
    fn similarity_above_threshold_rejects() {
        let strategy = cosine_strategy(0.5);
        let a = Fingerprint::Embedding(vec![1.0, 0.0]);
        let b = Fingerprint::Embedding(vec![1.0, 0.0]);
        assert!(strategy.is_duplicate(&a, &b));
    }

    #[test]
    fn orthogonal_embeddings_do_not_reject() {
        let strategy = cosine_strategy(0.0);
        let a = Fingerprint::Embedding(vec![1.0, 0.0]);
        let b = Fingerprint::Embedding(vec![0.0, 1.0]);
        assert!(!strategy.is_duplicate(&a, &b));
    }

    // ── MSE ──────────────────────────────────────────────────────────────────

    #[test]
    fn mse_of_identical_rasters_is_zero() {
        let raster = vec![10u8, 200, 30];
        assert_eq!(mean_squared_error(&raster, &raster), 0.0);
    }

    #[test]
    fn mse_of_shifted_rasters_is_squared_difference() {
        let a = vec![10u8, 10, 10];
        let b = vec![13u8, 13, 13];
        assert_eq!(mean_squared_error(&a, &b), 9.0);
    }

    #[test]
    fn mse_of_mismatched_lengths_never_rejects() {
        let strategy = RegionRaster::new(1e9);
        let a = Fingerprint::Raster(vec![0u8; 4]);
        let b = Fingerprint::Raster(vec![0u8; 8]);
        assert!(!strategy.is_duplicate(&a, &b));
    }

    // ── Region search ────────────────────────────────────────────────────────

    #[test]
    fn dominant_region_finds_bright_rectangle() {
        let mut img = gray_canvas(100, 80, 0);
        paint_rect(&mut img, 20, 10, 30, 20, 255);

        let region = dominant_region(&img, 127).expect("region should be found");
        assert_eq!(region, Region {
            x: 20,
            y: 10,
            width: 30,
            height: 20
        });
    }

    #[test]
    fn dominant_region_prefers_the_larger_component() {
        let mut img = gray_canvas(120, 90, 0);
        paint_rect(&mut img, 5, 5, 10, 10, 255);
        paint_rect(&mut img, 40, 20, 60, 50, 255);

        let region = dominant_region(&img, 127).expect("region should be found");
        assert_eq!(region.x, 40);
        assert_eq!(region.y, 20);
    }

    #[test]
    fn dominant_region_of_blank_frame_is_none() {
        let img = gray_canvas(64, 64, 0);
        assert!(dominant_region(&img, 127).is_none());
    }

    // ── RegionRaster strategy ────────────────────────────────────────────────

    fn framed_slide(band_value: u8) -> DynamicImage {
        let mut img = gray_canvas(160, 120, 0);
        paint_rect(&mut img, 30, 20, 100, 80, 200);
        paint_rect(&mut img, 40, 30, 80, 10, band_value);
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn repeated_frame_is_rejected_and_changed_frame_accepted() {
        let mut strategy = RegionRaster::new(DEFAULT_MSE_THRESHOLD);

        let first = strategy
            .fingerprint(&framed_slide(200))
            .expect("fingerprint")
            .expect("frame has a region");
        let repeat = strategy
            .fingerprint(&framed_slide(200))
            .expect("fingerprint")
            .expect("frame has a region");
        assert!(strategy.is_duplicate(&repeat, &first), "identical content");

        let changed = strategy
            .fingerprint(&framed_slide(255))
            .expect("fingerprint")
            .expect("frame has a region");
        assert!(
            !strategy.is_duplicate(&changed, &first),
            "band content changed well past the threshold"
        );
    }

    #[test]
    fn blank_frame_yields_no_fingerprint() {
        let mut strategy = RegionRaster::new(DEFAULT_MSE_THRESHOLD);
        let blank = DynamicImage::ImageLuma8(gray_canvas(64, 64, 0));
        let fp = strategy.fingerprint(&blank).expect("fingerprint call");
        assert!(fp.is_none());
        assert!(strategy.tracked.is_none(), "skip must not adopt a region");
    }

    #[test]
    fn small_region_drift_keeps_the_tracked_region() {
        let mut strategy = RegionRaster::new(DEFAULT_MSE_THRESHOLD);

        let mut a = gray_canvas(200, 150, 0);
        paint_rect(&mut a, 50, 40, 100, 80, 220);
        strategy
            .fingerprint(&DynamicImage::ImageLuma8(a))
            .expect("fingerprint")
            .expect("region");
        let adopted = strategy.tracked.expect("region adopted");

        // ~5 % larger area: inside the drift limit, tracking must hold.
        let mut b = gray_canvas(200, 150, 0);
        paint_rect(&mut b, 50, 40, 105, 80, 220);
        strategy
            .fingerprint(&DynamicImage::ImageLuma8(b))
            .expect("fingerprint")
            .expect("region");
        assert_eq!(strategy.tracked, Some(adopted));
    }

    #[test]
    fn large_region_drift_re_adopts() {
        let mut strategy = RegionRaster::new(DEFAULT_MSE_THRESHOLD);

        let mut a = gray_canvas(200, 150, 0);
        paint_rect(&mut a, 50, 40, 100, 80, 220);
        strategy
            .fingerprint(&DynamicImage::ImageLuma8(a))
            .expect("fingerprint")
            .expect("region");
        let adopted = strategy.tracked.expect("region adopted");

        // ~44 % larger area: past the limit, the new region takes over.
        let mut b = gray_canvas(200, 150, 0);
        paint_rect(&mut b, 30, 30, 120, 96, 220);
        strategy
            .fingerprint(&DynamicImage::ImageLuma8(b))
            .expect("fingerprint")
            .expect("region");
        let re_adopted = strategy.tracked.expect("region still tracked");
        assert_ne!(re_adopted, adopted);
        assert_eq!(re_adopted.width, 120);
    }
}

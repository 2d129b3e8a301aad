//! Bounded-window slide deduplication over extracted key frames.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::media::VideoStatistics;
use crate::slides::similarity::{Fingerprint, SimilarityStrategy};
use crate::slides::sorted_frames;

/// How many of the most recently accepted fingerprints a candidate is
/// compared against. Older acceptances fall out of the window, so a slide
/// the presenter returns to much later can be accepted again.
pub const DEDUP_WINDOW: usize = 5;

/// An accepted slide: where it sits in the lecture and where it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueSlide {
    pub timestamp_secs: f64,
    pub duration_secs: f64,
    pub path: PathBuf,
}

/// Scans frames in timestamp order and keeps those unlike anything in the
/// recent-acceptance window.
///
/// The window is per-run state; build a fresh extractor per job.
pub struct SlideExtractor {
    strategy: Box<dyn SimilarityStrategy>,
    window: VecDeque<Fingerprint>,
}

impl SlideExtractor {
    pub fn new(strategy: Box<dyn SimilarityStrategy>) -> Self {
        Self {
            strategy,
            window: VecDeque::with_capacity(DEDUP_WINDOW),
        }
    }

    /// Walk `frames_dir` in ascending frame-index order, write each accepted
    /// slide into `out_dir` as `slide_{counter:03}_s{seconds}.png`, and call
    /// `on_slide` at the moment of acceptance so the caller can persist
    /// incrementally. Returns all accepted slides in emission order.
    ///
    /// Acceptance rules: the first comparable frame is always accepted (the
    /// window starts empty); a frame matching anything in the window is
    /// rejected and its fingerprint discarded immediately; frames without a
    /// parseable index or without a fingerprint are skipped without touching
    /// the window. Emitted timestamps are non-decreasing.
    pub fn extract(
        &mut self,
        frames_dir: &Path,
        out_dir: &Path,
        stats: &VideoStatistics,
        mut on_slide: impl FnMut(&UniqueSlide) -> Result<(), PipelineError>,
    ) -> Result<Vec<UniqueSlide>, PipelineError> {
        std::fs::create_dir_all(out_dir)?;
        let frames = sorted_frames(frames_dir)?;
        let duration_secs = stats.duration_secs();
        let mut slides: Vec<UniqueSlide> = Vec::new();

        for (frame_index, path) in frames {
            let frame = image::open(&path)?;
            let Some(fingerprint) = self.strategy.fingerprint(&frame)? else {
                debug!(frame = frame_index, "frame yields no fingerprint; skipped");
                continue;
            };

            let duplicate = self
                .window
                .iter()
                .any(|seen| self.strategy.is_duplicate(&fingerprint, seen));
            if duplicate {
                continue;
            }

            self.window.push_back(fingerprint);
            if self.window.len() > DEDUP_WINDOW {
                self.window.pop_front();
            }

            let timestamp_secs = frame_index as f64 / stats.frame_rate;
            let name = format!(
                "slide_{:03}_s{}.png",
                slides.len() + 1,
                timestamp_secs as u64
            );
            let slide_path = out_dir.join(name);
            frame.save(&slide_path)?;

            let slide = UniqueSlide {
                timestamp_secs,
                duration_secs,
                path: slide_path,
            };
            on_slide(&slide)?;
            slides.push(slide);
        }

        info!(slides = slides.len(), "slide scan finished");
        Ok(slides)
    }

    #[cfg(test)]
    pub(crate) fn window_len(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::Path;

    /// Fingerprints every frame by its top-left pixel color; duplicates are
    /// exact color matches. Lets tests drive accept/reject sequences with
    /// plain solid-color frames.
    struct ColorKey;

    impl SimilarityStrategy for ColorKey {
        fn fingerprint(
            &mut self,
            frame: &DynamicImage,
        ) -> Result<Option<Fingerprint>, PipelineError> {
            let pixel = frame.to_rgb8().get_pixel(0, 0).0;
            Ok(Some(Fingerprint::Embedding(vec![
                f32::from(pixel[0]),
                f32::from(pixel[1]),
                f32::from(pixel[2]),
            ])))
        }

        fn is_duplicate(&self, candidate: &Fingerprint, previous: &Fingerprint) -> bool {
            match (candidate, previous) {
                (Fingerprint::Embedding(a), Fingerprint::Embedding(b)) => a == b,
                _ => false,
            }
        }
    }

    // PNG keeps the key colors exact; the index parser does not care about
    // the extension.
    fn write_frame(dir: &Path, index: u64, color: [u8; 3]) {
        let img = RgbImage::from_pixel(32, 24, Rgb(color));
        let name = format!("keyframe_{index:05}.png");
        img.save(dir.join(name)).expect("write frame");
    }

    fn stats_30fps(total_frames: u64) -> VideoStatistics {
        VideoStatistics {
            total_frames,
            frame_rate: 30.0,
        }
    }

    fn run_extractor(
        frames: &Path,
        out: &Path,
        stats: &VideoStatistics,
    ) -> (SlideExtractor, Vec<UniqueSlide>) {
        let mut extractor = SlideExtractor::new(Box::new(ColorKey));
        let slides = extractor
            .extract(frames, out, stats, |_| Ok(()))
            .expect("extraction should succeed");
        (extractor, slides)
    }

    #[test]
    fn single_frame_yields_exactly_one_slide() {
        let frames = tempfile::tempdir().expect("frames dir");
        let out = tempfile::tempdir().expect("out dir");
        write_frame(frames.path(), 0, [10, 20, 30]);

        let (_, slides) = run_extractor(frames.path(), out.path(), &stats_30fps(1));
        assert_eq!(slides.len(), 1, "first frame is always accepted");
        assert_eq!(slides[0].timestamp_secs, 0.0);
    }

    #[test]
    fn repeated_frames_collapse_to_one_slide() {
        let frames = tempfile::tempdir().expect("frames dir");
        let out = tempfile::tempdir().expect("out dir");
        for i in 0..4 {
            write_frame(frames.path(), i * 30, [200, 0, 0]);
        }

        let (_, slides) = run_extractor(frames.path(), out.path(), &stats_30fps(120));
        assert_eq!(slides.len(), 1);
    }

    #[test]
    fn lecture_with_one_slide_change_yields_two_slides() {
        let frames = tempfile::tempdir().expect("frames dir");
        let out = tempfile::tempdir().expect("out dir");
        // 60 s at 30 fps, key frame every second: first slide for 10 s,
        // second slide for the remaining 50 s.
        for second in 0..60u64 {
            let color = if second < 10 { [250, 250, 250] } else { [0, 0, 0] };
            write_frame(frames.path(), second * 30, color);
        }

        let (_, slides) = run_extractor(frames.path(), out.path(), &stats_30fps(1800));
        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].timestamp_secs, 0.0);
        assert_eq!(slides[1].timestamp_secs, 10.0);
        assert!(slides.iter().all(|s| s.duration_secs == 60.0));
    }

    #[test]
    fn window_never_exceeds_its_bound() {
        let frames = tempfile::tempdir().expect("frames dir");
        let out = tempfile::tempdir().expect("out dir");
        // Twelve distinct colors: every frame is accepted.
        for i in 0..12u64 {
            write_frame(frames.path(), i * 30, [(i * 20) as u8, 0, 255]);
        }

        let (extractor, slides) = run_extractor(frames.path(), out.path(), &stats_30fps(360));
        assert_eq!(slides.len(), 12);
        assert_eq!(
            extractor.window_len(),
            DEDUP_WINDOW,
            "window must stay bounded while accepting"
        );
    }

    #[test]
    fn slide_beyond_the_window_is_accepted_again() {
        let frames = tempfile::tempdir().expect("frames dir");
        let out = tempfile::tempdir().expect("out dir");
        // Slide A, then six distinct slides (evicting A), then A again.
        write_frame(frames.path(), 0, [1, 2, 3]);
        for i in 1..=6u64 {
            write_frame(frames.path(), i * 30, [100 + i as u8, 50, 50]);
        }
        write_frame(frames.path(), 7 * 30, [1, 2, 3]);

        let (_, slides) = run_extractor(frames.path(), out.path(), &stats_30fps(240));
        assert_eq!(slides.len(), 8, "evicted slide must be re-acceptable");
    }

    #[test]
    fn timestamps_are_non_decreasing_and_names_carry_counter() {
        let frames = tempfile::tempdir().expect("frames dir");
        let out = tempfile::tempdir().expect("out dir");
        write_frame(frames.path(), 0, [10, 0, 0]);
        write_frame(frames.path(), 90, [0, 10, 0]);
        write_frame(frames.path(), 300, [0, 0, 10]);

        let (_, slides) = run_extractor(frames.path(), out.path(), &stats_30fps(600));
        for pair in slides.windows(2) {
            assert!(pair[1].timestamp_secs >= pair[0].timestamp_secs);
        }
        let first_name = slides[0].path.file_name().and_then(|n| n.to_str());
        assert_eq!(first_name, Some("slide_001_s0.png"));
        let third_name = slides[2].path.file_name().and_then(|n| n.to_str());
        assert_eq!(third_name, Some("slide_003_s10.png"));
    }

    #[test]
    fn identical_rerun_is_deterministic() {
        let frames = tempfile::tempdir().expect("frames dir");
        for i in 0..6u64 {
            let color = if i % 2 == 0 { [255, 0, 0] } else { [0, 255, 0] };
            write_frame(frames.path(), i * 30, color);
        }
        let stats = stats_30fps(180);

        let out_a = tempfile::tempdir().expect("out dir");
        let (_, first) = run_extractor(frames.path(), out_a.path(), &stats);
        let out_b = tempfile::tempdir().expect("out dir");
        let (_, second) = run_extractor(frames.path(), out_b.path(), &stats);

        let timestamps = |slides: &[UniqueSlide]| {
            slides.iter().map(|s| s.timestamp_secs).collect::<Vec<_>>()
        };
        assert_eq!(timestamps(&first), timestamps(&second));
    }

    #[test]
    fn callback_error_aborts_the_scan() {
        let frames = tempfile::tempdir().expect("frames dir");
        let out = tempfile::tempdir().expect("out dir");
        write_frame(frames.path(), 0, [9, 9, 9]);

        let mut extractor = SlideExtractor::new(Box::new(ColorKey));
        let result = extractor.extract(frames.path(), out.path(), &stats_30fps(30), |_| {
            Err(PipelineError::Inference("sink closed".into()))
        });
        assert!(result.is_err(), "callback failure must propagate");
    }
}

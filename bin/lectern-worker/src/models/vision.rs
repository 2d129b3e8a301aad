//! ONNX vision adapters, loaded through `ort`'s dynamic runtime.
//!
//! Both adapters expect models exported with a single input named `input`
//! taking NCHW float RGB in `[0, 1]`, and read the output named `output`.
//! Sessions sit behind a `Mutex`; callers are already on blocking threads,
//! so contention just serializes inference.

use std::path::PathBuf;
use std::sync::Mutex;

use image::DynamicImage;
use image::imageops::FilterType;
use lectern_pipeline::PipelineError;
use lectern_pipeline::models::{ImageEmbedder, ObjectLocalizer, Region};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;

const EMBEDDER_INPUT: u32 = 224;
const LOCALIZER_INPUT: u32 = 640;

/// Detections below this score never become a region.
const CONFIDENCE_FLOOR: f32 = 0.25;

/// Vision encoder; the `output` tensor is the embedding, flattened.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
}

impl OnnxEmbedder {
    pub fn load(path: &str) -> Result<Self, ort::Error> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl ImageEmbedder for OnnxEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, PipelineError> {
        let tensor = chw_tensor(image, EMBEDDER_INPUT)?;
        let mut session = lock_session(&self.session, "embedder")?;
        let outputs = session
            .run(ort::inputs!["input" => tensor])
            .map_err(model_err)?;
        let (_, values) = outputs["output"]
            .try_extract_tensor::<f32>()
            .map_err(model_err)?;
        Ok(values.to_vec())
    }
}

/// Detector with a fused-NMS head: `output` rows are
/// `[x1, y1, x2, y2, score, class]` at input scale. The highest-scoring row
/// above the confidence floor becomes the region.
pub struct OnnxLocalizer {
    session: Mutex<Session>,
}

impl OnnxLocalizer {
    pub fn load(path: &str) -> Result<Self, ort::Error> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn locate_one(
        &self,
        session: &mut Session,
        image: &DynamicImage,
    ) -> Result<Option<Region>, PipelineError> {
        let (orig_w, orig_h) = (image.width(), image.height());
        if orig_w == 0 || orig_h == 0 {
            return Ok(None);
        }

        let tensor = chw_tensor(image, LOCALIZER_INPUT)?;
        let outputs = session
            .run(ort::inputs!["input" => tensor])
            .map_err(model_err)?;
        let (_, values) = outputs["output"]
            .try_extract_tensor::<f32>()
            .map_err(model_err)?;

        let mut best: Option<(f32, [f32; 4])> = None;
        for row in values.chunks_exact(6) {
            let score = row[4];
            if score < CONFIDENCE_FLOOR {
                continue;
            }
            if best.is_none_or(|(s, _)| score > s) {
                best = Some((score, [row[0], row[1], row[2], row[3]]));
            }
        }
        let Some((_, [x1, y1, x2, y2])) = best else {
            return Ok(None);
        };

        // Scale back to source pixels and clamp to the frame.
        let sx = orig_w as f32 / LOCALIZER_INPUT as f32;
        let sy = orig_h as f32 / LOCALIZER_INPUT as f32;
        let x = (x1.max(0.0) * sx) as u32;
        let y = (y1.max(0.0) * sy) as u32;
        let right = ((x2.max(0.0) * sx) as u32).min(orig_w);
        let bottom = ((y2.max(0.0) * sy) as u32).min(orig_h);
        if right <= x || bottom <= y {
            return Ok(None);
        }
        Ok(Some(Region {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }))
    }
}

impl ObjectLocalizer for OnnxLocalizer {
    fn locate(&self, images: &[PathBuf]) -> Result<Vec<Option<Region>>, PipelineError> {
        let mut session = lock_session(&self.session, "localizer")?;
        let mut regions = Vec::with_capacity(images.len());
        for path in images {
            let image = image::open(path)?;
            regions.push(self.locate_one(&mut session, &image)?);
        }
        Ok(regions)
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn chw_tensor(image: &DynamicImage, size: u32) -> Result<Tensor<f32>, PipelineError> {
    let rgb = image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();
    let plane = (size * size) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = (y * size + x) as usize;
        for channel in 0..3 {
            data[channel * plane + idx] = f32::from(pixel[channel]) / 255.0;
        }
    }
    Tensor::from_array((vec![1i64, 3, size as i64, size as i64], data)).map_err(model_err)
}

fn lock_session<'a>(
    session: &'a Mutex<Session>,
    name: &str,
) -> Result<std::sync::MutexGuard<'a, Session>, PipelineError> {
    session
        .lock()
        .map_err(|_| PipelineError::Inference(format!("{name} session poisoned")))
}

fn model_err(e: ort::Error) -> PipelineError {
    PipelineError::Inference(e.to_string())
}

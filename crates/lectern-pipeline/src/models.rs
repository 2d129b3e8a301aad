//! Model seams between the pipeline and its inference backends.
//!
//! The pipeline never talks to an inference runtime directly; it goes through
//! the traits below, and the worker binary supplies production adapters.
//! Speech and chat are remote calls and therefore async; the vision models
//! run in-process and are called from blocking stage code, so their traits
//! are synchronous and the caller is expected to already be inside
//! `spawn_blocking`.
//!
//! A registry slot that was never filled surfaces as
//! [`PipelineError::ModelNotLoaded`] on first use, not as a panic.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::transcript::TranscriptSegment;

/// Axis-aligned rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Speech-to-text over a prepared mono 16 kHz WAV file.
///
/// Implementations push `(reached_seconds, total_seconds)` pairs through
/// `progress` as segments are decoded. The pairs are advisory; dropping the
/// receiver must not fail the transcription.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        progress: mpsc::Sender<(f64, f64)>,
    ) -> Result<Vec<TranscriptSegment>, PipelineError>;
}

/// Finds the single most confident subject region per image.
pub trait ObjectLocalizer: Send + Sync {
    /// Returns one entry per input image, `None` where nothing was detected.
    fn locate(&self, images: &[PathBuf]) -> Result<Vec<Option<Region>>, PipelineError>;
}

/// Produces a fixed-length visual embedding for a decoded frame.
pub trait ImageEmbedder: Send + Sync {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, PipelineError>;
}

/// Hosted chat completion fed with a system prompt, the user's wishes for
/// the summary, and the assembled lecture content.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        content_prompt: &str,
    ) -> Result<String, PipelineError>;
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Per-process model handles, built once at startup.
///
/// Each worker loads only the models its configured job kind needs, so every
/// slot is optional. Accessors return [`PipelineError::ModelNotLoaded`] for
/// an empty required slot; the cropper's localizer is the one genuinely
/// optional model and has a dedicated non-failing accessor.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    speech: Option<Arc<dyn SpeechToText>>,
    localizer: Option<Arc<dyn ObjectLocalizer>>,
    embedder: Option<Arc<dyn ImageEmbedder>>,
    chat: Option<Arc<dyn ChatCompletion>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speech(mut self, model: Arc<dyn SpeechToText>) -> Self {
        self.speech = Some(model);
        self
    }

    pub fn with_localizer(mut self, model: Arc<dyn ObjectLocalizer>) -> Self {
        self.localizer = Some(model);
        self
    }

    pub fn with_embedder(mut self, model: Arc<dyn ImageEmbedder>) -> Self {
        self.embedder = Some(model);
        self
    }

    pub fn with_chat(mut self, model: Arc<dyn ChatCompletion>) -> Self {
        self.chat = Some(model);
        self
    }

    pub fn speech(&self) -> Result<Arc<dyn SpeechToText>, PipelineError> {
        self.speech.clone().ok_or_else(|| not_loaded("speech-to-text"))
    }

    pub fn embedder(&self) -> Result<Arc<dyn ImageEmbedder>, PipelineError> {
        self.embedder.clone().ok_or_else(|| not_loaded("image-embedder"))
    }

    /// Whether an embedder was configured, without claiming a handle. Strategy
    /// selection keys off this.
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn chat(&self) -> Result<Arc<dyn ChatCompletion>, PipelineError> {
        self.chat.clone().ok_or_else(|| not_loaded("chat-completion"))
    }

    /// The cropper runs only when a localizer was configured; absence selects
    /// the extraction-only pipeline rather than an error.
    pub fn localizer(&self) -> Option<Arc<dyn ObjectLocalizer>> {
        self.localizer.clone()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("speech", &self.speech.is_some())
            .field("localizer", &self.localizer.is_some())
            .field("embedder", &self.embedder.is_some())
            .field("chat", &self.chat.is_some())
            .finish()
    }
}

fn not_loaded(model: &str) -> PipelineError {
    PipelineError::ModelNotLoaded {
        model: model.to_owned(),
    }
}

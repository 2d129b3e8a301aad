use thiserror::Error;

/// Errors produced by the pipeline stages and model seams.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required model slot was never filled in the registry.
    #[error("model not loaded: {model}")]
    ModelNotLoaded { model: String },

    /// ffprobe failed or returned an unusable stream description.
    #[error("media probe failed for '{path}': {message}")]
    Probe { path: String, message: String },

    /// An ffmpeg invocation could not be spawned or driven to completion.
    #[error("ffmpeg {operation} failed: {message}")]
    Ffmpeg { operation: String, message: String },

    /// Key-frame extraction ran but decoded nothing.
    #[error("no key frames decoded from '{path}'")]
    NoFrames { path: String },

    /// A model invocation (speech, vision, or chat) returned an error.
    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub mod error;
pub mod media;
pub mod models;
pub mod progress;
pub mod slides;
pub mod summary;
pub mod transcript;

pub use error::PipelineError;
pub use media::VideoStatistics;
pub use models::{ModelRegistry, Region};
pub use progress::{ProgressGate, ProgressTracker, StagePlan};
pub use slides::{SlideExtractor, UniqueSlide};

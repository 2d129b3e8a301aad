//! Unified worker error type.
//!
//! Every job path returns `Result<T, WorkerError>`; the job boundary folds
//! any variant into a `Failed` outcome, so callers never need to branch on
//! the variant except for logging.

use thiserror::Error;
use uuid::Uuid;

/// All errors that can occur while running a job.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The dispatched job id has no row in the database.
    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// The job row exists but lacks a required input reference.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Propagated from the Postgres store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Propagated from object storage.
    #[error("object storage error: {0}")]
    Storage(#[from] opendal::Error),

    /// The job link to the backend is unusable.
    #[error("job link error: {0}")]
    Link(String),

    /// A pipeline stage failed (media, models, dedup).
    #[error("pipeline error: {0}")]
    Pipeline(#[from] lectern_pipeline::PipelineError),

    /// A produced artifact could not be recorded or resolved.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An unclassified internal worker error.
    #[error("internal error: {0}")]
    Internal(String),
}

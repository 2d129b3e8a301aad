//! Database abstraction layer.
//!
//! [`JobStore`], [`ArtifactStore`], and [`NoteStore`] define what the worker
//! needs from the backend's database. The default implementation is
//! [`postgres::PgStore`]; job handlers are generic over the traits so tests
//! can substitute in-memory stores.
//!
//! All trait methods use `impl Future` in their signatures (stable since Rust
//! 1.75) so no extra `async-trait` crate is required.

pub mod postgres;

use uuid::Uuid;

/// A dispatched job joined with its project pointers.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    /// Job kind as stored (`"transcribe"` | `"summarize"` | `"slides"`).
    pub kind: String,
    /// Free-form user wishes for the summary; `None` for other kinds.
    pub prompt: Option<String>,
    /// Owning user, recorded on every artifact the job produces.
    pub user_id: Uuid,
    pub project_id: Uuid,
    /// The uploaded lecture recording.
    pub origin_file_id: Option<Uuid>,
    /// The project's transcription artifact, once one exists.
    pub transcription_file_id: Option<Uuid>,
}

/// A stored artifact row (uploaded media or a produced output).
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub id: Uuid,
    pub name: String,
    /// MIME type, e.g. `"video/mp4"` or `"image/png"`.
    pub media_type: String,
    /// Object-storage key the bytes live under.
    pub storage_key: String,
    /// Seconds into the lecture this artifact belongs to, where applicable.
    pub timecode: Option<f64>,
    /// User-editable description; empty when never set.
    pub caption: String,
    pub hidden: bool,
}

/// Fields the worker supplies when recording a produced artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact<'a> {
    pub owner_id: Uuid,
    pub project_id: Uuid,
    pub job_id: Uuid,
    pub name: &'a str,
    pub media_type: &'a str,
    pub timecode: Option<f64>,
    pub caption: &'a str,
    pub hidden: bool,
}

/// A note the user pinned to an uploaded file at a timecode.
#[derive(Debug, Clone)]
pub struct NoteRecord {
    pub timecode: f64,
    pub text: String,
}

/// Job rows: lookup at dispatch, done flag at finalization.
pub trait JobStore: Send + Sync + 'static {
    fn get_job(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<JobRecord>, sqlx::Error>> + Send;

    /// Set the job row's `done` flag. Updating a missing row is a no-op.
    fn mark_done(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;
}

/// Artifact rows and the project-level pointers to them.
pub trait ArtifactStore: Send + Sync + 'static {
    /// Insert a row with a fresh id and storage key, returning the full
    /// record so the caller can upload to `storage_key`.
    fn create_artifact(
        &self,
        new: NewArtifact<'_>,
    ) -> impl std::future::Future<Output = Result<ArtifactRecord, sqlx::Error>> + Send;

    fn artifact_by_id(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ArtifactRecord>, sqlx::Error>> + Send;

    /// Non-hidden slide images of a project, in timecode order.
    fn active_images(
        &self,
        project_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ArtifactRecord>, sqlx::Error>> + Send;

    fn set_transcription(
        &self,
        project_id: Uuid,
        artifact_id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;

    fn set_summary(
        &self,
        project_id: Uuid,
        artifact_id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;

    fn mark_slides_extracted(
        &self,
        project_id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), sqlx::Error>> + Send;
}

/// Timed notes attached to an uploaded file.
pub trait NoteStore: Send + Sync + 'static {
    fn notes_for_file(
        &self,
        file_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<NoteRecord>, sqlx::Error>> + Send;
}

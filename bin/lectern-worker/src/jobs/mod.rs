//! Job dispatch and lifecycle.
//!
//! [`handle_job`] is the single entry point the queue loop calls per
//! assignment. It runs the handler for the job's kind inside its own task,
//! then routes whatever came out of it, including a panic, through
//! [`finalize`] so the backend always sees exactly one terminal `done`
//! envelope per job.

mod slides;
mod summarize;
mod transcribe;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{error, info};
use uuid::Uuid;

use lectern_pipeline::{ModelRegistry, ProgressGate, ProgressTracker, StagePlan};

use crate::config::Config;
use crate::db::{ArtifactStore, JobRecord, JobStore, NoteStore};
use crate::error::WorkerError;
use crate::queue::JobPublisher;
use crate::storage::ObjectStorage;

/// The three pipelines a worker process can serve. Each process registers
/// for exactly one kind and the queue only sends it matching jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Transcribe,
    Summarize,
    Slides,
}

/// What happens to the job row's `done` flag when a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
pub enum FinalizePolicy {
    /// Mark done on every outcome, success or failure.
    #[strum(serialize = "always")]
    AlwaysMarkDone,
    /// Leave failed jobs unmarked so the backend can redispatch them.
    #[strum(serialize = "success-only")]
    MarkDoneOnSuccess,
}

/// Terminal result of a job run, routed through [`finalize`].
#[derive(Debug)]
pub enum Outcome {
    /// Ids of the artifacts the job recorded, in creation order.
    Completed(Vec<Uuid>),
    Failed(String),
}

/// Everything a job handler needs, cheap to clone into a task.
pub struct WorkerContext<S> {
    pub config: Arc<Config>,
    pub store: Arc<S>,
    pub storage: Arc<ObjectStorage>,
    pub models: ModelRegistry,
    pub publisher: JobPublisher,
}

// Manual impl: `S` itself never needs to be `Clone` behind the `Arc`.
impl<S> Clone for WorkerContext<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            storage: Arc::clone(&self.storage),
            models: self.models.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

impl<S> WorkerContext<S> {
    fn emit_interval(&self) -> Duration {
        Duration::from_secs(self.config.progress_interval_secs)
    }
}

/// Run the job for `job_id` and finalize it, whatever happens inside.
pub async fn handle_job<S>(ctx: &WorkerContext<S>, job_id: Uuid)
where
    S: JobStore + ArtifactStore + NoteStore,
{
    info!(%job_id, "job started");
    let started = Instant::now();

    // A panicking handler must not take the worker loop down with it.
    let run = tokio::spawn(run_job(ctx.clone(), job_id));
    let outcome = match run.await {
        Ok(Ok(artifacts)) => Outcome::Completed(artifacts),
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Err(_) => Outcome::Failed("job task panicked".to_owned()),
    };

    finalize(ctx, job_id, outcome, started).await;
}

async fn run_job<S>(ctx: WorkerContext<S>, job_id: Uuid) -> Result<Vec<Uuid>, WorkerError>
where
    S: JobStore + ArtifactStore + NoteStore,
{
    let job = ctx
        .store
        .get_job(job_id)
        .await?
        .ok_or(WorkerError::NotFound(job_id))?;
    let kind: JobKind = job
        .kind
        .parse()
        .map_err(|_| WorkerError::Internal(format!("unknown job kind {:?}", job.kind)))?;

    // Scratch space lives exactly as long as the run; created only after the
    // lookup so unknown jobs leave nothing behind.
    let workspace = tempfile::tempdir()?;
    match kind {
        JobKind::Transcribe => transcribe::run(&ctx, &job, workspace.path()).await,
        JobKind::Summarize => summarize::run(&ctx, &job, workspace.path()).await,
        JobKind::Slides => slides::run(&ctx, &job, workspace.path()).await,
    }
}

/// Publish the terminal envelopes and settle the job row.
///
/// Order matters: the error report (if any) goes out before `done`, and
/// `done` goes out even when persisting the flag fails.
async fn finalize<S>(ctx: &WorkerContext<S>, job_id: Uuid, outcome: Outcome, started: Instant)
where
    S: JobStore,
{
    if let Outcome::Failed(reason) = &outcome {
        error!(%job_id, error = %reason, "job failed");
        ctx.publisher.error(job_id, reason).await;
    }

    let mark_done = match ctx.config.finalize {
        FinalizePolicy::AlwaysMarkDone => true,
        FinalizePolicy::MarkDoneOnSuccess => matches!(outcome, Outcome::Completed(_)),
    };
    if mark_done {
        if let Err(e) = ctx.store.mark_done(job_id).await {
            error!(%job_id, error = %e, "could not persist done flag");
        }
    }

    ctx.publisher.done(job_id).await;
    let elapsed = started.elapsed().as_secs_f64();
    info!(%job_id, elapsed = %format_args!("{elapsed:.2}s"), "job finished");
}

/// Stage-aware progress that publishes through the job link.
///
/// Intermediate updates pass a time gate so bursty pipelines do not flood
/// the socket; stage boundaries always go out. Published values stay in
/// `(0, 1]`: a fold still at zero is withheld.
pub(crate) struct ProgressReporter {
    publisher: JobPublisher,
    job_id: Uuid,
    tracker: ProgressTracker,
    gate: ProgressGate,
}

impl ProgressReporter {
    pub(crate) fn new(
        publisher: JobPublisher,
        job_id: Uuid,
        plan: StagePlan,
        min_interval: Duration,
    ) -> Self {
        Self {
            publisher,
            job_id,
            tracker: ProgressTracker::new(plan),
            gate: ProgressGate::new(min_interval),
        }
    }

    pub(crate) async fn update(&mut self, fraction: f64) {
        let overall = self.tracker.update(fraction);
        // Checked before the gate so a withheld zero cannot spend its grant.
        if overall > 0.0 && self.gate.permits(false) {
            self.publisher.progress(self.job_id, overall).await;
        }
    }

    pub(crate) async fn finish_stage(&mut self) {
        let overall = self.tracker.finish_stage();
        // Forced, but still recorded so the gate window restarts here.
        if self.gate.permits(true) {
            self.publisher.progress(self.job_id, overall).await;
        }
    }
}

/// Resolve the project's uploaded recording and download it into the
/// workspace as `input` with an extension ffmpeg can sniff.
async fn fetch_origin<S>(
    ctx: &WorkerContext<S>,
    job: &JobRecord,
    workspace: &Path,
) -> Result<PathBuf, WorkerError>
where
    S: ArtifactStore,
{
    let origin_id = job
        .origin_file_id
        .ok_or_else(|| WorkerError::MissingInput("project has no uploaded recording".to_owned()))?;
    let origin = ctx
        .store
        .artifact_by_id(origin_id)
        .await?
        .ok_or_else(|| WorkerError::Persistence(format!("origin artifact {origin_id} is gone")))?;

    let local = workspace.join(format!("input{}", extension_for(&origin.media_type)));
    ctx.storage.fetch(&origin.storage_key, &local).await?;
    Ok(local)
}

/// File extension for a stored media type, dot included. Unknown types get
/// none; ffmpeg probes the container anyway.
fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "video/x-matroska" => ".mkv",
        "video/quicktime" => ".mov",
        "audio/mpeg" => ".mp3",
        "audio/wav" | "audio/x-wav" => ".wav",
        "audio/ogg" => ".ogg",
        "audio/mp4" => ".m4a",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use tracing_test::traced_test;

    use crate::db::{ArtifactRecord, NewArtifact, NoteRecord};
    use crate::queue::Envelope;

    /// Store with no rows at all; records `mark_done` calls.
    #[derive(Default)]
    struct EmptyStore {
        done: Mutex<Vec<Uuid>>,
    }

    impl JobStore for EmptyStore {
        async fn get_job(&self, _id: Uuid) -> Result<Option<JobRecord>, sqlx::Error> {
            Ok(None)
        }

        async fn mark_done(&self, id: Uuid) -> Result<(), sqlx::Error> {
            self.done.lock().unwrap().push(id);
            Ok(())
        }
    }

    impl ArtifactStore for EmptyStore {
        async fn create_artifact(
            &self,
            _new: NewArtifact<'_>,
        ) -> Result<ArtifactRecord, sqlx::Error> {
            unreachable!("missing jobs never reach artifact persistence")
        }

        async fn artifact_by_id(&self, _id: Uuid) -> Result<Option<ArtifactRecord>, sqlx::Error> {
            Ok(None)
        }

        async fn active_images(&self, _project_id: Uuid) -> Result<Vec<ArtifactRecord>, sqlx::Error> {
            Ok(Vec::new())
        }

        async fn set_transcription(
            &self,
            _project_id: Uuid,
            _artifact_id: Uuid,
        ) -> Result<(), sqlx::Error> {
            Ok(())
        }

        async fn set_summary(
            &self,
            _project_id: Uuid,
            _artifact_id: Uuid,
        ) -> Result<(), sqlx::Error> {
            Ok(())
        }

        async fn mark_slides_extracted(&self, _project_id: Uuid) -> Result<(), sqlx::Error> {
            Ok(())
        }
    }

    impl NoteStore for EmptyStore {
        async fn notes_for_file(&self, _file_id: Uuid) -> Result<Vec<NoteRecord>, sqlx::Error> {
            Ok(Vec::new())
        }
    }

    fn context(
        store: Arc<EmptyStore>,
        policy: FinalizePolicy,
    ) -> (WorkerContext<EmptyStore>, tokio::sync::mpsc::Receiver<Envelope>) {
        let mut config = Config::from_env();
        config.finalize = policy;
        let (publisher, events) = JobPublisher::detached();
        let storage = ObjectStorage::from_config(&config).expect("builder-only storage");
        let ctx = WorkerContext {
            config: Arc::new(config),
            store,
            storage: Arc::new(storage),
            models: ModelRegistry::new(),
            publisher,
        };
        (ctx, events)
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_job_reports_one_error_then_one_done() {
        let store = Arc::new(EmptyStore::default());
        let (ctx, mut events) = context(Arc::clone(&store), FinalizePolicy::AlwaysMarkDone);
        let job_id = Uuid::new_v4();

        handle_job(&ctx, job_id).await;

        match events.recv().await {
            Some(Envelope::Error { job_id: id, error }) => {
                assert_eq!(id, job_id);
                assert!(error.contains("job not found"), "got {error:?}");
            }
            other => panic!("expected an error envelope, got {other:?}"),
        }
        match events.recv().await {
            Some(Envelope::Done { job_id: id }) => assert_eq!(id, job_id),
            other => panic!("expected a done envelope, got {other:?}"),
        }
        assert!(events.try_recv().is_err(), "exactly one terminal done");

        assert_eq!(store.done.lock().unwrap().as_slice(), &[job_id]);
        assert!(logs_contain("job failed"));
    }

    #[tokio::test]
    async fn success_only_policy_leaves_failed_jobs_unmarked() {
        let store = Arc::new(EmptyStore::default());
        let (ctx, mut events) = context(Arc::clone(&store), FinalizePolicy::MarkDoneOnSuccess);

        handle_job(&ctx, Uuid::new_v4()).await;

        assert!(matches!(events.recv().await, Some(Envelope::Error { .. })));
        assert!(matches!(events.recv().await, Some(Envelope::Done { .. })));
        assert!(store.done.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_fractions_are_withheld_from_the_job_source() {
        let (publisher, mut events) = JobPublisher::detached();
        let job_id = Uuid::new_v4();
        let mut reporter = ProgressReporter::new(
            publisher,
            job_id,
            StagePlan::single(),
            Duration::from_secs(3600),
        );

        // An extraction-only run reports its first slide at t = 0.
        reporter.update(0.0).await;
        assert!(events.try_recv().is_err(), "a zero fraction was published");

        reporter.update(0.4).await;
        match events.try_recv() {
            Ok(Envelope::Progress { job_id: id, progress }) => {
                assert_eq!(id, job_id);
                assert_eq!(progress, 0.4, "withheld zero spent the gate's grant");
            }
            other => panic!("expected a progress envelope, got {other:?}"),
        }

        reporter.finish_stage().await;
        match events.try_recv() {
            Ok(Envelope::Progress { progress, .. }) => assert_eq!(progress, 1.0),
            other => panic!("expected the boundary envelope, got {other:?}"),
        }
    }

    #[test]
    fn job_kinds_round_trip_their_wire_names() {
        for (kind, name) in [
            (JobKind::Transcribe, "transcribe"),
            (JobKind::Summarize, "summarize"),
            (JobKind::Slides, "slides"),
        ] {
            assert_eq!(kind.to_string(), name);
            assert_eq!(name.parse::<JobKind>().unwrap(), kind);
        }
        assert!("subtitles".parse::<JobKind>().is_err());
    }

    #[test]
    fn finalize_policy_parses_its_config_names() {
        assert_eq!(
            "always".parse::<FinalizePolicy>().unwrap(),
            FinalizePolicy::AlwaysMarkDone
        );
        assert_eq!(
            "success-only".parse::<FinalizePolicy>().unwrap(),
            FinalizePolicy::MarkDoneOnSuccess
        );
    }

    #[test]
    fn known_media_types_map_to_extensions() {
        assert_eq!(extension_for("video/mp4"), ".mp4");
        assert_eq!(extension_for("audio/x-wav"), ".wav");
        assert_eq!(extension_for("application/octet-stream"), "");
    }
}

//! WebSocket link to the job source.
//!
//! One persistent connection per worker process. Messages are JSON envelopes
//! `{"type": ..., "payload": ...}`: the worker announces itself with
//! `register`, receives `job` dispatches, and reports back with `progress`,
//! `error`, and `done`.
//!
//! Outbound traffic goes through a writer task fed by an mpsc channel, so
//! job code publishes without holding the socket; a lost link downgrades
//! publishing to a warning rather than failing the job mid-flight.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::WorkerError;
use crate::jobs::JobKind;

/// Wire envelope exchanged with the job source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    Register { worker: String, kind: JobKind },
    Job { job_id: Uuid, kind: JobKind },
    Progress { job_id: Uuid, progress: f64 },
    Error { job_id: Uuid, error: String },
    Done { job_id: Uuid },
}

/// A job dispatched to this worker.
#[derive(Debug, Clone, Copy)]
pub struct JobAssignment {
    pub job_id: Uuid,
    pub kind: JobKind,
}

/// Cloneable sending half handed to job code.
#[derive(Clone, Debug)]
pub struct JobPublisher {
    outbound: mpsc::Sender<Envelope>,
}

impl JobPublisher {
    /// Detached publisher whose envelopes land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<Envelope>) {
        let (outbound, events) = mpsc::channel(16);
        (Self { outbound }, events)
    }

    pub async fn progress(&self, job_id: Uuid, progress: f64) {
        self.send(Envelope::Progress { job_id, progress }).await;
    }

    pub async fn error(&self, job_id: Uuid, error: &str) {
        self.send(Envelope::Error {
            job_id,
            error: error.to_owned(),
        })
        .await;
    }

    pub async fn done(&self, job_id: Uuid) {
        self.send(Envelope::Done { job_id }).await;
    }

    async fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).await.is_err() {
            warn!("job link writer gone; event dropped");
        }
    }
}

/// The worker's end of the link: a stream of assignments plus a publisher.
pub struct JobLink {
    outbound: mpsc::Sender<Envelope>,
    jobs: mpsc::Receiver<JobAssignment>,
    kind: JobKind,
}

impl JobLink {
    /// Connect, register for `kind`, and spawn the reader/writer tasks.
    pub async fn connect(url: &str, worker: &str, kind: JobKind) -> Result<Self, WorkerError> {
        let (ws, _response) = connect_async(url).await.map_err(link_err)?;
        let (mut sink, mut stream) = ws.split();

        let register = encode(&Envelope::Register {
            worker: worker.to_owned(),
            kind,
        })?;
        sink.send(Message::Text(register.into()))
            .await
            .map_err(link_err)?;

        let (outbound, mut outbound_rx) = mpsc::channel::<Envelope>(64);
        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let text = match encode(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode outbound envelope");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "job link send failed; writer stopping");
                    break;
                }
            }
        });

        let (jobs_tx, jobs) = mpsc::channel::<JobAssignment>(16);
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<Envelope>(text.as_str()) {
                            Ok(Envelope::Job { job_id, kind }) => {
                                if jobs_tx.send(JobAssignment { job_id, kind }).await.is_err() {
                                    break;
                                }
                            }
                            Ok(other) => debug!(?other, "ignoring non-job envelope"),
                            Err(e) => {
                                warn!(error = %e, raw = %text, "undecodable message from job source");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "job link read failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outbound,
            jobs,
            kind,
        })
    }

    pub fn publisher(&self) -> JobPublisher {
        JobPublisher {
            outbound: self.outbound.clone(),
        }
    }

    /// Next dispatched job; `None` once the link is gone. Assignments for a
    /// kind this worker did not register for are dropped with a warning.
    pub async fn next_job(&mut self) -> Option<JobAssignment> {
        loop {
            let assignment = self.jobs.recv().await?;
            if assignment.kind != self.kind {
                warn!(
                    job_id = %assignment.job_id,
                    kind = %assignment.kind,
                    "assignment does not match the registered kind; dropped"
                );
                continue;
            }
            return Some(assignment);
        }
    }
}

fn encode(envelope: &Envelope) -> Result<String, WorkerError> {
    serde_json::to_string(envelope).map_err(|e| WorkerError::Link(e.to_string()))
}

fn link_err(e: tokio_tungstenite::tungstenite::Error) -> WorkerError {
    WorkerError::Link(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_envelopes_use_type_payload_shape() {
        let envelope = Envelope::Progress {
            job_id: Uuid::nil(),
            progress: 0.5,
        };
        let json: serde_json::Value =
            serde_json::from_str(&encode(&envelope).expect("encode")).expect("valid json");
        assert_eq!(json["type"], "progress");
        assert_eq!(json["payload"]["progress"], 0.5);
        assert_eq!(
            json["payload"]["job_id"],
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn inbound_job_envelope_parses() {
        let raw = r#"{
            "type": "job",
            "payload": {
                "job_id": "7f1f9df2-5a0c-4efb-a0a3-0a5bbe0a6a6a",
                "kind": "slides"
            }
        }"#;
        let envelope: Envelope = serde_json::from_str(raw).expect("parse");
        match envelope {
            Envelope::Job { job_id, kind } => {
                assert_eq!(
                    job_id.to_string(),
                    "7f1f9df2-5a0c-4efb-a0a3-0a5bbe0a6a6a"
                );
                assert_eq!(kind, JobKind::Slides);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn next_job_drops_assignments_for_other_kinds() {
        let (jobs_tx, jobs) = mpsc::channel::<JobAssignment>(4);
        let (outbound, _outbound_rx) = mpsc::channel::<Envelope>(4);
        let mut link = JobLink {
            outbound,
            jobs,
            kind: JobKind::Slides,
        };

        let misrouted = Uuid::new_v4();
        let expected = Uuid::new_v4();
        for (job_id, kind) in [
            (misrouted, JobKind::Transcribe),
            (expected, JobKind::Slides),
        ] {
            jobs_tx
                .send(JobAssignment { job_id, kind })
                .await
                .expect("queue assignment");
        }
        drop(jobs_tx);

        let assignment = link.next_job().await.expect("a matching assignment");
        assert_eq!(assignment.job_id, expected);
        assert!(link.next_job().await.is_none(), "link gone after the drain");
    }

    #[test]
    fn register_envelope_carries_worker_and_kind() {
        let envelope = Envelope::Register {
            worker: "lectern-42".into(),
            kind: JobKind::Transcribe,
        };
        let json: serde_json::Value =
            serde_json::from_str(&encode(&envelope).expect("encode")).expect("valid json");
        assert_eq!(json["type"], "register");
        assert_eq!(json["payload"]["worker"], "lectern-42");
        assert_eq!(json["payload"]["kind"], "transcribe");
    }
}

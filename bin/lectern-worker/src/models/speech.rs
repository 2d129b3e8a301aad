//! Hosted speech-to-text over an OpenAI-style `/audio/transcriptions` call.

use std::path::Path;

use async_trait::async_trait;
use lectern_pipeline::PipelineError;
use lectern_pipeline::models::SpeechToText;
use lectern_pipeline::transcript::TranscriptSegment;
use reqwest::multipart;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::Config;

pub struct HostedSpeech {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: String,
}

impl HostedSpeech {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: cfg.stt_endpoint.trim_end_matches('/').to_owned(),
            api_key: cfg.stt_api_key.clone(),
            model: cfg.stt_model.clone(),
            language: cfg.stt_language.clone(),
        }
    }
}

/// `verbose_json` response, reduced to the fields the worker consumes.
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    duration: f64,
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

#[async_trait]
impl SpeechToText for HostedSpeech {
    async fn transcribe(
        &self,
        audio: &Path,
        progress: mpsc::Sender<(f64, f64)>,
    ) -> Result<Vec<TranscriptSegment>, PipelineError> {
        let bytes = tokio::fs::read(audio).await?;
        let file = multipart::Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(request_err)?;
        let form = multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "verbose_json");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.endpoint))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(request_err)?
            .error_for_status()
            .map_err(request_err)?;
        let body: VerboseTranscription = response.json().await.map_err(request_err)?;

        let mut segments = Vec::with_capacity(body.segments.len());
        for seg in body.segments {
            // Advisory; a dropped receiver must not fail the transcription.
            let _ = progress.send((seg.end, body.duration)).await;
            segments.push(TranscriptSegment {
                start: seg.start,
                end: seg.end,
                text: seg.text,
            });
        }
        Ok(segments)
    }
}

fn request_err(e: reqwest::Error) -> PipelineError {
    PipelineError::Inference(format!("transcription request failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_json_payload_parses() {
        let raw = r#"{
            "task": "transcribe",
            "language": "russian",
            "duration": 12.5,
            "text": "полный текст",
            "segments": [
                {"id": 0, "start": 0.0, "end": 4.2, "text": " первая фраза"},
                {"id": 1, "start": 4.2, "end": 12.5, "text": " вторая фраза"}
            ]
        }"#;
        let body: VerboseTranscription = serde_json::from_str(raw).expect("parse");
        assert_eq!(body.duration, 12.5);
        assert_eq!(body.segments.len(), 2);
        assert_eq!(body.segments[1].start, 4.2);
    }
}

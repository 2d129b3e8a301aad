//! Transcript segments as exchanged with the speech-to-text model and stored
//! as the `transcript.json` artifact.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One recognized utterance. Times are seconds from the start of the media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Serialize segments the way the `transcript.json` artifact stores them.
pub fn to_json(segments: &[TranscriptSegment]) -> Result<String, PipelineError> {
    Ok(serde_json::to_string_pretty(segments)?)
}

pub fn from_json(raw: &str) -> Result<Vec<TranscriptSegment>, PipelineError> {
    Ok(serde_json::from_str(raw)?)
}

//! Production adapters behind the pipeline's model traits.
//!
//! Each worker process loads only what its configured job kind needs; a slot
//! left empty surfaces as a model-not-loaded failure when a job first asks
//! for it.

pub mod chat;
pub mod speech;
pub mod vision;

use std::sync::Arc;

use lectern_pipeline::ModelRegistry;
use tracing::info;

use crate::config::Config;
use crate::jobs::JobKind;

/// Build the registry for `kind` from configuration.
pub fn build_registry(cfg: &Config, kind: JobKind) -> anyhow::Result<ModelRegistry> {
    let mut registry = ModelRegistry::new();
    match kind {
        JobKind::Transcribe => {
            registry = registry.with_speech(Arc::new(speech::HostedSpeech::from_config(cfg)));
            info!(model = %cfg.stt_model, "speech-to-text ready");
        }
        JobKind::Summarize => {
            registry = registry.with_chat(Arc::new(chat::GenaiChat::new(cfg.chat_model.clone())));
            info!(model = %cfg.chat_model, "chat completion ready");
        }
        JobKind::Slides => {
            if let Some(path) = &cfg.embedder_model {
                registry = registry.with_embedder(Arc::new(vision::OnnxEmbedder::load(path)?));
                info!(model = %path, "image embedder ready");
            }
            if let Some(path) = &cfg.localizer_model {
                registry = registry.with_localizer(Arc::new(vision::OnnxLocalizer::load(path)?));
                info!(model = %path, "object localizer ready");
            }
        }
    }
    Ok(registry)
}

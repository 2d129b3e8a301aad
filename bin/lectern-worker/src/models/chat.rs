//! Hosted chat completion through genai.

use async_trait::async_trait;
use genai::Client;
use genai::chat::{ChatMessage, ChatRequest};
use lectern_pipeline::PipelineError;
use lectern_pipeline::models::ChatCompletion;

/// genai-backed chat client. The provider is resolved from the model name;
/// credentials come from genai's standard environment variables.
pub struct GenaiChat {
    client: Client,
    model: String,
}

impl GenaiChat {
    pub fn new(model: String) -> Self {
        Self {
            client: Client::default(),
            model,
        }
    }
}

#[async_trait]
impl ChatCompletion for GenaiChat {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        content_prompt: &str,
    ) -> Result<String, PipelineError> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
            ChatMessage::user(content_prompt),
        ]);
        let response = self
            .client
            .exec_chat(&self.model, request, None)
            .await
            .map_err(|e| PipelineError::Inference(format!("chat completion failed: {e}")))?;
        response
            .first_text()
            .map(str::to_owned)
            .ok_or_else(|| PipelineError::Inference("chat completion returned no text".into()))
    }
}

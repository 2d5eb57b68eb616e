use futures_util::StreamExt;
use tracing::{debug, error};

use crate::config::DEFAULT_CHAT_MODEL;
use crate::error::Result;
use crate::gemini::{Content, GeminiClient, GenerateContentRequest, Part};
use crate::stream::accumulate;

pub const CHAT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful, intelligent, and versatile AI assistant.";

/// A remote conversation: model, system instruction and the turns exchanged
/// so far. The REST API is stateless, so the whole history goes out with
/// every message.
#[derive(Debug, Clone)]
pub struct ChatSession {
    model: String,
    system_instruction: String,
    history: Vec<Content>,
}

impl ChatSession {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            system_instruction: CHAT_SYSTEM_INSTRUCTION.to_string(),
            history: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Request for the next turn: prior history followed by `message`.
    pub fn build_request(&self, message: &str) -> GenerateContentRequest {
        let mut contents = self.history.clone();
        contents.push(Content::user(vec![Part::text(message)]));

        GenerateContentRequest {
            contents,
            system_instruction: Some(Content::system(self.system_instruction.as_str())),
            generation_config: None,
        }
    }

    /// Stream the model's reply to `message`. `on_update` sees the full reply
    /// so far after each fragment. Both turns are recorded only on success.
    pub async fn send_message_stream<F>(
        &mut self,
        client: &GeminiClient,
        message: &str,
        on_update: F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        let request = self.build_request(message);

        let reply = async {
            let responses = client.stream_generate_content(&self.model, &request).await?;
            let fragments = responses.map(|r| r.map(|response| response.text().unwrap_or_default()));
            accumulate(fragments, on_update).await
        }
        .await;

        match reply {
            Ok(reply) => {
                self.record_turn(message, &reply);
                debug!(turns = self.history.len(), "chat turn complete");
                Ok(reply)
            }
            Err(e) => {
                error!("Chat error: {}", e);
                Err(e)
            }
        }
    }

    fn record_turn(&mut self, message: &str, reply: &str) {
        self.history.push(Content::user(vec![Part::text(message)]));
        self.history.push(Content::model(vec![Part::text(reply)]));
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new(DEFAULT_CHAT_MODEL)
    }
}

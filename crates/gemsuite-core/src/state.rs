//! UI-agnostic application state types
//!
//! Per-feature session state shared by any front-end. Each session gates its
//! own remote call (`is_loading`) and stamps every call with a generation so
//! results arriving after a reset or a new image can be recognised as stale
//! and dropped.

use serde::{Deserialize, Serialize};

use crate::codec::ImageFile;
use crate::preview::{PreviewHandle, PreviewStore};

pub const CHAT_GREETING: &str =
    "Hello! I'm your AI assistant powered by Gemini. How can I help you today?";
pub const CHAT_ERROR_MESSAGE: &str = "I'm sorry, I encountered an error processing your request.";
pub const ANALYSIS_ERROR_MESSAGE: &str = "Failed to analyze image. Please try again.";
pub const STORY_ERROR_MESSAGE: &str = "Failed to generate story. Please try a different image.";
pub const NARRATION_ERROR_MESSAGE: &str = "Failed to narrate story.";

/// A chat message in the conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn user(text: &str) -> Self {
        Self { role: ChatRole::User, text: text.to_string(), is_error: false }
    }

    pub fn model(text: &str) -> Self {
        Self { role: ChatRole::Model, text: text.to_string(), is_error: false }
    }

    pub fn error(text: &str) -> Self {
        Self { role: ChatRole::Model, text: text.to_string(), is_error: true }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    User,
    Model,
}

/// Chat transcript plus the in-flight gate.
#[derive(Debug, Clone)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    is_loading: bool,
    generation: u64,
}

impl ChatLog {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::model(CHAT_GREETING)],
            is_loading: false,
            generation: 0,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Append the user turn and an empty model placeholder. Returns the
    /// generation of the new call, or `None` when input is blank or a send is
    /// already in flight.
    pub fn begin_send(&mut self, input: &str) -> Option<u64> {
        if input.trim().is_empty() || self.is_loading {
            return None;
        }
        self.messages.push(ChatMessage::user(input));
        self.messages.push(ChatMessage::model(""));
        self.is_loading = true;
        self.generation += 1;
        Some(self.generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_loading && generation == self.generation
    }

    /// Replace the placeholder's text with everything streamed so far.
    pub fn apply_update(&mut self, generation: u64, text: &str) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        match self.messages.last_mut() {
            Some(last) if last.role == ChatRole::Model => {
                last.text = text.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.is_loading = false;
        true
    }

    /// Drop the placeholder (and any partial text) and append the fixed
    /// error turn.
    pub fn fail(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        if self.messages.last().map(|m| m.role) == Some(ChatRole::Model) {
            self.messages.pop();
        }
        self.messages.push(ChatMessage::error(CHAT_ERROR_MESSAGE));
        self.is_loading = false;
        true
    }

    /// Back to the greeting; anything still in flight becomes stale.
    pub fn reset(&mut self) {
        self.messages = vec![ChatMessage::model(CHAT_GREETING)];
        self.is_loading = false;
        self.generation += 1;
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}

/// A picked image and its preview handle.
#[derive(Debug, Clone, Default)]
pub struct ImageSlot {
    image: Option<ImageFile>,
    preview: Option<PreviewHandle>,
}

impl ImageSlot {
    pub fn image(&self) -> Option<&ImageFile> {
        self.image.as_ref()
    }

    pub fn preview(&self) -> Option<PreviewHandle> {
        self.preview
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_none()
    }

    /// Replace the image, releasing the previous preview first.
    fn replace(&mut self, previews: &mut PreviewStore, image: ImageFile, preview: Option<PreviewHandle>) {
        self.release(previews);
        self.image = Some(image);
        self.preview = preview;
    }

    fn release(&mut self, previews: &mut PreviewStore) {
        if let Some(handle) = self.preview.take() {
            previews.revoke(handle);
        }
        self.image = None;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisSession {
    pub slot: ImageSlot,
    pub prompt: String,
    pub result: String,
    pub is_loading: bool,
    pub error: Option<String>,
    generation: u64,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image(&mut self, previews: &mut PreviewStore, image: ImageFile, preview: Option<PreviewHandle>) {
        self.slot.replace(previews, image, preview);
        self.result.clear();
        self.error = None;
        self.is_loading = false;
        self.generation += 1;
    }

    /// Release the preview and return to the initial state. Idempotent.
    pub fn clear(&mut self, previews: &mut PreviewStore) {
        self.slot.release(previews);
        self.prompt.clear();
        self.result.clear();
        self.is_loading = false;
        self.error = None;
        self.generation += 1;
    }

    /// Start an analysis: returns the image and prompt to send along with the
    /// call's generation, or `None` without an image or while loading.
    pub fn begin(&mut self) -> Option<(u64, ImageFile, String)> {
        if self.is_loading {
            return None;
        }
        let image = self.slot.image()?.clone();
        self.is_loading = true;
        self.error = None;
        self.result.clear();
        Some((self.generation, image, self.prompt.clone()))
    }

    pub fn succeed(&mut self, generation: u64, result: String) -> bool {
        if generation != self.generation || !self.is_loading {
            return false;
        }
        self.result = result;
        self.is_loading = false;
        true
    }

    pub fn fail(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.is_loading {
            return false;
        }
        self.error = Some(ANALYSIS_ERROR_MESSAGE.to_string());
        self.is_loading = false;
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorySession {
    pub slot: ImageSlot,
    pub story: String,
    pub is_loading: bool,
    pub is_playing_audio: bool,
    pub error: Option<String>,
    generation: u64,
}

impl StorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image(&mut self, previews: &mut PreviewStore, image: ImageFile, preview: Option<PreviewHandle>) {
        self.slot.replace(previews, image, preview);
        self.story.clear();
        self.error = None;
        self.is_loading = false;
        self.is_playing_audio = false;
        self.generation += 1;
    }

    /// Release the preview and return to the initial state. Idempotent.
    pub fn clear(&mut self, previews: &mut PreviewStore) {
        self.slot.release(previews);
        self.story.clear();
        self.is_loading = false;
        self.is_playing_audio = false;
        self.error = None;
        self.generation += 1;
    }

    /// Start generating; `None` without an image, while a story is being
    /// written, or while the current one is being read aloud.
    pub fn begin(&mut self) -> Option<(u64, ImageFile)> {
        if self.is_loading || self.is_playing_audio {
            return None;
        }
        let image = self.slot.image()?.clone();
        self.is_loading = true;
        self.error = None;
        self.story.clear();
        Some((self.generation, image))
    }

    pub fn succeed(&mut self, generation: u64, story: String) -> bool {
        if generation != self.generation || !self.is_loading {
            return false;
        }
        self.story = story;
        self.is_loading = false;
        true
    }

    pub fn fail(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.is_loading {
            return false;
        }
        self.error = Some(STORY_ERROR_MESSAGE.to_string());
        self.is_loading = false;
        true
    }

    /// Start reading the story aloud; `None` without a story or while
    /// already narrating.
    pub fn begin_narration(&mut self) -> Option<(u64, String)> {
        if self.story.is_empty() || self.is_playing_audio {
            return None;
        }
        self.is_playing_audio = true;
        Some((self.generation, self.story.clone()))
    }

    /// Narration failures are shown, not just logged.
    pub fn finish_narration(&mut self, generation: u64, succeeded: bool) -> bool {
        if generation != self.generation || !self.is_playing_audio {
            return false;
        }
        self.is_playing_audio = false;
        if !succeeded {
            self.error = Some(NARRATION_ERROR_MESSAGE.to_string());
        }
        true
    }
}

//! Single-call feature façades: image analysis, storytelling, speech
//!
//! Each façade shapes one request, makes one remote call, and turns the
//! response into a string or played audio. There is no retry.

use std::sync::Arc;

use tracing::{debug, error};

use crate::audio::{play_to_end, AudioBuffer, AudioSink, TTS_CHANNELS, TTS_SAMPLE_RATE};
use crate::chat::ChatSession;
use crate::codec::{decode_audio, encode_image, ImageFile};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gemini::{
    GeminiClient, GenerateContentRequest, GenerationConfig, InlineData, Modality, Part,
    SpeechConfig,
};

pub const DEFAULT_ANALYSIS_PROMPT: &str = "Analyze this image in detail.";
pub const ANALYSIS_FALLBACK: &str = "No analysis generated.";

pub const STORY_PROMPT: &str = "Analyze the mood, lighting, and scenery of this image. \
Then, ghostwrite a creative, atmospheric opening paragraph (approx 150-200 words) \
for a story set in this world. Focus on sensory details.";
pub const STORY_FALLBACK: &str = "Could not generate story.";

/// Image part first, then the instruction.
pub fn analysis_request(image: InlineData, prompt: &str) -> GenerateContentRequest {
    let instruction = if prompt.trim().is_empty() {
        DEFAULT_ANALYSIS_PROMPT
    } else {
        prompt
    };
    GenerateContentRequest::single_turn(vec![Part::inline(image), Part::text(instruction)])
}

pub fn story_request(image: InlineData) -> GenerateContentRequest {
    GenerateContentRequest::single_turn(vec![Part::inline(image), Part::text(STORY_PROMPT)])
}

/// Markdown emphasis and heading markers read badly aloud.
pub fn scrub_markdown(text: &str) -> String {
    text.chars().filter(|c| *c != '*' && *c != '#').collect()
}

pub fn speech_request(text: &str, voice: &str) -> GenerateContentRequest {
    let mut request = GenerateContentRequest::single_turn(vec![Part::text(scrub_markdown(text))]);
    request.generation_config = Some(GenerationConfig {
        response_modalities: Some(vec![Modality::Audio]),
        speech_config: Some(SpeechConfig::prebuilt(voice)),
    });
    request
}

/// The client plus the model and voice choices for each feature. Built once
/// the API key is known and shared (cloned) by whoever makes calls.
#[derive(Clone)]
pub struct Suite {
    client: GeminiClient,
    chat_model: String,
    vision_model: String,
    tts_model: String,
    voice: String,
}

impl Suite {
    pub fn new(client: GeminiClient, config: &Config) -> Self {
        Self {
            client,
            chat_model: config.chat_model().to_string(),
            vision_model: config.vision_model().to_string(),
            tts_model: config.tts_model().to_string(),
            voice: config.voice().to_string(),
        }
    }

    /// Fails with `MissingApiKey` when no key can be resolved.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(GeminiClient::from_config(config)?, config))
    }

    pub fn client(&self) -> &GeminiClient {
        &self.client
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn vision_model(&self) -> &str {
        &self.vision_model
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn new_chat_session(&self) -> ChatSession {
        ChatSession::new(&self.chat_model)
    }

    pub async fn analyze_image(&self, file: &ImageFile, prompt: &str) -> Result<String> {
        let image = encode_image(file).await?;
        let request = analysis_request(image, prompt);

        let response = self
            .client
            .generate_content(&self.vision_model, &request)
            .await
            .map_err(|e| {
                error!("Image analysis error: {}", e);
                e
            })?;
        Ok(response.text().unwrap_or_else(|| ANALYSIS_FALLBACK.to_string()))
    }

    pub async fn generate_story(&self, file: &ImageFile) -> Result<String> {
        let image = encode_image(file).await?;
        let request = story_request(image);

        let response = self
            .client
            .generate_content(&self.vision_model, &request)
            .await
            .map_err(|e| {
                error!("Story generation error: {}", e);
                e
            })?;
        Ok(response.text().unwrap_or_else(|| STORY_FALLBACK.to_string()))
    }

    /// Request speech for `text` and decode it, without playing.
    pub async fn synthesize_speech(&self, text: &str) -> Result<AudioBuffer> {
        let request = speech_request(text, &self.voice);
        let response = self.client.generate_content(&self.tts_model, &request).await?;

        let audio = response.first_inline_data().ok_or(Error::NoAudio)?;
        debug!(mime_type = %audio.mime_type, bytes = audio.data.len(), "speech received");
        decode_audio(&audio.data, TTS_SAMPLE_RATE, TTS_CHANNELS)
    }

    /// Synthesize and play `text`; resolves after playback has finished.
    pub async fn speak_text(&self, sink: Arc<dyn AudioSink>, text: &str) -> Result<()> {
        let result = async {
            let buffer = self.synthesize_speech(text).await?;
            play_to_end(sink, buffer).await
        }
        .await;

        if let Err(e) = &result {
            error!("TTS Error: {}", e);
        }
        result
    }
}

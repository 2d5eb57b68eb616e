use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the Gemini client, the codecs and audio playback.
#[derive(Debug, Error)]
pub enum Error {
    /// No API key in the environment or the config file.
    #[error("API key is missing. Set GEMINI_API_KEY (or API_KEY) or add one with 'K'")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to read image {path:?}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a supported image file: {0:?}")]
    UnsupportedImage(PathBuf),

    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("no audio data returned")]
    NoAudio,

    #[error("audio playback failed: {0}")]
    Playback(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// True for errors that mean the request never left the machine because
    /// configuration is incomplete.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::MissingApiKey)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

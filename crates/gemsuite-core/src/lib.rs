pub mod audio;
pub mod chat;
pub mod codec;
pub mod config;
pub mod error;
pub mod feature;
pub mod features;
pub mod gemini;
pub mod preview;
pub mod state;
pub mod stream;

// Re-export main types for convenience
pub use audio::{AudioBuffer, AudioSink, CpalSink};
pub use chat::ChatSession;
pub use codec::ImageFile;
pub use config::Config;
pub use error::{Error, Result};
pub use feature::Feature;
pub use features::Suite;
pub use gemini::GeminiClient;
pub use preview::{PreviewHandle, PreviewStore, Thumbnail};
pub use state::{AnalysisSession, ChatLog, ChatMessage, ChatRole, StorySession};

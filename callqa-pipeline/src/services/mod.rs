//! External service clients and the ingestion sync

pub mod llm;
pub mod platform;
pub mod stt;
pub mod sync;

pub use llm::{AnswerModel, GeminiClient, LlmError};
pub use platform::{PlatformClient, PlatformConfig, PlatformError};
pub use stt::{DeepgramStt, ElevenLabsStt, SpeechToText, SttError};
pub use sync::CallSyncService;

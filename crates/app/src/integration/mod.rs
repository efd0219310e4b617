pub mod asr;
pub mod tts;

pub use asr::{AsrLink, AsrLinkStats, RecognitionResult};
pub use tts::{ProsodyHints, TtsLink, TtsLinkStats, TtsMetadata};

pub mod capture;
pub mod frame;
pub mod playback;
pub mod ring;

pub use capture::{AudioCapture, CaptureSnapshot, SyntheticCapture};
pub use frame::{AudioConfig, PcmFrame};
pub use playback::{AudioPlayback, NullPlayback, PlaybackSnapshot};
pub use ring::{FrameRing, RingStats};

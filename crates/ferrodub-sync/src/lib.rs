pub mod adaptive;
pub mod backpressure;
pub mod latency;
pub mod synchronizer;

pub use adaptive::{Action, AdaptivePolicy, PolicyStats};
pub use backpressure::{BackpressureController, BackpressureStats};
pub use latency::{LatencyManager, LatencyStats};
pub use synchronizer::{StreamSynchronizer, SyncStats};

//! Live packet capture, feature-gated behind `capture` (requires `libpcap`).

pub mod supervisor;

pub use supervisor::{eviction_tick, CaptureError, CaptureSupervisor};

//! Bidirectional flow tracking: pairing directional half-streams and synthesizing events.

pub mod bidi_flow;
pub mod correlator;
pub mod flow_key;

pub use bidi_flow::{BidiFlow, Slot, Synthesized};
pub use correlator::{Correlator, DEFAULT_IDLE_TIMEOUT};
pub use flow_key::FlowKey;

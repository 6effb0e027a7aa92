//! TCP segment ordering and TLS half-stream reassembly.

pub mod half_stream;
pub mod segment;

pub use half_stream::{HalfStream, Role};
pub use segment::{Segment, TcpFlowState, DEFAULT_OOO_CAPACITY};

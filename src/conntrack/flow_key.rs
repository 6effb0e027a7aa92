//! Directional flow identity.

use std::net::SocketAddr;

/// Identifies one direction of a TCP flow by its endpoints.
///
/// `(src, dst)` and `(dst, src)` are the two directions of the same connection; [`reverse`]
/// converts between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

impl FlowKey {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        FlowKey { src, dst }
    }

    pub fn reverse(&self) -> FlowKey {
        FlowKey {
            src: self.dst,
            dst: self.src,
        }
    }
}

//! TLS handshake parsing and JA3/JA3S fingerprinting.

pub mod fingerprint;
pub mod handshake;
pub mod parser;

pub use fingerprint::{ja3_hash, ja3_str, ja3s_hash, ja3s_str, Fingerprint};
pub use handshake::{ClientHello, Hello, ServerHello};
pub use parser::{parse_hello, TlsParseError};

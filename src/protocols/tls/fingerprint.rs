//! JA3/JA3S fingerprint computation.
//!
//! Adapted from Retina's `protocols::stream::tls::Tls::ja3_str`/`ja3s_str`, generalized to work
//! directly off the parsed [`ClientHello`]/[`ServerHello`] rather than a `tls-parser`-backed
//! session, and extended with explicit `Fingerprint` newtypes so "not computed" has one
//! representation throughout the pipeline.

use itertools::Itertools;

use super::handshake::{ClientHello, ServerHello};

/// GREASE values. See [RFC 8701](https://datatracker.ietf.org/doc/html/rfc8701).
const GREASE_TABLE: &[u16] = &[
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa, 0xbaba,
    0xcaca, 0xdada, 0xeaea, 0xfafa,
];

#[inline]
fn is_grease(v: u16) -> bool {
    GREASE_TABLE.contains(&v)
}

/// A 32-character lowercase hex MD5 digest, or the empty string if not computed.
pub type Fingerprint = String;

/// Builds the canonical JA3 string: `version,ciphers,extensions,curves,point_formats`.
///
/// Per the original JA3 definition (and this system's source), GREASE values are filtered from
/// extensions, curves, and point formats, but **not** from the cipher list.
pub fn ja3_str(ch: &ClientHello) -> String {
    format!(
        "{},{},{},{},{}",
        ch.version,
        ch.cipher_suites.iter().join("-"),
        ch.extension_list
            .iter()
            .filter(|&&x| !is_grease(x))
            .join("-"),
        ch.supported_groups
            .iter()
            .filter(|&&x| !is_grease(x))
            .join("-"),
        ch.ec_point_formats.iter().join("-"),
    )
}

/// Builds the canonical JA3S string: `version,cipher,extensions`.
pub fn ja3s_str(sh: &ServerHello) -> String {
    format!(
        "{},{},{}",
        sh.version,
        sh.cipher_suite,
        sh.extension_list
            .iter()
            .filter(|&&x| !is_grease(x))
            .join("-"),
    )
}

/// Returns the JA3 fingerprint for a parsed ClientHello.
pub fn ja3_hash(ch: &ClientHello) -> Fingerprint {
    format!("{:x}", md5::compute(ja3_str(ch)))
}

/// Returns the JA3S fingerprint for a parsed ServerHello.
pub fn ja3s_hash(sh: &ServerHello) -> Fingerprint {
    format!("{:x}", md5::compute(ja3s_str(sh)))
}

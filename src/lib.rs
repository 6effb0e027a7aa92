//! Passive JA3/JA3S TLS fingerprint collector.
//!
//! Captured TCP packets are ordered per direction ([`reassembly::segment`]), reassembled into
//! TLS Hello messages ([`reassembly::half_stream`]), parsed and fingerprinted
//! ([`protocols::tls`]), then paired across directions into synthesized events
//! ([`conntrack`], [`events`]). Live capture ([`capture`]) is feature-gated behind `capture`
//! since it links against `libpcap`.

pub mod conntrack;
pub mod events;
pub mod protocols;
pub mod reassembly;

#[cfg(feature = "capture")]
pub mod capture;

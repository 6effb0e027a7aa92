//! Per-direction TLS record/handshake reassembly and Hello parsing.
//!
//! Grounded on the same peeling discipline the teacher applies to its own stream protocols
//! (`protocols::stream::tls`): buffer record layer bytes, strip 5-byte record headers into a
//! handshake-layer buffer, then strip the 4-byte handshake header once a full message is
//! present. Terminates exactly once, successfully or not, per spec.md §4.3.

use crate::protocols::tls::{
    ja3_hash, ja3s_hash, parse_hello, ClientHello, Fingerprint, Hello, ServerHello,
};
use crate::reassembly::segment::Segment;

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;
const MIN_RECORD_VERSION: u16 = 0x0301;
const MAX_RECORD_VERSION: u16 = 0x0304;
const MAX_HELLO_LEN: usize = 1 << 17;

const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;

/// What a terminated half-stream extracted, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Client { ja3: Fingerprint, sni: String },
    Server { ja3s: Fingerprint },
}

/// Reassembles one direction of a TCP connection into a single TLS Hello message.
///
/// Holds its working buffers only until termination; `done` is a one-way latch.
#[derive(Debug, Default)]
pub struct HalfStream {
    record_buf: Vec<u8>,
    hello_buf: Vec<u8>,
    done: bool,
    succeeded: bool,
    reason: String,
    role: Option<Role>,
}

impl HalfStream {
    pub fn new() -> Self {
        HalfStream::default()
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    pub fn ja3(&self) -> Option<&str> {
        match &self.role {
            Some(Role::Client { ja3, .. }) => Some(ja3),
            _ => None,
        }
    }

    pub fn sni(&self) -> Option<&str> {
        match &self.role {
            Some(Role::Client { sni, .. }) => Some(sni),
            _ => None,
        }
    }

    pub fn ja3s(&self) -> Option<&str> {
        match &self.role {
            Some(Role::Server { ja3s }) => Some(ja3s),
            _ => None,
        }
    }

    /// Feeds newly ordered bytes for this direction. Returns `true` if this call caused the
    /// half-stream to terminate (the caller should now ask the correlator to attempt synthesis).
    pub fn reassembled(&mut self, segments: &[Segment]) -> bool {
        if self.done {
            return false;
        }
        if segments.iter().any(|s| s.skip) {
            return self.terminate(false, "missing packets");
        }
        for s in segments {
            self.record_buf.extend_from_slice(&s.bytes);
        }
        self.peel()
    }

    /// Signals that the underlying TCP stream closed with no further bytes coming. A half-stream
    /// that has already succeeded or failed ignores this; one still waiting on more handshake
    /// bytes terminates as failed.
    pub fn reassembly_complete(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.terminate(false, "stream closed before handshake complete")
    }

    fn peel(&mut self) -> bool {
        while self.record_buf.len() >= RECORD_HEADER_LEN {
            let version = u16::from_be_bytes([self.record_buf[1], self.record_buf[2]]);
            if !(MIN_RECORD_VERSION..=MAX_RECORD_VERSION).contains(&version) {
                return self.terminate(false, format!("unsupported record version {version:#06x}"));
            }
            let record_len = u16::from_be_bytes([self.record_buf[3], self.record_buf[4]]) as usize;
            if self.record_buf.len() < RECORD_HEADER_LEN + record_len {
                break;
            }
            self.hello_buf.extend_from_slice(
                &self.record_buf[RECORD_HEADER_LEN..RECORD_HEADER_LEN + record_len],
            );
            self.record_buf.drain(0..RECORD_HEADER_LEN + record_len);
        }

        if self.hello_buf.len() < HANDSHAKE_HEADER_LEN {
            return false;
        }
        let handshake_type = self.hello_buf[0];
        if handshake_type != HANDSHAKE_CLIENT_HELLO && handshake_type != HANDSHAKE_SERVER_HELLO {
            return self.terminate(
                false,
                format!("unexpected handshake type {handshake_type:#04x}"),
            );
        }
        let n = ((self.hello_buf[1] as usize) << 16)
            | ((self.hello_buf[2] as usize) << 8)
            | (self.hello_buf[3] as usize);
        if n > MAX_HELLO_LEN {
            return self.terminate(false, "hello too large");
        }
        if self.hello_buf.len() < HANDSHAKE_HEADER_LEN + n {
            return false;
        }

        match parse_hello(&self.hello_buf[0..HANDSHAKE_HEADER_LEN + n]) {
            Ok(Hello::Client(ch)) => self.accept_client(ch),
            Ok(Hello::Server(sh)) => self.accept_server(sh),
            Err(e) => self.terminate(false, e.to_string()),
        }
    }

    fn accept_client(&mut self, ch: ClientHello) -> bool {
        let ja3 = ja3_hash(&ch);
        let sni = ch.server_name.clone().unwrap_or_default();
        self.role = Some(Role::Client { ja3, sni });
        self.terminate(true, "success")
    }

    fn accept_server(&mut self, sh: ServerHello) -> bool {
        let ja3s = ja3s_hash(&sh);
        self.role = Some(Role::Server { ja3s });
        self.terminate(true, "success")
    }

    fn terminate(&mut self, succeeded: bool, reason: impl Into<String>) -> bool {
        self.done = true;
        self.succeeded = succeeded;
        self.reason = reason.into();
        self.record_buf.clear();
        self.hello_buf.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u16, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0x16, (version >> 8) as u8, version as u8];
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn client_hello_body(cipher: u16, sni: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0x0303u16.to_be_bytes()); // version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session id len
        body.extend_from_slice(&2u16.to_be_bytes()); // cipher suites len
        body.extend_from_slice(&cipher.to_be_bytes());
        body.push(1); // compression methods len
        body.push(0); // null compression

        let mut sni_ext = Vec::new();
        let mut sni_entry = vec![0u8]; // host_name type
        sni_entry.extend_from_slice(&(sni.len() as u16).to_be_bytes());
        sni_entry.extend_from_slice(sni.as_bytes());
        sni_ext.extend_from_slice(&(sni_entry.len() as u16).to_be_bytes());
        sni_ext.extend_from_slice(&sni_entry);

        let mut ext_type_and_body = Vec::new();
        ext_type_and_body.extend_from_slice(&0u16.to_be_bytes()); // server_name ext type
        ext_type_and_body.extend_from_slice(&(sni_ext.len() as u16).to_be_bytes());
        ext_type_and_body.extend_from_slice(&sni_ext);

        body.extend_from_slice(&(ext_type_and_body.len() as u16).to_be_bytes());
        body.extend_from_slice(&ext_type_and_body);
        body
    }

    /// Splits `body` across as many TLS records as needed (a record's length field is only
    /// 16 bits wide, so a handshake message near the 2^17 cap must span several).
    fn records(version: u16, body: &[u8]) -> Vec<u8> {
        const MAX_RECORD_BODY: usize = 16384;
        let mut out = Vec::new();
        for chunk in body.chunks(MAX_RECORD_BODY) {
            out.extend_from_slice(&record(version, chunk));
        }
        out
    }

    fn handshake(handshake_type: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![handshake_type];
        let len = body.len() as u32;
        out.push((len >> 16) as u8);
        out.push((len >> 8) as u8);
        out.push(len as u8);
        out.extend_from_slice(body);
        out
    }

    fn data_segments(bytes: Vec<u8>) -> Vec<Segment> {
        vec![Segment { bytes, skip: false }]
    }

    #[test]
    fn client_hello_across_two_records_succeeds() {
        let ch_body = client_hello_body(0x1301, "example.com");
        let hs = handshake(HANDSHAKE_CLIENT_HELLO, &ch_body);
        let whole = record(0x0301, &hs);
        let (first, second) = whole.split_at(whole.len() / 2);

        let mut h = HalfStream::new();
        assert!(!h.reassembled(&data_segments(first.to_vec())));
        assert!(h.reassembled(&data_segments(second.to_vec())));
        assert!(h.done());
        assert!(h.succeeded());
        assert_eq!(h.sni(), Some("example.com"));
        assert!(h.ja3().is_some());
    }

    #[test]
    fn record_version_outside_range_fails() {
        let ch_body = client_hello_body(0x1301, "x");
        let hs = handshake(HANDSHAKE_CLIENT_HELLO, &ch_body);
        let whole = record(0x0300, &hs);
        let mut h = HalfStream::new();
        assert!(h.reassembled(&data_segments(whole)));
        assert!(!h.succeeded());
        assert_eq!(h.reason(), "unsupported record version 0x0300");
    }

    #[test]
    fn record_version_0x0304_is_accepted() {
        let ch_body = client_hello_body(0x1301, "x");
        let hs = handshake(HANDSHAKE_CLIENT_HELLO, &ch_body);
        let whole = record(0x0304, &hs);
        let mut h = HalfStream::new();
        assert!(h.reassembled(&data_segments(whole)));
        assert!(h.succeeded());
    }

    #[test]
    fn missing_packets_fails_immediately() {
        let mut h = HalfStream::new();
        let segs = vec![Segment {
            bytes: vec![],
            skip: true,
        }];
        assert!(h.reassembled(&segs));
        assert!(!h.succeeded());
        assert_eq!(h.reason(), "missing packets");
    }

    #[test]
    fn hello_length_at_cap_is_accepted() {
        // n == 2^17 is exactly the cap, not over it: only `n > 2^17` is "too large".
        let mut hs = vec![HANDSHAKE_CLIENT_HELLO, 0x02, 0x00, 0x00]; // n = 2^17
        hs.resize(4 + MAX_HELLO_LEN, 0);
        let whole = records(0x0303, &hs);
        let mut h = HalfStream::new();
        assert!(h.reassembled(&data_segments(whole)));
        assert_ne!(h.reason(), "hello too large");
    }

    #[test]
    fn hello_length_over_cap_fails_too_large() {
        let mut hs = vec![HANDSHAKE_CLIENT_HELLO, 0x02, 0x00, 0x01]; // n = 2^17 + 1
        hs.resize(4 + MAX_HELLO_LEN + 1, 0);
        let whole = records(0x0303, &hs);
        let mut h = HalfStream::new();
        assert!(h.reassembled(&data_segments(whole)));
        assert!(!h.succeeded());
        assert_eq!(h.reason(), "hello too large");
    }

    #[test]
    fn stream_closed_before_handshake_complete_fails() {
        let mut h = HalfStream::new();
        assert!(!h.reassembled(&data_segments(vec![0x16, 0x03, 0x01])));
        assert!(h.reassembly_complete());
        assert!(!h.succeeded());
        assert_eq!(h.reason(), "stream closed before handshake complete");
    }

    #[test]
    fn terminate_is_single_fire() {
        let mut h = HalfStream::new();
        let segs = vec![Segment {
            bytes: vec![],
            skip: true,
        }];
        assert!(h.reassembled(&segs));
        assert!(!h.reassembled(&segs));
        assert!(!h.reassembly_complete());
    }

    #[test]
    fn server_hello_succeeds_with_ja3s() {
        let mut body = Vec::new();
        body.extend_from_slice(&0x0303u16.to_be_bytes());
        body.extend_from_slice(&[0u8; 32]);
        body.push(0); // session id len
        body.extend_from_slice(&0x1301u16.to_be_bytes()); // cipher suite
        body.push(0); // compression method
        body.extend_from_slice(&0u16.to_be_bytes()); // no extensions

        let hs = handshake(HANDSHAKE_SERVER_HELLO, &body);
        let whole = record(0x0303, &hs);
        let mut h = HalfStream::new();
        assert!(h.reassembled(&data_segments(whole)));
        assert!(h.succeeded());
        assert!(h.ja3s().is_some());
    }
}

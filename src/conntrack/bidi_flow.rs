//! Pairing of two directional half-streams into one synthesized fingerprint event.

use std::time::Instant;

use crate::conntrack::flow_key::FlowKey;
use crate::reassembly::{HalfStream, Role};

/// Which half of a [`BidiFlow`] a direction occupies. `A` is whichever direction was observed
/// first; `B` is its reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

/// The fields of one fully- or partially-synthesized fingerprint record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Synthesized {
    pub ja3: Option<String>,
    pub ja3s: Option<String>,
    pub sni: Option<String>,
}

/// Two directions of the same TCP connection, each independently reassembling a Hello.
#[derive(Debug)]
pub struct BidiFlow {
    key: FlowKey,
    a: HalfStream,
    b: Option<HalfStream>,
    finished: bool,
    last_seen: Instant,
}

impl BidiFlow {
    pub fn new(key: FlowKey) -> Self {
        BidiFlow {
            key,
            a: HalfStream::new(),
            b: None,
            finished: false,
            last_seen: Instant::now(),
        }
    }

    pub fn key(&self) -> FlowKey {
        self.key
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_seen.elapsed()
    }

    pub fn attach_b(&mut self) {
        self.b = Some(HalfStream::new());
    }

    pub fn has_b(&self) -> bool {
        self.b.is_some()
    }

    pub fn half_mut(&mut self, slot: Slot) -> &mut HalfStream {
        match slot {
            Slot::A => &mut self.a,
            Slot::B => self.b.get_or_insert_with(HalfStream::new),
        }
    }

    /// Marks slot B as permanently absent (idle-evicted without a reverse direction ever
    /// appearing) so `maybe_finish` can reason about it as a terminal, unsuccessful half.
    pub fn evict_missing_b(&mut self) {
        if self.b.is_none() {
            let mut stub = HalfStream::new();
            stub.reassembly_complete();
            self.b = Some(stub);
        }
    }

    /// Attempts to synthesize a fingerprint record once both observed directions (or the single
    /// observed direction, after eviction) have terminated. Fires at most once per flow.
    ///
    /// Synthesis rules:
    /// - both succeeded, one client + one server -> full record (ja3, ja3s, sni)
    /// - only one side succeeded -> partial record carrying just that side's fields
    /// - neither succeeded -> no record
    /// - both succeeded but as the same role (two clients or two servers) -> protocol
    ///   violation, no record
    pub fn maybe_finish(&mut self) -> Option<Synthesized> {
        if self.finished {
            return None;
        }
        let Some(b) = &self.b else {
            // Reverse direction hasn't been observed yet; wait for it (or for idle eviction to
            // stub it via `evict_missing_b`) rather than finishing on `a` alone.
            return None;
        };
        if !self.a.done() || !b.done() {
            return None;
        }
        self.finished = true;

        let a_role = success_role(&self.a);
        let b_role = self.b.as_ref().and_then(success_role);

        synthesize(a_role, b_role)
    }
}

fn success_role(h: &HalfStream) -> Option<Role> {
    if h.done() && h.succeeded() {
        h.role().cloned()
    } else {
        None
    }
}

fn synthesize(a: Option<Role>, b: Option<Role>) -> Option<Synthesized> {
    match (a, b) {
        (Some(Role::Client { ja3, sni }), Some(Role::Server { ja3s }))
        | (Some(Role::Server { ja3s }), Some(Role::Client { ja3, sni })) => Some(Synthesized {
            ja3: Some(ja3),
            ja3s: Some(ja3s),
            sni: Some(sni),
        }),
        (Some(Role::Client { ja3, sni }), None) | (None, Some(Role::Client { ja3, sni })) => {
            Some(Synthesized {
                ja3: Some(ja3),
                ja3s: None,
                sni: Some(sni),
            })
        }
        (Some(Role::Server { ja3s }), None) | (None, Some(Role::Server { ja3s })) => {
            Some(Synthesized {
                ja3: None,
                ja3s: Some(ja3s),
                sni: None,
            })
        }
        (Some(Role::Client { .. }), Some(Role::Client { .. }))
        | (Some(Role::Server { .. }), Some(Role::Server { .. })) => None,
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reassembly::Segment;

    fn key() -> FlowKey {
        FlowKey::new(
            "10.0.0.1:51000".parse().unwrap(),
            "10.0.0.2:443".parse().unwrap(),
        )
    }

    #[test]
    fn neither_succeeded_drops() {
        assert_eq!(synthesize(None, None), None);
    }

    #[test]
    fn client_and_server_pair_into_full_record() {
        let client = Role::Client {
            ja3: "abc".into(),
            sni: "example.com".into(),
        };
        let server = Role::Server { ja3s: "def".into() };
        assert_eq!(
            synthesize(Some(client), Some(server)),
            Some(Synthesized {
                ja3: Some("abc".into()),
                ja3s: Some("def".into()),
                sni: Some("example.com".into()),
            })
        );
    }

    #[test]
    fn lone_client_produces_partial_record() {
        let client = Role::Client {
            ja3: "abc".into(),
            sni: "example.com".into(),
        };
        assert_eq!(
            synthesize(Some(client), None),
            Some(Synthesized {
                ja3: Some("abc".into()),
                ja3s: None,
                sni: Some("example.com".into()),
            })
        );
    }

    #[test]
    fn two_clients_is_a_protocol_violation_and_drops() {
        let c1 = Role::Client {
            ja3: "a".into(),
            sni: "x".into(),
        };
        let c2 = Role::Client {
            ja3: "b".into(),
            sni: "y".into(),
        };
        assert_eq!(synthesize(Some(c1), Some(c2)), None);
    }

    #[test]
    fn maybe_finish_fires_once() {
        let mut bidi = BidiFlow::new(key());
        let seg = [Segment {
            bytes: vec![],
            skip: true,
        }];
        bidi.half_mut(Slot::A).reassembled(&seg);
        bidi.evict_missing_b();
        assert_eq!(bidi.maybe_finish(), None); // neither succeeded
        assert_eq!(bidi.maybe_finish(), None); // already finished, no second attempt
    }

    fn tls_record(version: u16, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0x16, (version >> 8) as u8, version as u8];
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn handshake_message(handshake_type: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![handshake_type];
        let len = body.len() as u32;
        out.push((len >> 16) as u8);
        out.push((len >> 8) as u8);
        out.push(len as u8);
        out.extend_from_slice(body);
        out
    }

    fn minimal_client_hello() -> Vec<u8> {
        let mut body = vec![];
        body.extend_from_slice(&0x0303u16.to_be_bytes());
        body.extend_from_slice(&[0u8; 32]);
        body.push(0); // session id len
        body.extend_from_slice(&2u16.to_be_bytes()); // cipher suites len
        body.extend_from_slice(&0x1301u16.to_be_bytes());
        body.push(1); // compression methods len
        body.push(0);
        tls_record(0x0303, &handshake_message(0x01, &body))
    }

    fn minimal_server_hello() -> Vec<u8> {
        let mut body = vec![];
        body.extend_from_slice(&0x0303u16.to_be_bytes());
        body.extend_from_slice(&[0u8; 32]);
        body.push(0); // session id len
        body.extend_from_slice(&0x1301u16.to_be_bytes()); // cipher suite
        body.push(0); // compression method
        tls_record(0x0303, &handshake_message(0x02, &body))
    }

    /// Regression test: a single-packet ClientHello that finishes before the reverse direction
    /// is even observed must not synthesize a partial record and latch `finished` — it has to
    /// wait for `b` to attach and terminate too, then produce the full paired record.
    #[test]
    fn maybe_finish_waits_for_reverse_direction_before_finishing() {
        let mut bidi = BidiFlow::new(key());
        let client_seg = [Segment {
            bytes: minimal_client_hello(),
            skip: false,
        }];
        assert!(bidi.half_mut(Slot::A).reassembled(&client_seg));

        // Reverse direction hasn't appeared yet: must not finish, must not latch `finished`.
        assert_eq!(bidi.maybe_finish(), None);
        assert!(!bidi.finished);

        bidi.attach_b();
        let server_seg = [Segment {
            bytes: minimal_server_hello(),
            skip: false,
        }];
        assert!(bidi.half_mut(Slot::B).reassembled(&server_seg));

        let synthesized = bidi
            .maybe_finish()
            .expect("both halves done, should synthesize");
        assert!(synthesized.ja3.is_some());
        assert!(synthesized.ja3s.is_some());
    }
}

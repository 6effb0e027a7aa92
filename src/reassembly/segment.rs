//! Per-direction TCP segment ordering.
//!
//! Adapted from `conntrack::conn::tcp_conn::reassembly::{TcpFlow, OutOfOrderBuffer}`: the
//! wraparound-aware sequence comparison, overlap trimming, and capacity-bounded out-of-order
//! buffering are the same idea, re-expressed over plain owned byte buffers instead of the
//! teacher's zero-copy `Mbuf`/`L4Pdu`, since this system has no DPDK mempool backing it.
//!
//! This is this implementation's fulfillment of the "TCP reassembly" facility that the
//! fingerprinting pipeline proper treats as an external collaborator (see SPEC_FULL.md §4.3a).

use std::collections::VecDeque;

pub const TCP_FIN: u8 = 0b0000_0001;
pub const TCP_SYN: u8 = 0b0000_0010;
pub const TCP_RST: u8 = 0b0000_0100;
pub const TCP_ACK: u8 = 0b0001_0000;

/// Default bound on buffered out-of-order segments per direction.
pub const DEFAULT_OOO_CAPACITY: usize = 1024;

/// One delivered byte run, as handed to the [`crate::reassembly::HalfStream`].
///
/// `skip` mirrors the underlying TCP reassembler's gap indicator: when set, the bytes (if any)
/// are irrelevant and the half-stream must treat this as "missing packets".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub bytes: Vec<u8>,
    pub skip: bool,
}

impl Segment {
    fn data(bytes: Vec<u8>) -> Self {
        Segment { bytes, skip: false }
    }

    fn gap() -> Self {
        Segment {
            bytes: Vec::new(),
            skip: true,
        }
    }
}

#[derive(Debug)]
struct Pending {
    seq: u32,
    flags: u8,
    bytes: Vec<u8>,
}

/// Orders one direction of a TCP flow by sequence number, bounded by `capacity` pending
/// out-of-order segments.
#[derive(Debug)]
pub struct TcpFlowState {
    next_seq: Option<u32>,
    capacity: usize,
    ooo: VecDeque<Pending>,
}

impl TcpFlowState {
    pub fn new(capacity: usize) -> Self {
        TcpFlowState {
            next_seq: None,
            capacity,
            ooo: VecDeque::new(),
        }
    }

    /// Feeds one captured TCP segment into the orderer, returning zero or more ordered
    /// [`Segment`]s ready for delivery to the owning half-stream (possibly several, if this
    /// segment fills a gap and lets buffered out-of-order data flush).
    pub fn insert(&mut self, seq: u32, flags: u8, bytes: Vec<u8>) -> Vec<Segment> {
        let length = bytes.len() as u32;

        let Some(next_seq) = self.next_seq else {
            // Seed the expected sequence from the first segment we observe for this direction.
            // A bare SYN consumes one sequence number before the payload.
            let start = if flags & TCP_SYN != 0 {
                seq.wrapping_add(1)
            } else {
                seq
            };
            self.next_seq = Some(advance(start, length, flags));
            return vec![Segment::data(bytes)];
        };

        if seq == next_seq {
            let mut out = vec![Segment::data(bytes)];
            self.next_seq = Some(advance(next_seq, length, flags));
            out.extend(self.flush_ordered());
            out
        } else if wrapping_lt(next_seq, seq) {
            // Segment is ahead of what we expect: buffer it.
            if self.ooo.len() >= self.capacity {
                log::warn!("out-of-order buffer overflow, treating as missing packets");
                return vec![Segment::gap()];
            }
            self.ooo.push_back(Pending { seq, flags, bytes });
            vec![]
        } else if let Some((trimmed, new_next)) = overlap(next_seq, seq, flags, &bytes) {
            let mut out = vec![Segment::data(trimmed)];
            self.next_seq = Some(new_next);
            out.extend(self.flush_ordered());
            out
        } else {
            log::debug!("dropping old segment: seq={} expected={}", seq, next_seq);
            vec![]
        }
    }

    fn flush_ordered(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        loop {
            let next_seq = self.next_seq.expect("seeded before flush is reachable");
            let pos = self.ooo.iter().position(|p| p.seq == next_seq).or_else(|| {
                self.ooo
                    .iter()
                    .position(|p| wrapping_lt(p.seq, next_seq) && has_new_tail(next_seq, p))
            });
            let Some(pos) = pos else { break };
            let pending = self.ooo.remove(pos).expect("position just found");
            if pending.seq == next_seq {
                let length = pending.bytes.len() as u32;
                self.next_seq = Some(advance(next_seq, length, pending.flags));
                out.push(Segment::data(pending.bytes));
            } else if let Some((trimmed, new_next)) =
                overlap(next_seq, pending.seq, pending.flags, &pending.bytes)
            {
                self.next_seq = Some(new_next);
                out.push(Segment::data(trimmed));
            }
        }
        out
    }
}

#[inline]
fn advance(seq: u32, length: u32, flags: u8) -> u32 {
    let next = seq.wrapping_add(length);
    if flags & TCP_FIN != 0 {
        next.wrapping_add(1)
    } else {
        next
    }
}

/// RFC 1323 wraparound-aware sequence comparison: is `lhs` strictly before `rhs`?
#[inline]
pub fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) > (1 << 31)
}

fn has_new_tail(next_seq: u32, pending: &Pending) -> bool {
    let end = pending.seq.wrapping_add(pending.bytes.len() as u32);
    wrapping_lt(next_seq, end)
}

/// If a segment starting at `seq` (with `flags`/`bytes`) overlaps the receiver's expected
/// sequence number but extends past it with new data, returns the trimmed new-data suffix and
/// the resulting next-expected sequence number.
fn overlap(next_seq: u32, seq: u32, flags: u8, bytes: &[u8]) -> Option<(Vec<u8>, u32)> {
    let end_seq = seq.wrapping_add(bytes.len() as u32);
    if !wrapping_lt(next_seq, end_seq) {
        return None;
    }
    let overlap_len = next_seq.wrapping_sub(seq) as usize;
    let trimmed = bytes.get(overlap_len..)?.to_vec();
    let new_next = advance(next_seq, trimmed.len() as u32, flags);
    Some((trimmed, new_next))
}

//! Pairs the two directions of a TCP flow and synthesizes fingerprint events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::conntrack::bidi_flow::{BidiFlow, Slot};
use crate::conntrack::flow_key::FlowKey;
use crate::events::{Event, EventBuffer};

/// Default idle timeout before an unmatched half-stream is evicted and finalized alone.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Registers directional flows into bidirectional pairs and publishes synthesized events into
/// an [`EventBuffer`].
///
/// Holds exactly the flows still waiting on their reverse direction; once both directions are
/// known the pair is handed back to the caller (a capture worker) via [`register`], which keeps
/// routing subsequent segments to it directly rather than through this table.
pub struct Correlator {
    unmatched: Mutex<HashMap<FlowKey, Arc<Mutex<BidiFlow>>>>,
    events: Arc<EventBuffer>,
    idle_timeout: Duration,
}

impl Correlator {
    pub fn new(events: Arc<EventBuffer>, idle_timeout: Duration) -> Self {
        Correlator {
            unmatched: Mutex::new(HashMap::new()),
            events,
            idle_timeout,
        }
    }

    /// Registers a newly observed directional flow, returning the [`BidiFlow`] it belongs to
    /// and which slot (A or B) it occupies.
    ///
    /// If the reverse direction is already waiting, this flow is paired into it as slot B and
    /// removed from the unmatched table (at most one key names a given pair at a time). Otherwise
    /// a new pair is created with this flow as slot A, filed under its own key so the reverse
    /// direction can find it.
    pub fn register(&self, key: FlowKey) -> (Arc<Mutex<BidiFlow>>, Slot) {
        let mut unmatched = self.unmatched.lock().expect("correlator mutex poisoned");
        if let Some(bidi) = unmatched.remove(&key) {
            bidi.lock().expect("bidiflow mutex poisoned").attach_b();
            (bidi, Slot::B)
        } else {
            let bidi = Arc::new(Mutex::new(BidiFlow::new(key)));
            unmatched.insert(key.reverse(), Arc::clone(&bidi));
            (bidi, Slot::A)
        }
    }

    /// Marks activity on a pair still sitting in the unmatched table (a no-op once paired and
    /// removed).
    pub fn touch(&self, bidi: &Arc<Mutex<BidiFlow>>) {
        bidi.lock().expect("bidiflow mutex poisoned").touch();
    }

    /// Attempts synthesis after a half-stream terminates, publishing an event on success.
    pub fn on_half_terminated(&self, bidi: &Arc<Mutex<BidiFlow>>) {
        let synthesized = bidi.lock().expect("bidiflow mutex poisoned").maybe_finish();
        if let Some(s) = synthesized {
            self.events.insert(Event {
                time: 0,
                ja3: s.ja3,
                ja3s: s.ja3s,
                sni: s.sni,
            });
        }
    }

    /// Evicts pairs that have been waiting longer than the idle timeout with no reverse
    /// direction, finalizing them as single-sided records (or dropping them if that side never
    /// succeeded).
    pub fn evict_idle(&self) {
        let mut unmatched = self.unmatched.lock().expect("correlator mutex poisoned");
        let expired: Vec<FlowKey> = unmatched
            .iter()
            .filter(|(_, bidi)| {
                let b = bidi.lock().expect("bidiflow mutex poisoned");
                b.idle_for() >= self.idle_timeout
            })
            .map(|(k, _)| *k)
            .collect();

        for key in expired {
            if let Some(bidi) = unmatched.remove(&key) {
                let synthesized = {
                    let mut b = bidi.lock().expect("bidiflow mutex poisoned");
                    b.evict_missing_b();
                    b.maybe_finish()
                };
                if let Some(s) = synthesized {
                    self.events.insert(Event {
                        time: 0,
                        ja3: s.ja3,
                        ja3s: s.ja3s,
                        sni: s.sni,
                    });
                }
            }
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

//! Time-windowed buffer of synthesized fingerprint events.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// One synthesized JA3/JA3S record, as it will be reported to a client of this library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Unix epoch seconds at the moment of synthesis.
    pub time: u64,
    pub ja3: Option<String>,
    pub ja3s: Option<String>,
    pub sni: Option<String>,
}

/// Name of the table [`generate_events_table`] renders, matching a host-agent schema.
pub const TABLE_NAME: &str = "tls_handshake_signatures";
/// Column names of that table, in row order.
pub const TABLE_COLUMNS: &[&str] = &["time", "ja3", "ja3s", "sni"];

/// One rendered row: every field is a string, as a host-agent table-plugin callback expects.
///
/// Derives `Serialize` so a host agent speaking a serialized RPC transport (e.g. Thrift, JSON)
/// can hand rows straight to its wire-format encoder instead of re-walking these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub time: String,
    pub ja3: String,
    pub ja3s: String,
    pub sni: String,
}

impl From<&Event> for TableRow {
    fn from(e: &Event) -> Self {
        TableRow {
            time: e.time.to_string(),
            ja3: e.ja3.clone().unwrap_or_default(),
            ja3s: e.ja3s.clone().unwrap_or_default(),
            sni: e.sni.clone().unwrap_or_default(),
        }
    }
}

/// Renders a snapshot of the event buffer as table rows for a host-agent query callback.
pub fn generate_events_table(buffer: &EventBuffer) -> Vec<TableRow> {
    buffer.snapshot().iter().map(TableRow::from).collect()
}

struct Entry {
    inserted_at: Instant,
    event: Event,
}

/// Default retention window for buffered events.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Holds synthesized events in insertion order, pruning entries older than a retention window.
///
/// Insertion order is monotonic by construction (every insert happens after the previous one),
/// so pruning is a prefix trim rather than a full rescan.
pub struct EventBuffer {
    entries: Mutex<Vec<Entry>>,
    retention: Duration,
}

impl EventBuffer {
    pub fn new(retention: Duration) -> Self {
        EventBuffer {
            entries: Mutex::new(Vec::new()),
            retention,
        }
    }

    /// Prunes aged entries, then appends `event` stamped with the current time.
    pub fn insert(&self, mut event: Event) {
        event.time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut entries = self.entries.lock().expect("event buffer mutex poisoned");
        prune_locked(&mut entries, self.retention);
        entries.push(Entry {
            inserted_at: Instant::now(),
            event,
        });
    }

    /// Prunes aged entries, then returns a copy of all currently retained events, oldest first.
    ///
    /// Callers that never query still get cleanup here: this is the fallback for a caller with
    /// no separate eviction ticker running, not a replacement for one.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut entries = self.entries.lock().expect("event buffer mutex poisoned");
        prune_locked(&mut entries, self.retention);
        entries.iter().map(|e| e.event.clone()).collect()
    }

    /// Drops every entry older than the retention window, measured from now.
    pub fn prune(&self) {
        let mut entries = self.entries.lock().expect("event buffer mutex poisoned");
        prune_locked(&mut entries, self.retention);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("event buffer mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        EventBuffer::new(DEFAULT_RETENTION)
    }
}

/// Drops the prefix of `entries` older than `retention`, measured from now. Insertion order is
/// monotonic by construction, so the aged prefix is contiguous.
fn prune_locked(entries: &mut Vec<Entry>, retention: Duration) {
    let Some(cutoff) = Instant::now().checked_sub(retention) else {
        return;
    };
    let first_kept = entries.partition_point(|e| e.inserted_at < cutoff);
    entries.drain(0..first_kept);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u8) -> Event {
        Event {
            time: 0,
            ja3: Some(format!("ja3-{n}")),
            ja3s: None,
            sni: None,
        }
    }

    #[test]
    fn insert_stamps_current_unix_time() {
        let buf = EventBuffer::default();
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        buf.insert(event(1));
        let snap = buf.snapshot();
        assert!(snap[0].time >= before);
    }

    #[test]
    fn generate_events_table_renders_string_rows() {
        let buf = EventBuffer::default();
        buf.insert(Event {
            time: 0,
            ja3: Some("abc".into()),
            ja3s: None,
            sni: Some("example.com".into()),
        });
        let rows = generate_events_table(&buf);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ja3, "abc");
        assert_eq!(rows[0].ja3s, "");
        assert_eq!(rows[0].sni, "example.com");
    }

    #[test]
    fn insert_and_snapshot_preserve_order() {
        let buf = EventBuffer::new(DEFAULT_RETENTION);
        buf.insert(event(1));
        buf.insert(event(2));
        let snap = buf.snapshot();
        let ja3s: Vec<_> = snap.iter().map(|e| e.ja3.as_deref()).collect();
        assert_eq!(ja3s, vec![Some("ja3-1"), Some("ja3-2")]);
    }

    #[test]
    fn prune_drops_entries_older_than_retention() {
        let buf = EventBuffer::new(Duration::from_millis(10));
        buf.insert(event(1));
        std::thread::sleep(Duration::from_millis(30));
        buf.insert(event(2));
        buf.prune();
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].ja3.as_deref(), Some("ja3-2"));
    }

    #[test]
    fn prune_on_empty_buffer_is_a_noop() {
        let buf = EventBuffer::default();
        buf.prune();
        assert!(buf.is_empty());
    }
}

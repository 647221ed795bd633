//! Receiver liveness census.
//!
//! Every receiver periodically multicasts a single-word heartbeat carrying its
//! 16-bit id and its current exit-code byte. The sender folds those words into
//! a flat table indexed by id — one slot per possible id, so updates are O(1)
//! and a full liveness scan touches a fixed 64K entries. Two receivers
//! choosing the same id overwrite each other; that is an operator error, not a
//! protocol condition.

use std::io::Write;
use std::time::{Duration, Instant};

use crate::net::KeepaliveSocket;
use crate::AllocError;

pub const CENSUS_SLOTS: usize = 1 << 16;

/// Pack a heartbeat word: exit value in the high half, client id in the low.
pub fn pack_heartbeat(id: u16, value: u8) -> u32 {
    ((value as u32) << 16) | id as u32
}

/// Unpack a heartbeat word into (id, value).
pub fn unpack_heartbeat(word: u32) -> (u16, u8) {
    ((word & 0xFFFF) as u16, (word >> 16) as u8)
}

#[derive(Clone, Copy, Default)]
struct Entry {
    /// Instant of the last heartbeat; cleared when the entry goes stale.
    last_seen: Option<Instant>,
    value: u8,
}

pub struct Census {
    entries: Vec<Entry>,
}

impl Census {
    pub fn new() -> Result<Self, AllocError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(CENSUS_SLOTS)
            .map_err(|_| AllocError("census table"))?;
        entries.resize(CENSUS_SLOTS, Entry::default());
        Ok(Self { entries })
    }

    /// Record one heartbeat.
    pub fn record(&mut self, id: u16, value: u8, now: Instant) {
        let entry = &mut self.entries[id as usize];
        entry.last_seen = Some(now);
        entry.value = value;
    }

    /// Count entries heard from within `maxwait` of `now`, zeroing the rest.
    /// The sender's own `starttime` counts as one extra live entry while it is
    /// still within the horizon, which keeps a fresh sender alive before any
    /// receiver has reported in.
    pub fn live_count(&mut self, starttime: Instant, now: Instant, maxwait: Duration) -> usize {
        let mut live = 0;
        if now.saturating_duration_since(starttime) < maxwait {
            live += 1;
        }
        for entry in &mut self.entries {
            match entry.last_seen {
                Some(t) if now.saturating_duration_since(t) < maxwait => live += 1,
                Some(_) => entry.last_seen = None,
                None => {}
            }
        }
        live
    }

    /// Drain every pending heartbeat from `sock` into the table.
    pub fn drain(&mut self, sock: &KeepaliveSocket) {
        let now = Instant::now();
        loop {
            match sock.recv_word() {
                Ok(Some(word)) => {
                    let (id, value) = unpack_heartbeat(word);
                    tracing::debug!(
                        client = format_args!("{}.{}", id >> 8, id & 0xFF),
                        value,
                        "keepalive received"
                    );
                    self.record(id, value, now);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "keepalive drain failed");
                    break;
                }
            }
        }
    }

    /// Drain pending heartbeats, then return the live count.
    pub fn drain_and_census(
        &mut self,
        sock: &KeepaliveSocket,
        starttime: Instant,
        maxwait: Duration,
    ) -> usize {
        self.drain(sock);
        self.live_count(starttime, Instant::now(), maxwait)
    }

    /// Write one line per known receiver: `client: <high8>.<low8> value: <v>`.
    /// Returns the number of entries written.
    pub fn dump(&self, out: &mut dyn Write) -> std::io::Result<usize> {
        let mut written = 0;
        for (id, entry) in self.entries.iter().enumerate() {
            if entry.last_seen.is_some() {
                writeln!(out, "client: {}.{} value: {}", id >> 8, id & 0xFF, entry.value)?;
                written += 1;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAXWAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_heartbeat_word_round_trip() {
        let word = pack_heartbeat(0x0203, 42);
        assert_eq!(word, 42 << 16 | 0x0203);
        assert_eq!(unpack_heartbeat(word), (0x0203, 42));
        assert_eq!(unpack_heartbeat(pack_heartbeat(0, 0)), (0, 0));
        assert_eq!(unpack_heartbeat(pack_heartbeat(u16::MAX, u8::MAX)), (u16::MAX, u8::MAX));
    }

    #[test]
    fn test_live_entries_counted() {
        let mut census = Census::new().unwrap();
        let now = Instant::now();
        let start = now - Duration::from_secs(60);

        census.record(1, 0, now - Duration::from_secs(1));
        census.record(2, 7, now - Duration::from_secs(2));
        assert_eq!(census.live_count(start, now, MAXWAIT), 2);
    }

    #[test]
    fn test_stale_entries_zeroed() {
        let mut census = Census::new().unwrap();
        let now = Instant::now();
        let start = now - Duration::from_secs(60);

        census.record(3, 1, now - Duration::from_secs(10));
        census.record(4, 2, now - Duration::from_secs(1));
        assert_eq!(census.live_count(start, now, MAXWAIT), 1);

        // The stale entry is gone for good: no longer counted, no longer dumped.
        assert_eq!(census.live_count(start, now, MAXWAIT), 1);
        let mut dump = Vec::new();
        assert_eq!(census.dump(&mut dump).unwrap(), 1);
        assert_eq!(String::from_utf8(dump).unwrap(), "client: 0.4 value: 2\n");
    }

    #[test]
    fn test_sender_start_counts_within_horizon() {
        let mut census = Census::new().unwrap();
        let now = Instant::now();

        // Empty table, fresh start: the sender itself is the one live entry.
        assert_eq!(census.live_count(now - Duration::from_secs(1), now, MAXWAIT), 1);
        // Past the horizon the bonus expires.
        assert_eq!(census.live_count(now - Duration::from_secs(6), now, MAXWAIT), 0);
    }

    #[test]
    fn test_rerecord_revives_entry() {
        let mut census = Census::new().unwrap();
        let now = Instant::now();
        let start = now - Duration::from_secs(60);

        census.record(9, 5, now - Duration::from_secs(10));
        assert_eq!(census.live_count(start, now, MAXWAIT), 0);
        census.record(9, 5, now);
        assert_eq!(census.live_count(start, now, MAXWAIT), 1);
    }

    #[test]
    fn test_dump_format() {
        let mut census = Census::new().unwrap();
        let now = Instant::now();
        census.record(0x0102, 3, now);
        census.record(0xFFFF, 255, now);

        let mut out = Vec::new();
        assert_eq!(census.dump(&mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "client: 1.2 value: 3\nclient: 255.255 value: 255\n");
    }
}

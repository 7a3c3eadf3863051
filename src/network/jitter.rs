//! Timestamp-keyed jitter buffer
//!
//! Keys are wire-timestamp offsets from the session anchor, so ordering
//! stays correct across 32-bit wraparound. Playout is pull-based: the
//! session asks for the newest packet at or before a target offset.

use bytes::Bytes;
use std::collections::BTreeMap;

/// Default number of packets held before the oldest is evicted
pub const DEFAULT_CAPACITY: usize = 256;

/// Jitter buffer statistics
#[derive(Debug, Clone, Default)]
pub struct JitterBufferStats {
    /// Packets accepted into the buffer
    pub packets_buffered: u64,
    /// Packets handed to the decoder
    pub packets_played: u64,
    /// Same timestamp seen twice
    pub duplicates: u64,
    /// Skipped because a newer packet was already due
    pub late: u64,
    /// Evicted because the buffer was full
    pub overflow: u64,
}

pub struct JitterBuffer {
    packets: BTreeMap<i64, Bytes>,
    capacity: usize,
    stats: JitterBufferStats,
}

impl JitterBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "jitter buffer capacity must be positive");
        Self {
            packets: BTreeMap::new(),
            capacity,
            stats: JitterBufferStats::default(),
        }
    }

    /// Store a payload; returns `false` for a duplicate
    pub fn insert(&mut self, offset: i64, payload: Bytes) -> bool {
        if self.packets.contains_key(&offset) {
            self.stats.duplicates += 1;
            return false;
        }

        if self.packets.len() >= self.capacity {
            self.packets.pop_first();
            self.stats.overflow += 1;
        }

        self.packets.insert(offset, payload);
        self.stats.packets_buffered += 1;
        true
    }

    /// Take the newest packet with `offset <= target`, discarding older ones
    pub fn pop_due(&mut self, target: i64) -> Option<(i64, Bytes)> {
        let key = *self.packets.range(..=target).next_back()?.0;

        let newer = self.packets.split_off(&key);
        self.stats.late += self.packets.len() as u64;
        self.packets = newer;

        let payload = self.packets.remove(&key)?;
        self.stats.packets_played += 1;
        Some((key, payload))
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn stats(&self) -> &JitterBufferStats {
        &self.stats
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

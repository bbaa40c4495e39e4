//! Per-identifier request history.

use std::collections::VecDeque;

/// Admitted request timestamps plus the block latch for one identifier.
///
/// Timestamps are epoch milliseconds in insertion order. Entries older than
/// the policy window are dropped from the front whenever the log is
/// evaluated, so the deque never holds more than `max_requests` entries for
/// the policy it is checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestLog {
    timestamps: VecDeque<u64>,
    blocked: bool,
    block_until: Option<u64>,
}

impl RequestLog {
    /// An empty, unblocked log.
    pub fn new() -> Self {
        Self::default()
    }

    /// The block expiry if the latch is set and still in the future.
    pub fn active_block(&self, now: u64) -> Option<u64> {
        match (self.blocked, self.block_until) {
            (true, Some(until)) if until > now => Some(until),
            _ => None,
        }
    }

    /// Whether the latch is set and has not yet expired.
    pub fn is_actively_blocked(&self, now: u64) -> bool {
        self.active_block(now).is_some()
    }

    /// Clear a latch that is set without an expiry.
    ///
    /// Returns `true` if the log was in that state.
    pub fn repair(&mut self) -> bool {
        if self.blocked && self.block_until.is_none() {
            self.blocked = false;
            return true;
        }
        false
    }

    /// Drop timestamps that have left the window ending at `now`.
    pub fn purge(&mut self, now: u64, window_ms: u64) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_sub(oldest) < window_ms {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    /// Record an admitted request and release any latch.
    pub fn admit(&mut self, now: u64) {
        self.timestamps.push_back(now);
        self.blocked = false;
        self.block_until = None;
    }

    /// Latch the log as denied until `until`.
    pub fn block(&mut self, until: u64) {
        self.blocked = true;
        self.block_until = Some(until);
    }

    /// Number of retained timestamps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The oldest retained timestamp.
    pub fn oldest(&self) -> Option<u64> {
        self.timestamps.front().copied()
    }

    /// The most recent retained timestamp.
    pub fn newest(&self) -> Option<u64> {
        self.timestamps.back().copied()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn block_until(&self) -> Option<u64> {
        self.block_until
    }

    /// Count and oldest timestamp inside the window ending at `now`, without
    /// mutating the log.
    pub fn window_occupancy(&self, now: u64, window_ms: u64) -> (usize, Option<u64>) {
        let mut in_window = self
            .timestamps
            .iter()
            .copied()
            .filter(|&t| now.saturating_sub(t) < window_ms);
        match in_window.next() {
            Some(oldest) => (1 + in_window.count(), Some(oldest)),
            None => (0, None),
        }
    }

    /// Whether any request was admitted within `horizon_ms` of `now`.
    pub fn has_recent_activity(&self, now: u64, horizon_ms: u64) -> bool {
        self.newest()
            .is_some_and(|t| now.saturating_sub(t) < horizon_ms)
    }

    /// Whether the cleanup sweep may drop this log.
    pub fn is_stale(&self, now: u64, horizon_ms: u64) -> bool {
        !self.has_recent_activity(now, horizon_ms) && !self.is_actively_blocked(now)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_latch(&mut self) {
        self.blocked = true;
        self.block_until = None;
    }
}

//! Mailbox monitoring for session actors.
//!
//! Thresholds are derived from the configured mailbox capacity:
//!
//! | Level    | Depth                      |
//! |----------|----------------------------|
//! | Normal   | <= capacity / 4            |
//! | Warning  | <= capacity * 3 / 4        |
//! | Critical | above that                 |
//!
//! Depth itself is read from the channel, so the monitor only keeps
//! counters that the channel cannot answer.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Per-session mailbox counters.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Owning session, for log fields.
    session_id: Uuid,
    normal_threshold: usize,
    warning_threshold: usize,
    /// Peak observed depth.
    peak_depth: AtomicUsize,
    /// Envelopes accepted into the mailbox.
    messages_enqueued: AtomicU64,
    /// Envelopes taken out by the writer.
    messages_processed: AtomicU64,
    /// Envelopes rejected because the mailbox was full.
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(session_id: Uuid, capacity: usize) -> Self {
        Self {
            session_id,
            normal_threshold: capacity / 4,
            warning_threshold: capacity.saturating_mul(3) / 4,
            peak_depth: AtomicUsize::new(0),
            messages_enqueued: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record an accepted envelope and the depth observed right after it.
    ///
    /// Each band is logged once, when the peak first enters it. Returns the
    /// band entered, if any.
    pub fn record_enqueue(&self, depth: usize) -> Option<MailboxLevel> {
        self.messages_enqueued.fetch_add(1, Ordering::Relaxed);
        let previous_peak = self.peak_depth.fetch_max(depth, Ordering::Relaxed);

        let level = self.level_for_depth(depth);
        if level <= self.level_for_depth(previous_peak) {
            return None;
        }

        match level {
            MailboxLevel::Critical => {
                warn!(
                    target: "socket_hub.actor.mailbox",
                    session_id = %self.session_id,
                    depth,
                    threshold = self.warning_threshold,
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning => {
                debug!(
                    target: "socket_hub.actor.mailbox",
                    session_id = %self.session_id,
                    depth,
                    "Mailbox depth elevated"
                );
            }
            MailboxLevel::Normal => {}
        }
        Some(level)
    }

    /// Record an envelope taken by the writer.
    pub fn record_dequeue(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope rejected because the mailbox was full.
    pub fn record_drop(&self) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            target: "socket_hub.actor.mailbox",
            session_id = %self.session_id,
            dropped,
            "Message dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_enqueued(&self) -> u64 {
        self.messages_enqueued.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Determine mailbox level for a given depth.
    #[must_use]
    pub fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.warning_threshold {
            MailboxLevel::Critical
        } else if depth > self.normal_threshold {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

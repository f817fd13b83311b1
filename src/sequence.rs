//! Drops retransmitted requests.
//!
//! LIFX clients resend a request when a reply is slow, reusing its sequence number.  The bridge
//! remembers the last few sequence numbers it acted on and ignores repeats.  The window is shared
//! by all clients, so two clients that happen to pick the same number within a few requests of
//! each other will see one of them dropped.

/// How many sequence numbers are remembered.
pub const WINDOW: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct SequenceFilter {
    recent: [Option<u8>; WINDOW],
    /// Slot the next admitted number goes into
    next: usize,
}

impl SequenceFilter {
    pub fn new() -> SequenceFilter {
        SequenceFilter::default()
    }

    /// Whether a request with this sequence number should be processed.
    ///
    /// Zero is what clients send when they don't track sequence numbers, so it is always admitted
    /// and never remembered.  Any other number is admitted unless it is one of the last [WINDOW]
    /// admitted, and then becomes one of them, pushing out the oldest.
    pub fn admit(&mut self, sequence: u8) -> bool {
        if sequence == 0 {
            return true;
        }
        if self.recent.contains(&Some(sequence)) {
            return false;
        }
        self.recent[self.next] = Some(sequence);
        self.next = (self.next + 1) % WINDOW;
        true
    }
}

use super::ProcessOutcome;

/// Tally of how entries handed to a consumer have been dealt with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Entries processed and acknowledged
    pub acknowledged: usize,
    /// Entries left pending, either by the handler or due to a failed acknowledgement
    pub left_pending: usize,
    /// Malformed entries which have been acknowledged without processing
    pub dropped: usize,
    /// Entries moved to the dead-letter stream
    pub dead_lettered: usize,
    /// Entries whose payload could not be decoded
    pub failed: usize,
}

impl DeliveryStats {
    /// Counts a single processing result
    pub fn record(&mut self, outcome: Option<ProcessOutcome>) {
        match outcome {
            Some(ProcessOutcome::Acknowledged) => self.acknowledged += 1,
            Some(ProcessOutcome::LeftPending) => self.left_pending += 1,
            Some(ProcessOutcome::Dropped) => self.dropped += 1,
            Some(ProcessOutcome::DeadLettered) => self.dead_lettered += 1,
            None => self.failed += 1,
        }
    }

    /// Total number of entries counted
    pub fn total(&self) -> usize {
        self.acknowledged + self.left_pending + self.dropped + self.dead_lettered + self.failed
    }

    /// Adds the numbers of another tally to this one
    pub fn merge(&mut self, other: &DeliveryStats) {
        self.acknowledged += other.acknowledged;
        self.left_pending += other.left_pending;
        self.dropped += other.dropped;
        self.dead_lettered += other.dead_lettered;
        self.failed += other.failed;
    }
}

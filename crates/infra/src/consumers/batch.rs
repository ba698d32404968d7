//! Batch outcome reporting.
//!
//! Every envelope in a batch resolves terminally and independently; the
//! report keeps per-envelope outcomes in input order so a partial failure is
//! visible to the caller instead of swallowed.

/// Terminal resolution of a single envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeOutcome {
    /// Persisted (or an idempotent no-op: duplicate create, delete of a
    /// missing row).
    Applied,
    /// Belongs to the other entity's consumer; skipped without error.
    FilteredOut,
    /// Routed to the dead-letter sink.
    DeadLettered { reason: String },
}

impl EnvelopeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn is_dead_lettered(&self) -> bool {
        matches!(self, Self::DeadLettered { .. })
    }
}

/// Per-envelope outcomes for one batch invocation, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    outcomes: Vec<EnvelopeOutcome>,
}

impl BatchReport {
    pub fn new(outcomes: Vec<EnvelopeOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[EnvelopeOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    pub fn filtered_out(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, EnvelopeOutcome::FilteredOut))
            .count()
    }

    pub fn dead_lettered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_dead_lettered()).count()
    }

    /// True when nothing was dead-lettered.
    pub fn fully_applied(&self) -> bool {
        self.dead_lettered() == 0
    }
}

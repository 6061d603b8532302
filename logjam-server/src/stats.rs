use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a single ingested message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Recorded by a collector.
    Processed,
    /// The body could not be decoded or lacks required fields.
    Invalid,
    /// Deliberately skipped: ignored URI, backend-only action or unknown topic.
    Ignored,
    /// No collector exists for the stream.
    Missed,
    /// The ingest queue was full or closed.
    Dropped,
    /// A heartbeat forwarded to the watchdog.
    Heartbeat,
}

impl Outcome {
    /// All outcomes in reporting order.
    pub const ALL: [Outcome; 6] = [
        Self::Processed,
        Self::Invalid,
        Self::Ignored,
        Self::Missed,
        Self::Dropped,
        Self::Heartbeat,
    ];

    /// Returns the name used in logs and metric tags.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Invalid => "invalid",
            Self::Ignored => "ignored",
            Self::Missed => "missed",
            Self::Dropped => "dropped",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Message counters shared between the ingest endpoint, the decoders and the stats reporter.
#[derive(Debug, Default)]
pub struct Stats {
    counters: [AtomicU64; Outcome::ALL.len()],
}

impl Stats {
    /// Counts one message with the given outcome.
    pub fn count(&self, outcome: Outcome) {
        self.counters[outcome as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the counts since the last call and resets them.
    pub fn take(&self) -> StatsSnapshot {
        StatsSnapshot {
            counts: self
                .counters
                .each_ref()
                .map(|counter| counter.swap(0, Ordering::Relaxed)),
        }
    }
}

/// Message counts of one reporting interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    counts: [u64; Outcome::ALL.len()],
}

impl StatsSnapshot {
    /// Returns the count of one outcome.
    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counts[outcome as usize]
    }

    /// Iterates all outcomes with their counts.
    pub fn iter(&self) -> impl Iterator<Item = (Outcome, u64)> + '_ {
        Outcome::ALL.into_iter().map(|outcome| (outcome, self.get(outcome)))
    }

    /// Returns `true` if no message was counted.
    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&count| count == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_resets() {
        let stats = Stats::default();
        stats.count(Outcome::Processed);
        stats.count(Outcome::Processed);
        stats.count(Outcome::Missed);

        let snapshot = stats.take();
        assert_eq!(snapshot.get(Outcome::Processed), 2);
        assert_eq!(snapshot.get(Outcome::Missed), 1);
        assert_eq!(snapshot.get(Outcome::Invalid), 0);
        assert!(!snapshot.is_empty());

        assert!(stats.take().is_empty());
    }

    #[test]
    fn test_outcome_index() {
        for (index, outcome) in Outcome::ALL.into_iter().enumerate() {
            assert_eq!(outcome as usize, index);
        }
    }
}

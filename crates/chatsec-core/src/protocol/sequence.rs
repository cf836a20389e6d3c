//! Per-session sequence tracking
//!
//! Every line an authenticated client sends carries a sequence number. The
//! guard accepts any number above the last accepted one and classifies the
//! gap, so the caller can reject replays and warn about lost messages.

// ----------------------------------------------------------------------------
// Verdict
// ----------------------------------------------------------------------------

/// Outcome of checking one incoming sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceVerdict {
    /// `S = L + 1`
    InOrder,
    /// `S = L + 2`: exactly one message missing
    OneLost { missing: u64 },
    /// `S > L + 2`: an inclusive range of messages missing
    RangeLost { first: u64, last: u64 },
    /// `S <= L`: rejected, guard unchanged
    Replay { sequence: u64, last_accepted: u64 },
}

impl SequenceVerdict {
    /// Whether the message carrying this sequence should be processed
    pub fn is_accepted(&self) -> bool {
        !matches!(self, SequenceVerdict::Replay { .. })
    }
}

// ----------------------------------------------------------------------------
// Replay Guard
// ----------------------------------------------------------------------------

/// Monotonic sequence guard for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayGuard {
    last_accepted: u64,
}

impl ReplayGuard {
    /// Fresh guard, `L = 0`
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted sequence number
    pub fn last_accepted(&self) -> u64 {
        self.last_accepted
    }

    /// Check `sequence` and advance on acceptance
    pub fn check(&mut self, sequence: u64) -> SequenceVerdict {
        let last = self.last_accepted;
        if sequence <= last {
            return SequenceVerdict::Replay {
                sequence,
                last_accepted: last,
            };
        }

        self.last_accepted = sequence;
        match sequence - last {
            1 => SequenceVerdict::InOrder,
            2 => SequenceVerdict::OneLost { missing: last + 1 },
            _ => SequenceVerdict::RangeLost {
                first: last + 1,
                last: sequence - 1,
            },
        }
    }
}

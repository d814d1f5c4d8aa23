//! Per-frame completion gate.

use layerloom_core::{LayerloomError, LayerloomResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Fewer than the expected completions have arrived.
    Collecting { completed: usize, expected: usize },
    Ready,
}

/// Result of recording one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTransition {
    Pending { remaining: usize },
    /// The frame just became ready. Returned once per reset.
    Ready,
}

/// Counts load completions for the current frame and releases it only when
/// every layer has reported.
#[derive(Debug, Clone, Default)]
pub struct FrameSynchronizer {
    frame: u32,
    expected: usize,
    completed: usize,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting `expected` completions for `frame`.
    pub fn reset(&mut self, frame: u32, expected: usize) {
        self.frame = frame;
        self.expected = expected;
        self.completed = 0;
    }

    pub fn record_completion(&mut self) -> LayerloomResult<SyncTransition> {
        if self.completed >= self.expected {
            return Err(LayerloomError::SynchronizerOverrun { frame: self.frame });
        }
        self.completed += 1;
        if self.completed == self.expected {
            tracing::debug!("frame {} ready after {} completions", self.frame, self.completed);
            Ok(SyncTransition::Ready)
        } else {
            Ok(SyncTransition::Pending {
                remaining: self.expected - self.completed,
            })
        }
    }

    pub fn state(&self) -> SyncState {
        if self.is_ready() {
            SyncState::Ready
        } else {
            SyncState::Collecting {
                completed: self.completed,
                expected: self.expected,
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.expected > 0 && self.completed == self.expected
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn completed(&self) -> usize {
        self.completed
    }
}

//! Per-run state machine.

use std::fmt;

/// Phase of one pipeline run.
///
/// ```text
/// Idle -> Extracting -> Transforming -> Staging -> Loading -> Done
///              \              \             \          \
///               +--------------+-------------+----------+--> Failed
/// ```
///
/// A run with nothing new to load goes straight from `Transforming` to
/// `Done`. `Done` and `Failed` are terminal; a failed run is never retried in
/// place, the next tick starts a fresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Extracting,
    Transforming,
    Staging,
    Loading,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Extracting => "extracting",
            RunPhase::Transforming => "transforming",
            RunPhase::Staging => "staging",
            RunPhase::Loading => "loading",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Idle, Extracting)
            | (Extracting, Transforming)
            | (Transforming, Staging)
            | (Transforming, Done)
            | (Staging, Loading)
            | (Loading, Done) => true,
            (Extracting | Transforming | Staging | Loading, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phases of an engine operation, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Cloning,
    Pulling,
    ReplayingChanges,
    WritingFiles,
    Committing,
    Pushing,
    Refreshing,
}

impl SyncPhase {
    /// The slice of overall progress this phase covers during a sync.
    fn band(self) -> (f64, f64) {
        match self {
            Self::Cloning => (0.0, 0.9),
            Self::Pulling => (0.0, 0.3),
            Self::ReplayingChanges => (0.3, 0.4),
            Self::WritingFiles => (0.4, 0.55),
            Self::Committing => (0.55, 0.6),
            Self::Pushing => (0.6, 0.9),
            Self::Refreshing => (0.9, 1.0),
        }
    }

    /// Returns `true` once the pending edits have been fully replayed.
    pub fn is_past_replay(self) -> bool {
        matches!(
            self,
            Self::WritingFiles | Self::Committing | Self::Pushing | Self::Refreshing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloning => "cloning",
            Self::Pulling => "pulling",
            Self::ReplayingChanges => "replaying changes",
            Self::WritingFiles => "writing files",
            Self::Committing => "committing",
            Self::Pushing => "pushing",
            Self::Refreshing => "refreshing",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress report: the current phase and overall completion in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: SyncPhase,
    pub fraction: f64,
}

impl Progress {
    /// Progress at `within` (clamped to `[0, 1]`) of the way through `phase`.
    pub fn at(phase: SyncPhase, within: f64) -> Self {
        let (start, end) = phase.band();
        Self {
            phase,
            fraction: start + (end - start) * within.clamp(0.0, 1.0),
        }
    }

    /// Reports exactly `1.0`.
    pub fn done(phase: SyncPhase) -> Self {
        Self {
            phase,
            fraction: 1.0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }
}

/// Receives progress from engine operations.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: Progress);
}

impl<F> ProgressObserver for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn on_progress(&self, progress: Progress) {
        self(progress)
    }
}

/// Discards progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct Silent;

impl ProgressObserver for Silent {
    fn on_progress(&self, _progress: Progress) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_monotonic() {
        let phases = [
            SyncPhase::Pulling,
            SyncPhase::ReplayingChanges,
            SyncPhase::WritingFiles,
            SyncPhase::Committing,
            SyncPhase::Pushing,
            SyncPhase::Refreshing,
        ];
        let mut last = 0.0;
        for phase in phases {
            let start = Progress::at(phase, 0.0).fraction;
            let end = Progress::at(phase, 1.0).fraction;
            assert!(start >= last && end >= start, "{phase}");
            last = end;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn within_is_clamped() {
        assert_eq!(Progress::at(SyncPhase::Pulling, 5.0).fraction, 0.3);
        assert_eq!(Progress::at(SyncPhase::Pulling, -1.0).fraction, 0.0);
        assert!(Progress::done(SyncPhase::Refreshing).is_complete());
    }

    #[test]
    fn replay_boundary() {
        assert!(!SyncPhase::ReplayingChanges.is_past_replay());
        assert!(SyncPhase::WritingFiles.is_past_replay());
        assert_eq!(
            serde_json::to_string(&SyncPhase::ReplayingChanges).unwrap(),
            "\"replayingChanges\""
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a capture session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    AcquiringDevices,
    Recording,
    Stopping,
    Assembling,
    Uploading,
    PersistingMetadata,
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Busy states hold the devices or an in-flight upload
    pub fn is_busy(self) -> bool {
        !matches!(self, Self::Idle | Self::Complete | Self::Failed)
    }

    /// Forward-only; `Failed` from any non-terminal state; back to `Idle`
    /// only by cancelling before stop or by dismissing a finished session
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;

        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, AcquiringDevices)
            | (AcquiringDevices, Recording)
            | (Recording, Stopping)
            | (Stopping, Assembling)
            | (Assembling, Uploading)
            | (Uploading, PersistingMetadata)
            | (PersistingMetadata, Complete) => true,
            (AcquiringDevices | Recording, Idle) => true,
            (Complete | Failed, Idle) => true,
            _ => false,
        }
    }
}

/// Snapshot of a capture session for the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub state: SessionState,

    /// When capture started (wall clock)
    pub started_at: Option<DateTime<Utc>>,

    /// Whole seconds on the monotonic timer; frozen once stopping
    pub elapsed_secs: u64,

    /// Non-empty fragments collected so far
    pub fragments_count: usize,
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn test_happy_path_is_forward_only() {
        let path = [
            Idle,
            AcquiringDevices,
            Recording,
            Stopping,
            Assembling,
            Uploading,
            PersistingMetadata,
            Complete,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
            assert!(!pair[1].can_transition_to(pair[0]) || pair[0] == Idle);
        }
        assert!(!Assembling.can_transition_to(PersistingMetadata));
        assert!(!Recording.can_transition_to(Uploading));
    }

    #[test]
    fn test_failed_reachable_until_terminal() {
        for state in [AcquiringDevices, Recording, Stopping, Assembling, Uploading, PersistingMetadata] {
            assert!(state.can_transition_to(Failed));
        }
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_cancel_only_before_stop() {
        assert!(Recording.can_transition_to(Idle));
        assert!(AcquiringDevices.can_transition_to(Idle));
        assert!(!Stopping.can_transition_to(Idle));
        assert!(!Uploading.can_transition_to(Idle));
    }
}

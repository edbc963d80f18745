use serde::Serialize;

/// Lifecycle of one upload session. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    NotStarted,
    Created,
    Uploading,
    Completing,
    Completed,
    CompletionFailed,
    Aborting,
    Aborted,
    AbortFailed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (NotStarted, Created)
                | (Created, Uploading)
                | (Uploading, Completing)
                | (Uploading, Aborting)
                | (Completing, Completed)
                | (Completing, CompletionFailed)
                // single put failed after the stream turned out small
                | (Completing, Aborting)
                | (Aborting, Aborted)
                | (Aborting, AbortFailed)
        )
    }
}

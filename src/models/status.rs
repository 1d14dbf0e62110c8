use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Delivery state of a stored mutation.
///
/// Transitions follow a fixed state machine:
///
/// ```text
/// pending -> syncing -> { synced | failed | conflict }
/// syncing -> pending            (batch transport failure)
/// failed  -> { pending, syncing }  (retry)
/// ```
///
/// `synced` and `conflict` are terminal. The only shortcut is
/// `pending -> failed`, taken when a record runs out of attempts on
/// transport errors before a batch could be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
    Conflict,
}

impl MutationStatus {
    /// Whether a record may move from `self` to `next`.
    pub fn can_transition_to(self, next: MutationStatus) -> bool {
        use MutationStatus::*;
        matches!(
            (self, next),
            (Pending, Syncing)
                | (Pending, Failed)
                | (Syncing, Synced)
                | (Syncing, Failed)
                | (Syncing, Conflict)
                | (Syncing, Pending)
                | (Failed, Pending)
                | (Failed, Syncing)
        )
    }

    /// Terminal states are never picked up by a drain.
    pub fn is_terminal(self) -> bool {
        matches!(self, MutationStatus::Synced | MutationStatus::Conflict)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationStatus::Pending => write!(f, "pending"),
            MutationStatus::Syncing => write!(f, "syncing"),
            MutationStatus::Synced => write!(f, "synced"),
            MutationStatus::Failed => write!(f, "failed"),
            MutationStatus::Conflict => write!(f, "conflict"),
        }
    }
}

impl FromStr for MutationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(MutationStatus::Pending),
            "syncing" => Ok(MutationStatus::Syncing),
            "synced" => Ok(MutationStatus::Synced),
            "failed" => Ok(MutationStatus::Failed),
            "conflict" => Ok(MutationStatus::Conflict),
            _ => Err(format!(
                "Invalid status '{}'. Valid options: pending, syncing, synced, failed, conflict",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_roundtrip() {
        for status in [
            MutationStatus::Pending,
            MutationStatus::Syncing,
            MutationStatus::Synced,
            MutationStatus::Failed,
            MutationStatus::Conflict,
        ] {
            let parsed = MutationStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_allowed_transitions() {
        use MutationStatus::*;

        assert!(Pending.can_transition_to(Syncing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Syncing.can_transition_to(Failed));
        assert!(Syncing.can_transition_to(Conflict));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Syncing));
    }

    #[test]
    fn test_forbidden_transitions() {
        use MutationStatus::*;

        // Terminal states never move.
        assert!(!Synced.can_transition_to(Pending));
        assert!(!Synced.can_transition_to(Syncing));
        assert!(!Conflict.can_transition_to(Pending));
        assert!(!Conflict.can_transition_to(Syncing));

        // No skipping the syncing stage into terminal success.
        assert!(!Pending.can_transition_to(Synced));
        assert!(!Pending.can_transition_to(Conflict));
        assert!(!Failed.can_transition_to(Synced));

        // No self-transitions.
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Syncing.can_transition_to(Syncing));
    }

    #[test]
    fn test_terminal_states() {
        assert!(MutationStatus::Synced.is_terminal());
        assert!(MutationStatus::Conflict.is_terminal());
        assert!(!MutationStatus::Pending.is_terminal());
        assert!(!MutationStatus::Syncing.is_terminal());
        assert!(!MutationStatus::Failed.is_terminal());
    }
}

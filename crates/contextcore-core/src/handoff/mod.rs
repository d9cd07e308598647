//! Handoff lifecycle state machine
//!
//! | From | To |
//! |---|---|
//! | pending | accepted, rejected, cancelled |
//! | accepted | in_progress, cancelled |
//! | in_progress | input_required, completed, failed, timeout, cancelled |
//! | input_required | in_progress, cancelled, timeout |
//!
//! `completed`, `failed`, `timeout`, `cancelled` and `rejected` are terminal.
//!
//! The legality table is a pure function of (from, to). Applying a
//! transition is the job of [`HandoffRegistry`], which serializes attempts
//! per handoff id.

mod registry;

use contextcore_span::SpanStatus;

use crate::schema::string_enum;

pub use registry::{HandoffRegistry, HANDOFF_CREATED_EVENT, HANDOFF_STATUS_EVENT};

string_enum! {
    /// Lifecycle status of a handoff
    HandoffStatus {
        Pending => "pending",
        Accepted => "accepted",
        InProgress => "in_progress",
        InputRequired => "input_required",
        Completed => "completed",
        Failed => "failed",
        Timeout => "timeout",
        Cancelled => "cancelled",
        Rejected => "rejected",
    }
}

impl HandoffStatus {
    pub const ALL: [HandoffStatus; 9] = [
        HandoffStatus::Pending,
        HandoffStatus::Accepted,
        HandoffStatus::InProgress,
        HandoffStatus::InputRequired,
        HandoffStatus::Completed,
        HandoffStatus::Failed,
        HandoffStatus::Timeout,
        HandoffStatus::Cancelled,
        HandoffStatus::Rejected,
    ];

    /// Statuses reachable in one step.
    pub fn allowed_targets(&self) -> &'static [HandoffStatus] {
        use HandoffStatus::*;
        match self {
            Pending => &[Accepted, Rejected, Cancelled],
            Accepted => &[InProgress, Cancelled],
            InProgress => &[InputRequired, Completed, Failed, Timeout, Cancelled],
            InputRequired => &[InProgress, Cancelled, Timeout],
            Completed | Failed | Timeout | Cancelled | Rejected => &[],
        }
    }

    pub fn can_transition_to(&self, target: HandoffStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandoffStatus::Completed
                | HandoffStatus::Failed
                | HandoffStatus::Timeout
                | HandoffStatus::Cancelled
                | HandoffStatus::Rejected
        )
    }

    /// Work has been taken on and not yet finished.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            HandoffStatus::Accepted | HandoffStatus::InProgress | HandoffStatus::InputRequired
        )
    }

    /// Status the handoff span closes with on terminal entry.
    pub fn span_status(&self) -> Option<SpanStatus> {
        match self {
            HandoffStatus::Completed | HandoffStatus::Cancelled | HandoffStatus::Rejected => {
                Some(SpanStatus::Ok)
            }
            HandoffStatus::Failed | HandoffStatus::Timeout => Some(SpanStatus::Error),
            _ => None,
        }
    }
}

/// Whether the lifecycle allows `current -> target`.
pub fn can_transition_to(current: HandoffStatus, target: HandoffStatus) -> bool {
    current.can_transition_to(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in HandoffStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for target in HandoffStatus::ALL {
                assert!(!status.can_transition_to(target), "{} -> {}", status, target);
            }
            assert!(status.span_status().is_some());
        }
    }

    #[test]
    fn test_active_and_terminal_are_disjoint() {
        for status in HandoffStatus::ALL {
            assert!(!(status.is_active() && status.is_terminal()));
        }
        assert!(!HandoffStatus::Pending.is_active());
        assert!(!HandoffStatus::Pending.is_terminal());
    }

    #[test]
    fn test_no_self_transitions() {
        for status in HandoffStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(HandoffStatus::InputRequired.as_str(), "input_required");
        assert_eq!(
            "in_progress".parse::<HandoffStatus>().unwrap(),
            HandoffStatus::InProgress
        );
        assert_eq!(HandoffStatus::NAMES.len(), HandoffStatus::ALL.len());
    }
}

use carepath_core::types::RunStatus;

/// Describes a single valid status transition for a journey run.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Guards the run lifecycle: `in_progress` may move to `completed` or
/// `failed`, and nothing leaves a terminal status.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    transitions: Vec<StateTransition>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        let transitions = vec![
            StateTransition {
                from: RunStatus::InProgress,
                to: RunStatus::Completed,
            },
            StateTransition {
                from: RunStatus::InProgress,
                to: RunStatus::Failed,
            },
        ];

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed. Staying
    /// `in_progress` is allowed; it is how node progress is recorded.
    pub fn can_transition(&self, from: RunStatus, to: RunStatus) -> bool {
        (from == RunStatus::InProgress && to == RunStatus::InProgress)
            || self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// Whether a run in `status` may still be patched at all.
    pub fn accepts_updates(&self, status: RunStatus) -> bool {
        !status.is_terminal()
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

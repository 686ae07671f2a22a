/// Run status of one sync driver.
///
/// Transitions are controlled externally, based on committee membership and
/// catch-up status: a node only runs the drivers for chains it follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessStatus {
    #[default]
    Stopped,
    Running,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    /// Only Stopped -> Running and Running -> Stopped are meaningful;
    /// re-entering the current state is rejected so double starts are
    /// caught early.
    pub fn can_transition_to(&self, target: ProcessStatus) -> bool {
        *self != target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(ProcessStatus::Stopped.can_transition_to(ProcessStatus::Running));
        assert!(ProcessStatus::Running.can_transition_to(ProcessStatus::Stopped));
        assert!(!ProcessStatus::Running.can_transition_to(ProcessStatus::Running));
        assert!(!ProcessStatus::Stopped.can_transition_to(ProcessStatus::Stopped));
    }
}

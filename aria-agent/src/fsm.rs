use aria_core::error::StateError;
use aria_core::session::SessionState;

/// Pure validator for session lifecycle transitions. Performs no I/O.
/// An illegal transition is an invariant violation; callers treat the
/// returned error as fatal.
#[derive(Debug)]
pub struct SessionFsm {
    state: SessionState,
    history: Vec<(SessionState, SessionState)>,
}

impl Default for SessionFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFsm {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn transition(&mut self, to: SessionState) -> Result<(), StateError> {
        if !legal(self.state, to) {
            return Err(StateError {
                from: self.state,
                to,
            });
        }
        self.history.push((self.state, to));
        self.state = to;
        Ok(())
    }

    pub fn history(&self) -> &[(SessionState, SessionState)] {
        &self.history
    }
}

fn legal(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Idle, Running)
            | (Idle, Cancelled)
            | (Running, Waiting)
            | (Running, Done)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Waiting, Running)
            | (Waiting, Failed)
            | (Waiting, Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn happy_path_reaches_done() {
        let mut fsm = SessionFsm::new();
        fsm.transition(Running).expect("idle -> running");
        fsm.transition(Waiting).expect("running -> waiting");
        fsm.transition(Running).expect("waiting -> running");
        fsm.transition(Done).expect("running -> done");
        assert!(fsm.is_terminal());
        assert_eq!(fsm.history().len(), 4);
    }

    #[test]
    fn every_state_is_reachable_by_legal_transitions() {
        // DONE
        let mut fsm = SessionFsm::new();
        fsm.transition(Running).expect("legal");
        fsm.transition(Done).expect("legal");

        // FAILED from WAITING
        let mut fsm = SessionFsm::new();
        fsm.transition(Running).expect("legal");
        fsm.transition(Waiting).expect("legal");
        fsm.transition(Failed).expect("legal");

        // CANCELLED straight from IDLE
        let mut fsm = SessionFsm::new();
        fsm.transition(Cancelled).expect("legal");
        assert!(fsm.is_terminal());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut fsm = SessionFsm::new();
        let err = fsm.transition(Done).expect_err("idle -> done is illegal");
        assert_eq!(err.from, Idle);
        assert_eq!(err.to, Done);
        // State unchanged after rejection.
        assert_eq!(fsm.state(), Idle);

        fsm.transition(Running).expect("legal");
        assert!(fsm.transition(Idle).is_err());
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for terminal in [Done, Failed, Cancelled] {
            let mut fsm = SessionFsm::new();
            fsm.transition(Running).expect("legal");
            fsm.transition(terminal).expect("legal");
            for next in [Idle, Running, Waiting, Done, Failed, Cancelled] {
                assert!(
                    fsm.transition(next).is_err(),
                    "{terminal:?} -> {next:?} must be rejected"
                );
            }
        }
    }

    #[test]
    fn waiting_cannot_jump_to_done() {
        let mut fsm = SessionFsm::new();
        fsm.transition(Running).expect("legal");
        fsm.transition(Waiting).expect("legal");
        assert!(fsm.transition(Done).is_err());
    }
}

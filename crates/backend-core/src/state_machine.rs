use crate::{
    error::InvalidTransition,
    types::{MatchCommand, MatchEvent, MatchState, MatchStatus, MyQueueState},
};

/// Matching lifecycle: `Idle → Searching → {Paused, Matched} → Chatting → Terminated`.
///
/// Callers validate a command on a clone, run the remote call, and only
/// commit the clone once the server confirmed it.
#[derive(Debug, Clone)]
pub struct MatchingStateMachine {
    state: MatchState,
}

impl Default for MatchingStateMachine {
    fn default() -> Self {
        Self {
            state: MatchState::Idle,
        }
    }
}

impl MatchingStateMachine {
    /// Resume from a persisted match status.
    pub fn from_status(status: MatchStatus) -> Self {
        let state = match status {
            MatchStatus::General => MatchState::Idle,
            MatchStatus::Matched => MatchState::Matched,
            MatchStatus::Terminated => MatchState::Terminated,
        };
        Self { state }
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn apply(&mut self, command: &MatchCommand) -> Result<Vec<MatchEvent>, InvalidTransition> {
        use MatchState::*;

        let action = command.action();
        match command {
            MatchCommand::StartSearch { .. } | MatchCommand::EnterQueue { .. } => {
                self.transition_from_any_of(&[Idle, Searching, Paused, Terminated], Searching, action)
            }
            MatchCommand::PauseSearch => self.transition_from_any_of(&[Searching], Paused, action),
            MatchCommand::ProposeFriend { .. } => {
                self.transition_from_any_of(&[Searching], Searching, action)
            }
            MatchCommand::AcceptFriend { .. } => {
                self.transition_from_any_of(&[Searching], Matched, action)
            }
            MatchCommand::RefreshQueueState => Ok(Vec::new()),
            MatchCommand::EnterChat => {
                self.transition_from_any_of(&[Matched, Chatting], Chatting, action)
            }
            MatchCommand::EndSession { .. } => {
                self.transition_from_any_of(&[Matched, Chatting], Terminated, action)
            }
            MatchCommand::Reset => self.transition_from_any_of(&[Paused, Terminated], Idle, action),
        }
    }

    /// Commit a server-confirmed match observed while polling the queue.
    pub fn on_queue_state(&mut self, queue_state: &MyQueueState) -> Option<MatchEvent> {
        if self.state == MatchState::Searching && queue_state.matched && !queue_state.is_closed() {
            self.state = MatchState::Matched;
            return Some(MatchEvent::StateChanged {
                state: MatchState::Matched,
            });
        }
        None
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[MatchState],
        next: MatchState,
        action: &str,
    ) -> Result<Vec<MatchEvent>, InvalidTransition> {
        if !expected.contains(&self.state) {
            return Err(InvalidTransition::new(self.state, action));
        }
        if self.state == next {
            return Ok(Vec::new());
        }
        self.state = next;
        Ok(vec![MatchEvent::StateChanged { state: next }])
    }
}

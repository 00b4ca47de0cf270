use std::sync::Arc;

use backend_core::{
    BackendChannelError, BackendChannels, ErrorKind, EventStream, MatchCommand, MatchEvent,
    MatchStatus, MatchingStateMachine, SesacFriendQuery, normalize_match_failure,
    normalize_pause_outcome,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::{api::SesacRemote, auth::TokenRefreshGuard};

/// Command/event handle of a running matching runtime.
#[derive(Clone, Debug)]
pub struct MatchingHandle {
    channels: BackendChannels<MatchCommand, MatchEvent>,
}

impl MatchingHandle {
    pub async fn send(&self, command: MatchCommand) -> Result<(), BackendChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream<MatchEvent> {
        self.channels.subscribe()
    }
}

/// Spawn the matching runtime, resuming from the persisted match status.
pub fn spawn_matching(
    guard: Arc<TokenRefreshGuard>,
    remote: Arc<dyn SesacRemote>,
) -> MatchingHandle {
    let (channels, command_rx) = BackendChannels::new(64, 256);
    let state_machine = MatchingStateMachine::from_status(guard.session().match_status());
    let session_cleared = guard.subscribe_cleared();
    let runtime = MatchingRuntime {
        channels: channels.clone(),
        command_rx,
        session_cleared,
        state_machine,
        guard,
        remote,
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    MatchingHandle { channels }
}

struct MatchingRuntime {
    channels: BackendChannels<MatchCommand, MatchEvent>,
    command_rx: mpsc::Receiver<MatchCommand>,
    session_cleared: watch::Receiver<u64>,
    state_machine: MatchingStateMachine,
    guard: Arc<TokenRefreshGuard>,
    remote: Arc<dyn SesacRemote>,
}

impl MatchingRuntime {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Ok(()) = self.session_cleared.changed() => self.resync_from_session(),
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }
        debug!("matching runtime stopped");
    }

    /// The stored status was reset underneath the runtime; follow it.
    fn resync_from_session(&mut self) {
        let resynced = MatchingStateMachine::from_status(self.guard.session().match_status());
        if resynced.state() == self.state_machine.state() {
            return;
        }
        debug!(state = ?resynced.state(), "session cleared; matching state reset");
        self.state_machine = resynced;
        self.channels.emit(MatchEvent::StateChanged {
            state: self.state_machine.state(),
        });
    }

    async fn handle_command(&mut self, command: MatchCommand) {
        let action = command.action();
        let (candidate, transition_events) = match self.validate_transition(&command) {
            Ok(validated) => validated,
            Err(err) => {
                warn!(action, error = %err, "command rejected");
                self.channels.emit(MatchEvent::Rejected {
                    state: err.state,
                    action: err.action,
                });
                return;
            }
        };

        let remote = Arc::clone(&self.remote);
        let guard = Arc::clone(&self.guard);
        match command {
            MatchCommand::StartSearch { coordinate } => {
                let outcome = guard
                    .call(action, |token| {
                        let remote = Arc::clone(&remote);
                        async move { remote.onqueue(&token, &coordinate).await }
                    })
                    .await;
                match outcome {
                    Ok(onqueue) => {
                        self.commit_transition(candidate, transition_events);
                        self.channels.emit(MatchEvent::OnqueueLoaded(onqueue));
                    }
                    Err(error) => self.fail(action, error),
                }
            }
            MatchCommand::EnterQueue { query } => {
                let query = &query;
                let outcome = guard
                    .call(action, |token| {
                        let remote = Arc::clone(&remote);
                        async move { remote.search_sesac(&token, query).await }
                    })
                    .await;
                match outcome {
                    Ok(()) => {
                        self.commit_transition(candidate, transition_events);
                        self.channels.emit(MatchEvent::QueueEntered);
                    }
                    Err(error) => self.fail(action, error),
                }
            }
            MatchCommand::PauseSearch => {
                let outcome = guard
                    .call(action, |token| {
                        let remote = Arc::clone(&remote);
                        async move { remote.pause_search_sesac(&token).await }
                    })
                    .await;
                if outcome.is_ok() {
                    self.persist_status(MatchStatus::General);
                    self.commit_transition(candidate, transition_events);
                } else if outcome == Err(ErrorKind::Duplicated) {
                    debug!(action, "partner already matched; state kept");
                }
                self.channels.emit(normalize_pause_outcome(outcome));
            }
            MatchCommand::ProposeFriend { other_uid } => {
                let query = SesacFriendQuery::new(other_uid);
                let query = &query;
                let outcome = guard
                    .call(action, |token| {
                        let remote = Arc::clone(&remote);
                        async move { remote.sesac_friend(&token, query).await }
                    })
                    .await;
                match outcome {
                    Ok(()) => {
                        self.commit_transition(candidate, transition_events);
                        self.channels.emit(MatchEvent::FriendRequested);
                    }
                    Err(error) => self.fail(action, error),
                }
            }
            MatchCommand::AcceptFriend { other_uid } => {
                let query = SesacFriendQuery::new(other_uid);
                let query = &query;
                let outcome = guard
                    .call(action, |token| {
                        let remote = Arc::clone(&remote);
                        async move { remote.accept_sesac_friend(&token, query).await }
                    })
                    .await;
                match outcome {
                    Ok(()) => {
                        self.persist_status(MatchStatus::Matched);
                        self.commit_transition(candidate, transition_events);
                        self.channels.emit(MatchEvent::FriendAccepted);
                    }
                    Err(error) => self.fail(action, error),
                }
            }
            MatchCommand::RefreshQueueState => {
                let outcome = guard
                    .call(action, |token| {
                        let remote = Arc::clone(&remote);
                        async move { remote.my_queue_state(&token).await }
                    })
                    .await;
                match outcome {
                    Ok(queue_state) => {
                        let confirmed = self.state_machine.on_queue_state(&queue_state);
                        self.channels.emit(MatchEvent::QueueState(queue_state));
                        if let Some(event) = confirmed {
                            self.persist_status(MatchStatus::Matched);
                            self.channels.emit(event);
                        }
                    }
                    Err(error) => self.fail(action, error),
                }
            }
            MatchCommand::EnterChat => self.commit_transition(candidate, transition_events),
            MatchCommand::EndSession { reason } => {
                debug!(?reason, "match ended");
                self.persist_status(MatchStatus::Terminated);
                self.commit_transition(candidate, transition_events);
            }
            MatchCommand::Reset => {
                self.persist_status(MatchStatus::General);
                self.commit_transition(candidate, transition_events);
            }
        }
    }

    fn validate_transition(
        &self,
        command: &MatchCommand,
    ) -> Result<(MatchingStateMachine, Vec<MatchEvent>), backend_core::InvalidTransition> {
        let mut candidate = self.state_machine.clone();
        let events = candidate.apply(command)?;
        Ok((candidate, events))
    }

    fn commit_transition(&mut self, candidate: MatchingStateMachine, events: Vec<MatchEvent>) {
        self.state_machine = candidate;
        for event in events {
            self.channels.emit(event);
        }
    }

    fn persist_status(&self, status: MatchStatus) {
        if let Err(err) = self.guard.session().save_match_status(status) {
            warn!(?status, error = %err, "match status could not be persisted");
        }
    }

    fn fail(&self, action: &'static str, error: ErrorKind) {
        debug!(action, error = error.code(), "command failed");
        self.channels.emit(normalize_match_failure(error));
    }
}

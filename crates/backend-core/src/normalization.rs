//! Turns call outcomes into exactly one presentation signal each.

use crate::{
    error::ErrorKind,
    types::{ChatEvent, ChatNotice, MatchEvent, MyQueueState, SessionEnd},
};

/// One-shot session calls issued from an open chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCall {
    Dodge,
    WriteReview,
    Report,
}

/// How a chat session proceeds after reading the queue state on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    /// Load history, catch up and connect.
    Proceed,
    /// The match already ended; sending is disabled.
    Closed,
    /// No confirmed match exists.
    NotMatched,
}

/// Decide whether a chat session may proceed.
pub fn classify_entry(queue_state: &MyQueueState) -> EntryDecision {
    if queue_state.is_closed() {
        EntryDecision::Closed
    } else if queue_state.matched {
        EntryDecision::Proceed
    } else {
        EntryDecision::NotMatched
    }
}

/// Signal for a queue withdrawal; `Duplicated` means a partner already matched.
pub fn normalize_pause_outcome(outcome: Result<(), ErrorKind>) -> MatchEvent {
    match outcome {
        Ok(()) => MatchEvent::SearchPaused,
        Err(ErrorKind::Duplicated) => MatchEvent::AlreadyMatched,
        Err(error) => MatchEvent::Failed { error },
    }
}

/// Generic failure signal for matching commands.
pub fn normalize_match_failure(error: ErrorKind) -> MatchEvent {
    MatchEvent::Failed { error }
}

/// Signal for a failed chat send; `Duplicated` means the session closed.
pub fn normalize_send_failure(error: ErrorKind) -> ChatEvent {
    match error {
        ErrorKind::Duplicated => ChatEvent::Notice(ChatNotice::ChatClosed),
        error => ChatEvent::Failed { error },
    }
}

/// Signal for a dodge, review or report outcome.
pub fn normalize_session_call(call: SessionCall, outcome: Result<(), ErrorKind>) -> ChatEvent {
    match (call, outcome) {
        (SessionCall::Dodge, Ok(())) => ChatEvent::SessionEnded(SessionEnd::Dodged),
        (SessionCall::WriteReview, Ok(())) => ChatEvent::SessionEnded(SessionEnd::Reviewed),
        (SessionCall::Report, Ok(())) => ChatEvent::Notice(ChatNotice::ReportSubmitted),
        (_, Err(error)) => ChatEvent::Failed { error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_duplicate_means_already_matched() {
        assert_eq!(
            normalize_pause_outcome(Err(ErrorKind::Duplicated)),
            MatchEvent::AlreadyMatched
        );
        assert_eq!(normalize_pause_outcome(Ok(())), MatchEvent::SearchPaused);
        assert_eq!(
            normalize_pause_outcome(Err(ErrorKind::InternalServer)),
            MatchEvent::Failed {
                error: ErrorKind::InternalServer
            }
        );
    }

    #[test]
    fn send_duplicate_means_chat_closed() {
        assert_eq!(
            normalize_send_failure(ErrorKind::Duplicated),
            ChatEvent::Notice(ChatNotice::ChatClosed)
        );
        assert_eq!(
            normalize_send_failure(ErrorKind::Unknown),
            ChatEvent::Failed {
                error: ErrorKind::Unknown
            }
        );
    }

    #[test]
    fn only_dodge_and_review_end_the_session() {
        assert_eq!(
            normalize_session_call(SessionCall::Dodge, Ok(())),
            ChatEvent::SessionEnded(SessionEnd::Dodged)
        );
        assert_eq!(
            normalize_session_call(SessionCall::WriteReview, Ok(())),
            ChatEvent::SessionEnded(SessionEnd::Reviewed)
        );
        assert_eq!(
            normalize_session_call(SessionCall::Report, Ok(())),
            ChatEvent::Notice(ChatNotice::ReportSubmitted)
        );
    }

    #[test]
    fn closed_queue_state_wins_over_matched() {
        let state = MyQueueState {
            matched: true,
            dodged: true,
            ..MyQueueState::default()
        };
        assert_eq!(classify_entry(&state), EntryDecision::Closed);
        assert_eq!(
            classify_entry(&MyQueueState::default()),
            EntryDecision::NotMatched
        );
    }
}

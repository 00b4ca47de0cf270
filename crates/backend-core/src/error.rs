use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::MatchState;

/// Closed failure taxonomy shared by every remote call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// The server already holds a conflicting record (status 201).
    #[error("201:DUPLICATE_ERROR")]
    Duplicated,
    /// The request body was rejected (status 202).
    #[error("202:INVALID_INPUT_BODY_ERROR")]
    InvalidInputBody,
    /// The bearer credential expired or is invalid (status 401).
    #[error("401:INVALID_FCM_TOKEN_ERROR")]
    InvalidToken,
    /// The account was already withdrawn (status 406).
    #[error("406:ALREADY_WITHDRAWN_ERROR")]
    AlreadyWithdrawn,
    /// Server-side failure (status 500).
    #[error("500:INTERNAL_SERVER_ERROR")]
    InternalServer,
    /// Server reported a client-side failure (status 501).
    #[error("501:INTERNAL_CLIENT_ERROR")]
    InternalClient,
    /// Any unmapped status, missing status, transport or decode failure.
    #[error("UN_KNOWN_ERROR")]
    Unknown,
}

impl ErrorKind {
    /// HTTP status this kind was classified from, when it has one.
    pub fn status_code(self) -> Option<u16> {
        match self {
            Self::Duplicated => Some(201),
            Self::InvalidInputBody => Some(202),
            Self::InvalidToken => Some(401),
            Self::AlreadyWithdrawn => Some(406),
            Self::InternalServer => Some(500),
            Self::InternalClient => Some(501),
            Self::Unknown => None,
        }
    }

    /// Stable machine-readable code, suitable for logs and telemetry.
    pub fn code(self) -> &'static str {
        match self {
            Self::Duplicated => "duplicated",
            Self::InvalidInputBody => "invalid_input_body",
            Self::InvalidToken => "invalid_token",
            Self::AlreadyWithdrawn => "already_withdrawn",
            Self::InternalServer => "internal_server",
            Self::InternalClient => "internal_client",
            Self::Unknown => "unknown",
        }
    }
}

/// Map an HTTP status code (if the transport carried one) to an [`ErrorKind`].
pub fn classify_http_status(status: Option<u16>) -> ErrorKind {
    match status {
        Some(201) => ErrorKind::Duplicated,
        Some(202) => ErrorKind::InvalidInputBody,
        Some(401) => ErrorKind::InvalidToken,
        Some(406) => ErrorKind::AlreadyWithdrawn,
        Some(500) => ErrorKind::InternalServer,
        Some(501) => ErrorKind::InternalClient,
        _ => ErrorKind::Unknown,
    }
}

/// A command was issued in a state that does not allow it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("cannot run '{action}' while matching is in state {state:?}")]
pub struct InvalidTransition {
    /// State at the time the command was rejected.
    pub state: MatchState,
    /// Command name.
    pub action: String,
}

impl InvalidTransition {
    pub fn new(state: MatchState, action: impl Into<String>) -> Self {
        Self {
            state,
            action: action.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fixed_status_table() {
        assert_eq!(classify_http_status(Some(201)), ErrorKind::Duplicated);
        assert_eq!(classify_http_status(Some(202)), ErrorKind::InvalidInputBody);
        assert_eq!(classify_http_status(Some(401)), ErrorKind::InvalidToken);
        assert_eq!(classify_http_status(Some(406)), ErrorKind::AlreadyWithdrawn);
        assert_eq!(classify_http_status(Some(500)), ErrorKind::InternalServer);
        assert_eq!(classify_http_status(Some(501)), ErrorKind::InternalClient);
    }

    #[test]
    fn unmapped_or_missing_status_is_unknown() {
        assert_eq!(classify_http_status(Some(200)), ErrorKind::Unknown);
        assert_eq!(classify_http_status(Some(403)), ErrorKind::Unknown);
        assert_eq!(classify_http_status(Some(503)), ErrorKind::Unknown);
        assert_eq!(classify_http_status(None), ErrorKind::Unknown);
    }

    #[test]
    fn status_code_agrees_with_classification() {
        for kind in [
            ErrorKind::Duplicated,
            ErrorKind::InvalidInputBody,
            ErrorKind::InvalidToken,
            ErrorKind::AlreadyWithdrawn,
            ErrorKind::InternalServer,
            ErrorKind::InternalClient,
            ErrorKind::Unknown,
        ] {
            assert_eq!(classify_http_status(kind.status_code()), kind);
        }
    }

    #[test]
    fn keeps_display_codes_stable() {
        assert_eq!(ErrorKind::Duplicated.to_string(), "201:DUPLICATE_ERROR");
        assert_eq!(ErrorKind::Unknown.to_string(), "UN_KNOWN_ERROR");
    }

    #[test]
    fn invalid_transition_names_state_and_action() {
        let err = InvalidTransition::new(MatchState::Idle, "pause_search");
        assert_eq!(
            err.to_string(),
            "cannot run 'pause_search' while matching is in state Idle"
        );
    }
}

//! Core client contract shared between the runtime and presentation consumers.
//!
//! This crate defines the error taxonomy, domain payloads, command/event
//! protocol, matching state machine, chat timeline merge buffer, refresh
//! policy, and channel abstractions. It performs no network I/O.

/// Async command/event channel primitives.
pub mod channel;
/// Closed error taxonomy and HTTP status classification.
pub mod error;
/// Outcome-to-signal normalization helpers.
pub mod normalization;
/// Credential refresh decision policy.
pub mod refresh;
/// Matching lifecycle state machine.
pub mod state_machine;
/// Chat timeline merge buffer.
pub mod timeline;
/// Domain payloads, commands and events.
pub mod types;

pub use channel::{BackendChannelError, BackendChannels, EventStream};
pub use error::{ErrorKind, InvalidTransition, classify_http_status};
pub use normalization::{
    EntryDecision, SessionCall, classify_entry, normalize_match_failure, normalize_pause_outcome,
    normalize_send_failure, normalize_session_call,
};
pub use refresh::{RefreshDecision, RefreshPhase, RefreshPolicy};
pub use state_machine::MatchingStateMachine;
pub use timeline::ChatTimeline;
pub use types::{
    Chat, ChatCommand, ChatDirection, ChatEvent, ChatKey, ChatListPayload, ChatNotice,
    ChatPayload, ChatQuery, Coordinate, MatchCommand, MatchEvent, MatchState, MatchStatus,
    MyQueueState, Onqueue, QueueCandidate, ReportQuery, ReviewQuery, SearchSesacQuery,
    SesacFriendQuery, SessionEnd, TimelineOp, UserInfo, UserRegisterQuery, UserUpdateQuery,
    default_watermark, format_watermark, is_valid_nick,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{BoolFromInt, serde_as};

use crate::error::ErrorKind;

/// Seconds since the Unix epoch for 2000-01-01T00:00:00Z.
const DEFAULT_WATERMARK_SECS: i64 = 946_684_800;
/// Queue type sent with every search request.
const SEARCH_QUEUE_TYPE: i32 = 2;
/// Accepted nickname length in characters.
const NICK_MIN_CHARS: usize = 1;
const NICK_MAX_CHARS: usize = 10;

/// Persisted queue/match status of the current user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    /// Not matched with anyone.
    #[default]
    General,
    /// Server confirmed a match.
    Matched,
    /// A confirmed match was dodged or reviewed.
    Terminated,
}

/// In-process matching lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchState {
    /// No search has been started.
    Idle,
    /// Looking at nearby candidates or waiting in the queue.
    Searching,
    /// Search was withdrawn by the user.
    Paused,
    /// Server confirmed a partner.
    Matched,
    /// A chat session with the partner is open.
    Chatting,
    /// The match ended (dodged or reviewed).
    Terminated,
}

/// Location payload for the nearby-candidate query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    /// Region code derived from the coordinate.
    pub region: i64,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub long: f64,
}

impl Coordinate {
    /// Build a coordinate and derive its region code.
    ///
    /// The region is the decimal concatenation of `floor((lat + 90) * 100)`
    /// and `floor((long + 180) * 100)`.
    pub fn new(lat: f64, long: f64) -> Self {
        Self {
            region: region_code(lat, long),
            lat,
            long,
        }
    }
}

fn region_code(lat: f64, long: f64) -> i64 {
    let lat_part = ((lat + 90.0) * 100.0).floor() as i64;
    let long_part = ((long + 180.0) * 100.0).floor().max(0.0) as i64;
    let digits = long_part.to_string().len() as u32;
    lat_part
        .saturating_mul(10_i64.saturating_pow(digits))
        .saturating_add(long_part)
}

/// A user waiting in the queue near the requested coordinate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueCandidate {
    pub uid: String,
    pub nick: String,
    pub lat: f64,
    pub long: f64,
    #[serde(default)]
    pub reputation: Vec<i32>,
    /// Hobbies the candidate is searching with.
    #[serde(default)]
    pub hf: Vec<String>,
    #[serde(default)]
    pub reviews: Vec<String>,
    pub gender: i32,
    #[serde(rename = "type")]
    pub kind: i32,
    pub sesac: i32,
    pub background: i32,
}

/// Nearby candidates returned by the location query.
///
/// Ephemeral: handed to the presentation layer once and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Onqueue {
    #[serde(rename = "fromQueueDB", default)]
    pub from_queue_db: Vec<QueueCandidate>,
    /// Candidates that already requested the current user.
    #[serde(rename = "fromQueueDBRequested", default)]
    pub from_queue_db_requested: Vec<QueueCandidate>,
    #[serde(rename = "fromRecommend", default)]
    pub from_recommend: Vec<String>,
}

/// Queue snapshot fetched on chat session entry.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MyQueueState {
    #[serde_as(as = "BoolFromInt")]
    pub dodged: bool,
    #[serde_as(as = "BoolFromInt")]
    pub matched: bool,
    #[serde_as(as = "BoolFromInt")]
    pub reviewed: bool,
    #[serde(default)]
    pub matched_nick: Option<String>,
    #[serde(default)]
    pub matched_uid: Option<String>,
}

impl MyQueueState {
    /// Whether the partner session already ended on the server.
    pub fn is_closed(&self) -> bool {
        self.dodged || self.reviewed
    }
}

/// Account details of the signed-in user.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub uid: String,
    pub phone_number: String,
    pub email: String,
    #[serde(rename = "FCMtoken")]
    pub fcm_token: String,
    pub nick: String,
    pub birth: DateTime<Utc>,
    pub gender: i32,
    #[serde(default)]
    pub hobby: String,
    #[serde(default)]
    pub comment: Vec<String>,
    #[serde(default)]
    pub reputation: Vec<i32>,
    #[serde(default)]
    pub sesac: i32,
    #[serde(default)]
    pub background: i32,
    #[serde(default)]
    pub dodgepenalty: i32,
    #[serde(default)]
    pub dodge_num: i32,
    #[serde(default)]
    pub age_min: i32,
    #[serde(default)]
    pub age_max: i32,
    #[serde_as(as = "BoolFromInt")]
    #[serde(default)]
    pub searchable: bool,
}

/// Sign-up payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRegisterQuery {
    pub phone_number: String,
    #[serde(rename = "FCMtoken")]
    pub fcm_token: String,
    pub nick: String,
    pub birth: DateTime<Utc>,
    pub email: String,
    pub gender: i32,
}

impl UserRegisterQuery {
    /// Reject nicknames the server would refuse, before any network call.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if is_valid_nick(&self.nick) {
            Ok(())
        } else {
            Err(ErrorKind::InvalidInputBody)
        }
    }
}

/// Nicknames must be between 1 and 10 characters.
pub fn is_valid_nick(nick: &str) -> bool {
    let count = nick.chars().count();
    (NICK_MIN_CHARS..=NICK_MAX_CHARS).contains(&count)
}

/// Profile settings update payload.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdateQuery {
    #[serde_as(as = "BoolFromInt")]
    pub searchable: bool,
    pub age_min: i32,
    pub age_max: i32,
    pub gender: i32,
    pub hobby: String,
}

/// Queue registration payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSesacQuery {
    #[serde(rename = "type")]
    pub kind: i32,
    pub region: i64,
    pub long: f64,
    pub lat: f64,
    /// Hobbies to search with.
    pub hf: Vec<String>,
}

impl SearchSesacQuery {
    pub fn new(coordinate: Coordinate, hobbies: Vec<String>) -> Self {
        Self {
            kind: SEARCH_QUEUE_TYPE,
            region: coordinate.region,
            long: coordinate.long,
            lat: coordinate.lat,
            hf: hobbies,
        }
    }
}

/// Payload naming the other user; used by friend request/accept and dodge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SesacFriendQuery {
    #[serde(rename = "otheruid")]
    pub other_uid: String,
}

impl SesacFriendQuery {
    pub fn new(other_uid: impl Into<String>) -> Self {
        Self {
            other_uid: other_uid.into(),
        }
    }
}

/// Outbound chat payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatQuery {
    pub chat: String,
}

/// Post-session review payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewQuery {
    #[serde(rename = "otheruid")]
    pub other_uid: String,
    pub reputation: Vec<i32>,
    pub comment: String,
}

/// Abuse report payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportQuery {
    #[serde(rename = "otheruid")]
    pub other_uid: String,
    #[serde(rename = "reportedReputation")]
    pub reported_reputation: Vec<i32>,
    pub comment: String,
}

/// Which side of the conversation wrote a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatDirection {
    Inbound,
    Outbound,
}

/// One chat message in a session timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub direction: ChatDirection,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(direction: ChatDirection, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            direction,
            text: text.into(),
            created_at,
        }
    }

    /// Deduplication identity; messages carry no server ID.
    pub fn key(&self) -> ChatKey {
        ChatKey {
            created_at: self.created_at,
            text: self.text.clone(),
            direction: self.direction,
        }
    }
}

/// Identity of a [`Chat`] for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatKey {
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub direction: ChatDirection,
}

/// Chat message as the server sends it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub to: String,
    pub from: String,
    pub chat: String,
    pub created_at: DateTime<Utc>,
}

impl ChatPayload {
    /// Convert to a timeline message from the point of view of `my_uid`.
    pub fn into_chat(self, my_uid: &str) -> Chat {
        let direction = if self.from == my_uid {
            ChatDirection::Outbound
        } else {
            ChatDirection::Inbound
        };
        Chat::new(direction, self.chat, self.created_at)
    }
}

/// Envelope of the catch-up endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatListPayload {
    #[serde(default)]
    pub payload: Vec<ChatPayload>,
}

/// Watermark used when the local store holds no messages.
pub fn default_watermark() -> DateTime<Utc> {
    DateTime::from_timestamp(DEFAULT_WATERMARK_SECS, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Render a watermark the way the catch-up endpoint expects it.
pub fn format_watermark(watermark: &DateTime<Utc>) -> String {
    watermark.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Reason a chat session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user cancelled the confirmed match.
    Dodged,
    /// The user submitted a review of the partner.
    Reviewed,
}

/// Commands accepted by the matching runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MatchCommand {
    /// Query nearby candidates for a location.
    StartSearch { coordinate: Coordinate },
    /// Register in the queue with hobbies.
    EnterQueue { query: SearchSesacQuery },
    /// Withdraw from the queue.
    PauseSearch,
    /// Ask a candidate to match.
    ProposeFriend { other_uid: String },
    /// Accept a candidate who asked to match.
    AcceptFriend { other_uid: String },
    /// Poll the server-side queue state.
    RefreshQueueState,
    /// A chat session with the partner was opened.
    EnterChat,
    /// The chat session ended.
    EndSession { reason: SessionEnd },
    /// Return to idle after a terminated or paused match.
    Reset,
}

impl MatchCommand {
    /// Stable action name used in logs and rejection signals.
    pub fn action(&self) -> &'static str {
        match self {
            Self::StartSearch { .. } => "start_search",
            Self::EnterQueue { .. } => "enter_queue",
            Self::PauseSearch => "pause_search",
            Self::ProposeFriend { .. } => "propose_friend",
            Self::AcceptFriend { .. } => "accept_friend",
            Self::RefreshQueueState => "refresh_queue_state",
            Self::EnterChat => "enter_chat",
            Self::EndSession { .. } => "end_session",
            Self::Reset => "reset",
        }
    }
}

/// Signals emitted by the matching runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MatchEvent {
    /// Matching lifecycle transition.
    StateChanged { state: MatchState },
    /// Nearby candidates for the last `StartSearch`.
    OnqueueLoaded(Onqueue),
    /// Queue registration confirmed.
    QueueEntered,
    /// Queue withdrawal confirmed.
    SearchPaused,
    /// Withdrawal refused because another user already matched.
    AlreadyMatched,
    /// Match request delivered.
    FriendRequested,
    /// Match accepted and confirmed.
    FriendAccepted,
    /// Server-side queue snapshot.
    QueueState(MyQueueState),
    /// Generic failure notice for one command.
    Failed { error: ErrorKind },
    /// Command rejected locally by the state machine.
    Rejected { state: MatchState, action: String },
}

/// Commands accepted by a chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatCommand {
    /// Run the load, catch-up and connect sequence.
    Enter,
    /// Send a text message.
    SendChat { text: String },
    /// Cancel the confirmed match.
    Dodge,
    /// Review the partner; `ratings` holds one flag per reputation item.
    WriteReview { ratings: Vec<i32>, comment: String },
    /// Report the partner; `reasons` holds one flag per report category.
    Report { reasons: Vec<i32>, comment: String },
}

/// User-facing notices raised by a chat session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatNotice {
    /// The match ended; messages can no longer be sent.
    ChatClosed,
    /// The queue state does not show a match.
    NotMatched,
    /// A report was accepted.
    ReportSubmitted,
}

/// Incremental timeline operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimelineOp {
    /// Replace the whole timeline.
    Reset(Vec<Chat>),
    /// Append one message at the end.
    Append(Chat),
}

/// Signals emitted by a chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    /// Queue snapshot fetched on entry.
    QueueState(MyQueueState),
    /// Title for the session view (partner nickname).
    NavigationTitle(String),
    /// Timeline changes to apply in order.
    TimelineDelta { ops: Vec<TimelineOp> },
    /// Scroll the view to the given item index.
    ScrollToEnd { index: usize },
    /// Clear the message input.
    InputCleared,
    /// Live channel connected or dropped.
    LiveStatus { connected: bool },
    /// Notice to show the user.
    Notice(ChatNotice),
    /// The session is over; the view should close.
    SessionEnded(SessionEnd),
    /// Generic failure notice for one operation.
    Failed { error: ErrorKind },
}

//! Chat session synchronizer: local history, catch-up fetch and the live
//! channel merged into one timeline.
//!
//! Entry runs strictly in order: queue state, local load, paginated catch-up,
//! then live connect. Remote completions are delivered back to the actor and
//! dropped once the session was closed.

use std::{
    future::Future,
    sync::{Arc, Weak},
};

use backend_core::{
    BackendChannelError, BackendChannels, Chat, ChatCommand, ChatDirection, ChatEvent,
    ChatNotice, ChatPayload, ChatQuery, ChatTimeline, EntryDecision, ErrorKind, EventStream,
    MatchCommand, ReportQuery, ReviewQuery, SesacFriendQuery, SessionCall, SessionEnd,
    TimelineOp, classify_entry, normalize_send_failure, normalize_session_call,
};
use backend_platform::ChatStore;
use chrono::{TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    api::SesacRemote,
    auth::TokenRefreshGuard,
    live::{LiveChannel, LiveSession},
    matching::MatchingHandle,
};

const CHAT_ENDED_MESSAGE: &str = "Chat ended.";
const REVIEW_SUBMITTED_MESSAGE: &str = "Review submitted.";

/// Presentation hook used to leave the chat view once a session ends.
pub trait ChatNavigator: Send + Sync {
    fn pop_to_root(&self, message: &str);
}

/// Identity and tuning of one chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSessionConfig {
    pub my_uid: String,
    pub other_uid: String,
    pub catch_up_page_size: u16,
    pub timeline_max_items: usize,
}

/// Collaborators of a chat session.
pub struct ChatSessionDeps {
    pub guard: Arc<TokenRefreshGuard>,
    pub remote: Arc<dyn SesacRemote>,
    pub store: Arc<dyn ChatStore>,
    pub live: Box<dyn LiveChannel>,
    /// Matching runtime notified when the chat opens and ends.
    pub matching: Option<MatchingHandle>,
    pub navigator: Option<Weak<dyn ChatNavigator>>,
}

/// Handle of a running chat session. Dropping it closes the session.
#[derive(Debug)]
pub struct ChatSessionHandle {
    channels: BackendChannels<ChatCommand, ChatEvent>,
    stop: CancellationToken,
}

impl ChatSessionHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), BackendChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream<ChatEvent> {
        self.channels.subscribe()
    }

    /// Disconnect the live channel and ignore any completion still in flight.
    pub fn close(&self) {
        self.stop.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Drop for ChatSessionHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Spawn a chat session. Nothing happens until [`ChatCommand::Enter`].
pub fn spawn_chat_session(config: ChatSessionConfig, deps: ChatSessionDeps) -> ChatSessionHandle {
    let (channels, command_rx) = BackendChannels::new(64, 512);
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let stop = CancellationToken::new();

    let runtime = ChatSessionRuntime {
        channels: channels.clone(),
        command_rx,
        completion_tx,
        completion_rx,
        stop: stop.clone(),
        timeline: ChatTimeline::new(config.timeline_max_items),
        config,
        guard: deps.guard,
        remote: deps.remote,
        store: deps.store,
        live: deps.live,
        matching: deps.matching,
        navigator: deps.navigator,
        entered: false,
        sends_open: false,
        connected: false,
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    ChatSessionHandle { channels, stop }
}

#[derive(Debug)]
enum Completion {
    Sent(Result<ChatPayload, ErrorKind>),
    Session(SessionCall, Result<(), ErrorKind>),
}

struct ChatSessionRuntime {
    channels: BackendChannels<ChatCommand, ChatEvent>,
    command_rx: mpsc::Receiver<ChatCommand>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    stop: CancellationToken,
    config: ChatSessionConfig,
    timeline: ChatTimeline,
    guard: Arc<TokenRefreshGuard>,
    remote: Arc<dyn SesacRemote>,
    store: Arc<dyn ChatStore>,
    live: Box<dyn LiveChannel>,
    matching: Option<MatchingHandle>,
    navigator: Option<Weak<dyn ChatNavigator>>,
    entered: bool,
    sends_open: bool,
    connected: bool,
}

impl ChatSessionRuntime {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion).await;
                }
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                inbound = self.live.recv(), if self.connected => self.handle_live(inbound),
            }
        }

        self.live.disconnect().await;
        self.connected = false;
        debug!(other_uid = %self.config.other_uid, "chat session closed");
    }

    async fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::Enter => {
                let stop = self.stop.clone();
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => debug!("chat session closed during entry"),
                    () = self.enter() => {}
                }
            }
            ChatCommand::SendChat { text } => self.send_chat(text),
            ChatCommand::Dodge => {
                let query = SesacFriendQuery::new(self.config.other_uid.clone());
                let remote = Arc::clone(&self.remote);
                self.spawn_remote(
                    "dodge",
                    move |token| {
                        let remote = Arc::clone(&remote);
                        let query = query.clone();
                        async move { remote.dodge(&token, &query).await }
                    },
                    |outcome| Completion::Session(SessionCall::Dodge, outcome),
                );
            }
            ChatCommand::WriteReview { ratings, comment } => {
                let query = ReviewQuery {
                    other_uid: self.config.other_uid.clone(),
                    reputation: ratings,
                    comment,
                };
                let remote = Arc::clone(&self.remote);
                self.spawn_remote(
                    "write_review",
                    move |token| {
                        let remote = Arc::clone(&remote);
                        let query = query.clone();
                        async move { remote.write_review(&token, &query).await }
                    },
                    |outcome| Completion::Session(SessionCall::WriteReview, outcome),
                );
            }
            ChatCommand::Report { reasons, comment } => {
                let query = ReportQuery {
                    other_uid: self.config.other_uid.clone(),
                    reported_reputation: reasons,
                    comment,
                };
                let remote = Arc::clone(&self.remote);
                self.spawn_remote(
                    "report",
                    move |token| {
                        let remote = Arc::clone(&remote);
                        let query = query.clone();
                        async move { remote.report(&token, &query).await }
                    },
                    |outcome| Completion::Session(SessionCall::Report, outcome),
                );
            }
        }
    }

    async fn enter(&mut self) {
        if self.entered {
            debug!("chat session already entered");
            return;
        }
        self.entered = true;

        let remote = Arc::clone(&self.remote);
        let queue_state = match self
            .guard
            .call("my_queue_state", |token| {
                let remote = Arc::clone(&remote);
                async move { remote.my_queue_state(&token).await }
            })
            .await
        {
            Ok(queue_state) => queue_state,
            Err(error) => {
                // Nothing was entered; a later Enter starts over.
                self.entered = false;
                self.channels.emit(ChatEvent::Failed { error });
                return;
            }
        };

        let decision = classify_entry(&queue_state);
        let title = queue_state.matched_nick.clone();
        self.channels.emit(ChatEvent::QueueState(queue_state));
        if let Some(title) = title {
            self.channels.emit(ChatEvent::NavigationTitle(title));
        }

        match decision {
            EntryDecision::Proceed => {}
            EntryDecision::Closed => {
                info!(other_uid = %self.config.other_uid, "match already ended; chat closed");
                self.channels.emit(ChatEvent::Notice(ChatNotice::ChatClosed));
                return;
            }
            EntryDecision::NotMatched => {
                self.channels.emit(ChatEvent::Notice(ChatNotice::NotMatched));
                return;
            }
        }

        self.sends_open = true;
        self.notify_matching(MatchCommand::EnterChat).await;
        self.load_local();
        self.catch_up().await;
        self.connect_live().await;
    }

    fn load_local(&mut self) {
        let stored = match self.store.load_messages(&self.config.other_uid) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "local chat history could not be loaded");
                Vec::new()
            }
        };
        debug!(count = stored.len(), "local chat history loaded");
        let ops = self.timeline.apply_ops(&[TimelineOp::Reset(stored)]);
        self.emit_delta(ops);
    }

    async fn catch_up(&mut self) {
        let page_size = usize::from(self.config.catch_up_page_size);
        let mut watermark = ChatTimeline::watermark(self.timeline.items());

        loop {
            let remote = Arc::clone(&self.remote);
            let other_uid = self.config.other_uid.as_str();
            let after = watermark;
            let page = self
                .guard
                .call("chat", |token| {
                    let remote = Arc::clone(&remote);
                    async move { remote.chat_since(&token, other_uid, &after).await }
                })
                .await;

            let page = match page {
                Ok(page) => page,
                Err(error) => {
                    warn!(error = error.code(), "catch-up fetch failed");
                    self.channels.emit(ChatEvent::Failed { error });
                    return;
                }
            };

            let fetched = page.len();
            let chats: Vec<Chat> = page
                .into_iter()
                .map(|payload| payload.into_chat(&self.config.my_uid))
                .collect();
            let newest = chats.iter().map(|chat| chat.created_at).max();
            debug!(count = fetched, %watermark, "catch-up page received");
            self.absorb(chats, true);

            match newest {
                Some(newest) if fetched >= page_size && newest > watermark => {
                    watermark = newest;
                }
                _ => break,
            }
        }
    }

    async fn connect_live(&mut self) {
        let session = LiveSession {
            my_uid: self.config.my_uid.clone(),
            other_uid: self.config.other_uid.clone(),
        };
        match self.live.connect(&session).await {
            Ok(()) => self.connected = true,
            Err(err) => warn!(error = %err, "live channel could not connect"),
        }
        self.channels.emit(ChatEvent::LiveStatus {
            connected: self.connected,
        });
    }

    fn handle_live(&mut self, inbound: Option<ChatPayload>) {
        let Some(payload) = inbound else {
            self.connected = false;
            self.channels.emit(ChatEvent::LiveStatus { connected: false });
            return;
        };

        if payload.from != self.config.other_uid && payload.to != self.config.other_uid {
            debug!("ignoring live message for another session");
            return;
        }
        let chat = payload.into_chat(&self.config.my_uid);
        self.absorb(vec![chat], true);
    }

    fn send_chat(&mut self, text: String) {
        if !self.sends_open {
            self.channels.emit(ChatEvent::Notice(ChatNotice::ChatClosed));
            return;
        }
        if text.trim().is_empty() {
            self.channels.emit(ChatEvent::Failed {
                error: ErrorKind::InvalidInputBody,
            });
            return;
        }

        // Keep timestamps strictly increasing so call order is display order.
        let now = Utc::now();
        let created_at = match self.timeline.last() {
            Some(last) if last.created_at >= now => last.created_at + TimeDelta::milliseconds(1),
            _ => now,
        };
        let ops = self
            .timeline
            .apply_ops(&[TimelineOp::Append(Chat::new(
                ChatDirection::Outbound,
                text.clone(),
                created_at,
            ))]);
        if !ops.is_empty() {
            self.channels.emit(ChatEvent::TimelineDelta { ops });
        }
        self.channels.emit(ChatEvent::InputCleared);
        self.emit_scroll();

        let query = ChatQuery { chat: text };
        let other_uid = self.config.other_uid.clone();
        let remote = Arc::clone(&self.remote);
        self.spawn_remote(
            "send_chat",
            move |token| {
                let remote = Arc::clone(&remote);
                let other_uid = other_uid.clone();
                let query = query.clone();
                async move { remote.send_chat(&token, &other_uid, &query).await }
            },
            Completion::Sent,
        );
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Sent(Ok(payload)) => {
                self.persist(&payload.into_chat(&self.config.my_uid));
            }
            Completion::Sent(Err(error)) => {
                if error == ErrorKind::Duplicated {
                    self.sends_open = false;
                }
                self.channels.emit(normalize_send_failure(error));
            }
            Completion::Session(call, outcome) => {
                let event = normalize_session_call(call, outcome);
                let ended = match &event {
                    ChatEvent::SessionEnded(reason) => Some(*reason),
                    _ => None,
                };
                self.channels.emit(event);
                if let Some(reason) = ended {
                    self.end_session(reason).await;
                }
            }
        }
    }

    async fn end_session(&mut self, reason: SessionEnd) {
        self.sends_open = false;
        self.notify_matching(MatchCommand::EndSession { reason }).await;

        let message = match reason {
            SessionEnd::Dodged => CHAT_ENDED_MESSAGE,
            SessionEnd::Reviewed => REVIEW_SUBMITTED_MESSAGE,
        };
        match self.navigator.as_ref().and_then(Weak::upgrade) {
            Some(navigator) => navigator.pop_to_root(message),
            None => debug!("navigator gone; skipping navigation"),
        }
        self.stop.cancel();
    }

    /// Merge messages into the timeline, persist the new ones and signal the view.
    fn absorb(&mut self, chats: Vec<Chat>, persist: bool) {
        let ops = self.timeline.merge(chats);
        if persist {
            for op in &ops {
                if let TimelineOp::Append(chat) = op {
                    self.persist(chat);
                }
            }
        }
        self.emit_delta(ops);
    }

    fn persist(&self, chat: &Chat) {
        if let Err(err) = self.store.append(&self.config.other_uid, chat) {
            warn!(error = %err, "chat could not be persisted");
        }
    }

    fn emit_delta(&self, ops: Vec<TimelineOp>) {
        if ops.is_empty() {
            return;
        }
        self.channels.emit(ChatEvent::TimelineDelta { ops });
        self.emit_scroll();
    }

    fn emit_scroll(&self) {
        if let Some(index) = self.timeline.len().checked_sub(1) {
            self.channels.emit(ChatEvent::ScrollToEnd { index });
        }
    }

    async fn notify_matching(&mut self, command: MatchCommand) {
        if let Some(matching) = &self.matching
            && let Err(err) = matching.send(command).await
        {
            warn!(error = %err, "matching runtime unavailable");
        }
    }

    /// Run a guarded call off the actor; its completion is ignored once the
    /// session was closed.
    fn spawn_remote<T, F, Fut>(
        &self,
        action: &'static str,
        op: F,
        wrap: fn(Result<T, ErrorKind>) -> Completion,
    ) where
        T: Send + 'static,
        F: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ErrorKind>> + Send + 'static,
    {
        let guard = Arc::clone(&self.guard);
        let stop = self.stop.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let outcome = guard.call(action, op).await;
            if stop.is_cancelled() {
                debug!(action, "session closed; ignoring completion");
                return;
            }
            let _ = completion_tx.send(wrap(outcome));
        });
    }
}

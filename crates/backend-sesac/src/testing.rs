//! In-process doubles for the remote service and the identity provider.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use backend_core::{
    ChatPayload, ChatQuery, Coordinate, ErrorKind, MyQueueState, Onqueue, ReportQuery,
    ReviewQuery, SearchSesacQuery, SesacFriendQuery, UserInfo, UserRegisterQuery,
    UserUpdateQuery,
};
use backend_platform::{PersistentSessionStore, SessionStore};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Notify, mpsc};

use crate::{
    api::SesacRemote,
    auth::TokenRefreshGuard,
    identity::IdentityProvider,
    live::{LiveChannel, LiveChannelError, LiveSession},
};

/// Identity provider handing out a fixed outcome and counting calls.
pub(crate) struct StubIdentity {
    outcome: Result<String, ErrorKind>,
    delay: Duration,
    pub(crate) calls: AtomicUsize,
}

impl StubIdentity {
    pub(crate) fn issuing(token: &str) -> Self {
        Self {
            outcome: Ok(token.to_owned()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            outcome: Err(ErrorKind::InternalServer),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl IdentityProvider for StubIdentity {
    async fn refresh_token(&self) -> Result<String, ErrorKind> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

/// Session store seeded with a credential and the signed-in uid `u-1`.
pub(crate) fn session_with(token: &str) -> Arc<dyn SessionStore> {
    let store = PersistentSessionStore::in_memory();
    store.save_credential(token).expect("seed credential");
    store.save_identity("u-1", "me").expect("seed identity");
    Arc::new(store)
}

pub(crate) fn guard_for(session: Arc<dyn SessionStore>) -> Arc<TokenRefreshGuard> {
    Arc::new(TokenRefreshGuard::new(
        session,
        Arc::new(StubIdentity::issuing("fresh")),
    ))
}

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_644_900_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

pub(crate) fn payload(from: &str, to: &str, text: &str, secs: i64) -> ChatPayload {
    ChatPayload {
        id: format!("{from}-{secs}"),
        to: to.to_owned(),
        from: from.to_owned(),
        chat: text.to_owned(),
        created_at: at(secs),
    }
}

/// Scripted [`SesacRemote`] recording every call in order.
#[derive(Default)]
pub(crate) struct MockRemote {
    pub(crate) log: Arc<Mutex<Vec<String>>>,
    pub(crate) queue_state: Mutex<Option<Result<MyQueueState, ErrorKind>>>,
    pub(crate) onqueue: Mutex<Option<Result<Onqueue, ErrorKind>>>,
    /// Outcome for every call returning `()` that has no explicit script.
    pub(crate) unit_outcome: Mutex<Option<Result<(), ErrorKind>>>,
    pub(crate) pause_outcome: Mutex<Option<Result<(), ErrorKind>>>,
    pub(crate) chat_pages: Mutex<VecDeque<Result<Vec<ChatPayload>, ErrorKind>>>,
    pub(crate) watermarks: Mutex<Vec<DateTime<Utc>>>,
    pub(crate) send_outcome: Mutex<Option<Result<ChatPayload, ErrorKind>>>,
    /// When set, `send_chat` waits for a notification before answering.
    pub(crate) send_gate: Option<Arc<Notify>>,
    pub(crate) queue_gate: Option<Arc<Notify>>,
    pub(crate) user: Mutex<Option<UserInfo>>,
}

impl MockRemote {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }

    pub(crate) fn call_count(&self, name: &str) -> usize {
        self.calls().iter().filter(|call| *call == name).count()
    }

    fn record(&self, name: &str) {
        self.log.lock().expect("log lock").push(name.to_owned());
    }

    fn unit(&self, name: &str) -> Result<(), ErrorKind> {
        self.record(name);
        self.unit_outcome
            .lock()
            .expect("unit lock")
            .clone()
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl SesacRemote for MockRemote {
    async fn user_info(&self, _token: &str) -> Result<UserInfo, ErrorKind> {
        self.record("user_info");
        self.user
            .lock()
            .expect("user lock")
            .clone()
            .ok_or(ErrorKind::Unknown)
    }

    async fn register(&self, _token: &str, query: &UserRegisterQuery) -> Result<(), ErrorKind> {
        query.validate()?;
        self.unit("register")
    }

    async fn withdraw(&self, _token: &str) -> Result<(), ErrorKind> {
        self.unit("withdraw")
    }

    async fn update_user_info(
        &self,
        _token: &str,
        _query: &UserUpdateQuery,
    ) -> Result<(), ErrorKind> {
        self.unit("update_user_info")
    }

    async fn onqueue(&self, _token: &str, _coordinate: &Coordinate) -> Result<Onqueue, ErrorKind> {
        self.record("onqueue");
        self.onqueue
            .lock()
            .expect("onqueue lock")
            .clone()
            .unwrap_or_else(|| Ok(Onqueue::default()))
    }

    async fn search_sesac(&self, _token: &str, _query: &SearchSesacQuery) -> Result<(), ErrorKind> {
        self.unit("search_sesac")
    }

    async fn pause_search_sesac(&self, _token: &str) -> Result<(), ErrorKind> {
        self.record("pause_search_sesac");
        self.pause_outcome
            .lock()
            .expect("pause lock")
            .clone()
            .unwrap_or(Ok(()))
    }

    async fn my_queue_state(&self, _token: &str) -> Result<MyQueueState, ErrorKind> {
        self.record("my_queue_state");
        if let Some(gate) = &self.queue_gate {
            gate.notified().await;
        }
        self.queue_state
            .lock()
            .expect("queue state lock")
            .clone()
            .unwrap_or_else(|| Ok(MyQueueState::default()))
    }

    async fn sesac_friend(&self, _token: &str, _query: &SesacFriendQuery) -> Result<(), ErrorKind> {
        self.unit("sesac_friend")
    }

    async fn accept_sesac_friend(
        &self,
        _token: &str,
        _query: &SesacFriendQuery,
    ) -> Result<(), ErrorKind> {
        self.unit("accept_sesac_friend")
    }

    async fn chat_since(
        &self,
        _token: &str,
        _other_uid: &str,
        after: &DateTime<Utc>,
    ) -> Result<Vec<ChatPayload>, ErrorKind> {
        self.record("chat_since");
        self.watermarks.lock().expect("watermark lock").push(*after);
        self.chat_pages
            .lock()
            .expect("pages lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn send_chat(
        &self,
        _token: &str,
        other_uid: &str,
        query: &ChatQuery,
    ) -> Result<ChatPayload, ErrorKind> {
        self.record("send_chat");
        if let Some(gate) = &self.send_gate {
            gate.notified().await;
        }
        self.send_outcome
            .lock()
            .expect("send lock")
            .clone()
            .unwrap_or_else(|| Ok(payload("u-1", other_uid, &query.chat, 10_000)))
    }

    async fn dodge(&self, _token: &str, _query: &SesacFriendQuery) -> Result<(), ErrorKind> {
        self.unit("dodge")
    }

    async fn write_review(&self, _token: &str, _query: &ReviewQuery) -> Result<(), ErrorKind> {
        self.unit("write_review")
    }

    async fn report(&self, _token: &str, _query: &ReportQuery) -> Result<(), ErrorKind> {
        self.unit("report")
    }
}

/// Live channel fed by the test; connects and disconnects are logged into
/// the shared call log.
pub(crate) struct MockLive {
    log: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::UnboundedReceiver<ChatPayload>,
}

impl MockLive {
    pub(crate) fn new(
        log: Arc<Mutex<Vec<String>>>,
    ) -> (Self, mpsc::UnboundedSender<ChatPayload>) {
        let (tx, inbound) = mpsc::unbounded_channel();
        (Self { log, inbound }, tx)
    }
}

#[async_trait]
impl LiveChannel for MockLive {
    async fn connect(&mut self, _session: &LiveSession) -> Result<(), LiveChannelError> {
        self.log.lock().expect("log lock").push("connect".into());
        Ok(())
    }

    async fn send(&mut self, _text: &str) -> Result<(), LiveChannelError> {
        Ok(())
    }

    async fn recv(&mut self) -> Option<ChatPayload> {
        self.inbound.recv().await
    }

    async fn disconnect(&mut self) {
        self.log.lock().expect("log lock").push("disconnect".into());
    }
}

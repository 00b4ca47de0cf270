//! SeSAC matching backend runtime: REST transport, credential refresh, the
//! matching actor and per-partner chat sessions.

use std::sync::{Arc, Weak};

use backend_core::ErrorKind;
#[cfg(not(feature = "os-keyring"))]
use backend_platform::InMemorySecretStore;
#[cfg(feature = "os-keyring")]
use backend_platform::OsKeyringSecretStore;
use backend_platform::{
    ChatStore, JsonFileChatStore, PersistentSessionStore, SessionStore, SessionStoreError,
};
use thiserror::Error;
use tracing::{info, warn};

pub mod account;
pub mod api;
pub mod auth;
pub mod chat_session;
pub mod config;
pub mod identity;
pub mod live;
pub mod matching;
#[cfg(test)]
mod testing;

pub use account::AccountService;
pub use api::{SesacApi, SesacRemote};
pub use auth::TokenRefreshGuard;
pub use chat_session::{
    ChatNavigator, ChatSessionConfig, ChatSessionDeps, ChatSessionHandle, spawn_chat_session,
};
pub use config::{ConfigError, SesacConfig};
pub use identity::{FirebaseIdentityProvider, IdentityProvider, UnavailableIdentity};
pub use live::{LiveChannel, LiveChannelError, LiveSession, WsLiveChannel};
pub use matching::{MatchingHandle, spawn_matching};

#[cfg(feature = "os-keyring")]
const KEYRING_SERVICE: &str = "dev.sesac.study";
const CHAT_DIR: &str = "chats";

#[cfg(feature = "os-keyring")]
type DefaultSecretStore = OsKeyringSecretStore;
#[cfg(not(feature = "os-keyring"))]
type DefaultSecretStore = InMemorySecretStore;

#[derive(Debug, Error)]
pub enum BackendInitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("http client could not be built: {0}")]
    Http(#[from] reqwest::Error),
    #[error("session store could not be loaded: {0}")]
    Session(#[from] SessionStoreError),
    #[error("identity endpoint is invalid: {0}")]
    Identity(#[from] url::ParseError),
}

/// Process-wide backend: one matching runtime plus chat sessions opened on
/// demand. Must be created inside a Tokio runtime.
pub struct SesacBackend {
    config: SesacConfig,
    guard: Arc<TokenRefreshGuard>,
    remote: Arc<dyn SesacRemote>,
    store: Arc<dyn ChatStore>,
    matching: MatchingHandle,
    account: AccountService,
}

impl SesacBackend {
    pub fn new(
        config: SesacConfig,
        session: Arc<dyn SessionStore>,
        identity: Arc<dyn IdentityProvider>,
        remote: Arc<dyn SesacRemote>,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        let guard = Arc::new(TokenRefreshGuard::new(session, identity));
        let matching = spawn_matching(Arc::clone(&guard), Arc::clone(&remote));
        let account = AccountService::new(Arc::clone(&guard), Arc::clone(&remote));

        Self {
            config,
            guard,
            remote,
            store,
            matching,
            account,
        }
    }

    pub fn from_env() -> Result<Self, BackendInitError> {
        Self::from_config(SesacConfig::from_env()?)
    }

    /// Wire the production collaborators: reqwest transport, persisted
    /// session and chat history under `data_dir`.
    pub fn from_config(config: SesacConfig) -> Result<Self, BackendInitError> {
        let api = SesacApi::new(&config)?;
        let secrets = default_secret_store();
        let session =
            PersistentSessionStore::init(secrets.clone(), Some(config.data_dir.as_path()))?;

        let identity: Arc<dyn IdentityProvider> = match &config.firebase_api_key {
            Some(api_key) => Arc::new(FirebaseIdentityProvider::new(
                api.http().clone(),
                api_key.clone(),
                secrets,
            )?),
            None => {
                warn!("no identity API key configured; expired credentials will log out");
                Arc::new(UnavailableIdentity)
            }
        };
        let store = JsonFileChatStore::new(config.data_dir.join(CHAT_DIR));
        info!(
            base_url = %config.base_url,
            data_dir = %config.data_dir.display(),
            "backend initialized"
        );

        Ok(Self::new(
            config,
            Arc::new(session),
            identity,
            Arc::new(api),
            Arc::new(store),
        ))
    }

    pub fn config(&self) -> &SesacConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        self.guard.session()
    }

    pub fn matching(&self) -> &MatchingHandle {
        &self.matching
    }

    pub fn account(&self) -> &AccountService {
        &self.account
    }

    /// Open a chat with the matched partner over the WebSocket live channel.
    pub fn open_chat(
        &self,
        other_uid: impl Into<String>,
        navigator: Option<Weak<dyn ChatNavigator>>,
    ) -> Result<ChatSessionHandle, ErrorKind> {
        let live = WsLiveChannel::new(self.config.socket_url.clone());
        self.open_chat_with(other_uid, Box::new(live), navigator)
    }

    pub fn open_chat_with(
        &self,
        other_uid: impl Into<String>,
        live: Box<dyn LiveChannel>,
        navigator: Option<Weak<dyn ChatNavigator>>,
    ) -> Result<ChatSessionHandle, ErrorKind> {
        let Some(my_uid) = self.session().profile().uid else {
            warn!("chat requested before the account identity is known");
            return Err(ErrorKind::Unknown);
        };

        let config = ChatSessionConfig {
            my_uid,
            other_uid: other_uid.into(),
            catch_up_page_size: self.config.catch_up_page_size,
            timeline_max_items: self.config.timeline_max_items,
        };
        let deps = ChatSessionDeps {
            guard: Arc::clone(&self.guard),
            remote: Arc::clone(&self.remote),
            store: Arc::clone(&self.store),
            live,
            matching: Some(self.matching.clone()),
            navigator,
        };
        Ok(spawn_chat_session(config, deps))
    }
}

#[cfg(feature = "os-keyring")]
fn default_secret_store() -> DefaultSecretStore {
    OsKeyringSecretStore::new(KEYRING_SERVICE)
}

#[cfg(not(feature = "os-keyring"))]
fn default_secret_store() -> DefaultSecretStore {
    InMemorySecretStore::default()
}

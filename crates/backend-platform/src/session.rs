use std::{
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use backend_core::MatchStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    json_file::{JsonFileError, read_json, remove_json, write_json},
    secret::{InMemorySecretStore, SecretStore, SecretStoreError},
};

const CREDENTIAL_ACCOUNT: &str = "id-token";
const PROFILE_FILENAME: &str = "session-profile.json";

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("credential storage failed: {0}")]
    Secret(#[from] SecretStoreError),
    #[error("profile storage failed: {0}")]
    File(#[from] JsonFileError),
}

/// Non-secret session metadata remembered between launches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionProfile {
    /// Server-assigned user ID of the signed-in account.
    pub uid: Option<String>,
    pub nick: Option<String>,
    pub match_status: MatchStatus,
}

/// Process-wide session state: current credential, match status and profile.
///
/// The refresh guard is the only writer of the credential and the matching
/// runtime the only writer of the match status.
pub trait SessionStore: Send + Sync {
    fn credential(&self) -> Option<String>;

    fn save_credential(&self, token: &str) -> Result<(), SessionStoreError>;

    fn match_status(&self) -> MatchStatus;

    fn save_match_status(&self, status: MatchStatus) -> Result<(), SessionStoreError>;

    fn profile(&self) -> SessionProfile;

    fn save_identity(&self, uid: &str, nick: &str) -> Result<(), SessionStoreError>;

    /// Forget everything; used on logout and withdrawal.
    fn clear_session(&self) -> Result<(), SessionStoreError>;
}

#[derive(Debug, Default)]
struct SessionState {
    credential: Option<String>,
    profile: SessionProfile,
}

/// Session store backed by a [`SecretStore`] for the credential and an
/// optional JSON file for the profile.
pub struct PersistentSessionStore<S: SecretStore> {
    secrets: S,
    profile_path: Option<PathBuf>,
    state: RwLock<SessionState>,
}

impl PersistentSessionStore<InMemorySecretStore> {
    /// Memory-only store, mostly for tests and smoke runs.
    pub fn in_memory() -> Self {
        Self {
            secrets: InMemorySecretStore::default(),
            profile_path: None,
            state: RwLock::new(SessionState::default()),
        }
    }
}

impl<S: SecretStore> PersistentSessionStore<S> {
    /// Load persisted state on launch. With `data_dir` unset the profile is
    /// kept in memory only.
    pub fn init(secrets: S, data_dir: Option<&Path>) -> Result<Self, SessionStoreError> {
        let profile_path = data_dir.map(|dir| dir.join(PROFILE_FILENAME));
        let credential = secrets.find_secret(CREDENTIAL_ACCOUNT)?;
        let profile = match &profile_path {
            Some(path) => read_json::<SessionProfile>(path)?.unwrap_or_default(),
            None => SessionProfile::default(),
        };
        debug!(
            has_credential = credential.is_some(),
            match_status = ?profile.match_status,
            "session state loaded"
        );

        Ok(Self {
            secrets,
            profile_path,
            state: RwLock::new(SessionState {
                credential,
                profile,
            }),
        })
    }

    fn update_profile(
        &self,
        update: impl FnOnce(&mut SessionProfile),
    ) -> Result<(), SessionStoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = state.profile.clone();
        update(&mut next);
        if let Some(path) = &self.profile_path {
            write_json(path, &next)?;
        }
        state.profile = next;
        Ok(())
    }
}

impl<S: SecretStore> SessionStore for PersistentSessionStore<S> {
    fn credential(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .credential
            .clone()
    }

    fn save_credential(&self, token: &str) -> Result<(), SessionStoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.secrets.set_secret(CREDENTIAL_ACCOUNT, token)?;
        state.credential = Some(token.to_owned());
        Ok(())
    }

    fn match_status(&self) -> MatchStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .profile
            .match_status
    }

    fn save_match_status(&self, status: MatchStatus) -> Result<(), SessionStoreError> {
        debug!(?status, "persisting match status");
        self.update_profile(|profile| profile.match_status = status)
    }

    fn profile(&self) -> SessionProfile {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .profile
            .clone()
    }

    fn save_identity(&self, uid: &str, nick: &str) -> Result<(), SessionStoreError> {
        self.update_profile(|profile| {
            profile.uid = Some(uid.to_owned());
            profile.nick = Some(nick.to_owned());
        })
    }

    fn clear_session(&self) -> Result<(), SessionStoreError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = SessionState::default();
        self.secrets.forget_secret(CREDENTIAL_ACCOUNT)?;
        if let Some(path) = &self.profile_path {
            remove_json(path)?;
        }
        debug!("session state cleared");
        Ok(())
    }
}

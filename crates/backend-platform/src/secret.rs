use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret not found")]
    NotFound,
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
    #[error("secret store backend failure: {0}")]
    Backend(String),
}

/// Durable storage for bearer credentials and refresh tokens, keyed by account.
pub trait SecretStore: Send + Sync {
    fn set_secret(&self, account: &str, secret: &str) -> Result<(), SecretStoreError>;

    fn get_secret(&self, account: &str) -> Result<String, SecretStoreError>;

    fn delete_secret(&self, account: &str) -> Result<(), SecretStoreError>;

    /// Read a secret, treating a missing entry as `None`.
    fn find_secret(&self, account: &str) -> Result<Option<String>, SecretStoreError> {
        match self.get_secret(account) {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretStoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Delete a secret, treating a missing entry as success.
    fn forget_secret(&self, account: &str) -> Result<(), SecretStoreError> {
        match self.delete_secret(account) {
            Ok(()) | Err(SecretStoreError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl<S: SecretStore + ?Sized> SecretStore for Arc<S> {
    fn set_secret(&self, account: &str, secret: &str) -> Result<(), SecretStoreError> {
        (**self).set_secret(account, secret)
    }

    fn get_secret(&self, account: &str) -> Result<String, SecretStoreError> {
        (**self).get_secret(account)
    }

    fn delete_secret(&self, account: &str) -> Result<(), SecretStoreError> {
        (**self).delete_secret(account)
    }
}

/// Process-local secret store; contents are lost on exit.
#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl SecretStore for InMemorySecretStore {
    fn set_secret(&self, account: &str, secret: &str) -> Result<(), SecretStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SecretStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(account.to_owned(), secret.to_owned());
        Ok(())
    }

    fn get_secret(&self, account: &str) -> Result<String, SecretStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| SecretStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(account).cloned().ok_or(SecretStoreError::NotFound)
    }

    fn delete_secret(&self, account: &str) -> Result<(), SecretStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SecretStoreError::Backend("poisoned lock".to_owned()))?;
        data.remove(account)
            .map(|_| ())
            .ok_or(SecretStoreError::NotFound)
    }
}

/// OS keychain store; every account lives under one keyring service name.
#[cfg(feature = "os-keyring")]
#[derive(Debug, Clone)]
pub struct OsKeyringSecretStore {
    service: String,
}

#[cfg(feature = "os-keyring")]
impl OsKeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry, SecretStoreError> {
        keyring::Entry::new(&self.service, account)
            .map_err(|err| SecretStoreError::Backend(err.to_string()))
    }
}

#[cfg(feature = "os-keyring")]
impl SecretStore for OsKeyringSecretStore {
    fn set_secret(&self, account: &str, secret: &str) -> Result<(), SecretStoreError> {
        self.entry(account)?
            .set_password(secret)
            .map_err(|err| SecretStoreError::Backend(err.to_string()))
    }

    fn get_secret(&self, account: &str) -> Result<String, SecretStoreError> {
        self.entry(account)?.get_password().map_err(map_keyring_error)
    }

    fn delete_secret(&self, account: &str) -> Result<(), SecretStoreError> {
        self.entry(account)?
            .delete_credential()
            .map_err(map_keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn map_keyring_error(err: keyring::Error) -> SecretStoreError {
    match err {
        keyring::Error::NoEntry => SecretStoreError::NotFound,
        keyring::Error::NoStorageAccess(inner) => SecretStoreError::Unavailable(inner.to_string()),
        other => SecretStoreError::Backend(other.to_string()),
    }
}

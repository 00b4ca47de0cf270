use std::sync::Arc;

use backend_core::{ErrorKind, UserInfo, UserRegisterQuery, UserUpdateQuery};
use tracing::{info, warn};

use crate::{api::SesacRemote, auth::TokenRefreshGuard};

/// Account calls of the signed-in user, all routed through the refresh guard.
#[derive(Clone)]
pub struct AccountService {
    guard: Arc<TokenRefreshGuard>,
    remote: Arc<dyn SesacRemote>,
}

impl AccountService {
    pub fn new(guard: Arc<TokenRefreshGuard>, remote: Arc<dyn SesacRemote>) -> Self {
        Self { guard, remote }
    }

    /// Fetch the account and remember its uid and nickname locally.
    pub async fn user_info(&self) -> Result<UserInfo, ErrorKind> {
        let remote = Arc::clone(&self.remote);
        let user = self
            .guard
            .call("user_info", |token| {
                let remote = Arc::clone(&remote);
                async move { remote.user_info(&token).await }
            })
            .await?;

        if let Err(err) = self.guard.session().save_identity(&user.uid, &user.nick) {
            warn!(error = %err, "account identity could not be stored");
        }
        Ok(user)
    }

    pub async fn register(&self, query: &UserRegisterQuery) -> Result<(), ErrorKind> {
        query.validate()?;
        let remote = Arc::clone(&self.remote);
        self.guard
            .call("register", |token| {
                let remote = Arc::clone(&remote);
                async move { remote.register(&token, query).await }
            })
            .await
    }

    /// Withdraw the account. An account that is already gone counts as
    /// withdrawn; either way the local session is forgotten.
    pub async fn withdraw(&self) -> Result<(), ErrorKind> {
        let remote = Arc::clone(&self.remote);
        let outcome = self
            .guard
            .call("withdraw", |token| {
                let remote = Arc::clone(&remote);
                async move { remote.withdraw(&token).await }
            })
            .await;

        match outcome {
            Ok(()) | Err(ErrorKind::AlreadyWithdrawn) => {
                info!("account withdrawn");
                self.guard.logout();
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    pub async fn update_user_info(&self, query: &UserUpdateQuery) -> Result<(), ErrorKind> {
        let remote = Arc::clone(&self.remote);
        self.guard
            .call("update_user_info", |token| {
                let remote = Arc::clone(&remote);
                async move { remote.update_user_info(&token, query).await }
            })
            .await
    }
}

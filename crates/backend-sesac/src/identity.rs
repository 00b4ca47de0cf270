use async_trait::async_trait;
use backend_core::ErrorKind;
use backend_platform::{SecretStore, SecretStoreError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";
const REFRESH_TOKEN_ACCOUNT: &str = "firebase-refresh-token";

/// Source of fresh credentials for the refresh guard.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn refresh_token(&self) -> Result<String, ErrorKind>;
}

/// Provider used when no identity API key is configured; every refresh fails
/// and the guard logs out.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableIdentity;

#[async_trait]
impl IdentityProvider for UnavailableIdentity {
    async fn refresh_token(&self) -> Result<String, ErrorKind> {
        warn!("credential refresh requested but no identity provider is configured");
        Err(ErrorKind::Unknown)
    }
}

#[derive(Debug, Deserialize)]
struct SecureTokenResponse {
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Firebase secure-token exchange backed by a stored refresh token.
pub struct FirebaseIdentityProvider<S: SecretStore> {
    http: Client,
    endpoint: Url,
    api_key: String,
    secrets: S,
}

impl<S: SecretStore> FirebaseIdentityProvider<S> {
    pub fn new(http: Client, api_key: impl Into<String>, secrets: S) -> Result<Self, url::ParseError> {
        let endpoint = Url::parse(SECURE_TOKEN_URL)?;
        Ok(Self::with_endpoint(http, endpoint, api_key, secrets))
    }

    pub fn with_endpoint(
        http: Client,
        endpoint: Url,
        api_key: impl Into<String>,
        secrets: S,
    ) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.into(),
            secrets,
        }
    }

    /// Remember the long-lived refresh token issued at sign-in.
    pub fn store_refresh_token(&self, refresh_token: &str) -> Result<(), SecretStoreError> {
        self.secrets.set_secret(REFRESH_TOKEN_ACCOUNT, refresh_token)
    }

    pub fn forget_refresh_token(&self) -> Result<(), SecretStoreError> {
        self.secrets.forget_secret(REFRESH_TOKEN_ACCOUNT)
    }
}

#[async_trait]
impl<S: SecretStore> IdentityProvider for FirebaseIdentityProvider<S> {
    async fn refresh_token(&self) -> Result<String, ErrorKind> {
        let stored = self.secrets.find_secret(REFRESH_TOKEN_ACCOUNT).map_err(|err| {
            warn!(error = %err, "refresh token could not be read");
            ErrorKind::Unknown
        })?;
        let Some(refresh_token) = stored else {
            warn!("no refresh token stored");
            return Err(ErrorKind::Unknown);
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "secure token request failed");
                ErrorKind::Unknown
            })?;

        if response.status() != StatusCode::OK {
            warn!(status = response.status().as_u16(), "secure token exchange rejected");
            return Err(ErrorKind::Unknown);
        }

        let body: SecureTokenResponse = response.json().await.map_err(|err| {
            warn!(error = %err, "secure token response could not be decoded");
            ErrorKind::Unknown
        })?;

        if let Some(rotated) = body.refresh_token.as_deref().filter(|t| *t != refresh_token)
            && let Err(err) = self.store_refresh_token(rotated)
        {
            warn!(error = %err, "rotated refresh token could not be stored");
        }
        debug!("credential refreshed");
        Ok(body.id_token)
    }
}

#[cfg(test)]
mod tests {
    use backend_platform::InMemorySecretStore;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path, query_param},
    };

    use super::*;

    async fn provider_for(server: &MockServer) -> FirebaseIdentityProvider<InMemorySecretStore> {
        let endpoint = Url::parse(&format!("{}/v1/token", server.uri())).expect("endpoint");
        FirebaseIdentityProvider::with_endpoint(
            Client::new(),
            endpoint,
            "api-key",
            InMemorySecretStore::default(),
        )
    }

    #[tokio::test]
    async fn exchanges_refresh_token_and_stores_rotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .and(query_param("key", "api-key"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": "id-2",
                "refresh_token": "r-2",
                "expires_in": "3600"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        provider.store_refresh_token("r-1").expect("store");

        let token = provider.refresh_token().await.expect("refresh");
        assert_eq!(token, "id-2");
        assert_eq!(
            provider
                .secrets
                .find_secret(REFRESH_TOKEN_ACCOUNT)
                .expect("lookup")
                .as_deref(),
            Some("r-2")
        );
    }

    #[tokio::test]
    async fn fails_without_stored_refresh_token() {
        let server = MockServer::start().await;
        let provider = provider_for(&server).await;
        assert_eq!(provider.refresh_token().await, Err(ErrorKind::Unknown));
    }

    #[tokio::test]
    async fn rejected_exchange_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        provider.store_refresh_token("r-1").expect("store");
        assert_eq!(provider.refresh_token().await, Err(ErrorKind::Unknown));
    }
}

//! Environment-backed runtime configuration for the SeSAC backend.

use std::{env, path::PathBuf, time::Duration};

use backend_core::ChatTimeline;
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://test.monocoding.com:35484";
const DEFAULT_DATA_DIR: &str = "./.sesac-store";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_CATCH_UP_PAGE_SIZE: u16 = 100;
const DEFAULT_TIMELINE_MAX_ITEMS: usize = 2_000;
const CATCH_UP_PAGE_SIZE_CAP: u16 = 500;

/// Runtime configuration shared by the transport, live channel and sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct SesacConfig {
    /// REST API base URL.
    pub base_url: Url,
    /// WebSocket URL for the live chat channel.
    pub socket_url: Url,
    /// Web API key of the identity provider; refresh is unavailable without it.
    pub firebase_api_key: Option<String>,
    /// Directory holding the session profile and chat history.
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    /// Catch-up page size, always in `1..=500`.
    pub catch_up_page_size: u16,
    /// In-memory timeline cap.
    pub timeline_max_items: usize,
}

impl SesacConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = parse_url(
            "SESAC_BASE_URL",
            optional_trimmed_env("SESAC_BASE_URL", &mut lookup)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
        )?;
        let socket_url = match optional_trimmed_env("SESAC_SOCKET_URL", &mut lookup) {
            Some(value) => parse_url("SESAC_SOCKET_URL", value)?,
            None => socket_url_for(&base_url)?,
        };
        let firebase_api_key = optional_trimmed_env("SESAC_FIREBASE_API_KEY", &mut lookup);
        let data_dir = optional_trimmed_env("SESAC_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let request_timeout_ms = parse_with_default(
            "SESAC_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let catch_up_page_size = parse_with_default(
            "SESAC_CATCH_UP_PAGE_SIZE",
            DEFAULT_CATCH_UP_PAGE_SIZE,
            &mut lookup,
        )?;
        let timeline_max_items = parse_with_default(
            "SESAC_TIMELINE_MAX_ITEMS",
            DEFAULT_TIMELINE_MAX_ITEMS,
            &mut lookup,
        )?;

        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESAC_REQUEST_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if timeline_max_items == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESAC_TIMELINE_MAX_ITEMS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            base_url,
            socket_url,
            firebase_api_key,
            data_dir,
            request_timeout: Duration::from_millis(request_timeout_ms),
            catch_up_page_size: ChatTimeline::bounded_page_size(
                catch_up_page_size,
                CATCH_UP_PAGE_SIZE_CAP,
            ),
            timeline_max_items,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_with_default<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_url(key: &'static str, value: String) -> Result<Url, ConfigError> {
    Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn socket_url_for(base_url: &Url) -> Result<Url, ConfigError> {
    let scheme = match base_url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    let mut socket_url = base_url.clone();
    socket_url
        .set_scheme(scheme)
        .map_err(|()| ConfigError::InvalidValue {
            key: "SESAC_BASE_URL",
            value: base_url.to_string(),
            reason: "cannot derive a websocket URL".to_owned(),
        })?;
    Ok(socket_url)
}

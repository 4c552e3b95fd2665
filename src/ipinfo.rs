//! IP geolocation lookups against ipinfo.io.
//!
//! One GET per lookup, decoded into [`Info`]. An `error` member in the body
//! is returned as data: the service answers bogus addresses with an error
//! record rather than a transport failure.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::config::IpInfoConfig;

/// Default service endpoint.
pub const DEFAULT_BASE_URL: &str = "http://ipinfo.io";
/// Timeout applied to every lookup.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for lookups.
#[derive(Debug, Error)]
pub enum IpInfoError {
    #[error("invalid client setting: {0}")]
    Client(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("undecodable response (status {status}): {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
}

/// Geolocation record. Absent members are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Info {
    pub ip: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub postal: String,
    pub hostname: String,
    pub org: String,
    pub bogon: bool,
    #[serde(deserialize_with = "error_text")]
    pub error: String,
}

/// The service reports errors either as a string or as
/// `{"title": ..., "message": ...}`.
fn error_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ErrorField {
        Text(String),
        Detail {
            #[serde(default)]
            title: String,
            #[serde(default)]
            message: String,
        },
    }

    let text = match Option::<ErrorField>::deserialize(deserializer)? {
        None => String::new(),
        Some(ErrorField::Text(text)) => text,
        Some(ErrorField::Detail { title, message }) if title.is_empty() => message,
        Some(ErrorField::Detail { title, message }) if message.is_empty() => title,
        Some(ErrorField::Detail { title, message }) => format!("{title}: {message}"),
    };
    Ok(text)
}

/// Lookup client. Settings apply to every request it sends.
#[derive(Debug, Clone)]
pub struct IpInfoClient {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl IpInfoClient {
    pub fn new() -> Result<Self, IpInfoError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            headers,
        })
    }

    pub fn from_config(config: &IpInfoConfig) -> Result<Self, IpInfoError> {
        let mut client = Self::new()?.with_base_url(config.base_url.clone());
        if let Some(token) = &config.token {
            client = client.with_token(token)?;
        }
        if let Some(agent) = &config.agent {
            client = client.with_agent(agent)?;
        }
        Ok(client)
    }

    /// Authenticate with a bearer token.
    pub fn with_token(mut self, token: &str) -> Result<Self, IpInfoError> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| IpInfoError::Client(format!("token: {e}")))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    pub fn with_agent(mut self, agent: &str) -> Result<Self, IpInfoError> {
        let value =
            HeaderValue::from_str(agent).map_err(|e| IpInfoError::Client(format!("agent: {e}")))?;
        self.headers.insert(USER_AGENT, value);
        Ok(self)
    }

    /// Point the client at another endpoint (trailing `/` ignored).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Look up `address` (an IP, or anything else the service accepts).
    pub async fn get_info(&self, address: &str) -> Result<Info, IpInfoError> {
        let url = format!("{}/{}", self.base_url, address);
        tracing::debug!(url = %url, "Looking up address");

        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        serde_json::from_slice(&body).map_err(|source| IpInfoError::Decode { status, source })
    }
}

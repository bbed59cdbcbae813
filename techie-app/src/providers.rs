//! Token and usage collaborators backed by configuration and the HTTP API.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use techie_interfaces::{TokenError, TokenProvider, Usage, UsageError, UsageReporter};
use tracing::debug;

/// Hands out the token from configuration.
pub struct ConfiguredToken {
    token: Option<String>,
}

impl ConfiguredToken {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for ConfiguredToken {
    async fn token(&self) -> Result<String, TokenError> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(TokenError::NotAuthenticated),
        }
    }
}

/// Reads token consumption from `GET {api}/consumption`.
pub struct HttpUsageReporter {
    client: Client,
    api_endpoint: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpUsageReporter {
    pub fn new(api_endpoint: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: Client::new(),
            api_endpoint: api_endpoint.into(),
            tokens,
        }
    }
}

#[async_trait]
impl UsageReporter for HttpUsageReporter {
    async fn fetch_usage(&self, conversation_id: &str) -> Result<Usage, UsageError> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| UsageError::Request(e.to_string()))?;

        let url = format!("{}/consumption", self.api_endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("conversation_id", conversation_id)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UsageError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UsageError::Status(response.status().as_u16()));
        }

        let usage: Usage = response
            .json()
            .await
            .map_err(|e| UsageError::Request(e.to_string()))?;
        debug!(conversation_id = %conversation_id, total = usage.total_tokens, "Usage fetched");
        Ok(usage)
    }
}

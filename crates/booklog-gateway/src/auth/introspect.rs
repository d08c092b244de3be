//! Remote token introspection (RFC 7662 style, form-encoded POST).

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;

use super::VerifyError;
use crate::config::ConfigError;

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Client for the configured introspection endpoint.
pub struct Introspector {
    url: String,
    client: reqwest::Client,
}

impl Introspector {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the endpoint about `token`. Transport errors, timeouts, non-200
    /// answers and undecodable bodies all count as failures; an inactive
    /// token is [`VerifyError::Inactive`].
    pub async fn introspect(&self, token: &str) -> Result<Option<String>, VerifyError> {
        let form = format!("token={}", urlencoding::encode(token));

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, timeout = e.is_timeout(), "introspection request failed");
                VerifyError::IntrospectionFailed(e.to_string())
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            tracing::warn!(error = %e, "failed to read introspection response");
            VerifyError::IntrospectionFailed(e.to_string())
        })?;

        if status != StatusCode::OK {
            tracing::warn!(
                status = %status,
                body = %String::from_utf8_lossy(&body),
                "introspection endpoint returned non-200"
            );
            return Err(VerifyError::IntrospectionFailed(format!("status {}", status)));
        }

        let parsed: IntrospectionResponse = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(error = %e, "undecodable introspection response");
            VerifyError::IntrospectionFailed(format!("invalid response body: {}", e))
        })?;

        if !parsed.active {
            return Err(VerifyError::Inactive);
        }

        Ok(parsed
            .sub
            .filter(|s| !s.is_empty())
            .or(parsed.user_id.filter(|s| !s.is_empty())))
    }
}

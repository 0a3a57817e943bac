//! HTTP client for the external OAuth identity provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::AUTHORIZATION};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::application::identity::{IdentityProvider, ProviderError};
use crate::config::IdentitySettings;

use super::error::InfraError;

#[derive(Debug, Deserialize)]
struct ProviderInfo {
    #[serde(default)]
    default_email: Option<String>,
}

#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: Client,
    info_url: Url,
    scheme: String,
}

impl HttpIdentityProvider {
    pub fn new(
        info_url: Url,
        scheme: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(format!("identity provider client: {err}")))?;
        Ok(Self {
            client,
            info_url,
            scheme: scheme.into(),
        })
    }

    pub fn from_settings(settings: &IdentitySettings) -> Result<Self, InfraError> {
        Self::new(
            settings.provider_url.clone(),
            settings.provider_scheme.clone(),
            settings.provider_timeout,
        )
    }

    fn authorization_value(&self, token: &str) -> String {
        if self.scheme.is_empty() {
            token.to_string()
        } else {
            format!("{} {token}", self.scheme)
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, token: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(self.info_url.clone())
            .header(AUTHORIZATION, self.authorization_value(token))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        debug!(
            target = "tollgate::identity::provider",
            status = status.as_u16(),
            "identity provider answered"
        );
        if status != StatusCode::OK {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let info: ProviderInfo = response.json().await.map_err(|err| {
            if err.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Malformed(err.to_string())
            }
        })?;

        info.default_email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .ok_or(ProviderError::MissingEmail)
    }
}

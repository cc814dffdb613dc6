//! HTTP client for the upstream push-delivery service.

use crate::config::UpstreamConfig;
use crate::upstream::{
    EncryptedPush, PushGateway, RegisterData, UpstreamError, UpstreamResponse,
};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

/// reqwest-backed [`PushGateway`].
pub struct HttpPushGateway {
    client: reqwest::Client,
    base_url: String,
    base: Url,
    token: Option<String>,
}

impl HttpPushGateway {
    /// Create a gateway from configuration.
    ///
    /// The base URL must include a scheme; a trailing slash is trimmed.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(UpstreamError::InvalidBaseUrl(
                "base url is required".to_string(),
            ));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(UpstreamError::InvalidBaseUrl(format!(
                "base url must include scheme: {}",
                base_url
            )));
        }
        let base = Url::parse(&base_url)
            .map_err(|e| UpstreamError::InvalidBaseUrl(format!("{}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(UpstreamError::InvalidBaseUrl(base_url));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            base,
            token: config
                .token
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // --- Internal helpers ---

    /// Append one escaped path segment to the base URL.
    fn resolve(&self, segment: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        url
    }

    fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("API-TOKEN", token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned + Default>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<UpstreamResponse<T>, UpstreamError> {
        let resp = self.decorate(request).send().await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(UpstreamError::Status {
                operation,
                status: resp.status().as_u16(),
            });
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn ping(&self) -> Result<UpstreamResponse<serde_json::Value>, UpstreamError> {
        let request = self.client.get(self.resolve("ping"));
        self.send("ping", request).await
    }

    async fn register(
        &self,
        device_token: &str,
        legacy_key: Option<&str>,
    ) -> Result<UpstreamResponse<RegisterData>, UpstreamError> {
        let mut query = vec![("devicetoken", device_token)];
        if let Some(key) = legacy_key.filter(|k| !k.is_empty()) {
            query.push(("key", key));
        }
        debug!("Registering device token with upstream");

        let request = self.client.get(self.resolve("register")).query(&query);
        self.send("register", request).await
    }

    async fn push(
        &self,
        device_key: &str,
        ciphertext: &str,
        iv: &str,
    ) -> Result<UpstreamResponse<serde_json::Value>, UpstreamError> {
        let body = EncryptedPush {
            ciphertext: ciphertext.to_string(),
            iv: iv.to_string(),
        };
        let request = self.client.post(self.resolve(device_key)).json(&body);
        self.send("push", request).await
    }

    fn device_endpoint(&self, device_key: &str) -> String {
        self.resolve(device_key).to_string()
    }
}

use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::api::models::{InsightsResponse, LoginRequest, RegisterRequest, TokenResponse};
use crate::error::{ChatError, Result};

/// HTTP side of the chat service: auth and room insights.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self::with_http(HttpClient::new(), Url::parse(base_url)?))
    }

    pub fn with_http(http: HttpClient, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChatError::Protocol(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Exchange credentials for an auth token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let url = self.endpoint(&["api", "auth", "login"])?;
        let body = LoginRequest { email, password };
        let resp: TokenResponse = Self::read_json(self.http.post(url).json(&body).send().await?).await?;
        log::info!("login succeeded for {email}");
        Ok(resp.token)
    }

    /// Create an account and return its auth token.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String> {
        let url = self.endpoint(&["api", "auth", "register"])?;
        let body = RegisterRequest { name, email, password };
        let resp: TokenResponse = Self::read_json(self.http.post(url).json(&body).send().await?).await?;
        log::info!("registered account for {email}");
        Ok(resp.token)
    }

    /// Server-generated summary of a room's conversation. `None` when the
    /// server had nothing to say.
    pub async fn insights(&self, room: &str) -> Result<Option<String>> {
        let url = self.endpoint(&["api", "ai", "insights", room])?;
        let resp: InsightsResponse = Self::read_json(self.http.get(url).send().await?).await?;
        Ok(resp.insights.filter(|s| !s.is_empty()))
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            // The body may not be JSON at all; only its `error` string is kept.
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|json| json.get("error").and_then(|v| v.as_str()).map(str::to_string));
            log::warn!("HTTP {status}: {}", message.as_deref().unwrap_or("<no error field>"));
            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

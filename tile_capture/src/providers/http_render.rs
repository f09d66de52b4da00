//! Renderer backed by a headless-browser capture service.
//!
//! The service accepts `POST {base}/screenshot` with a JSON body
//! `{"url": "...", "viewport": {"width": 1280, "height": 800}}` and answers with
//! the PNG bytes. Calls are paced client-side so a full grid does not flood it.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, Url, header};
use secrecy::{ExposeSecret, SecretString};
use shared_utils::env::{get_env_var, get_env_var_opt};
use snafu::{ResultExt, ensure};
use tracing::debug;

use super::{
    ClientBuildSnafu, EmptyBodySnafu, InvalidTokenSnafu, InvalidUrlSnafu, MissingEnvVarSnafu,
    RenderError, RendererInitError, RequestSnafu, StatusSnafu, TileRenderer,
};
use crate::models::RenderRequest;

/// Base URL of the capture service.
pub const RENDER_SERVICE_URL: &str = "RENDER_SERVICE_URL";
/// Optional bearer token for the capture service.
pub const RENDER_SERVICE_TOKEN: &str = "RENDER_SERVICE_TOKEN";

const DEFAULT_RATE: NonZeroU32 = nonzero!(5u32);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for [`HttpRenderer`].
#[derive(Debug, Clone)]
pub struct HttpRendererConfig {
    /// Service base URL, e.g. `http://localhost:3000`.
    pub base_url: String,
    pub token: Option<SecretString>,
    /// Upper bound on render calls started per second.
    pub requests_per_second: NonZeroU32,
    /// Per-request timeout; page loads for map tiles are slow.
    pub timeout: Duration,
}

impl HttpRendererConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            requests_per_second: DEFAULT_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads `RENDER_SERVICE_URL` and, when set, `RENDER_SERVICE_TOKEN`.
    pub fn from_env() -> Result<Self, RendererInitError> {
        let base_url = get_env_var(RENDER_SERVICE_URL).context(MissingEnvVarSnafu)?;
        let mut config = Self::new(base_url);
        config.token = get_env_var_opt(RENDER_SERVICE_TOKEN).map(|t| SecretString::new(t.into()));
        Ok(config)
    }
}

pub struct HttpRenderer {
    client: Client,
    endpoint: Url,
    limiter: DefaultDirectRateLimiter,
}

impl HttpRenderer {
    pub fn new(config: HttpRendererConfig) -> Result<Self, RendererInitError> {
        let base = config.base_url.trim_end_matches('/');
        let endpoint = Url::parse(&format!("{base}/screenshot")).map_err(|e| {
            InvalidUrlSnafu {
                url: config.base_url.clone(),
                message: e.to_string(),
            }
            .build()
        })?;

        let mut headers = header::HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value =
                header::HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                    .context(InvalidTokenSnafu)?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            endpoint,
            limiter: RateLimiter::direct(Quota::per_second(config.requests_per_second)),
        })
    }

    /// Shorthand for `HttpRenderer::new(HttpRendererConfig::from_env()?)`.
    pub fn from_env() -> Result<Self, RendererInitError> {
        Self::new(HttpRendererConfig::from_env()?)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TileRenderer for HttpRenderer {
    async fn render(&self, req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        self.limiter.until_ready().await;
        debug!(url = %req.url, "requesting render");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(req)
            .send()
            .await
            .context(RequestSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return StatusSnafu {
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let bytes = response.bytes().await.context(RequestSnafu)?;
        ensure!(!bytes.is_empty(), EmptyBodySnafu { url: req.url.clone() });
        Ok(bytes.to_vec())
    }
}

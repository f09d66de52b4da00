//! Tile renderers: the collaborator that turns a map URL into image bytes.
//!
//! The scheduler only sees [`TileRenderer`], so production captures go through
//! [`http_render::HttpRenderer`] while tests plug in in-memory renderers.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use tile_capture::models::RenderRequest;
//! use tile_capture::providers::{RenderError, TileRenderer};
//!
//! struct Blank;
//!
//! #[async_trait]
//! impl TileRenderer for Blank {
//!     async fn render(&self, _req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
//!         Ok(vec![0u8; 4])
//!     }
//! }
//! ```

pub mod http_render;

use async_trait::async_trait;
use shared_utils::env::MissingEnvVarError;
use snafu::{Backtrace, Snafu};

use crate::models::RenderRequest;

/// Renders one URL at one viewport and returns the encoded image.
///
/// Implementations must be shareable across tasks; the scheduler holds an
/// `Arc<dyn TileRenderer>` and calls it from many tasks at once.
#[async_trait]
pub trait TileRenderer: Send + Sync {
    /// Render `req` and return the raw image bytes (PNG).
    async fn render(&self, req: &RenderRequest) -> Result<Vec<u8>, RenderError>;
}

/// Errors that can occur while constructing a renderer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RendererInitError {
    /// missed environment variable.
    #[snafu(display("Missing environment variable: {source}"))]
    MissingEnvVar {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// Service URL does not parse.
    #[snafu(display("Invalid render service URL {url:?}: {message}"))]
    InvalidUrl {
        url: String,
        message: String,
        backtrace: Backtrace,
    },

    /// Token contains characters not allowed in a header.
    #[snafu(display("Invalid render service token: {source}"))]
    InvalidToken {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },
}

/// Errors from a single render call.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RenderError {
    /// Network failure, timeout or body read error.
    #[snafu(display("Render request failed: {source}"))]
    Request {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The service answered with a non-success status.
    #[snafu(display("Render service returned {status}: {body}"))]
    Status {
        status: u16,
        body: String,
        backtrace: Backtrace,
    },

    /// The service answered 2xx with no image.
    #[snafu(display("Render service returned an empty body for {url}"))]
    EmptyBody { url: String, backtrace: Backtrace },

    /// Any other renderer-specific failure.
    #[snafu(display("Internal renderer error: {message}"))]
    Internal {
        message: String,
        backtrace: Backtrace,
    },
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use snafu::IntoError;

    use super::*;
    use crate::models::Viewport;

    struct Fixed(Vec<u8>);
    struct Broken;

    #[async_trait]
    impl TileRenderer for Fixed {
        async fn render(&self, _req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
            Ok(self.0.clone())
        }
    }

    #[async_trait]
    impl TileRenderer for Broken {
        async fn render(&self, req: &RenderRequest) -> Result<Vec<u8>, RenderError> {
            EmptyBodySnafu {
                url: req.url.clone(),
            }
            .fail()
        }
    }

    fn pick(name: &str) -> Arc<dyn TileRenderer> {
        if name == "fixed" {
            Arc::new(Fixed(vec![1, 2, 3]))
        } else {
            Arc::new(Broken)
        }
    }

    #[tokio::test]
    async fn renderers_are_selected_at_runtime() {
        let req = RenderRequest {
            url: "https://maps.example/@1,2".into(),
            viewport: Viewport::default(),
        };
        assert_eq!(pick("fixed").render(&req).await.unwrap(), vec![1, 2, 3]);

        let err = pick("broken").render(&req).await.unwrap_err();
        assert!(err.to_string().contains("https://maps.example/@1,2"));
    }

    #[test]
    fn init_error_wraps_missing_env() {
        let err = MissingEnvVarSnafu.into_error(MissingEnvVarError("RENDER_SERVICE_URL".into()));
        assert!(err.to_string().contains("RENDER_SERVICE_URL"));
    }
}

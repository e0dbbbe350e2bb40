//! HTTP transport for the GitHub REST API.
//!
//! This crate owns the wire-level concerns: building an authenticated
//! `reqwest` client, conditional GETs with `ETag`/`Last-Modified`
//! revalidation, indefinite retry of transient failures, manual
//! redirect handling, and `Link` pagination header parsing. The object
//! model on top of it lives in `hubkit-core`.

mod client;
mod config;
mod error;
mod request;

pub use client::ApiClient;
pub use config::ApiConfig;
pub use error::Error;
pub use request::{ApiRequest, ApiResponse};

// Re-exported so downstream crates agree on these types without
// importing the underlying crates at matching versions themselves.
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for tokengate
//!
//! A hyper-based client wrapped in a tower middleware stack:
//! - TLS via rustls (HTTPS only unless insecure HTTP is explicitly allowed)
//! - Connection pooling
//! - Per-attempt timeout
//! - User-Agent injection
//! - Transparent gzip/brotli/deflate decompression
//! - A single optional auth layer slot (see [`HttpClientBuilder::with_auth_layer`])
//!
//! `send()` resolves to `Ok` for every HTTP status and the body readers never
//! look at it, so an auth layer can inspect a `401` as a plain response.
//!
//! # Example
//!
//! ```ignore
//! use tokengate_http::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .user_agent("my-app/1.0")
//!     .build()?;
//!
//! let pets: Vec<Pet> = client
//!     .get("https://api.example.com/pets")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod layers;
mod request;
mod response;
mod tls;

pub use builder::{HttpClientBuilder, InnerService};
pub use client::HttpClient;
pub use config::{DEFAULT_USER_AGENT, HttpClientConfig, TlsRootConfig, TransportSecurity};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{UserAgentLayer, UserAgentService};
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseBody};

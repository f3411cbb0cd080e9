//! # coingate
//!
//! A caching, retrying, request-coalescing HTTP gateway in front of a
//! rate-limited crypto market-data API.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use coingate::api::{self, CoinApi, Freshness};
//! use coingate::cache::Gateway;
//! use coingate::upstream::{Endpoints, HttpFetcher};
//! use coingate::{Request, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = Arc::new(CoinApi::new(
//!         Gateway::default(),
//!         Endpoints::new("https://api.coingecko.com/api/v3")?,
//!         Arc::new(HttpFetcher::new(Duration::from_secs(10))?),
//!         Freshness::default(),
//!     ));
//!     let pipeline = Arc::new(api::pipeline(&api));
//!
//!     let server = Server::bind("127.0.0.1:3000").await?;
//!     server
//!         .run_until(
//!             move |req: Request| {
//!                 let pipeline = Arc::clone(&pipeline);
//!                 async move { pipeline.handle(req).await }
//!             },
//!             async { let _ = tokio::signal::ctrl_c().await; },
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod middleware;
pub mod retry;
pub mod router;
pub mod server;
pub mod upstream;

pub use cache::Gateway;
pub use config::{Config, ConfigError};
pub use error::{FetchError, GatewayError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use retry::RetryPolicy;
pub use router::Router;
pub use server::{Server, ServerError};

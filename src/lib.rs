//! calcwire: a line-delimited JSON calc/generate service.
//!
//! Clients open a TCP connection and exchange one JSON envelope per line.
//! `calc` requests are evaluated by a sandboxed arithmetic interpreter,
//! `generate` requests are forwarded to a text-generation backend, and
//! successful results are kept in a shared LRU cache. A caching proxy can sit
//! in front of the server and answer repeated requests without contacting it.
//!
//! ```
//! use std::sync::Arc;
//! use calcwire::cache::ResponseCache;
//! use calcwire::providers::UnconfiguredGenerator;
//! use calcwire::server::Dispatcher;
//!
//! let cache = Arc::new(ResponseCache::with_capacity(16).unwrap());
//! let dispatcher = Dispatcher::new(cache, Arc::new(UnconfiguredGenerator));
//! let response = tokio_test::block_on(
//!     dispatcher.handle_bytes(br#"{"mode":"calc","data":{"expr":"2**8"}}"#),
//! );
//! assert_eq!(response.result, Some(serde_json::json!(256.0)));
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod eval;
pub mod protocol;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod session;

pub use cache::ResponseCache;
pub use config::Config;
pub use error::{Result, WireError};
pub use protocol::{Request, Response};
pub use proxy::{CachingProxy, ProxyServer};
pub use server::{CalcServer, Dispatcher};

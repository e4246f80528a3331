//! Offline cache agent.
//!
//! Keeps a web application usable without connectivity: pre-fetches a
//! manifest into a versioned cache generation, answers requests cache-first,
//! back-fills the cache from successful same-origin network responses, and
//! serves a cached document to navigations when the network is gone.

pub mod agent;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod host;
pub mod http;

#[cfg(test)]
mod test_support;

pub use agent::{AgentConfig, Intercepted, OfflineAgent};
pub use cache::{CacheStorage, SqliteStorage};
pub use fetch::{Fetcher, HttpFetcher};
pub use host::{Registration, WorkerState};
pub use http::{Destination, Request, Response, ResponseType};

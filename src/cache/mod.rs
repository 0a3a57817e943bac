//! Tollgate in-memory caches.
//!
//! Two independent stores, each owned by the gateway composition root and
//! handed to the pipeline stages that need it:
//!
//! - **Response cache**: captured upstream responses keyed by a request
//!   fingerprint, bounded by entry count and TTL.
//! - **Identity cache**: bearer credential → resolved identity, bounded by TTL.
//!
//! Neither store sweeps in the background. Expired entries are dropped the
//! next time their key is looked up, or by capacity eviction.
//!
//! ## Configuration
//!
//! ```toml
//! [response_cache]
//! enabled = true
//! ttl_seconds = 5
//! max_body_bytes = 524288
//! max_entries = 256
//!
//! [identity]
//! ttl_seconds = 60
//! ```

mod config;
mod identity;
mod keys;
mod lock;
mod middleware;
mod store;

pub use config::CacheConfig;
pub use identity::IdentityStore;
pub use keys::{fingerprint, hash_negotiation_headers};
pub use middleware::{CACHE_STATUS_HEADER, ResponseCacheState, response_cache_layer};
pub use store::{CachedResponse, ResponseStore};

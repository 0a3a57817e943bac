//! Cache configuration.
//!
//! Built from the validated `[response_cache]` and `[identity]` settings.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_RESPONSE_TTL_SECS: u64 = 5;
const DEFAULT_RESPONSE_MAX_BODY_BYTES: usize = 512 * 1024;
const DEFAULT_RESPONSE_MAX_ENTRIES: usize = 256;
const DEFAULT_IDENTITY_TTL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve and record idempotent upstream responses.
    pub enable_response_cache: bool,
    /// Maximum age at which a stored response is still served.
    pub response_ttl_seconds: u64,
    /// Responses with a larger body are delivered but never stored.
    pub response_max_body_bytes: usize,
    /// Upper bound on stored responses.
    pub response_max_entries: usize,
    /// Lifetime of a cached credential → identity mapping.
    pub identity_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_response_cache: true,
            response_ttl_seconds: DEFAULT_RESPONSE_TTL_SECS,
            response_max_body_bytes: DEFAULT_RESPONSE_MAX_BODY_BYTES,
            response_max_entries: DEFAULT_RESPONSE_MAX_ENTRIES,
            identity_ttl_seconds: DEFAULT_IDENTITY_TTL_SECS,
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            enable_response_cache: settings.response_cache.enabled,
            response_ttl_seconds: settings.response_cache.ttl.as_secs(),
            response_max_body_bytes: settings.response_cache.max_body_bytes.get(),
            response_max_entries: settings.response_cache.max_entries.get(),
            identity_ttl_seconds: settings.identity.ttl.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_seconds)
    }

    pub fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_ttl_seconds)
    }

    /// Returns the response entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn response_max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.response_max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// `Cache-Control` value written on every storable miss.
    pub fn cache_control(&self) -> String {
        format!("private, max-age={}", self.response_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enable_response_cache);
        assert_eq!(config.response_ttl(), Duration::from_secs(5));
        assert_eq!(config.response_max_body_bytes, 524_288);
        assert_eq!(config.response_max_entries, 256);
        assert_eq!(config.identity_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn cache_control_uses_ttl_seconds() {
        let config = CacheConfig {
            response_ttl_seconds: 30,
            ..Default::default()
        };
        assert_eq!(config.cache_control(), "private, max-age=30");
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            response_max_entries: 0,
            ..Default::default()
        };
        assert_eq!(config.response_max_entries_non_zero().get(), 1);
    }
}

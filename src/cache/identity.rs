//! Credential → identity cache.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::counter;

use crate::domain::accounts::ResolvedIdentity;

#[derive(Debug, Clone)]
struct IdentityEntry {
    identity: ResolvedIdentity,
    expires_at: Instant,
}

/// Short-lived mapping from a raw bearer credential to the identity it resolved to.
///
/// Saves a datastore or identity-provider round trip per request. Failures are
/// never inserted, so a rejected credential is re-checked every time.
#[derive(Debug)]
pub struct IdentityStore {
    ttl: Duration,
    entries: DashMap<String, IdentityEntry>,
}

impl IdentityStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, credential: &str) -> Option<ResolvedIdentity> {
        self.get_at(credential, Instant::now())
    }

    pub fn get_at(&self, credential: &str, now: Instant) -> Option<ResolvedIdentity> {
        let expired = match self.entries.get(credential) {
            Some(entry) if now <= entry.expires_at => {
                counter!("tollgate_identity_cache_hit_total").increment(1);
                return Some(entry.identity.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(credential, |_, entry| now > entry.expires_at);
        }
        counter!("tollgate_identity_cache_miss_total").increment(1);
        None
    }

    pub fn insert(&self, credential: &str, identity: ResolvedIdentity) {
        self.insert_at(credential, identity, Instant::now());
    }

    pub fn insert_at(&self, credential: &str, identity: ResolvedIdentity, now: Instant) {
        self.entries.insert(
            credential.to_string(),
            IdentityEntry {
                identity,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn contains(&self, credential: &str) -> bool {
        self.entries.contains_key(credential)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Singleton task lease — at most one active instance of a named task.
//!
//! A lease is acquired-if-absent with a TTL and released when its guard
//! drops. A holder that dies without releasing (panic, abort) blocks
//! nothing for longer than the TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

struct LeaseEntry {
    token: Uuid,
    expires_at: Instant,
}

/// Registry of named leases.
#[derive(Default)]
pub struct LeaseRegistry {
    inner: Mutex<HashMap<String, LeaseEntry>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the named lease for `ttl`. Returns `None` while a live
    /// holder exists; an expired entry is taken over.
    pub fn acquire(self: &Arc<Self>, name: &str, ttl: Duration) -> Option<LeaseGuard> {
        let mut map = self.inner.lock().expect("lease registry poisoned");
        let now = Instant::now();

        if let Some(entry) = map.get(name) {
            if entry.expires_at > now {
                return None;
            }
        }

        let token = Uuid::new_v4();
        map.insert(
            name.to_string(),
            LeaseEntry {
                token,
                expires_at: now + ttl,
            },
        );
        Some(LeaseGuard {
            registry: Arc::clone(self),
            name: name.to_string(),
            token,
        })
    }

    /// Extend a held lease. No-op if the guard no longer owns the entry.
    pub fn renew(&self, guard: &LeaseGuard, ttl: Duration) {
        let mut map = self.inner.lock().expect("lease registry poisoned");
        if let Some(entry) = map.get_mut(&guard.name) {
            if entry.token == guard.token {
                entry.expires_at = Instant::now() + ttl;
            }
        }
    }

    fn release(&self, name: &str, token: Uuid) {
        let mut map = self.inner.lock().expect("lease registry poisoned");
        if let Some(entry) = map.get(name) {
            if entry.token == token {
                map.remove(name);
            }
        }
    }
}

/// Holds a named lease; releases it on drop.
pub struct LeaseGuard {
    registry: Arc<LeaseRegistry>,
    name: String,
    token: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.registry.release(&self.name, self.token);
    }
}

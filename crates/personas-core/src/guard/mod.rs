//! At-most-one workflow per entity.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Entity ids currently owned by an in-flight workflow, each tagged with
/// the token of the claim that owns it
#[derive(Debug, Default)]
pub struct ProcessingGuard {
    claimed: DashMap<String, u64>,
    next_token: AtomicU64,
}

impl ProcessingGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomically claim `id`. Returns false if it is already claimed.
    pub fn try_claim(&self, id: &str) -> bool {
        self.acquire(id).is_some()
    }

    fn acquire(&self, id: &str) -> Option<u64> {
        let token = match self.claimed.entry(id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                slot.insert(token);
                Some(token)
            }
        };
        trace!(id, claimed = token.is_some(), "Claim attempt");
        token
    }

    /// Release `id`. Releasing an unclaimed id is a no-op.
    pub fn release(&self, id: &str) {
        if self.claimed.remove(id).is_some() {
            trace!(id, "Claim released");
        }
    }

    pub fn is_claimed(&self, id: &str) -> bool {
        self.claimed.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    /// Claim `id` and return a guard that releases it when dropped.
    pub fn claim(self: &Arc<Self>, id: &str) -> Option<Claim> {
        self.acquire(id).map(|token| Claim {
            guard: Arc::clone(self),
            id: id.to_string(),
            token,
        })
    }
}

/// Scoped ownership of a claimed id
#[derive(Debug)]
pub struct Claim {
    guard: Arc<ProcessingGuard>,
    id: String,
    token: u64,
}

impl Claim {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Claim {
    /// Releases the id only while this claim still owns it.
    fn drop(&mut self) {
        if self
            .guard
            .claimed
            .remove_if(&self.id, |_, owner| *owner == self.token)
            .is_some()
        {
            trace!(id = %self.id, "Claim released");
        }
    }
}

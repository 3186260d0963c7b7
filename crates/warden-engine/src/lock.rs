//! In-process implementation of [`MutexProvider`].
//!
//! Suitable for single-process deployments and tests. A multi-node
//! deployment substitutes a provider over its coordination store; the
//! engine only sees the trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use warden_core::error::{WardenError, WardenResult};
use warden_core::lock::{MutexProvider, OwnerToken};

struct Hold {
    owner: OwnerToken,
    count: u32,
    expires_at: Instant,
}

enum TryAcquire {
    Acquired,
    HeldUntil(Instant),
}

/// Named, reentrant-by-owner locks with TTL expiry and bounded waits.
#[derive(Default)]
pub struct LocalMutexProvider {
    holds: Mutex<HashMap<String, Hold>>,
    released: Notify,
}

impl LocalMutexProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, name: &str, owner: &OwnerToken, ttl: Duration) -> TryAcquire {
        let mut holds = match self.holds.lock() {
            Ok(holds) => holds,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        match holds.get_mut(name) {
            Some(hold) if hold.expires_at > now && hold.owner != *owner => {
                TryAcquire::HeldUntil(hold.expires_at)
            }
            Some(hold) if hold.expires_at > now => {
                // Reentrant re-acquire by the same owner.
                hold.count += 1;
                hold.expires_at = now + ttl;
                TryAcquire::Acquired
            }
            _ => {
                holds.insert(
                    name.to_string(),
                    Hold {
                        owner: owner.clone(),
                        count: 1,
                        expires_at: now + ttl,
                    },
                );
                TryAcquire::Acquired
            }
        }
    }
}

impl MutexProvider for LocalMutexProvider {
    async fn acquire(
        &self,
        name: &str,
        owner: &OwnerToken,
        ttl: Duration,
        wait: Duration,
    ) -> WardenResult<()> {
        let acquired = tokio::time::timeout(wait, async {
            loop {
                // Register for the wakeup before checking, so a release
                // between the check and the await is not lost.
                let released = self.released.notified();
                match self.try_acquire(name, owner, ttl) {
                    TryAcquire::Acquired => return,
                    TryAcquire::HeldUntil(expires_at) => {
                        let until_expiry = expires_at.saturating_duration_since(Instant::now());
                        // Wake on release, or when the holder's TTL lapses.
                        let _ = tokio::time::timeout(until_expiry, released).await;
                    }
                }
            }
        })
        .await;

        acquired.map_err(|_| WardenError::LockUnavailable {
            name: name.to_string(),
        })
    }

    async fn release(&self, name: &str, owner: &OwnerToken) -> WardenResult<()> {
        let mut holds = match self.holds.lock() {
            Ok(holds) => holds,
            Err(poisoned) => poisoned.into_inner(),
        };
        match holds.get_mut(name) {
            Some(hold) if hold.owner == *owner => {
                hold.count -= 1;
                if hold.count == 0 {
                    holds.remove(name);
                    self.released.notify_waiters();
                }
                Ok(())
            }
            // Expired and taken over, or never held: releasing is a bug
            // on the caller's side only in the latter case, but neither
            // should fail the surrounding operation.
            _ => Ok(()),
        }
    }
}

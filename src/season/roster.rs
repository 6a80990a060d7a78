//! Ordering of user-row writes against season transitions

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared by every path that reads a user row and writes it back whole
///
/// Match commits and staff adjustments hold the shared guard for the span
/// between their read and their write. Season close and stay hold the
/// exclusive guard, so a reset never lands between another writer's read
/// and write-back. Guards must not be nested.
#[derive(Debug, Default)]
pub struct RosterLock {
    inner: RwLock<()>,
}

impl RosterLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }

    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }
}

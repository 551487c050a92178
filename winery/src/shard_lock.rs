//! Scoped guard for the lock-then-work-then-transition pattern shared by
//! the packer and the RW-shard cleaner: acquire a shard in a locked state,
//! do fallible work, and roll back to the pre-lock state on any error
//! instead of leaving the shard stuck.

use uuid::Uuid;

use crate::catalog::Catalog;
use crate::state::ShardState;

pub struct ShardLock {
    catalog: Catalog,
    name: String,
    locker: Uuid,
    previous_state: ShardState,
    committed: bool,
}

impl ShardLock {
    pub fn new(catalog: &Catalog, name: String, locker: Uuid, previous_state: ShardState) -> Self {
        Self {
            catalog: catalog.clone(),
            name,
            locker,
            previous_state,
            committed: false,
        }
    }

    /// Call once the locked shard has reached its next state through the
    /// normal path. Disarms the rollback.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ShardLock {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let catalog = self.catalog.clone();
        let name = self.name.clone();
        let locker = self.locker;
        let previous_state = self.previous_state;

        tokio::spawn(async move {
            if let Err(e) = catalog.set_shard_state(&name, previous_state, locker).await {
                tracing::error!(shard = %name, error = %e, "failed to roll back shard state");
            } else {
                tracing::warn!(shard = %name, state = %previous_state, "rolled back after failed work");
            }
        });
    }
}

//! Atomically swappable handle to the current similarity index.
//!
//! Readers take a cheap `Arc` clone and search without holding any lock.
//! The single writer mutates through [`IndexSnapshot::update`], which
//! edits in place when no reader holds the index and otherwise edits a copy
//! made outside the lock, or replaces it wholesale with
//! [`IndexSnapshot::swap`]. Callers of `update` and `swap` must be
//! serialized; the engine's mutation lock does that.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::vector::flat::FlatIndex;

#[derive(Debug)]
pub struct IndexSnapshot {
    current: RwLock<Arc<FlatIndex>>,
}

impl IndexSnapshot {
    pub fn new(index: FlatIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// The index as of this instant.
    pub fn load(&self) -> Arc<FlatIndex> {
        Arc::clone(&self.current.read())
    }

    /// Applies `f` to the current index.
    ///
    /// Readers that loaded the index before this call keep seeing the old
    /// version in full. While one does, the copy is taken without holding
    /// the lock, so new readers keep loading the old version meanwhile.
    pub fn update<R>(&self, f: impl FnOnce(&mut FlatIndex) -> R) -> R {
        {
            let mut current = self.current.write();
            if let Some(index) = Arc::get_mut(&mut current) {
                return f(index);
            }
        }

        let mut next = FlatIndex::clone(&self.load());
        let out = f(&mut next);
        *self.current.write() = Arc::new(next);
        out
    }

    /// Publishes a fully built index, returning the one it replaced.
    pub fn swap(&self, index: FlatIndex) -> Arc<FlatIndex> {
        std::mem::replace(&mut *self.current.write(), Arc::new(index))
    }
}

// src/region_store.rs
//
// The only state shared between the subscriber task and the render loop.
// One slot, one lock; the lock is held for the swap or the Arc clone only.

use crate::types::Region;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Point-in-time view of the region set. Cloning is an `Arc` bump.
#[derive(Debug, Clone, Default)]
pub struct RegionSnapshot {
    pub version: u64,
    pub regions: Arc<Vec<Region>>,
}

impl RegionSnapshot {
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RegionStore {
    slot: Mutex<RegionSnapshot>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a whole new region set. Returns the new version.
    pub fn replace(&self, regions: Vec<Region>) -> u64 {
        // Allocate outside the critical section
        let regions = Arc::new(regions);
        let mut slot = self.lock();
        slot.version += 1;
        slot.regions = regions;
        slot.version
    }

    pub fn snapshot(&self) -> RegionSnapshot {
        self.lock().clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    // The slot only ever holds a complete value, so a panic elsewhere
    // cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, RegionSnapshot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

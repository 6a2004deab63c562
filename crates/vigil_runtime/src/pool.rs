//! Resource pool manager.
//!
//! Pools are named fungible budgets shared by every running task. All
//! mutation happens under one mutex, so allocation across several pools is
//! atomic and `0 <= allocated <= capacity` holds for every pool at all times.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vigil_core::{CoreError, CoreResult};
use vigil_plan::ResourceRequirements;

/// Pools created when no configuration says otherwise
pub const DEFAULT_POOLS: [(&str, u64); 4] =
    [("cpu", 100), ("memory", 100), ("network", 100), ("storage", 100)];

#[derive(Debug, Clone, Copy)]
struct PoolState {
    capacity: u64,
    allocated: u64,
}

/// Point-in-time view of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Pool name
    pub name: String,
    /// Total capacity
    pub capacity: u64,
    /// Currently reserved
    pub allocated: u64,
}

impl PoolSnapshot {
    /// Fraction of capacity in use
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.allocated as f64 / self.capacity as f64
    }

    /// Units still free
    #[must_use]
    pub fn available(&self) -> u64 {
        self.capacity - self.allocated
    }
}

/// Process-wide resource pools
#[derive(Debug, Default)]
pub struct ResourcePoolManager {
    pools: Mutex<IndexMap<String, PoolState>>,
    /// Reject requests naming unregistered pools
    strict: bool,
}

impl ResourcePoolManager {
    /// Create a manager with no pools
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager with the default pools
    #[must_use]
    pub fn with_defaults() -> Self {
        DEFAULT_POOLS
            .iter()
            .fold(Self::new(), |m, (name, cap)| m.with_pool(*name, *cap))
    }

    /// Add a pool
    #[must_use]
    pub fn with_pool(self, name: impl Into<String>, capacity: u64) -> Self {
        self.lock().insert(
            name.into(),
            PoolState {
                capacity,
                allocated: 0,
            },
        );
        self
    }

    /// Reject requests for unknown pools instead of ignoring them
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, PoolState>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pool at runtime
    ///
    /// # Errors
    ///
    /// Returns error if a pool with this name exists
    pub fn add_pool(&self, name: impl Into<String>, capacity: u64) -> CoreResult<()> {
        let name = name.into();
        let mut pools = self.lock();
        if pools.contains_key(&name) {
            return Err(CoreError::AlreadyExists {
                kind: "ResourcePool".to_string(),
                id: name,
            });
        }
        pools.insert(
            name,
            PoolState {
                capacity,
                allocated: 0,
            },
        );
        Ok(())
    }

    /// Reserve every amount in `request` or nothing at all.
    ///
    /// Returns the subset that was actually reserved (pools the manager
    /// knows about), which is what must later be released.
    ///
    /// # Errors
    ///
    /// - `ResourceExhausted` naming the first pool that falls short
    /// - `NotFound` for an unknown pool in strict mode
    pub fn try_allocate(&self, request: &ResourceRequirements) -> CoreResult<ResourceRequirements> {
        let mut pools = self.lock();
        let mut reserved = ResourceRequirements::new();

        for (name, amount) in request.iter() {
            if amount == 0 {
                continue;
            }
            match pools.get(name) {
                Some(state) => {
                    let available = state.capacity - state.allocated;
                    if amount > available {
                        return Err(CoreError::ResourceExhausted {
                            pool: name.to_string(),
                            requested: amount,
                            available,
                        });
                    }
                    reserved = reserved.with(name, amount);
                }
                None if self.strict => {
                    return Err(CoreError::not_found("ResourcePool", name));
                }
                None => {
                    tracing::debug!(pool = name, "ignoring request for unregistered pool");
                }
            }
        }

        for (name, amount) in reserved.iter() {
            if let Some(state) = pools.get_mut(name) {
                state.allocated += amount;
            }
        }
        Ok(reserved)
    }

    /// Reserve `request` and return a lease that gives it back on drop
    ///
    /// # Errors
    ///
    /// Same as [`try_allocate`](Self::try_allocate)
    pub fn allocate(self: &Arc<Self>, request: &ResourceRequirements) -> CoreResult<ResourceLease> {
        let reserved = self.try_allocate(request)?;
        Ok(ResourceLease {
            manager: Arc::clone(self),
            reserved,
        })
    }

    /// Give back `amount` units of `pool`; the allocation never drops below zero
    pub fn release(&self, pool: &str, amount: u64) {
        let mut pools = self.lock();
        match pools.get_mut(pool) {
            Some(state) => {
                if amount > state.allocated {
                    tracing::warn!(
                        pool,
                        amount,
                        allocated = state.allocated,
                        "release exceeds allocation, clamping to zero"
                    );
                }
                state.allocated = state.allocated.saturating_sub(amount);
            }
            None => tracing::debug!(pool, "release for unregistered pool"),
        }
    }

    /// Give back a whole reservation
    pub fn release_all(&self, reserved: &ResourceRequirements) {
        for (name, amount) in reserved.iter() {
            self.release(name, amount);
        }
    }

    /// Free units in `pool`
    #[must_use]
    pub fn available(&self, pool: &str) -> Option<u64> {
        self.lock().get(pool).map(|s| s.capacity - s.allocated)
    }

    /// View of every pool in registration order
    #[must_use]
    pub fn snapshot(&self) -> Vec<PoolSnapshot> {
        self.lock()
            .iter()
            .map(|(name, s)| PoolSnapshot {
                name: name.clone(),
                capacity: s.capacity,
                allocated: s.allocated,
            })
            .collect()
    }
}

/// Reservation held by a running task, released when dropped
#[derive(Debug)]
pub struct ResourceLease {
    manager: Arc<ResourcePoolManager>,
    reserved: ResourceRequirements,
}

impl ResourceLease {
    /// What this lease holds
    #[must_use]
    pub fn reserved(&self) -> &ResourceRequirements {
        &self.reserved
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.manager.release_all(&self.reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let pools = ResourcePoolManager::with_defaults();
        let snap = pools.snapshot();
        assert_eq!(snap.len(), 4);
        assert!(snap.iter().all(|p| p.capacity == 100 && p.allocated == 0));
    }

    #[test]
    fn test_allocate_all_or_nothing() {
        let pools = ResourcePoolManager::new().with_pool("cpu", 10).with_pool("memory", 10);
        pools
            .try_allocate(&ResourceRequirements::new().with("cpu", 8))
            .unwrap();

        let err = pools
            .try_allocate(&ResourceRequirements::new().with("memory", 5).with("cpu", 5))
            .unwrap_err();
        assert!(matches!(err, CoreError::ResourceExhausted { ref pool, available: 2, .. } if pool == "cpu"));
        // memory untouched by the failed request
        assert_eq!(pools.available("memory"), Some(10));
        assert_eq!(pools.available("cpu"), Some(2));
    }

    #[test]
    fn test_release_floors_at_zero() {
        let pools = ResourcePoolManager::new().with_pool("cpu", 10);
        pools.try_allocate(&ResourceRequirements::new().with("cpu", 3)).unwrap();
        pools.release("cpu", 7);
        assert_eq!(pools.available("cpu"), Some(10));
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let pools = Arc::new(ResourcePoolManager::new().with_pool("cpu", 10));
        {
            let lease = pools.allocate(&ResourceRequirements::new().with("cpu", 10)).unwrap();
            assert_eq!(lease.reserved().get("cpu"), 10);
            assert_eq!(pools.available("cpu"), Some(0));
        }
        assert_eq!(pools.available("cpu"), Some(10));
    }

    #[test]
    fn test_unknown_pool_lenient_and_strict() {
        let lenient = ResourcePoolManager::new().with_pool("cpu", 10);
        let reserved = lenient
            .try_allocate(&ResourceRequirements::new().with("gpu", 1).with("cpu", 1))
            .unwrap();
        assert_eq!(reserved.get("gpu"), 0);
        assert_eq!(reserved.get("cpu"), 1);

        let strict = ResourcePoolManager::new().with_pool("cpu", 10).with_strict(true);
        assert!(matches!(
            strict.try_allocate(&ResourceRequirements::new().with("gpu", 1)),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(strict.available("cpu"), Some(10));
    }

    #[test]
    fn test_add_pool_duplicate() {
        let pools = ResourcePoolManager::with_defaults();
        assert!(pools.add_pool("gpu", 4).is_ok());
        assert!(pools.add_pool("gpu", 4).is_err());
    }

    #[test]
    fn test_concurrent_allocations_admit_exactly_capacity() {
        let pools = Arc::new(ResourcePoolManager::new().with_pool("cpu", 100));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pools = Arc::clone(&pools);
                std::thread::spawn(move || {
                    pools
                        .try_allocate(&ResourceRequirements::new().with("cpu", 30))
                        .is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 3);
        assert_eq!(pools.available("cpu"), Some(10));
    }

    proptest! {
        #[test]
        fn prop_allocated_within_bounds(ops in proptest::collection::vec((any::<bool>(), 0u64..40), 0..100)) {
            let pools = ResourcePoolManager::new().with_pool("cpu", 100);
            for (allocate, amount) in ops {
                if allocate {
                    let _ = pools.try_allocate(&ResourceRequirements::new().with("cpu", amount));
                } else {
                    pools.release("cpu", amount);
                }
                let snap = &pools.snapshot()[0];
                prop_assert!(snap.allocated <= snap.capacity);
            }
        }
    }
}

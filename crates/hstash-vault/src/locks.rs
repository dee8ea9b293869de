//! Per-user exclusion between key rotation and encrypt/decrypt
//!
//! Each user has one async RwLock. Encrypt/decrypt paths hold a read guard
//! for their whole operation; a rotation holds the write guard, so it waits
//! for in-flight reads to drain and new reads queue behind it. A separate
//! in-flight flag rejects a second rotation immediately instead of queueing it.
//!
//! A user's slot exists only while some guard references it, so the registry
//! stays bounded by the number of users with calls in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hstash_core::{HstashError, HstashResult};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// `rotating_from` value while the starting generation is not yet known
const GENERATION_UNSET: u64 = u64::MAX;

type Registry = Arc<Mutex<HashMap<String, Arc<UserSlot>>>>;

struct UserSlot {
    lock: Arc<RwLock<()>>,
    rotating: AtomicBool,
    rotating_from: AtomicU64,
}

impl Default for UserSlot {
    fn default() -> Self {
        Self {
            lock: Arc::default(),
            rotating: AtomicBool::new(false),
            rotating_from: AtomicU64::new(GENERATION_UNSET),
        }
    }
}

/// Registry of per-user locks
#[derive(Default)]
pub struct UserLocks {
    slots: Registry,
}

/// A counted reference to a user's slot; the last one out removes it.
struct SlotRef {
    registry: Registry,
    user_id: String,
    slot: Arc<UserSlot>,
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        let mut slots = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // the map's entry plus this one; every other holder cloned under this mutex
        if Arc::strong_count(&self.slot) == 2 && !self.slot.rotating.load(Ordering::SeqCst) {
            slots.remove(&self.user_id);
        }
    }
}

/// Held by encrypt/decrypt calls
pub struct ReadGuard {
    _guard: OwnedRwLockReadGuard<()>,
    _slot: SlotRef,
}

/// Held by enrollment; excludes every other operation on the user
pub struct ExclusiveGuard {
    _guard: OwnedRwLockWriteGuard<()>,
    _slot: SlotRef,
}

/// Held by a rotation; clears the in-flight flag on drop
pub struct RotationGuard {
    // drops first, so a retry after release never sees a stale conflict
    flag: InFlight,
    _guard: OwnedRwLockWriteGuard<()>,
    _slot: SlotRef,
}

impl RotationGuard {
    /// Record which generation this rotation started from. Until this is
    /// called the rotation is not reported.
    pub fn set_from_generation(&self, generation: u64) {
        self.flag
            .slot
            .rotating_from
            .store(generation, Ordering::SeqCst);
    }
}

struct InFlight {
    slot: Arc<UserSlot>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.slot
            .rotating_from
            .store(GENERATION_UNSET, Ordering::SeqCst);
        self.slot.rotating.store(false, Ordering::SeqCst);
    }
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: &str) -> SlotRef {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(user_id.to_string()).or_default().clone();
        SlotRef {
            registry: self.slots.clone(),
            user_id: user_id.to_string(),
            slot,
        }
    }

    /// Shared access for an encrypt/decrypt call. Waits while a rotation holds
    /// the lock.
    pub async fn read(&self, user_id: &str) -> ReadGuard {
        let slot = self.slot(user_id);
        let guard = slot.slot.lock.clone().read_owned().await;
        ReadGuard {
            _guard: guard,
            _slot: slot,
        }
    }

    /// Exclusive access without marking a rotation in flight.
    pub async fn exclusive(&self, user_id: &str) -> ExclusiveGuard {
        let slot = self.slot(user_id);
        let guard = slot.slot.lock.clone().write_owned().await;
        ExclusiveGuard {
            _guard: guard,
            _slot: slot,
        }
    }

    /// Exclusive access for a rotation.
    ///
    /// Fails fast with [`HstashError::RotationConflict`] if another rotation
    /// for the same user is already in flight.
    pub async fn begin_rotation(&self, user_id: &str) -> HstashResult<RotationGuard> {
        let slot = self.slot(user_id);
        if slot
            .slot
            .rotating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(HstashError::RotationConflict(user_id.to_string()));
        }
        // Constructed after `slot` so a cancelled wait clears the flag first
        let flag = InFlight {
            slot: slot.slot.clone(),
        };
        let guard = slot.slot.lock.clone().write_owned().await;
        Ok(RotationGuard {
            flag,
            _guard: guard,
            _slot: slot,
        })
    }

    /// The generation an in-flight rotation started from, once it is known.
    pub fn rotating_from(&self, user_id: &str) -> Option<u64> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get(user_id)?;
        if !slot.rotating.load(Ordering::SeqCst) {
            return None;
        }
        match slot.rotating_from.load(Ordering::SeqCst) {
            GENERATION_UNSET => None,
            generation => Some(generation),
        }
    }

    /// Number of users with a guard currently alive or pending
    pub fn tracked_users(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

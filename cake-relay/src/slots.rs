//! Fixed-size slot allocator
//!
//! Hands out integer worker identities `1..=capacity` from a free list. An
//! identity is either held by exactly one [`SlotGuard`] or sitting in the free
//! list; dropping the guard puts it back. This is what bounds the number of
//! concurrent publisher workers.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

use cake_core::config::MAX_CAPACITY;

use crate::error::{RelayError, Result};

/// Worker identity
pub type SlotId = usize;

struct SlotState {
    free: VecDeque<SlotId>,
    /// `checked_out[id - 1]` is true while `id` is held by a guard
    checked_out: Vec<bool>,
}

/// Bounded free-list of worker identities
pub struct SlotPool {
    state: Mutex<SlotState>,
    capacity: usize,
    released: Notify,
}

impl SlotPool {
    /// Create a pool holding identities `1..=capacity`
    pub fn new(capacity: usize) -> Result<Arc<Self>> {
        if capacity == 0 {
            return Err(RelayError::Configuration(
                "slot pool capacity must be at least 1".to_string(),
            ));
        }
        if capacity > MAX_CAPACITY {
            return Err(RelayError::Configuration(format!(
                "slot pool capacity must be at most {MAX_CAPACITY}, got {capacity}"
            )));
        }

        Ok(Arc::new(Self {
            state: Mutex::new(SlotState {
                free: (1..=capacity).collect(),
                checked_out: vec![false; capacity],
            }),
            capacity,
            released: Notify::new(),
        }))
    }

    /// Take a free identity without waiting. `None` when the pool is depleted.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let mut state = self.state.lock();
        let id = state.free.pop_front()?;
        state.checked_out[id - 1] = true;
        drop(state);

        Some(SlotGuard {
            pool: Arc::clone(self),
            id,
        })
    }

    /// Wait until an identity is free and take it
    pub async fn acquire(self: &Arc<Self>) -> SlotGuard {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.try_acquire() {
                return guard;
            }

            notified.await;
        }
    }

    /// Whether at least one identity is free right now
    #[must_use]
    pub fn has_free(&self) -> bool {
        !self.state.lock().free.is_empty()
    }

    /// Number of free identities
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Number of identities currently held by guards
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.capacity - self.available()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn release_id(&self, id: SlotId) -> Result<()> {
        let mut state = self.state.lock();
        match state.checked_out.get_mut(id.wrapping_sub(1)) {
            Some(held) if *held => {
                *held = false;
                state.free.push_back(id);
            }
            _ => return Err(RelayError::InvalidSlot(id)),
        }
        drop(state);

        self.released.notify_one();
        Ok(())
    }
}

/// A checked-out identity. Returned to the pool on drop.
pub struct SlotGuard {
    pool: Arc<SlotPool>,
    id: SlotId,
}

impl SlotGuard {
    #[must_use]
    pub const fn id(&self) -> SlotId {
        self.id
    }

    /// Return the identity to the pool now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Err(e) = self.pool.release_id(self.id) {
            warn!(slot = self.id, error = %e, "Slot released twice");
        }
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard").field("id", &self.id).finish()
    }
}

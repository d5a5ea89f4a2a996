//! Known-item registry.
//!
//! The set of items the engine currently knows about, unique by
//! [`ItemId`]. Readers see immutable snapshots published through a
//! `watch` channel; all mutation happens on the engine task.
//!
//! # Cleanup
//!
//! The registry can be cleared two ways:
//!
//! - [`KnownItemRegistry::clear_forced`]: unconditional, used by `stop` and
//!   `remove_all_known_items`.
//! - [`KnownItemRegistry::clear_gated`]: used by automatic cleanup; does
//!   nothing while the retain counter or the transfer holds are above zero.
//!
//! The retain counter survives a forced clear. Holders that retained before
//! a `stop` still have to release.
//!
//! In-flight transfers also suppress automatic cleanup. They hold the
//! registry through a separate counter so that an unbalanced caller
//! `release` is still reported as [`EngineError::RetainUnderflow`].

use crate::error::{EngineError, Result};
use drift_files::{Item, ItemId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Immutable snapshot of the known items
pub type KnownItems = Arc<[Item]>;

/// Retain-counted set of known items
#[derive(Debug)]
pub struct KnownItemRegistry {
    items: Vec<Item>,
    ids: HashSet<ItemId>,
    retain_count: usize,
    transfer_holds: usize,
    last_activity: Instant,
    snapshot: watch::Sender<KnownItems>,
}

impl Default for KnownItemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KnownItemRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(KnownItems::from(Vec::new()));
        Self {
            items: Vec::new(),
            ids: HashSet::new(),
            retain_count: 0,
            transfer_holds: 0,
            last_activity: Instant::now(),
            snapshot,
        }
    }

    /// Receiver of registry snapshots
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<KnownItems> {
        self.snapshot.subscribe()
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> KnownItems {
        self.snapshot.borrow().clone()
    }

    /// Insert an item; returns false if it was already known
    pub fn add(&mut self, item: Item) -> bool {
        self.touch();
        if !self.ids.insert(item.id()) {
            return false;
        }
        tracing::debug!(item = %item.id(), title = %item.title(), "Known item added");
        self.items.push(item);
        self.publish();
        true
    }

    /// Returns true if the item is known
    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.ids.contains(id)
    }

    /// Number of known items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no items are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every item regardless of the retain counter.
    ///
    /// Returns true if anything was removed. Temporary storage is deleted
    /// once the last outstanding handle to each item drops.
    pub fn clear_forced(&mut self) -> bool {
        self.touch();
        if self.items.is_empty() {
            return false;
        }
        tracing::debug!(
            count = self.items.len(),
            retains = self.retain_count,
            "Known items cleared"
        );
        self.items.clear();
        self.ids.clear();
        self.publish();
        true
    }

    /// Remove every item if nothing retains or holds the registry.
    ///
    /// Returns true if anything was removed.
    pub fn clear_gated(&mut self) -> bool {
        if self.retain_count > 0 || self.transfer_holds > 0 {
            tracing::trace!(
                retains = self.retain_count,
                transfers = self.transfer_holds,
                "Cleanup suppressed"
            );
            return false;
        }
        self.clear_forced()
    }

    /// Suppress automatic cleanup; returns the new counter value
    pub fn retain(&mut self) -> usize {
        self.touch();
        self.retain_count += 1;
        self.retain_count
    }

    /// Undo one [`retain`](Self::retain); returns the new counter value
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RetainUnderflow`] if the counter is already
    /// zero. The counter is left at zero.
    pub fn release(&mut self) -> Result<usize> {
        self.touch();
        if self.retain_count == 0 {
            tracing::error!("Known items released more often than retained");
            return Err(EngineError::RetainUnderflow);
        }
        self.retain_count -= 1;
        Ok(self.retain_count)
    }

    /// Current retain counter
    #[must_use]
    pub fn retain_count(&self) -> usize {
        self.retain_count
    }

    /// Hold the registry for an in-flight transfer
    pub(crate) fn hold(&mut self) {
        self.touch();
        self.transfer_holds += 1;
    }

    /// Drop a transfer hold
    pub(crate) fn unhold(&mut self) {
        debug_assert!(self.transfer_holds > 0, "unbalanced transfer hold");
        self.touch();
        self.transfer_holds = self.transfer_holds.saturating_sub(1);
    }

    /// Number of in-flight transfers holding the registry
    #[must_use]
    pub fn transfer_holds(&self) -> usize {
        self.transfer_holds
    }

    /// Returns true if automatic cleanup may run at `now`
    #[must_use]
    pub fn is_idle(&self, idle_after: Duration, now: Instant) -> bool {
        self.retain_count == 0
            && self.transfer_holds == 0
            && now.saturating_duration_since(self.last_activity) >= idle_after
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn publish(&self) {
        let items: Vec<Item> = self.items.clone();
        self.snapshot.send_replace(KnownItems::from(items));
    }
}

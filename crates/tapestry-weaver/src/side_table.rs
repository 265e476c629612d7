//! Storage for new fields kept outside their objects
//!
//! Woven code that stores new fields through
//! [`NewFieldStorage::SideTable`](crate::merger::NewFieldStorage) needs a
//! host-side store. [`IdentityTable`] is that store: values are keyed by an
//! [`IdentityHandle`] the host assigns to each object plus the field key
//! (`"<class>.<field>"`). Nothing is ever dropped implicitly; the host evicts
//! a handle when the object it stands for reaches the end of its life.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Stable identity of one host object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityHandle(pub u64);

/// Thread-safe side table of named slots per identity
pub struct IdentityTable<V> {
    /// Handle → field key → value
    entries: RwLock<FxHashMap<IdentityHandle, FxHashMap<String, V>>>,
    next_handle: AtomicU64,
}

impl<V> Default for IdentityTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> IdentityTable<V> {
    pub fn new() -> Self {
        IdentityTable {
            entries: RwLock::new(FxHashMap::default()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Fresh handle, never returned before by this table
    pub fn allocate(&self) -> IdentityHandle {
        IdentityHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Store `value` in slot `field` of `handle`, returning the previous value
    pub fn insert(&self, handle: IdentityHandle, field: impl Into<String>, value: V) -> Option<V> {
        self.entries
            .write()
            .entry(handle)
            .or_default()
            .insert(field.into(), value)
    }

    /// Remove one slot; the handle's other slots stay
    pub fn remove_field(&self, handle: IdentityHandle, field: &str) -> Option<V> {
        let mut entries = self.entries.write();
        let slots = entries.get_mut(&handle)?;
        let removed = slots.remove(field);
        if slots.is_empty() {
            entries.remove(&handle);
        }
        removed
    }

    /// Drop every slot of `handle`, returning how many there were
    pub fn evict(&self, handle: IdentityHandle) -> usize {
        self.entries.write().remove(&handle).map_or(0, |slots| slots.len())
    }

    /// Whether any slot is stored for `handle`
    pub fn contains(&self, handle: IdentityHandle) -> bool {
        self.entries.read().contains_key(&handle)
    }

    /// Number of handles with at least one slot
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone> IdentityTable<V> {
    /// Copy of the value in slot `field` of `handle`
    pub fn get(&self, handle: IdentityHandle, field: &str) -> Option<V> {
        self.entries.read().get(&handle)?.get(field).cloned()
    }
}

//! Native Handle Slot Table
//!
//! Native resources (buffer storage, open files, watchers, pending callbacks)
//! live in per-kind [`HandleTable`]s. Callers hold an opaque [`HandleId`]
//! made of a slot index and a generation counter: releasing a slot bumps its
//! generation, so a stale id can never resolve to a resource that later reuses
//! the same index.
//!
//! A [`NativeHandle`] is the exclusive owner of one slot. It releases the slot
//! exactly once, either through [`NativeHandle::release`] or on drop. A
//! [`WeakHandle`] is a non-owning alias that resolves the same slot but never
//! releases it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{NodeError, NodeResult};

// =============================================================================
// Handle Ids
// =============================================================================

/// Opaque reference to a slot in a [`HandleTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    /// Pack the id into a single integer for hosts that can only carry numbers.
    pub fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Rebuild an id from [`HandleId::to_raw`] output.
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

// =============================================================================
// Slot Table
// =============================================================================

struct Slot<R> {
    generation: u32,
    resource: Option<Arc<R>>,
}

struct Slab<R> {
    slots: Vec<Slot<R>>,
    free: Vec<u32>,
    live: usize,
}

/// Generational arena mapping [`HandleId`]s to native resources
pub struct HandleTable<R> {
    kind: &'static str,
    slab: RwLock<Slab<R>>,
}

impl<R: Send + Sync + 'static> HandleTable<R> {
    /// Create an empty table. `kind` names the resource in errors and logs.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slab: RwLock::new(Slab {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Store a resource and return the handle that owns its slot
    pub fn insert(&'static self, resource: R) -> NativeHandle<R> {
        self.insert_shared(resource).0
    }

    /// Like [`HandleTable::insert`], also returning a strong reference to
    /// the stored resource
    pub fn insert_shared(&'static self, resource: R) -> (NativeHandle<R>, Arc<R>) {
        let shared = Arc::new(resource);
        let mut slab = self.slab.write();
        let resource = Some(Arc::clone(&shared));

        let id = match slab.free.pop() {
            Some(index) => {
                let slot = &mut slab.slots[index as usize];
                slot.resource = resource;
                HandleId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = slab.slots.len() as u32;
                slab.slots.push(Slot {
                    generation: 1,
                    resource,
                });
                HandleId {
                    index,
                    generation: 1,
                }
            }
        };
        slab.live += 1;

        let handle = NativeHandle {
            id,
            table: self,
            released: AtomicBool::new(false),
        };
        (handle, shared)
    }

    /// Resolve an id. Returns `None` for released or stale ids.
    pub fn get(&self, id: HandleId) -> Option<Arc<R>> {
        let slab = self.slab.read();
        slab.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.resource.clone())
    }

    /// Check if an id still resolves
    pub fn contains(&self, id: HandleId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.slab.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn remove(&self, id: HandleId) -> Option<Arc<R>> {
        let mut slab = self.slab.write();
        let slot = slab.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let resource = slot.resource.take()?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slab.free.push(id.index);
        slab.live -= 1;
        Some(resource)
    }
}

// =============================================================================
// Owning and Non-owning Handles
// =============================================================================

/// Exclusive owner of one slot in a [`HandleTable`]
///
/// Not `Clone`: exactly one façade object owns a given native resource.
pub struct NativeHandle<R: Send + Sync + 'static> {
    id: HandleId,
    table: &'static HandleTable<R>,
    released: AtomicBool,
}

impl<R: Send + Sync + 'static> NativeHandle<R> {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Resolve the resource, failing with a state error once released
    pub fn resource(&self) -> NodeResult<Arc<R>> {
        if self.is_released() {
            return Err(NodeError::Released(self.table.kind));
        }
        self.table
            .get(self.id)
            .ok_or(NodeError::Released(self.table.kind))
    }

    /// Release the slot. Only the first call returns the resource; later
    /// calls are no-ops.
    pub fn release(&self) -> Option<Arc<R>> {
        if self.released.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.table.remove(self.id)
    }

    /// Non-owning alias to the same slot
    pub fn downgrade(&self) -> WeakHandle<R> {
        WeakHandle {
            id: self.id,
            table: self.table,
        }
    }
}

impl<R: Send + Sync + 'static> Drop for NativeHandle<R> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for NativeHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &self.table.kind)
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Non-owning alias to a slot. Never releases it.
pub struct WeakHandle<R: Send + Sync + 'static> {
    id: HandleId,
    table: &'static HandleTable<R>,
}

impl<R: Send + Sync + 'static> WeakHandle<R> {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.table.contains(self.id)
    }

    pub fn resource(&self) -> NodeResult<Arc<R>> {
        self.table
            .get(self.id)
            .ok_or(NodeError::Released(self.table.kind))
    }
}

impl<R: Send + Sync + 'static> Clone for WeakHandle<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: Send + Sync + 'static> Copy for WeakHandle<R> {}

impl<R: Send + Sync + 'static> fmt::Debug for WeakHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("kind", &self.table.kind)
            .field("id", &self.id)
            .finish()
    }
}

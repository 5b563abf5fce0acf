//! Live host objects projected into script
//!
//! Each projected host object is an external object whose external data is
//! an [`ExternalData`] record naming its registry slot. The slot keeps the
//! host object alive until the engine collects the script wrapper and runs
//! [`finalize_external`].

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::reflect::HostObject;

/// Tag identifying external data written by this crate.
pub const EXTERNAL_DATA_MAGIC: u64 = 0x4348_4b52_484f_5354;

#[repr(C)]
struct ExternalData {
    magic: u64,
    id: u64,
    registry: Weak<ExternalObjectRegistry>,
}

#[derive(Debug, Default)]
pub struct ExternalObjectRegistry {
    objects: Mutex<HashMap<u64, HostObject>>,
    next_id: AtomicU64,
}

impl ExternalObjectRegistry {
    pub fn insert(&self, object: HostObject) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.objects.lock().insert(id, object);
        id
    }

    pub fn get(&self, id: u64) -> Option<HostObject> {
        self.objects.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: u64) -> Option<HostObject> {
        self.objects.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Drops every entry. Used when the runtime goes away without running
    /// finalizers.
    pub fn clear(&self) -> usize {
        let mut objects = self.objects.lock();
        let count = objects.len();
        objects.clear();
        count
    }

    /// Registers `object` and returns the external data for its wrapper.
    ///
    /// The returned pointer is owned by the wrapper and freed by
    /// [`finalize_external`].
    pub(crate) fn external_data(self: &Arc<Self>, object: HostObject) -> *mut c_void {
        let id = self.insert(object);
        Box::into_raw(Box::new(ExternalData {
            magic: EXTERNAL_DATA_MAGIC,
            id,
            registry: Arc::downgrade(self),
        })) as *mut c_void
    }

    /// Resolves external data back to its host object.
    ///
    /// # Safety
    ///
    /// `data` must be null or external data of an external object created
    /// in a runtime that only ever receives data from
    /// [`external_data`](Self::external_data).
    pub(crate) unsafe fn resolve(data: *mut c_void) -> Option<HostObject> {
        if data.is_null() {
            return None;
        }
        let data = &*(data as *const ExternalData);
        if data.magic != EXTERNAL_DATA_MAGIC {
            return None;
        }
        data.registry.upgrade()?.get(data.id)
    }
}

/// Finalizer of projected host objects.
///
/// # Safety
///
/// Called by the engine exactly once with data produced by
/// [`ExternalObjectRegistry::external_data`].
pub(crate) unsafe extern "system" fn finalize_external(data: *mut c_void) {
    if data.is_null() {
        return;
    }
    let data = Box::from_raw(data as *mut ExternalData);
    if data.magic != EXTERNAL_DATA_MAGIC {
        return;
    }
    if let Some(registry) = data.registry.upgrade() {
        registry.remove(data.id);
        trace!(id = data.id, live = registry.len(), "host object finalized");
    }
}

//! Single-interface COM objects implemented in Rust.

use std::ffi::c_void;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{ComPtr, Guid, HResult, IID_IUNKNOWN};

/// The three `IUnknown` slots every vtable starts with.
#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    pub release: unsafe extern "system" fn(*mut c_void) -> u32,
}

impl IUnknownVtbl {
    /// `IUnknown` entries for a [`ComObject<T>`].
    pub const fn of<T: 'static>() -> Self {
        Self {
            query_interface: ComObject::<T>::query_interface,
            add_ref: ComObject::<T>::add_ref,
            release: ComObject::<T>::release,
        }
    }
}

/// A heap-allocated COM object exposing one interface whose vtable starts
/// with [`IUnknownVtbl::of::<T>()`]. The object is freed when the last
/// reference is released.
#[repr(C)]
pub struct ComObject<T> {
    vtable: *const c_void,
    refs: AtomicU32,
    iid: Guid,
    pub value: T,
}

impl<T: 'static> ComObject<T> {
    /// Allocates the object and returns its single owning reference.
    ///
    /// `vtable` must be a `#[repr(C)]` struct whose first field is
    /// `IUnknownVtbl::of::<T>()` and whose remaining entries take
    /// `*mut ComObject<T>` as `this`.
    pub fn create<V: Sync>(vtable: &'static V, iid: Guid, value: T) -> ComPtr {
        let object = Box::new(Self {
            vtable: vtable as *const V as *const c_void,
            refs: AtomicU32::new(1),
            iid,
            value,
        });
        let raw = Box::into_raw(object) as *mut c_void;
        // SAFETY: freshly allocated with one reference.
        match unsafe { ComPtr::from_raw(raw) } {
            Some(ptr) => ptr,
            None => unreachable!("Box::into_raw never returns null"),
        }
    }

    /// Recovers the object behind an interface pointer handed to a vtable entry.
    ///
    /// # Safety
    /// `this` must point to a live `ComObject<T>`.
    pub unsafe fn from_this<'a>(this: *mut c_void) -> &'a Self {
        &*(this as *const Self)
    }

    /// Recovers the object behind a `ComPtr` created by [`ComObject::create`].
    ///
    /// # Safety
    /// `ptr` must have been created for this `T`.
    pub unsafe fn from_ptr(ptr: &ComPtr) -> &Self {
        Self::from_this(ptr.as_raw())
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Default `QueryInterface`: `IUnknown` and the interface given at creation.
    pub unsafe extern "system" fn query_interface(
        this: *mut c_void,
        iid: *const Guid,
        out: *mut *mut c_void,
    ) -> HResult {
        if out.is_null() || iid.is_null() {
            return HResult::E_POINTER;
        }
        let object = Self::from_this(this);
        if *iid == IID_IUNKNOWN || *iid == object.iid {
            object.refs.fetch_add(1, Ordering::AcqRel);
            *out = this;
            HResult::S_OK
        } else {
            *out = std::ptr::null_mut();
            HResult::E_NOINTERFACE
        }
    }

    pub unsafe extern "system" fn add_ref(this: *mut c_void) -> u32 {
        Self::from_this(this).refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub unsafe extern "system" fn release(this: *mut c_void) -> u32 {
        let remaining = Self::from_this(this).refs.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            drop(Box::from_raw(this as *mut Self));
        }
        remaining
    }
}

//! Minimal COM plumbing
//!
//! Just enough of COM to drive the ActiveScript interfaces: identifiers,
//! status codes, reference-counted interface pointers with vtable slot
//! dispatch, the automation data types, and a generic single-interface
//! object for implementing callbacks in Rust.

mod bstr;
mod object;
mod types;

pub use bstr::Bstr;
pub use object::{ComObject, IUnknownVtbl};
pub use types::*;

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

/// A COM interface or class identifier.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn from_u128(value: u128) -> Self {
        Self {
            data1: (value >> 96) as u32,
            data2: (value >> 80 & 0xFFFF) as u16,
            data3: (value >> 64 & 0xFFFF) as u16,
            data4: (value as u64).to_be_bytes(),
        }
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub const IID_IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_c000_000000000046);
pub const IID_IDISPATCH: Guid = Guid::from_u128(0x00020400_0000_0000_c000_000000000046);
pub const IID_IDISPATCH_EX: Guid = Guid::from_u128(0xa6ef9860_c720_11d0_9337_00a0c90dcaa9);

/// A COM status code.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: Self = Self(0);
    pub const S_FALSE: Self = Self(1);
    pub const E_NOTIMPL: Self = Self(0x8000_4001_u32 as i32);
    pub const E_NOINTERFACE: Self = Self(0x8000_4002_u32 as i32);
    pub const E_POINTER: Self = Self(0x8000_4003_u32 as i32);
    pub const E_ABORT: Self = Self(0x8000_4004_u32 as i32);
    pub const E_FAIL: Self = Self(0x8000_4005_u32 as i32);
    pub const E_UNEXPECTED: Self = Self(0x8000_FFFF_u32 as i32);
    pub const E_INVALIDARG: Self = Self(0x8007_0057_u32 as i32);
    pub const E_OUTOFMEMORY: Self = Self(0x8007_000E_u32 as i32);
    pub const DISP_E_MEMBERNOTFOUND: Self = Self(0x8002_0003_u32 as i32);
    pub const DISP_E_TYPEMISMATCH: Self = Self(0x8002_0005_u32 as i32);
    pub const DISP_E_PARAMNOTFOUND: Self = Self(0x8002_0004_u32 as i32);
    pub const DISP_E_UNKNOWNNAME: Self = Self(0x8002_0006_u32 as i32);
    pub const DISP_E_EXCEPTION: Self = Self(0x8002_0009_u32 as i32);
    pub const DISP_E_BADPARAMCOUNT: Self = Self(0x8002_000E_u32 as i32);
    pub const TYPE_E_ELEMENTNOTFOUND: Self = Self(0x8002_802B_u32 as i32);
    pub const SCRIPT_E_REPORTED: Self = Self(0x8002_0101_u32 as i32);
    pub const SCRIPT_E_PROPAGATE: Self = Self(0x8002_0102_u32 as i32);
    pub const CO_E_NOTINITIALIZED: Self = Self(0x8004_01F0_u32 as i32);
    pub const REGDB_E_CLASSNOTREG: Self = Self(0x8004_0154_u32 as i32);
    pub const CLASS_E_CLASSNOTAVAILABLE: Self = Self(0x8004_0111_u32 as i32);

    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// Facility-specific code in the low word.
    #[inline]
    pub const fn code(self) -> u16 {
        (self.0 as u32 & 0xFFFF) as u16
    }

    #[inline]
    pub const fn facility(self) -> u16 {
        ((self.0 as u32 >> 16) & 0x1FFF) as u16
    }

    #[inline]
    pub fn ok(self) -> ComResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(ComError::Call(self))
        }
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComError {
    #[error("COM call failed with HRESULT {0}")]
    Call(HResult),
    #[error("interface {0} is not supported")]
    NoInterface(Guid),
    #[error("null interface pointer")]
    NullPointer,
}

impl ComError {
    pub fn hresult(&self) -> HResult {
        match self {
            ComError::Call(hr) => *hr,
            ComError::NoInterface(_) => HResult::E_NOINTERFACE,
            ComError::NullPointer => HResult::E_POINTER,
        }
    }
}

pub type ComResult<T> = Result<T, ComError>;

/// Reads the function pointer stored in vtable slot `index` of `raw`.
///
/// # Safety
/// `raw` must be a live interface pointer with at least `index + 1` slots
/// and `F` must be the exact function pointer type of that slot.
#[inline]
pub unsafe fn vtable_slot<F: Copy>(raw: *mut c_void, index: usize) -> F {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const c_void>());
    let vtable = *(raw as *const *const *const c_void);
    let entry = *vtable.add(index);
    std::mem::transmute_copy::<*const c_void, F>(&entry)
}

/// Null-terminated UTF-16 copy of `value` for `LPCOLESTR` parameters.
pub fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Reads a null-terminated UTF-16 string.
///
/// # Safety
/// `raw` must be null or point to a null-terminated buffer.
pub unsafe fn from_wide_ptr(raw: *const u16) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    let mut len = 0;
    while *raw.add(len) != 0 {
        len += 1;
    }
    Some(String::from_utf16_lossy(std::slice::from_raw_parts(raw, len)))
}

/// Owning reference to a COM interface.
///
/// Cloning calls `AddRef` (slot 1), dropping calls `Release` (slot 2).
/// Interface methods are reached by vtable slot with [`ComPtr::slot`].
pub struct ComPtr {
    raw: NonNull<c_void>,
}

type QueryInterfaceFn =
    unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult;
type RefCountFn = unsafe extern "system" fn(*mut c_void) -> u32;

impl ComPtr {
    /// Takes ownership of one reference held by `raw`.
    ///
    /// # Safety
    /// `raw` must be null or a valid interface pointer whose reference the
    /// caller gives up.
    pub unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw).map(|raw| Self { raw })
    }

    /// Adds a reference to a borrowed interface pointer.
    ///
    /// # Safety
    /// `raw` must be null or a valid interface pointer.
    pub unsafe fn from_raw_borrowed(raw: *mut c_void) -> Option<Self> {
        let ptr = Self::from_raw(raw)?;
        let add_ref: RefCountFn = ptr.slot(1);
        add_ref(ptr.as_raw());
        Some(ptr)
    }

    #[inline]
    pub fn as_raw(&self) -> *mut c_void {
        self.raw.as_ptr()
    }

    /// Gives up ownership without releasing.
    pub fn into_raw(self) -> *mut c_void {
        let raw = self.as_raw();
        std::mem::forget(self);
        raw
    }

    /// Reads the function pointer stored in vtable slot `index`.
    ///
    /// # Safety
    /// `F` must be the exact function pointer type of that slot and the
    /// interface must have at least `index + 1` slots.
    #[inline]
    pub unsafe fn slot<F: Copy>(&self, index: usize) -> F {
        vtable_slot(self.as_raw(), index)
    }

    pub fn query_interface(&self, iid: &Guid) -> ComResult<ComPtr> {
        let mut out = std::ptr::null_mut();
        // SAFETY: slot 0 of every interface is QueryInterface.
        let hr = unsafe {
            let query: QueryInterfaceFn = self.slot(0);
            query(self.as_raw(), iid, &mut out)
        };
        if !hr.is_ok() {
            return Err(if hr == HResult::E_NOINTERFACE {
                ComError::NoInterface(*iid)
            } else {
                ComError::Call(hr)
            });
        }
        // SAFETY: a successful QueryInterface hands out one reference.
        unsafe { ComPtr::from_raw(out) }.ok_or(ComError::NullPointer)
    }
}

impl Clone for ComPtr {
    fn clone(&self) -> Self {
        // SAFETY: slot 1 of every interface is AddRef.
        unsafe {
            let add_ref: RefCountFn = self.slot(1);
            add_ref(self.as_raw());
        }
        Self { raw: self.raw }
    }
}

impl Drop for ComPtr {
    fn drop(&mut self) {
        // SAFETY: slot 2 of every interface is Release; this value owns one reference.
        unsafe {
            let release: RefCountFn = self.slot(2);
            release(self.as_raw());
        }
    }
}

impl fmt::Debug for ComPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComPtr({:p})", self.raw)
    }
}

/// Initializes COM for the calling thread in the single-threaded apartment.
#[cfg(target_os = "windows")]
pub fn initialize_apartment() -> ComResult<()> {
    use windows_sys::Win32::System::Com::{CoInitializeEx, COINIT_APARTMENTTHREADED};

    // SAFETY: plain Win32 call; balanced by `uninitialize_apartment`.
    let hr = HResult(unsafe { CoInitializeEx(std::ptr::null(), COINIT_APARTMENTTHREADED as _) });
    hr.ok()
}

#[cfg(target_os = "windows")]
pub fn uninitialize_apartment() {
    // SAFETY: only called after a successful `initialize_apartment` on this thread.
    unsafe { windows_sys::Win32::System::Com::CoUninitialize() }
}

/// Creates an in-process instance of `clsid` and queries `iid` on it.
#[cfg(target_os = "windows")]
pub fn create_instance(clsid: &Guid, iid: &Guid) -> ComResult<ComPtr> {
    use windows_sys::Win32::System::Com::{CoCreateInstance, CLSCTX_INPROC_SERVER};

    let mut out = std::ptr::null_mut();
    // SAFETY: `Guid` has the same layout as the Win32 GUID.
    let hr = HResult(unsafe {
        CoCreateInstance(
            clsid as *const Guid as *const _,
            std::ptr::null_mut(),
            CLSCTX_INPROC_SERVER,
            iid as *const Guid as *const _,
            &mut out,
        )
    });
    hr.ok()?;
    unsafe { ComPtr::from_raw(out) }.ok_or(ComError::NullPointer)
}

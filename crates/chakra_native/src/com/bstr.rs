//! Owned automation strings
//!
//! A BSTR is a length-prefixed, null-terminated UTF-16 buffer whose pointer
//! addresses the first character. On Windows the buffer comes from the OLE
//! allocator; elsewhere an identical layout is allocated on the Rust heap so
//! that the COM plumbing can run against in-process objects.

use std::fmt;

/// Owning BSTR. A null pointer is the empty string.
pub struct Bstr(*mut u16);

impl Bstr {
    pub const fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn new(value: &str) -> Self {
        let wide: Vec<u16> = value.encode_utf16().collect();
        Self(imp::alloc(&wide))
    }

    /// Takes ownership of `raw`.
    ///
    /// # Safety
    /// `raw` must be null or a BSTR allocated by the platform allocator
    /// that nobody else frees.
    pub unsafe fn from_raw(raw: *mut u16) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> *mut u16 {
        let raw = self.0;
        std::mem::forget(self);
        raw
    }

    pub fn as_ptr(&self) -> *const u16 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Length in UTF-16 code units.
    pub fn len(&self) -> usize {
        // SAFETY: owned BSTR or null.
        unsafe { imp::len(self.0) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_wide(&self) -> &[u16] {
        if self.0.is_null() {
            return &[];
        }
        // SAFETY: the buffer holds `len` code units.
        unsafe { std::slice::from_raw_parts(self.0, self.len()) }
    }

    /// Copies a borrowed BSTR without taking ownership.
    ///
    /// # Safety
    /// `raw` must be null or a live BSTR.
    pub unsafe fn read(raw: *const u16) -> String {
        if raw.is_null() {
            return String::new();
        }
        let len = imp::len(raw as *mut u16);
        String::from_utf16_lossy(std::slice::from_raw_parts(raw, len))
    }
}

impl Default for Bstr {
    fn default() -> Self {
        Self::null()
    }
}

impl Drop for Bstr {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: owned BSTR.
            unsafe { imp::free(self.0) }
        }
    }
}

impl From<&str> for Bstr {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Bstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf16_lossy(self.as_wide()))
    }
}

impl fmt::Debug for Bstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bstr({:?})", self.to_string())
    }
}

#[cfg(target_os = "windows")]
mod imp {
    use windows_sys::Win32::Foundation::{SysAllocStringLen, SysFreeString, SysStringLen};

    pub fn alloc(wide: &[u16]) -> *mut u16 {
        // SAFETY: copies `wide.len()` units from a valid slice.
        unsafe { SysAllocStringLen(wide.as_ptr(), wide.len() as u32) as *mut u16 }
    }

    pub unsafe fn len(raw: *mut u16) -> usize {
        SysStringLen(raw as _) as usize
    }

    pub unsafe fn free(raw: *mut u16) {
        SysFreeString(raw as _)
    }
}

#[cfg(not(target_os = "windows"))]
mod imp {
    // [byte length: u32][chars...][0]; the pointer addresses the first char.
    const PREFIX: usize = 2;

    pub fn alloc(wide: &[u16]) -> *mut u16 {
        let mut buffer = Vec::with_capacity(wide.len() + PREFIX + 1);
        let bytes = (wide.len() * 2) as u32;
        buffer.push(bytes as u16);
        buffer.push((bytes >> 16) as u16);
        buffer.extend_from_slice(wide);
        buffer.push(0);
        let raw = Box::into_raw(buffer.into_boxed_slice()) as *mut u16;
        // SAFETY: the allocation holds at least PREFIX units.
        unsafe { raw.add(PREFIX) }
    }

    pub unsafe fn len(raw: *mut u16) -> usize {
        if raw.is_null() {
            return 0;
        }
        let low = *raw.sub(2) as u32;
        let high = *raw.sub(1) as u32;
        ((high << 16 | low) / 2) as usize
    }

    pub unsafe fn free(raw: *mut u16) {
        let total = len(raw) + PREFIX + 1;
        let base = raw.sub(PREFIX);
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(base, total)));
    }
}

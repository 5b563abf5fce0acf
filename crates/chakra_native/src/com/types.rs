//! Automation data types shared with the script engine.

use std::ffi::c_void;
use std::fmt;

use super::{Bstr, ComPtr};

pub type VarType = u16;

pub const VT_EMPTY: VarType = 0;
pub const VT_NULL: VarType = 1;
pub const VT_I2: VarType = 2;
pub const VT_I4: VarType = 3;
pub const VT_R4: VarType = 4;
pub const VT_R8: VarType = 5;
pub const VT_CY: VarType = 6;
pub const VT_DATE: VarType = 7;
pub const VT_BSTR: VarType = 8;
pub const VT_DISPATCH: VarType = 9;
pub const VT_ERROR: VarType = 10;
pub const VT_BOOL: VarType = 11;
pub const VT_VARIANT: VarType = 12;
pub const VT_UNKNOWN: VarType = 13;
pub const VT_I1: VarType = 16;
pub const VT_UI1: VarType = 17;
pub const VT_UI2: VarType = 18;
pub const VT_UI4: VarType = 19;
pub const VT_I8: VarType = 20;
pub const VT_UI8: VarType = 21;
pub const VT_INT: VarType = 22;
pub const VT_UINT: VarType = 23;
pub const VT_BYREF: VarType = 0x4000;
pub const VT_TYPEMASK: VarType = 0x0FFF;

pub const VARIANT_TRUE: i16 = -1;
pub const VARIANT_FALSE: i16 = 0;

pub type DispId = i32;

pub const DISPID_VALUE: DispId = 0;
pub const DISPID_UNKNOWN: DispId = -1;
pub const DISPID_PROPERTYPUT: DispId = -3;

pub const DISPATCH_METHOD: u16 = 0x1;
pub const DISPATCH_PROPERTYGET: u16 = 0x2;
pub const DISPATCH_PROPERTYPUT: u16 = 0x4;
pub const DISPATCH_PROPERTYPUTREF: u16 = 0x8;
pub const DISPATCH_CONSTRUCT: u16 = 0x4000;

pub const FDEX_NAME_CASE_SENSITIVE: u32 = 0x1;
pub const FDEX_NAME_ENSURE: u32 = 0x2;

#[repr(C)]
#[derive(Clone, Copy)]
pub union VariantData {
    pub ll_val: i64,
    pub dbl_val: f64,
    pub flt_val: f32,
    pub l_val: i32,
    pub i_val: i16,
    pub b_val: u8,
    pub bool_val: i16,
    pub scode: i32,
    pub bstr_val: *mut u16,
    pub ptr: *mut c_void,
    pub record: [*mut c_void; 2],
}

/// An owned VARIANT. Dropping it clears the payload (`VariantClear`
/// semantics for the types this crate produces).
#[repr(C)]
pub struct Variant {
    vt: VarType,
    reserved1: u16,
    reserved2: u16,
    reserved3: u16,
    data: VariantData,
}

impl Variant {
    fn with(vt: VarType, data: VariantData) -> Self {
        Self {
            vt,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            data,
        }
    }

    pub fn empty() -> Self {
        Self::with(VT_EMPTY, VariantData { record: [std::ptr::null_mut(); 2] })
    }

    pub fn null() -> Self {
        let mut variant = Self::empty();
        variant.vt = VT_NULL;
        variant
    }

    pub fn from_bool(value: bool) -> Self {
        let mut variant = Self::empty();
        variant.vt = VT_BOOL;
        variant.data.bool_val = if value { VARIANT_TRUE } else { VARIANT_FALSE };
        variant
    }

    pub fn from_i32(value: i32) -> Self {
        let mut variant = Self::empty();
        variant.vt = VT_I4;
        variant.data.l_val = value;
        variant
    }

    pub fn from_f64(value: f64) -> Self {
        let mut variant = Self::empty();
        variant.vt = VT_R8;
        variant.data.dbl_val = value;
        variant
    }

    pub fn from_string(value: &str) -> Self {
        let mut variant = Self::empty();
        variant.vt = VT_BSTR;
        variant.data.bstr_val = Bstr::new(value).into_raw();
        variant
    }

    /// Stores an `IDispatch` reference, taking ownership of it.
    pub fn from_dispatch(dispatch: ComPtr) -> Self {
        let mut variant = Self::empty();
        variant.vt = VT_DISPATCH;
        variant.data.ptr = dispatch.into_raw();
        variant
    }

    #[inline]
    pub fn vt(&self) -> VarType {
        self.vt
    }

    /// Raw payload; interpretation depends on [`Variant::vt`].
    ///
    /// # Safety
    /// Callers must read only the union member that matches the tag.
    #[inline]
    pub unsafe fn data(&self) -> &VariantData {
        &self.data
    }

    /// Follows a `VT_BYREF | VT_VARIANT` indirection.
    ///
    /// # Safety
    /// The variant must have been produced by a COM caller that keeps the
    /// referenced variant alive.
    pub unsafe fn dereference(&self) -> &Variant {
        if self.vt == VT_BYREF | VT_VARIANT && !self.data.ptr.is_null() {
            &*(self.data.ptr as *const Variant)
        } else {
            self
        }
    }

    /// Reads the string payload of a `VT_BSTR` variant.
    pub fn bstr_value(&self) -> Option<String> {
        if self.vt != VT_BSTR {
            return None;
        }
        // SAFETY: tag checked above.
        Some(unsafe { Bstr::read(self.data.bstr_val) })
    }

    /// Adds a reference to the interface of a `VT_DISPATCH`/`VT_UNKNOWN` variant.
    pub fn interface_value(&self) -> Option<ComPtr> {
        if self.vt != VT_DISPATCH && self.vt != VT_UNKNOWN {
            return None;
        }
        // SAFETY: tag checked above; null interfaces map to None.
        unsafe { ComPtr::from_raw_borrowed(self.data.ptr) }
    }

    /// Resets to `VT_EMPTY`, releasing the payload.
    pub fn clear(&mut self) {
        match self.vt {
            // SAFETY: tag-matched payloads owned by this variant.
            VT_BSTR => unsafe { drop(Bstr::from_raw(self.data.bstr_val)) },
            VT_DISPATCH | VT_UNKNOWN => unsafe { drop(ComPtr::from_raw(self.data.ptr)) },
            _ => {}
        }
        self.vt = VT_EMPTY;
        self.data = VariantData { record: [std::ptr::null_mut(); 2] };
    }

    /// Writes `self` into a caller-provided slot without dropping the old contents.
    ///
    /// # Safety
    /// `out` must be null or valid for writes.
    pub unsafe fn write_to(self, out: *mut Variant) {
        if out.is_null() {
            return;
        }
        std::ptr::write(out, self);
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: each arm reads the member matching the tag.
        unsafe {
            match self.vt {
                VT_EMPTY => write!(f, "Variant(Empty)"),
                VT_NULL => write!(f, "Variant(Null)"),
                VT_BOOL => write!(f, "Variant(Bool({}))", self.data.bool_val != 0),
                VT_I4 | VT_INT => write!(f, "Variant(I4({}))", self.data.l_val),
                VT_R8 => write!(f, "Variant(R8({}))", self.data.dbl_val),
                VT_BSTR => write!(f, "Variant(Bstr({:?}))", Bstr::read(self.data.bstr_val)),
                vt => write!(f, "Variant(vt={})", vt),
            }
        }
    }
}

/// Arguments of an `IDispatch::Invoke` call. Positional arguments are
/// stored last-to-first.
#[repr(C)]
pub struct DispParams {
    pub rgvarg: *mut Variant,
    pub rgdispid_named_args: *mut DispId,
    pub c_args: u32,
    pub c_named_args: u32,
}

impl DispParams {
    /// Builds parameters over `args`, which must already be in reverse order.
    pub fn new(args: &mut [Variant]) -> Self {
        Self {
            rgvarg: if args.is_empty() { std::ptr::null_mut() } else { args.as_mut_ptr() },
            rgdispid_named_args: std::ptr::null_mut(),
            c_args: args.len() as u32,
            c_named_args: 0,
        }
    }

    /// Positional arguments in call order.
    ///
    /// # Safety
    /// `rgvarg` must point to `c_args` live variants.
    pub unsafe fn arguments(&self) -> Vec<&Variant> {
        if self.rgvarg.is_null() {
            return Vec::new();
        }
        let slice = std::slice::from_raw_parts(self.rgvarg, self.c_args as usize);
        slice.iter().rev().map(|v| v.dereference()).collect()
    }
}

/// Exception information filled by the engine or by host dispatch callbacks.
#[repr(C)]
pub struct ExcepInfo {
    pub w_code: u16,
    pub w_reserved: u16,
    pub bstr_source: *mut u16,
    pub bstr_description: *mut u16,
    pub bstr_help_file: *mut u16,
    pub dw_help_context: u32,
    pub pv_reserved: *mut c_void,
    pub pfn_deferred_fill_in: Option<unsafe extern "system" fn(*mut ExcepInfo) -> super::HResult>,
    pub scode: i32,
}

impl ExcepInfo {
    pub fn source(&self) -> String {
        // SAFETY: fields are null or BSTRs owned by this struct.
        unsafe { Bstr::read(self.bstr_source) }
    }

    pub fn description(&self) -> String {
        // SAFETY: as above.
        unsafe { Bstr::read(self.bstr_description) }
    }

    /// Runs the deferred fill-in callback if the producer supplied one.
    pub fn fill_deferred(&mut self) {
        if let Some(fill) = self.pfn_deferred_fill_in.take() {
            // SAFETY: contract of EXCEPINFO producers.
            unsafe {
                fill(self);
            }
        }
    }

    /// Populates a caller-owned EXCEPINFO. Ownership of the strings passes
    /// to the caller.
    ///
    /// # Safety
    /// `out` must be null or valid for writes.
    pub unsafe fn write_to(out: *mut ExcepInfo, source: &str, description: &str, scode: i32) {
        if out.is_null() {
            return;
        }
        std::ptr::write(
            out,
            ExcepInfo {
                bstr_source: Bstr::new(source).into_raw(),
                bstr_description: Bstr::new(description).into_raw(),
                bstr_help_file: std::ptr::null_mut(),
                w_code: 0,
                w_reserved: 0,
                dw_help_context: 0,
                pv_reserved: std::ptr::null_mut(),
                pfn_deferred_fill_in: None,
                scode,
            },
        );
    }

    fn zeroed() -> Self {
        Self {
            w_code: 0,
            w_reserved: 0,
            bstr_source: std::ptr::null_mut(),
            bstr_description: std::ptr::null_mut(),
            bstr_help_file: std::ptr::null_mut(),
            dw_help_context: 0,
            pv_reserved: std::ptr::null_mut(),
            pfn_deferred_fill_in: None,
            scode: 0,
        }
    }
}

impl Default for ExcepInfo {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Drop for ExcepInfo {
    fn drop(&mut self) {
        for field in [self.bstr_source, self.bstr_description, self.bstr_help_file] {
            // SAFETY: each non-null field is an owned BSTR.
            drop(unsafe { Bstr::from_raw(field) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::HResult;

    #[test]
    fn variant_layout_matches_pointer_width() {
        let expected = if cfg!(target_pointer_width = "64") { 24 } else { 16 };
        assert_eq!(std::mem::size_of::<Variant>(), expected);
    }

    #[test]
    fn variant_payloads() {
        assert_eq!(Variant::from_bool(true).vt(), VT_BOOL);
        assert_eq!(unsafe { Variant::from_bool(true).data().bool_val }, VARIANT_TRUE);
        assert_eq!(unsafe { Variant::from_i32(-7).data().l_val }, -7);
        assert_eq!(Variant::from_string("text").bstr_value().as_deref(), Some("text"));
        assert_eq!(Variant::from_i32(1).bstr_value(), None);
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut variant = Variant::from_string("owned");
        variant.clear();
        assert_eq!(variant.vt(), VT_EMPTY);
    }

    #[test]
    fn disp_params_reverse_order() {
        let mut args = vec![Variant::from_i32(3), Variant::from_i32(2), Variant::from_i32(1)];
        let params = DispParams::new(&mut args);
        let values: Vec<i32> = unsafe { params.arguments() }
            .into_iter()
            .map(|v| unsafe { v.data().l_val })
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn excep_info_written_for_caller() {
        let mut info = ExcepInfo::default();
        unsafe { ExcepInfo::write_to(&mut info, "host", "boom", HResult::E_FAIL.0) };
        assert_eq!(info.source(), "host");
        assert_eq!(info.description(), "boom");
        assert_eq!(info.scode, HResult::E_FAIL.0);
    }
}

//! Script value handles
//!
//! [`JsValue`] is a copyable reference to a value of the current context.
//! Holding one does not keep the value alive across collections; take a
//! [`Pinned`] for that.

use std::ffi::c_void;
use std::ptr;
use std::slice;

use chakra_native::jsrt::{
    JsErrorCode, JsErrorKind, JsFinalizeCallback, JsNativeFunction, JsPropertyIdRef, JsValueRef,
    JsValueType, NativeError, NativeResult,
};

use super::scope::with_api;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct JsValue(JsValueRef);

impl JsValue {
    pub const INVALID: Self = Self(ptr::null_mut());

    /// # Safety
    ///
    /// `raw` must be null or a value reference of the current runtime.
    pub unsafe fn from_raw(raw: JsValueRef) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> JsValueRef {
        self.0
    }

    pub fn is_valid(self) -> bool {
        !self.0.is_null()
    }

    fn handle(self) -> NativeResult<JsValueRef> {
        if self.is_valid() {
            Ok(self.0)
        } else {
            Err(NativeError::from(JsErrorCode::INVALID_ARGUMENT))
        }
    }

    pub fn undefined() -> NativeResult<Self> {
        with_api(|api| unsafe { api.get_undefined_value() }).map(Self)
    }

    pub fn null() -> NativeResult<Self> {
        with_api(|api| unsafe { api.get_null_value() }).map(Self)
    }

    pub fn from_bool(value: bool) -> NativeResult<Self> {
        with_api(|api| unsafe { api.bool_to_boolean(value) }).map(Self)
    }

    pub fn from_i32(value: i32) -> NativeResult<Self> {
        with_api(|api| unsafe { api.int_to_number(value) }).map(Self)
    }

    pub fn from_f64(value: f64) -> NativeResult<Self> {
        with_api(|api| unsafe { api.double_to_number(value) }).map(Self)
    }

    pub fn from_string(value: &str) -> NativeResult<Self> {
        with_api(|api| unsafe { api.create_string(value) }).map(Self)
    }

    pub fn global_object() -> NativeResult<Self> {
        with_api(|api| unsafe { api.get_global_object() }).map(Self)
    }

    pub fn create_object() -> NativeResult<Self> {
        with_api(|api| unsafe { api.create_object() }).map(Self)
    }

    /// # Safety
    ///
    /// `finalize`, when given, must accept `data` and is called at most once.
    pub unsafe fn create_external_object(
        data: *mut c_void,
        finalize: Option<JsFinalizeCallback>,
    ) -> NativeResult<Self> {
        with_api(|api| api.create_external_object(data, finalize)).map(Self)
    }

    /// # Safety
    ///
    /// `state` must stay valid for as long as the function can be called.
    pub unsafe fn create_function(
        native: JsNativeFunction,
        state: *mut c_void,
    ) -> NativeResult<Self> {
        with_api(|api| api.create_function(native, state)).map(Self)
    }

    pub fn create_error(kind: JsErrorKind, message: &str) -> NativeResult<Self> {
        let message = Self::from_string(message)?;
        with_api(|api| unsafe { api.create_error(kind, message.0) }).map(Self)
    }

    pub fn value_type(self) -> NativeResult<JsValueType> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.get_value_type(handle) })
    }

    /// Adds a reference. Values without identity are not counted.
    pub fn add_ref(self) -> NativeResult<u32> {
        if self.value_type()?.is_primitive_without_identity() {
            return Ok(0);
        }
        with_api(|api| unsafe { api.add_ref(self.0) })
    }

    pub fn release(self) -> NativeResult<u32> {
        if self.value_type()?.is_primitive_without_identity() {
            return Ok(0);
        }
        with_api(|api| unsafe { api.release(self.0) })
    }

    pub fn to_bool(self) -> NativeResult<bool> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.boolean_to_bool(handle) })
    }

    pub fn to_f64(self) -> NativeResult<f64> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.number_to_double(handle) })
    }

    pub fn to_string(self) -> NativeResult<String> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.copy_string(handle) })
    }

    pub fn convert_to_boolean(self) -> NativeResult<Self> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.convert_value_to_boolean(handle) }).map(Self)
    }

    pub fn convert_to_number(self) -> NativeResult<Self> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.convert_value_to_number(handle) }).map(Self)
    }

    pub fn convert_to_string(self) -> NativeResult<Self> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.convert_value_to_string(handle) }).map(Self)
    }

    pub fn convert_to_object(self) -> NativeResult<Self> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.convert_value_to_object(handle) }).map(Self)
    }

    pub fn has_property(self, id: JsPropertyId) -> NativeResult<bool> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.has_property(handle, id.0) })
    }

    pub fn get_property(self, id: JsPropertyId) -> NativeResult<Self> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.get_property(handle, id.0) }).map(Self)
    }

    pub fn set_property(
        self,
        id: JsPropertyId,
        value: Self,
        use_strict_rules: bool,
    ) -> NativeResult<()> {
        let handle = self.handle()?;
        let value = value.handle()?;
        with_api(|api| unsafe { api.set_property(handle, id.0, value, use_strict_rules) })
    }

    pub fn define_property(self, id: JsPropertyId, descriptor: Self) -> NativeResult<bool> {
        let handle = self.handle()?;
        let descriptor = descriptor.handle()?;
        with_api(|api| unsafe { api.define_property(handle, id.0, descriptor) })
    }

    pub fn has(self, name: &str) -> NativeResult<bool> {
        self.has_property(JsPropertyId::from_name(name)?)
    }

    pub fn get(self, name: &str) -> NativeResult<Self> {
        self.get_property(JsPropertyId::from_name(name)?)
    }

    /// Sets with strict-mode rules.
    pub fn set(self, name: &str, value: Self) -> NativeResult<()> {
        self.set_property(JsPropertyId::from_name(name)?, value, true)
    }

    pub fn prototype(self) -> NativeResult<Self> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.get_prototype(handle) }).map(Self)
    }

    pub fn set_prototype(self, prototype: Self) -> NativeResult<()> {
        let handle = self.handle()?;
        let prototype = prototype.handle()?;
        with_api(|api| unsafe { api.set_prototype(handle, prototype) })
    }

    pub fn has_external_data(self) -> NativeResult<bool> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.has_external_data(handle) })
    }

    pub fn external_data(self) -> NativeResult<*mut c_void> {
        let handle = self.handle()?;
        with_api(|api| unsafe { api.get_external_data(handle) })
    }

    /// Calls the value as a function. `arguments[0]` is `this`.
    pub fn call_function(self, arguments: &[JsValue]) -> NativeResult<Self> {
        let handle = self.handle()?;
        let arguments = raw_arguments(arguments);
        with_api(|api| unsafe { api.call_function(handle, arguments) }).map(Self)
    }

    /// Calls the value as a constructor. `arguments[0]` is ignored.
    pub fn construct_object(self, arguments: &[JsValue]) -> NativeResult<Self> {
        let handle = self.handle()?;
        let arguments = raw_arguments(arguments);
        with_api(|api| unsafe { api.construct_object(handle, arguments) }).map(Self)
    }

    /// Copies the contents of an array buffer.
    pub fn array_buffer_bytes(self) -> NativeResult<Vec<u8>> {
        let handle = self.handle()?;
        let (data, length) = with_api(|api| unsafe { api.get_array_buffer_storage(handle) })?;
        if data.is_null() || length == 0 {
            return Ok(Vec::new());
        }
        // SAFETY: the storage belongs to the buffer, which is alive for the
        // duration of this call.
        Ok(unsafe { slice::from_raw_parts(data, length as usize) }.to_vec())
    }
}

fn raw_arguments(arguments: &[JsValue]) -> &[JsValueRef] {
    // SAFETY: `JsValue` is a transparent wrapper around `JsValueRef`.
    unsafe { slice::from_raw_parts(arguments.as_ptr() as *const JsValueRef, arguments.len()) }
}

pub(crate) fn set_exception(error: JsValue) -> NativeResult<()> {
    let handle = error.handle()?;
    with_api(|api| unsafe { api.set_exception(handle) })
}

pub(crate) fn get_and_clear_exception() -> NativeResult<JsValue> {
    with_api(|api| unsafe { api.get_and_clear_exception() }).map(JsValue)
}

pub(crate) fn has_exception() -> NativeResult<bool> {
    with_api(|api| unsafe { api.has_exception() })
}

/// An interned property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct JsPropertyId(JsPropertyIdRef);

impl JsPropertyId {
    pub fn from_name(name: &str) -> NativeResult<Self> {
        with_api(|api| unsafe { api.create_property_id(name) }).map(Self)
    }
}

/// Keeps a value alive until dropped.
#[derive(Debug)]
pub struct Pinned(JsValue);

impl Pinned {
    pub fn new(value: JsValue) -> NativeResult<Self> {
        value.add_ref()?;
        Ok(Self(value))
    }

    pub fn value(&self) -> JsValue {
        self.0
    }
}

impl Drop for Pinned {
    fn drop(&mut self) {
        if let Err(err) = self.0.release() {
            tracing::warn!("failed to release a pinned script value: {err}");
        }
    }
}

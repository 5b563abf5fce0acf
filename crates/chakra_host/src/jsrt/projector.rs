//! Host value and host type projection for JsRT

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Weak;
use std::slice;
use std::sync::Arc;

use chakra_native::jsrt::{JsErrorKind, JsValueRef, JsValueType};
use tracing::warn;

use super::registry::{finalize_external, ExternalObjectRegistry};
use super::runtime::JsRtRuntime;
use super::value::{has_exception, set_exception, JsPropertyId, JsValue, Pinned};
use super::{JsRtError, JsRtResult};
use crate::dispatcher::panic_message;
use crate::reflect::{narrow_number, HostObject, HostType, MemberError};
use crate::value::{HostFunction, HostValue, ScriptObject};

/// Arguments of a call from script into a native function.
pub(crate) struct NativeCall<'a> {
    pub(crate) this: JsValue,
    pub(crate) args: &'a [JsValue],
}

type NativeHandler = dyn Fn(&JsRtRuntime, &NativeCall<'_>) -> JsRtResult<JsValue>;

pub(crate) struct NativeFunctionState {
    runtime: Weak<JsRtRuntime>,
    handler: Box<NativeHandler>,
}

unsafe extern "system" fn native_trampoline(
    _callee: JsValueRef,
    _is_construct_call: bool,
    arguments: *mut JsValueRef,
    argument_count: u16,
    callback_state: *mut c_void,
) -> JsValueRef {
    if callback_state.is_null() {
        return ptr::null_mut();
    }
    let state = &*(callback_state as *const NativeFunctionState);
    let Some(runtime) = state.runtime.upgrade() else {
        return ptr::null_mut();
    };

    let all: &[JsValue] = if arguments.is_null() || argument_count == 0 {
        &[]
    } else {
        slice::from_raw_parts(arguments as *const JsValue, argument_count as usize)
    };
    let (this, args) = match all.split_first() {
        Some((this, args)) => (*this, args),
        None => (JsValue::INVALID, all),
    };
    let call = NativeCall { this, args };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (state.handler)(&runtime, &call)));
    let thrown = match outcome {
        Ok(Ok(result)) => return result.raw(),
        Ok(Err(err)) => runtime.throw_error(err),
        Err(payload) => runtime.throw(
            JsErrorKind::Error,
            &format!("host callback panicked: {}", panic_message(&*payload)),
        ),
    };
    match thrown {
        Ok(undefined) => undefined.raw(),
        Err(err) => {
            warn!(engine = runtime.engine_id, "could not raise a script error: {err}");
            ptr::null_mut()
        }
    }
}

impl JsRtRuntime {
    /// Raises a script error of `kind`. The returned `undefined` is what the
    /// native function hands back to the engine.
    pub(crate) fn throw(&self, kind: JsErrorKind, message: &str) -> JsRtResult<JsValue> {
        let undefined = JsValue::undefined()?;
        let error = JsValue::create_error(kind, message)?;
        set_exception(error)?;
        Ok(undefined)
    }

    fn throw_error(&self, error: JsRtError) -> JsRtResult<JsValue> {
        match error {
            // the script raised while we were calling back into it
            JsRtError::Native(_) if has_exception()? => JsValue::undefined().map_err(Into::into),
            JsRtError::Native(err) => self.throw(JsErrorKind::Error, &err.to_string()),
            JsRtError::Member(err) => self.throw(err.script_kind(), &err.to_string()),
            JsRtError::Usage(message) => self.throw(JsErrorKind::TypeError, &message),
            JsRtError::Runtime(message) => self.throw(JsErrorKind::Error, &message),
        }
    }

    pub(crate) fn create_native_function(
        &self,
        handler: impl Fn(&JsRtRuntime, &NativeCall<'_>) -> JsRtResult<JsValue> + 'static,
    ) -> JsRtResult<JsValue> {
        let state = Box::into_raw(Box::new(NativeFunctionState {
            runtime: self.weak_self.clone(),
            handler: Box::new(handler),
        }));
        self.native_functions.borrow_mut().push(state);
        // SAFETY: the state is freed only after the runtime is disposed.
        Ok(unsafe { JsValue::create_function(native_trampoline, state as *mut c_void)? })
    }

    pub(crate) fn to_script(&self, value: &HostValue) -> JsRtResult<JsValue> {
        let value = match value {
            HostValue::Undefined => JsValue::undefined()?,
            HostValue::Null => JsValue::null()?,
            HostValue::Bool(v) => JsValue::from_bool(*v)?,
            HostValue::I8(v) => JsValue::from_i32(i32::from(*v))?,
            HostValue::U8(v) => JsValue::from_i32(i32::from(*v))?,
            HostValue::I16(v) => JsValue::from_i32(i32::from(*v))?,
            HostValue::U16(v) => JsValue::from_i32(i32::from(*v))?,
            HostValue::I32(v) => JsValue::from_i32(*v)?,
            HostValue::U32(v) => integer(i64::from(*v))?,
            HostValue::I64(v) => integer(*v)?,
            HostValue::U64(v) => match i32::try_from(*v) {
                Ok(v) => JsValue::from_i32(v)?,
                Err(_) => JsValue::from_f64(*v as f64)?,
            },
            HostValue::F32(v) => JsValue::from_f64(f64::from(*v))?,
            HostValue::F64(v) => JsValue::from_f64(*v)?,
            HostValue::Char(v) => JsValue::from_string(v.encode_utf8(&mut [0; 4]))?,
            HostValue::String(v) => JsValue::from_string(v)?,
            HostValue::Object(object) => self.project_object(object)?,
            HostValue::Function(function) => self.project_function(function)?,
            HostValue::Script(object) => {
                if object.engine_id() != self.engine_id {
                    return Err(JsRtError::Usage(format!(
                        "script object of engine {} cannot be used by engine {}",
                        object.engine_id(),
                        self.engine_id
                    )));
                }
                // SAFETY: the handle keeps its reference for as long as it
                // lives, and it was created by this runtime.
                unsafe { JsValue::from_raw(object.raw() as JsValueRef) }
            }
        };
        Ok(value)
    }

    pub(crate) fn to_script_args(&self, values: &[HostValue]) -> JsRtResult<Vec<JsValue>> {
        values.iter().map(|value| self.to_script(value)).collect()
    }

    pub(crate) fn to_host(&self, value: JsValue) -> JsRtResult<HostValue> {
        let host = match value.value_type()? {
            JsValueType::Undefined => HostValue::Undefined,
            JsValueType::Null => HostValue::Null,
            JsValueType::Boolean => HostValue::Bool(value.to_bool()?),
            JsValueType::Number => narrow_number(value.to_f64()?),
            JsValueType::String => HostValue::String(value.to_string()?),
            _ => {
                if value.has_external_data()? {
                    // SAFETY: only this runtime creates external objects in
                    // its context.
                    let data = value.external_data()?;
                    if let Some(object) = unsafe { ExternalObjectRegistry::resolve(data) } {
                        return Ok(HostValue::Object(object));
                    }
                }
                value.add_ref()?;
                HostValue::Script(ScriptObject::new(
                    self.engine_id,
                    value.raw() as usize,
                    self.releases.clone(),
                ))
            }
        };
        Ok(host)
    }

    pub(crate) fn to_host_args(&self, values: &[JsValue]) -> JsRtResult<Vec<HostValue>> {
        values.iter().map(|value| self.to_host(*value)).collect()
    }

    fn project_function(&self, function: &HostFunction) -> JsRtResult<JsValue> {
        let function = function.clone();
        self.create_native_function(move |runtime, call| {
            let args = runtime.to_host_args(call.args)?;
            match function.call(&args) {
                Ok(result) => runtime.to_script(&result),
                Err(err) => runtime.throw(
                    JsErrorKind::Error,
                    &format!("host delegate invocation failed: {err}"),
                ),
            }
        })
    }

    fn project_object(&self, object: &HostObject) -> JsRtResult<JsValue> {
        let prototype = self.binding(object.host_type())?;
        let data = self.registry.external_data(object.clone());
        // SAFETY: `finalize_external` takes ownership of `data`.
        let created = unsafe { JsValue::create_external_object(data, Some(finalize_external)) };
        let value = match created {
            Ok(value) => value,
            Err(err) => {
                unsafe { finalize_external(data) };
                return Err(err.into());
            }
        };
        value.set_prototype(prototype)?;
        self.freeze(value)?;
        Ok(value)
    }

    /// The frozen prototype carrying the instance members of `host_type`.
    fn binding(&self, host_type: &Arc<HostType>) -> JsRtResult<JsValue> {
        let key = Arc::as_ptr(host_type);
        if let Some((_, pinned)) = self.bindings.borrow().get(&key) {
            return Ok(pinned.value());
        }

        let prototype = JsValue::create_object()?;
        prototype.set_prototype(self.member_guard()?)?;
        self.project_accessors(prototype, host_type, true)?;
        self.project_methods(prototype, host_type, true)?;
        self.freeze(prototype)?;

        let pinned = Pinned::new(prototype)?;
        self.bindings.borrow_mut().insert(key, (host_type.clone(), pinned));
        Ok(prototype)
    }

    /// Constructor function of `host_type` carrying its static members.
    pub(crate) fn project_type(&self, host_type: &Arc<HostType>) -> JsRtResult<JsValue> {
        let target = host_type.clone();
        let constructor = self.create_native_function(move |runtime, call| {
            let args = runtime.to_host_args(call.args)?;
            let object = target.construct(&args)?;
            runtime.to_script(&HostValue::Object(object))
        })?;
        self.project_accessors(constructor, host_type, false)?;
        self.project_methods(constructor, host_type, false)?;
        self.freeze(constructor)?;
        Ok(constructor)
    }

    fn project_accessors(
        &self,
        target: JsValue,
        host_type: &Arc<HostType>,
        instance: bool,
    ) -> JsRtResult<()> {
        for (index, accessor) in host_type.accessors(instance).iter().enumerate() {
            let descriptor = JsValue::create_object()?;
            descriptor.set("enumerable", JsValue::from_bool(true)?)?;

            if accessor.can_read() {
                let host_type = host_type.clone();
                let getter = self.create_native_function(move |runtime, call| {
                    let accessor = &host_type.accessors(instance)[index];
                    let kind = accessor.kind().as_str();
                    let this = runtime.resolve_this(call.this, instance, kind, accessor.name())?;
                    let value = accessor.get(this.as_ref(), &host_type.owner(instance))?;
                    runtime.to_script(&value)
                })?;
                descriptor.set("get", getter)?;
            }

            if accessor.can_write() {
                let host_type = host_type.clone();
                let setter = self.create_native_function(move |runtime, call| {
                    let accessor = &host_type.accessors(instance)[index];
                    let kind = accessor.kind().as_str();
                    let this = runtime.resolve_this(call.this, instance, kind, accessor.name())?;
                    let value = match call.args.first() {
                        Some(value) => runtime.to_host(*value)?,
                        None => HostValue::Undefined,
                    };
                    accessor.set(this.as_ref(), &value, &host_type.owner(instance))?;
                    Ok(JsValue::undefined()?)
                })?;
                descriptor.set("set", setter)?;
            }

            target.define_property(JsPropertyId::from_name(accessor.name())?, descriptor)?;
        }
        Ok(())
    }

    fn project_methods(
        &self,
        target: JsValue,
        host_type: &Arc<HostType>,
        instance: bool,
    ) -> JsRtResult<()> {
        for (index, group) in host_type.methods(instance).iter().enumerate() {
            let owner_type = host_type.clone();
            let function = self.create_native_function(move |runtime, call| {
                let group = &owner_type.methods(instance)[index];
                let this = runtime.resolve_this(call.this, instance, "method", group.name())?;
                let args = runtime.to_host_args(call.args)?;
                let result = group.invoke(this.as_ref(), &args, &owner_type.owner(instance))?;
                runtime.to_script(&result)
            })?;
            target.set_property(JsPropertyId::from_name(group.name())?, function, true)?;
        }
        Ok(())
    }

    /// The host object behind `this`, for instance members.
    fn resolve_this(
        &self,
        this: JsValue,
        instance: bool,
        kind: &'static str,
        name: &str,
    ) -> JsRtResult<Option<HostObject>> {
        if !instance {
            return Ok(None);
        }
        let invalid = || {
            JsRtError::Member(MemberError::InvalidThis {
                kind,
                name: name.to_owned(),
            })
        };
        if !this.is_valid() || !this.has_external_data()? {
            return Err(invalid());
        }
        // SAFETY: only this runtime creates external objects in its context.
        unsafe { ExternalObjectRegistry::resolve(this.external_data()?) }
            .map(Some)
            .ok_or_else(invalid)
    }

    fn freeze(&self, value: JsValue) -> JsRtResult<()> {
        let cached = self.freeze.borrow().as_ref().map(Pinned::value);
        let freeze = match cached {
            Some(freeze) => freeze,
            None => {
                let freeze = JsValue::global_object()?.get("Object")?.get("freeze")?;
                let pinned = Pinned::new(freeze)?;
                *self.freeze.borrow_mut() = Some(pinned);
                freeze
            }
        };
        freeze.call_function(&[JsValue::undefined()?, value])?;
        Ok(())
    }

    /// A proxy placed at the end of every binding's prototype chain. Reads of
    /// names that nothing before it, nor `Object.prototype`, defines throw a
    /// `TypeError` instead of producing `undefined`.
    fn member_guard(&self) -> JsRtResult<JsValue> {
        if let Some(pinned) = self.member_guard.borrow().as_ref() {
            return Ok(pinned.value());
        }

        let global = JsValue::global_object()?;
        let target = JsValue::create_object()?;
        let handler = JsValue::create_object()?;
        let trap = self.create_native_function(|_, call| {
            let (Some(&target), Some(&key)) = (call.args.first(), call.args.get(1)) else {
                return Ok(JsValue::undefined()?);
            };
            if key.value_type()? != JsValueType::String {
                return Ok(JsValue::undefined()?);
            }
            let name = key.to_string()?;
            let id = JsPropertyId::from_name(&name)?;
            if target.has_property(id)? {
                return Ok(target.get_property(id)?);
            }
            Err(MemberError::MemberNotFound { name }.into())
        })?;
        handler.set("get", trap)?;

        let proxy = global
            .get("Proxy")?
            .construct_object(&[JsValue::undefined()?, target, handler])?;
        let pinned = Pinned::new(proxy)?;
        *self.member_guard.borrow_mut() = Some(pinned);
        Ok(proxy)
    }
}

fn integer(value: i64) -> JsRtResult<JsValue> {
    let value = match i32::try_from(value) {
        Ok(value) => JsValue::from_i32(value)?,
        Err(_) => JsValue::from_f64(value as f64)?,
    };
    Ok(value)
}

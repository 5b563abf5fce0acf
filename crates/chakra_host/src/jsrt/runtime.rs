//! Per-engine JsRT state living on the dispatcher thread

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use chakra_native::jsrt::{
    JsContextRef, JsFinalizeCallback, JsParseScriptAttributes, JsRtApi, JsRuntimeAttributes,
    JsRuntimeHandle, JsSourceContext, JsValueRef, NativeError,
};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::projector::NativeFunctionState;
use super::registry::ExternalObjectRegistry;
use super::scope::Scope;
use super::value::{JsPropertyId, JsValue, Pinned};
use super::{JsRtError, JsRtResult};
use crate::engine::PrecompiledScript;
use crate::error::{EngineError, EngineLoadError, EngineResult};
use crate::reflect::HostType;
use crate::release::DeferredReleases;
use crate::settings::JsEngineMode;

/// What `interrupt()` needs to reach the runtime from another thread.
pub(crate) struct InterruptTarget {
    pub(crate) api: Arc<dyn JsRtApi>,
    pub(crate) runtime: usize,
}

pub(crate) type SharedInterrupt = Arc<Mutex<Option<InterruptTarget>>>;

thread_local! {
    /// Sources of precompiled scripts, handed back to the engine when it
    /// parses a deferred function. One runtime per thread.
    static SERIALIZED_SOURCES: RefCell<HashMap<JsSourceContext, String>> =
        RefCell::new(HashMap::new());
}

pub(crate) struct JsRtRuntime {
    pub(super) api: Arc<dyn JsRtApi>,
    runtime: JsRuntimeHandle,
    context: JsContextRef,
    pub(super) mode: JsEngineMode,
    pub(super) engine_id: u64,
    enable_debugging: bool,
    debugging_started: Cell<bool>,
    depth: Cell<u32>,
    next_source_context: Cell<JsSourceContext>,
    pub(super) registry: Arc<ExternalObjectRegistry>,
    pub(super) releases: Arc<DeferredReleases>,
    interrupt: SharedInterrupt,
    pub(super) bindings: RefCell<HashMap<*const HostType, (Arc<HostType>, Pinned)>>,
    pub(super) member_guard: RefCell<Option<Pinned>>,
    pub(super) freeze: RefCell<Option<Pinned>>,
    pub(super) native_functions: RefCell<Vec<*mut NativeFunctionState>>,
    pub(super) weak_self: Weak<JsRtRuntime>,
}

/// An entered scope of one runtime.
pub(crate) struct RuntimeScope<'a> {
    runtime: &'a JsRtRuntime,
    _scope: Scope,
}

impl Drop for RuntimeScope<'_> {
    fn drop(&mut self) {
        self.runtime.depth.set(self.runtime.depth.get() - 1);
    }
}

impl JsRtRuntime {
    pub(crate) fn create(
        api: Arc<dyn JsRtApi>,
        enable_debugging: bool,
        engine_id: u64,
        registry: Arc<ExternalObjectRegistry>,
        releases: Arc<DeferredReleases>,
        interrupt: SharedInterrupt,
    ) -> Result<Rc<Self>, EngineError> {
        let mode = JsEngineMode::ChakraJsRt;
        let load_error = |err: NativeError| -> EngineError {
            EngineLoadError {
                engine_mode: mode.name().to_owned(),
                message: err.to_string(),
            }
            .into()
        };

        // SAFETY: the runtime and context are created and owned by this
        // thread and disposed in `Drop`.
        let (runtime, context) = unsafe {
            let runtime = api
                .create_runtime(JsRuntimeAttributes::ALLOW_SCRIPT_INTERRUPT)
                .map_err(load_error)?;
            let context = match api.create_context(runtime).and_then(|context| {
                api.add_ref(context)?;
                Ok(context)
            }) {
                Ok(context) => context,
                Err(err) => {
                    let _ = api.dispose_runtime(runtime);
                    return Err(load_error(err));
                }
            };
            (runtime, context)
        };

        *interrupt.lock() = Some(InterruptTarget {
            api: api.clone(),
            runtime: runtime as usize,
        });
        debug!(engine = engine_id, "JsRT runtime created");

        Ok(Rc::new_cyclic(|weak_self| Self {
            api,
            runtime,
            context,
            mode,
            engine_id,
            enable_debugging,
            debugging_started: Cell::new(false),
            depth: Cell::new(0),
            next_source_context: Cell::new(0),
            registry,
            releases,
            interrupt,
            bindings: RefCell::new(HashMap::new()),
            member_guard: RefCell::new(None),
            freeze: RefCell::new(None),
            native_functions: RefCell::new(Vec::new()),
            weak_self: weak_self.clone(),
        }))
    }

    /// Makes the context current. The outermost entry re-enables an
    /// interrupted runtime, starts debugging once and performs queued
    /// releases.
    pub(crate) fn enter(&self) -> JsRtResult<RuntimeScope<'_>> {
        let outermost = self.depth.get() == 0;
        // SAFETY: runtime and context are live and owned by this thread.
        unsafe {
            if outermost && self.api.is_runtime_execution_disabled(self.runtime)? {
                self.api.enable_runtime_execution(self.runtime)?;
                trace!(engine = self.engine_id, "runtime execution re-enabled");
            }
        }
        let scope = unsafe { Scope::enter(&self.api, self.context)? };
        self.depth.set(self.depth.get() + 1);
        let scope = RuntimeScope {
            runtime: self,
            _scope: scope,
        };

        if outermost {
            if self.enable_debugging && !self.debugging_started.replace(true) {
                if let Err(err) = unsafe { self.api.start_debugging() } {
                    warn!(engine = self.engine_id, "debugging could not be started: {err}");
                }
            }
            self.release_deferred();
        }
        Ok(scope)
    }

    /// Runs `f` inside a scope and translates its failure.
    pub(crate) fn run<R>(&self, f: impl FnOnce(&Self) -> JsRtResult<R>) -> EngineResult<R> {
        let _scope = self.enter().map_err(|err| self.translate(err))?;
        f(self).map_err(|err| self.translate(err))
    }

    fn release_deferred(&self) {
        for raw in self.releases.drain() {
            // SAFETY: queued by a `ScriptObject` of this engine, which held
            // one reference on it.
            let value = unsafe { JsValue::from_raw(raw as JsValueRef) };
            if let Err(err) = value.release() {
                warn!(engine = self.engine_id, "deferred release failed: {err}");
            }
        }
    }

    fn next_source_context(&self) -> JsSourceContext {
        let next = self.next_source_context.get() + 1;
        self.next_source_context.set(next);
        next
    }

    pub(crate) fn run_script(&self, code: &str, document_name: &str) -> JsRtResult<JsValue> {
        let source_context = self.next_source_context();
        let script = JsValue::from_string(code)?;
        let url = JsValue::from_string(document_name)?;
        // SAFETY: both values belong to the current context.
        let result = unsafe {
            let attributes = JsParseScriptAttributes::NONE;
            self.api.run(script.raw(), source_context, url.raw(), attributes)?
        };
        Ok(unsafe { JsValue::from_raw(result) })
    }

    pub(crate) fn serialize(&self, code: &str) -> JsRtResult<Vec<u8>> {
        let script = JsValue::from_string(code)?;
        // SAFETY: `script` belongs to the current context.
        let buffer = unsafe { self.api.serialize(script.raw(), JsParseScriptAttributes::NONE)? };
        Ok(unsafe { JsValue::from_raw(buffer) }.array_buffer_bytes()?)
    }

    pub(crate) fn run_serialized(&self, script: &PrecompiledScript) -> JsRtResult<JsValue> {
        let length = u32::try_from(script.cached_data().len())
            .map_err(|_| JsRtError::Usage("precompiled script is too large".to_owned()))?;
        let source_context = self.next_source_context();

        // the engine may read the buffer until the runtime goes away, so it
        // owns a copy that it frees through the finalizer
        let storage = Box::new(script.cached_data().to_vec());
        let data = storage.as_ptr() as *mut c_void;
        let state = Box::into_raw(storage) as *mut c_void;
        // SAFETY: `data` stays valid until `free_serialized_buffer` runs.
        let created = unsafe {
            let finalize = Some(free_serialized_buffer as JsFinalizeCallback);
            self.api.create_external_array_buffer(data, length, finalize, state)
        };
        let buffer = match created {
            Ok(buffer) => buffer,
            Err(err) => {
                unsafe { free_serialized_buffer(state) };
                return Err(err.into());
            }
        };

        SERIALIZED_SOURCES.with(|sources| {
            sources
                .borrow_mut()
                .insert(source_context, script.code().to_owned())
        });
        let url = JsValue::from_string(script.document_name())?;
        // SAFETY: the buffer and url belong to the current context.
        let result = unsafe {
            self.api
                .run_serialized(buffer, load_serialized_source, source_context, url.raw())?
        };
        Ok(unsafe { JsValue::from_raw(result) })
    }

    pub(crate) fn collect_garbage(&self) -> JsRtResult<()> {
        // SAFETY: the runtime is live and owned by this thread.
        unsafe { self.api.collect_garbage(self.runtime)? };
        Ok(())
    }

    pub(crate) fn global_property(&self, name: &str) -> JsRtResult<(JsValue, JsPropertyId)> {
        Ok((JsValue::global_object()?, JsPropertyId::from_name(name)?))
    }
}

impl Drop for JsRtRuntime {
    fn drop(&mut self) {
        self.interrupt.lock().take();
        let discarded = self.releases.close();

        // pinned values must be released while the context is current
        match unsafe { Scope::enter(&self.api, self.context) } {
            Ok(scope) => {
                self.bindings.borrow_mut().clear();
                self.member_guard.borrow_mut().take();
                self.freeze.borrow_mut().take();
                drop(scope);
            }
            Err(err) => {
                warn!(engine = self.engine_id, "could not enter the context for disposal: {err}");
                for (_, (_, pinned)) in self.bindings.borrow_mut().drain() {
                    std::mem::forget(pinned);
                }
                if let Some(pinned) = self.member_guard.borrow_mut().take() {
                    std::mem::forget(pinned);
                }
                if let Some(pinned) = self.freeze.borrow_mut().take() {
                    std::mem::forget(pinned);
                }
            }
        }

        // SAFETY: nothing of this runtime is used after this point.
        unsafe {
            if let Err(err) = self.api.release(self.context) {
                warn!(engine = self.engine_id, "failed to release the context: {err}");
            }
            if let Err(err) = self.api.dispose_runtime(self.runtime) {
                warn!(engine = self.engine_id, "failed to dispose the runtime: {err}");
            }
        }

        // callbacks can no longer run
        for state in self.native_functions.borrow_mut().drain(..) {
            drop(unsafe { Box::from_raw(state) });
        }
        SERIALIZED_SOURCES.with(|sources| sources.borrow_mut().clear());
        let live = self.registry.clear();
        debug!(
            engine = self.engine_id,
            discarded_releases = discarded,
            live_host_objects = live,
            "JsRT runtime disposed"
        );
    }
}

unsafe extern "system" fn free_serialized_buffer(state: *mut c_void) {
    if !state.is_null() {
        drop(Box::from_raw(state as *mut Vec<u8>));
    }
}

unsafe extern "system" fn load_serialized_source(
    source_context: JsSourceContext,
    value: *mut JsValueRef,
    parse_attributes: *mut JsParseScriptAttributes,
) -> bool {
    let code = SERIALIZED_SOURCES.with(|sources| sources.borrow().get(&source_context).cloned());
    let Some(code) = code else {
        return false;
    };
    match JsValue::from_string(&code) {
        Ok(script) => {
            *value = script.raw();
            *parse_attributes = JsParseScriptAttributes::NONE;
            true
        }
        Err(_) => false,
    }
}

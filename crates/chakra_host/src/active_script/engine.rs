use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chakra_native::active_script::WrapperError;
use chakra_native::com::{Variant, VT_EMPTY};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::host_dispatch::{HostItem, HostItemKind};
use super::runtime::{
    create_script_engine, ActiveScriptRuntime, Apartment, RuntimeOptions, SharedInterrupt,
};
use super::translate::native_error;
use super::{ActiveScriptError, ActiveScriptResult};
use crate::dispatcher::ScriptDispatcher;
use crate::engine::{next_engine_id, PrecompiledScript, ScriptEngine};
use crate::error::{EngineError, EngineLoadError, EngineResult, UsageError};
use crate::flag::StatedFlag;
use crate::jsrt::ExternalObjectRegistry;
use crate::reflect::HostType;
use crate::release::DeferredReleases;
use crate::settings::{EngineSettings, JsEngineMode};
use crate::value::HostValue;

/// Script engine on the ActiveScript COM interfaces: Chakra, or the
/// classic JScript engine in [`JsEngineMode::Classic`].
pub struct ChakraActiveScriptEngine {
    mode: JsEngineMode,
    engine_id: u64,
    dispatcher: ScriptDispatcher<Rc<ActiveScriptRuntime>>,
    interrupt: SharedInterrupt,
    interrupt_requested: Arc<AtomicBool>,
    registry: Arc<ExternalObjectRegistry>,
    releases: Arc<DeferredReleases>,
    disposed: StatedFlag,
}

impl ChakraActiveScriptEngine {
    pub fn new(settings: &EngineSettings) -> EngineResult<Self> {
        let mode = match settings.engine_mode {
            JsEngineMode::Auto | JsEngineMode::ChakraActiveScript => {
                JsEngineMode::ChakraActiveScript
            }
            JsEngineMode::Classic => JsEngineMode::Classic,
            JsEngineMode::ChakraJsRt => {
                return Err(UsageError::new(
                    JsEngineMode::ChakraActiveScript.name(),
                    format!("the ActiveScript backend cannot run in {} mode", settings.engine_mode),
                )
                .into())
            }
        };

        let engine_id = next_engine_id();
        let registry = Arc::new(ExternalObjectRegistry::default());
        let releases = Arc::new(DeferredReleases::default());
        let interrupt: SharedInterrupt = Arc::new(Mutex::new(None));
        let interrupt_requested = Arc::new(AtomicBool::new(false));

        let options = RuntimeOptions {
            mode,
            enable_debugging: settings.enable_debugging,
            engine_id,
            registry: registry.clone(),
            releases: releases.clone(),
            interrupt: interrupt.clone(),
            interrupt_requested: interrupt_requested.clone(),
        };
        let dispatcher = ScriptDispatcher::spawn(
            &format!("chakra-activescript-{engine_id}"),
            settings.max_stack_size,
            move || ActiveScriptRuntime::create(options),
        )
        .map_err(|err| EngineLoadError {
            engine_mode: mode.name().to_owned(),
            message: err.to_string(),
        })??;

        info!(engine = engine_id, debugging = settings.enable_debugging, "{} engine created", mode);
        Ok(Self {
            mode,
            engine_id,
            dispatcher,
            interrupt,
            interrupt_requested,
            registry,
            releases,
            disposed: StatedFlag::new(),
        })
    }

    /// Whether the engine class of `mode` can be instantiated. Checked once
    /// per mode on a scratch thread, so the caller's COM apartment is left
    /// alone.
    pub fn is_supported(mode: JsEngineMode) -> bool {
        static CHAKRA: OnceCell<bool> = OnceCell::new();
        static CLASSIC: OnceCell<bool> = OnceCell::new();
        let (cell, mode) = match mode {
            JsEngineMode::ChakraJsRt => return false,
            JsEngineMode::Classic => (&CLASSIC, JsEngineMode::Classic),
            JsEngineMode::Auto | JsEngineMode::ChakraActiveScript => {
                (&CHAKRA, JsEngineMode::ChakraActiveScript)
            }
        };
        *cell.get_or_init(|| {
            let check = thread::Builder::new()
                .name("chakra-activescript-check".to_owned())
                .spawn(move || -> Result<(), String> {
                    let _apartment = Apartment::enter().map_err(|err| err.to_string())?;
                    let wrapper = create_script_engine(mode, false).map_err(|err| err.to_string())?;
                    wrapper.dispose();
                    Ok(())
                });
            let outcome = match check {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err("the support check panicked".to_owned())),
                Err(err) => Err(err.to_string()),
            };
            match outcome {
                Ok(()) => true,
                Err(err) => {
                    debug!("{mode} engine is not supported: {err}");
                    false
                }
            }
        })
    }

    /// Host objects currently referenced from script.
    pub fn live_host_objects(&self) -> usize {
        self.registry.len()
    }

    /// Script objects of this engine whose release is still queued.
    pub fn pending_releases(&self) -> usize {
        self.releases.pending()
    }

    fn invoke<R, F>(&self, job: F) -> EngineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ActiveScriptRuntime) -> ActiveScriptResult<R> + Send + 'static,
    {
        if self.disposed.is_set() {
            return Err(UsageError::disposed(self.mode.name()).into());
        }
        let mode = self.mode;
        self.dispatcher
            .invoke(move |runtime: &Rc<ActiveScriptRuntime>| runtime.run(job))
            .map_err(|_| EngineError::from(UsageError::disposed(mode.name())))?
    }

    fn set_global(&self, name: &str, value: HostValue) -> EngineResult<()> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            let global = runtime.global()?;
            let id = global.ensure_id(&name)?;
            global.put(id, runtime.marshaler.to_variant(&value)?)?;
            Ok(())
        })
    }
}

impl ScriptEngine for ChakraActiveScriptEngine {
    fn mode(&self) -> JsEngineMode {
        self.mode
    }

    fn engine_id(&self) -> u64 {
        self.engine_id
    }

    fn supports_script_precompilation(&self) -> bool {
        false
    }

    fn precompile(&self, _code: &str, _document_name: &str) -> EngineResult<PrecompiledScript> {
        Err(UsageError::new(
            self.mode.name(),
            format!("script precompilation is not supported by the {} engine", self.mode),
        )
        .into())
    }

    fn evaluate(&self, expression: &str, document_name: &str) -> EngineResult<HostValue> {
        let expression = expression.to_owned();
        let document_name = document_name.to_owned();
        self.invoke(move |runtime| {
            let result = runtime.run_script(&expression, &document_name, true)?;
            runtime.marshaler.to_host(&result)
        })
    }

    fn execute(&self, code: &str, document_name: &str) -> EngineResult<()> {
        let code = code.to_owned();
        let document_name = document_name.to_owned();
        self.invoke(move |runtime| {
            runtime.run_script(&code, &document_name, false)?;
            Ok(())
        })
    }

    fn execute_precompiled(&self, script: &PrecompiledScript) -> EngineResult<()> {
        let message = if script.engine_mode() != self.mode {
            format!(
                "a script precompiled by the {} engine cannot run on the {} engine",
                script.engine_mode(),
                self.mode
            )
        } else {
            format!("script precompilation is not supported by the {} engine", self.mode)
        };
        Err(UsageError::new(self.mode.name(), message).into())
    }

    fn call_function(&self, name: &str, args: &[HostValue]) -> EngineResult<HostValue> {
        let name = name.to_owned();
        let args = args.to_vec();
        self.invoke(move |runtime| {
            let global = runtime.global()?;
            let Some(id) = global.id_of(&name)? else {
                return Err(ActiveScriptError::Runtime(format!(
                    "function with the name '{name}' does not exist"
                )));
            };
            let args = runtime.marshaler.to_variant_args(&args)?;
            let result = global.call(id, args)?;
            runtime.marshaler.to_host(&result)
        })
    }

    fn has_variable(&self, name: &str) -> EngineResult<bool> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            let global = runtime.global()?;
            match global.id_of(&name)? {
                Some(id) => Ok(global.get(id)?.vt() != VT_EMPTY),
                None => Ok(false),
            }
        })
    }

    fn get_variable_value(&self, name: &str) -> EngineResult<HostValue> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            let global = runtime.global()?;
            match global.id_of(&name)? {
                Some(id) => runtime.marshaler.to_host(&global.get(id)?),
                None => Ok(HostValue::Undefined),
            }
        })
    }

    fn set_variable_value(&self, name: &str, value: HostValue) -> EngineResult<()> {
        self.set_global(name, value)
    }

    fn remove_variable(&self, name: &str) -> EngineResult<()> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            let global = runtime.global()?;
            if let Some(id) = global.id_of(&name)? {
                global.put(id, Variant::empty())?;
            }
            Ok(())
        })
    }

    fn embed_host_object(&self, name: &str, value: HostValue) -> EngineResult<()> {
        self.set_global(name, value)
    }

    fn embed_host_type(&self, name: &str, host_type: Arc<HostType>) -> EngineResult<()> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            let global = runtime.global()?;
            let id = global.ensure_id(&name)?;
            let constructor = HostItem::create(&runtime.marshaler, HostItemKind::Type(host_type));
            global.put(id, Variant::from_dispatch(constructor))?;
            Ok(())
        })
    }

    fn interrupt(&self) -> EngineResult<()> {
        if self.disposed.is_set() {
            return Err(UsageError::disposed(self.mode.name()).into());
        }
        if let Some(handle) = self.interrupt.lock().as_ref() {
            self.interrupt_requested.store(true, Ordering::Release);
            handle.interrupt().map_err(|err| match err {
                WrapperError::Disposed => UsageError::disposed(self.mode.name()).into(),
                other => native_error(self.mode.name(), &other),
            })?;
            debug!(engine = self.engine_id, "interrupt requested");
        }
        Ok(())
    }

    fn collect_garbage(&self) -> EngineResult<()> {
        self.invoke(|runtime| runtime.collect_garbage())
    }

    fn dispose(&self) {
        if !self.disposed.set() {
            return;
        }
        self.dispatcher.shutdown();
        info!(engine = self.engine_id, "{} engine disposed", self.mode);
    }
}

impl Drop for ChakraActiveScriptEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ChakraActiveScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChakraActiveScriptEngine")
            .field("mode", &self.mode)
            .field("engine_id", &self.engine_id)
            .field("disposed", &self.disposed.is_set())
            .finish()
    }
}

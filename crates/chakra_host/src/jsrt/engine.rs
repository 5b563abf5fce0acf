use std::rc::Rc;
use std::sync::Arc;

use chakra_native::jsrt::{ChakraLibrary, JsRtApi, JsValueType};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::registry::ExternalObjectRegistry;
use super::runtime::{JsRtRuntime, SharedInterrupt};
use super::translate::native_error;
use super::value::{JsValue, Pinned};
use super::JsRtError;
use crate::dispatcher::ScriptDispatcher;
use crate::engine::{next_engine_id, PrecompiledScript, ScriptEngine};
use crate::error::{EngineError, EngineLoadError, EngineResult, UsageError};
use crate::flag::StatedFlag;
use crate::reflect::HostType;
use crate::release::DeferredReleases;
use crate::settings::{EngineSettings, JsEngineMode};
use crate::value::HostValue;

const MODE: JsEngineMode = JsEngineMode::ChakraJsRt;

/// Script engine on the ChakraCore JsRT API.
pub struct ChakraJsRtEngine {
    engine_id: u64,
    dispatcher: ScriptDispatcher<Rc<JsRtRuntime>>,
    interrupt: SharedInterrupt,
    registry: Arc<ExternalObjectRegistry>,
    releases: Arc<DeferredReleases>,
    disposed: StatedFlag,
}

impl ChakraJsRtEngine {
    /// Loads the ChakraCore library named by `settings` and starts an engine
    /// on it.
    pub fn new(settings: &EngineSettings) -> EngineResult<Self> {
        let library =
            ChakraLibrary::load(settings.library_path.as_deref()).map_err(|err| EngineLoadError {
                engine_mode: MODE.name().to_owned(),
                message: err.to_string(),
            })?;
        debug!(path = %library.path().display(), "ChakraCore library loaded");
        Self::with_api(Arc::new(library), settings)
    }

    /// Starts an engine on an already resolved function table.
    pub fn with_api(api: Arc<dyn JsRtApi>, settings: &EngineSettings) -> EngineResult<Self> {
        let engine_id = next_engine_id();
        let registry = Arc::new(ExternalObjectRegistry::default());
        let releases = Arc::new(DeferredReleases::default());
        let interrupt: SharedInterrupt = Arc::new(Mutex::new(None));

        let init = {
            let registry = registry.clone();
            let releases = releases.clone();
            let interrupt = interrupt.clone();
            let enable_debugging = settings.enable_debugging;
            move || {
                JsRtRuntime::create(
                    api,
                    enable_debugging,
                    engine_id,
                    registry,
                    releases,
                    interrupt,
                )
            }
        };
        let name = format!("chakra-jsrt-{engine_id}");
        let dispatcher = ScriptDispatcher::spawn(&name, settings.max_stack_size, init)
            .map_err(|err| EngineLoadError {
                engine_mode: MODE.name().to_owned(),
                message: err.to_string(),
            })??;

        info!(engine = engine_id, debugging = settings.enable_debugging, "{} engine created", MODE);
        Ok(Self {
            engine_id,
            dispatcher,
            interrupt,
            registry,
            releases,
            disposed: StatedFlag::new(),
        })
    }

    /// Whether the ChakraCore library can be loaded from its default
    /// location. Checked once per process.
    pub fn is_supported() -> bool {
        static SUPPORTED: OnceCell<bool> = OnceCell::new();
        *SUPPORTED.get_or_init(|| match ChakraLibrary::load(None) {
            Ok(_) => true,
            Err(err) => {
                debug!("{MODE} engine is not supported: {err}");
                false
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
        F: FnOnce(&JsRtRuntime) -> EngineResult<R> + Send + 'static,
    {
        if self.disposed.is_set() {
            return Err(UsageError::disposed(MODE.name()).into());
        }
        self.dispatcher
            .invoke(move |runtime: &Rc<JsRtRuntime>| job(runtime))
            .map_err(|_| EngineError::from(UsageError::disposed(MODE.name())))?
    }

    fn set_global(&self, name: &str, value: HostValue) -> EngineResult<()> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                let (global, id) = runtime.global_property(&name)?;
                let value = runtime.to_script(&value)?;
                global.set_property(id, value, true)?;
                Ok(())
            })
        })
    }
}

impl ScriptEngine for ChakraJsRtEngine {
    fn mode(&self) -> JsEngineMode {
        MODE
    }

    fn engine_id(&self) -> u64 {
        self.engine_id
    }

    fn supports_script_precompilation(&self) -> bool {
        true
    }

    fn precompile(&self, code: &str, document_name: &str) -> EngineResult<PrecompiledScript> {
        let source = code.to_owned();
        let cached_data =
            self.invoke(move |runtime| runtime.run(|runtime| runtime.serialize(&source)))?;
        Ok(PrecompiledScript::new(MODE, document_name, code, cached_data))
    }

    fn evaluate(&self, expression: &str, document_name: &str) -> EngineResult<HostValue> {
        let expression = expression.to_owned();
        let document_name = document_name.to_owned();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                let result = runtime.run_script(&expression, &document_name)?;
                runtime.to_host(result)
            })
        })
    }

    fn execute(&self, code: &str, document_name: &str) -> EngineResult<()> {
        let code = code.to_owned();
        let document_name = document_name.to_owned();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                runtime.run_script(&code, &document_name)?;
                Ok(())
            })
        })
    }

    fn execute_precompiled(&self, script: &PrecompiledScript) -> EngineResult<()> {
        if script.engine_mode() != MODE {
            return Err(UsageError::new(
                MODE.name(),
                format!(
                    "a script precompiled by the {} engine cannot run on the {MODE} engine",
                    script.engine_mode()
                ),
            )
            .into());
        }
        let script = script.clone();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                runtime.run_serialized(&script)?;
                Ok(())
            })
        })
    }

    fn call_function(&self, name: &str, args: &[HostValue]) -> EngineResult<HostValue> {
        let name = name.to_owned();
        let args = args.to_vec();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                let (global, id) = runtime.global_property(&name)?;
                if !global.has_property(id)? {
                    return Err(JsRtError::Runtime(format!(
                        "function with the name '{name}' does not exist"
                    )));
                }
                let function = global.get_property(id)?;

                let processed = runtime.to_script_args(&args)?;
                let _pinned = processed
                    .iter()
                    .map(|value| Pinned::new(*value))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut call_args = Vec::with_capacity(processed.len() + 1);
                call_args.push(global);
                call_args.extend(processed);

                let result = function.call_function(&call_args)?;
                runtime.to_host(result)
            })
        })
    }

    fn has_variable(&self, name: &str) -> EngineResult<bool> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                let (global, id) = runtime.global_property(&name)?;
                if !global.has_property(id)? {
                    return Ok(false);
                }
                Ok(global.get_property(id)?.value_type()? != JsValueType::Undefined)
            })
        })
    }

    fn get_variable_value(&self, name: &str) -> EngineResult<HostValue> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                let (global, id) = runtime.global_property(&name)?;
                runtime.to_host(global.get_property(id)?)
            })
        })
    }

    fn set_variable_value(&self, name: &str, value: HostValue) -> EngineResult<()> {
        self.set_global(name, value)
    }

    fn remove_variable(&self, name: &str) -> EngineResult<()> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                let (global, id) = runtime.global_property(&name)?;
                if global.has_property(id)? {
                    global.set_property(id, JsValue::undefined()?, true)?;
                }
                Ok(())
            })
        })
    }

    fn embed_host_object(&self, name: &str, value: HostValue) -> EngineResult<()> {
        self.set_global(name, value)
    }

    fn embed_host_type(&self, name: &str, host_type: Arc<HostType>) -> EngineResult<()> {
        let name = name.to_owned();
        self.invoke(move |runtime| {
            runtime.run(|runtime| {
                let (global, id) = runtime.global_property(&name)?;
                let constructor = runtime.project_type(&host_type)?;
                global.set_property(id, constructor, true)?;
                Ok(())
            })
        })
    }

    fn interrupt(&self) -> EngineResult<()> {
        if self.disposed.is_set() {
            return Err(UsageError::disposed(MODE.name()).into());
        }
        if let Some(target) = self.interrupt.lock().as_ref() {
            // SAFETY: the runtime is disposed only after the target has been
            // taken out under this lock.
            unsafe { target.api.disable_runtime_execution(target.runtime as _) }
                .map_err(|err| native_error(MODE.name(), err.code))?;
            debug!(engine = self.engine_id, "interrupt requested");
        }
        Ok(())
    }

    fn collect_garbage(&self) -> EngineResult<()> {
        self.invoke(|runtime| runtime.run(|runtime| runtime.collect_garbage()))
    }

    fn dispose(&self) {
        if !self.disposed.set() {
            return;
        }
        self.dispatcher.shutdown();
        info!(engine = self.engine_id, "{} engine disposed", MODE);
    }
}

impl Drop for ChakraJsRtEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ChakraJsRtEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChakraJsRtEngine")
            .field("engine_id", &self.engine_id)
            .field("disposed", &self.disposed.is_set())
            .finish()
    }
}

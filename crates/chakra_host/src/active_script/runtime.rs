//! Per-engine ActiveScript state living on the dispatcher thread

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chakra_native::active_script::{
    create_wrapper, ActiveScriptWrapper, InterruptHandle, ScriptGcType, ScriptState,
    ScriptTextFlags, WrapperError, WrapperResult, CLSID_CHAKRA, CLSID_JSCRIPT,
};
use chakra_native::com::{ComPtr, ComResult, Variant};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::script_dispatch::ScriptDispatch;
use super::site::SiteState;
use super::variant::Marshaler;
use super::{ActiveScriptError, ActiveScriptResult};
use crate::error::{EngineError, EngineLoadError, EngineResult, ScriptErrorDetails};
use crate::jsrt::ExternalObjectRegistry;
use crate::release::DeferredReleases;
use crate::settings::JsEngineMode;

pub(crate) type SharedInterrupt = Arc<Mutex<Option<InterruptHandle>>>;

/// Membership of the calling thread in a single-threaded COM apartment.
pub(crate) struct Apartment {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    joined: bool,
}

impl Apartment {
    #[cfg(target_os = "windows")]
    pub(crate) fn enter() -> ComResult<Self> {
        chakra_native::com::initialize_apartment()?;
        Ok(Self { joined: true })
    }

    #[cfg(not(target_os = "windows"))]
    pub(crate) fn enter() -> ComResult<Self> {
        Ok(Self { joined: false })
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        #[cfg(target_os = "windows")]
        {
            if self.joined {
                chakra_native::com::uninitialize_apartment();
            }
        }
    }
}

/// Everything a runtime needs from its engine façade.
pub(crate) struct RuntimeOptions {
    pub(crate) mode: JsEngineMode,
    pub(crate) enable_debugging: bool,
    pub(crate) engine_id: u64,
    pub(crate) registry: Arc<ExternalObjectRegistry>,
    pub(crate) releases: Arc<DeferredReleases>,
    pub(crate) interrupt: SharedInterrupt,
    pub(crate) interrupt_requested: Arc<AtomicBool>,
}

/// Creates the engine object for `mode` and wraps it.
pub(crate) fn create_script_engine(
    mode: JsEngineMode,
    enable_debugging: bool,
) -> WrapperResult<Box<dyn ActiveScriptWrapper>> {
    match mode {
        JsEngineMode::Classic => create_wrapper(&CLSID_JSCRIPT, enable_debugging, true),
        _ => create_wrapper(&CLSID_CHAKRA, enable_debugging, false),
    }
}

pub(crate) struct ActiveScriptRuntime {
    pub(super) mode: JsEngineMode,
    pub(super) engine_id: u64,
    wrapper: Rc<dyn ActiveScriptWrapper>,
    pub(super) site: Rc<SiteState>,
    global: RefCell<Option<ScriptDispatch>>,
    pub(super) marshaler: Rc<Marshaler>,
    releases: Arc<DeferredReleases>,
    interrupt: SharedInterrupt,
    interrupt_requested: Arc<AtomicBool>,
    depth: Cell<u32>,
    next_source_context: Cell<u32>,
    pub(super) nested_error: RefCell<Option<ScriptErrorDetails>>,
    // last, so that COM leaves the thread after every interface is gone
    _apartment: Apartment,
}

struct Depth<'a>(&'a Cell<u32>);

impl Drop for Depth<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl ActiveScriptRuntime {
    pub(crate) fn create(options: RuntimeOptions) -> Result<Rc<Self>, EngineError> {
        let RuntimeOptions {
            mode,
            enable_debugging,
            engine_id,
            registry,
            releases,
            interrupt,
            interrupt_requested,
        } = options;
        let load_error = |message: String| -> EngineError {
            EngineLoadError {
                engine_mode: mode.name().to_owned(),
                message,
            }
            .into()
        };

        let apartment = Apartment::enter().map_err(|err| load_error(err.to_string()))?;
        let wrapper = create_script_engine(mode, enable_debugging)
            .map_err(|err| load_error(err.to_string()))?;
        let wrapper: Rc<dyn ActiveScriptWrapper> = Rc::from(wrapper);

        let site = SiteState::new();
        let started = (|| -> WrapperResult<ComPtr> {
            wrapper.init_new()?;
            wrapper.set_script_site(&site.site())?;
            wrapper.set_script_state(ScriptState::Started)?;
            wrapper.get_script_dispatch(None)
        })();
        let global = match started {
            Ok(global) => ScriptDispatch::new(global),
            Err(err) => {
                wrapper.dispose();
                return Err(load_error(err.to_string()));
            }
        };
        if wrapper.is_debugging_enabled() {
            site.capture_stacks_of(&wrapper);
        }
        *interrupt.lock() = Some(wrapper.interrupt_handle());
        debug!(
            engine = engine_id,
            architecture = ?wrapper.architecture(),
            "{mode} runtime created"
        );

        Ok(Rc::new(Self {
            mode,
            engine_id,
            wrapper,
            site,
            global: RefCell::new(Some(global)),
            marshaler: Marshaler::new(engine_id, mode, registry, releases.clone()),
            releases,
            interrupt,
            interrupt_requested,
            depth: Cell::new(0),
            next_source_context: Cell::new(0),
            nested_error: RefCell::new(None),
            _apartment: apartment,
        }))
    }

    /// Runs `f` and translates its failure. The outermost call starts from
    /// a clean error state and performs queued releases.
    pub(crate) fn run<R>(&self, f: impl FnOnce(&Self) -> ActiveScriptResult<R>) -> EngineResult<R> {
        let outermost = self.depth.get() == 0;
        if outermost {
            self.interrupt_requested.store(false, Ordering::Release);
            self.site.clear_error();
            self.nested_error.borrow_mut().take();
            self.release_deferred();
        }
        self.depth.set(self.depth.get() + 1);
        let depth = Depth(&self.depth);
        let result = f(self);
        drop(depth);
        result.map_err(|err| self.translate(err, outermost))
    }

    pub(crate) fn take_interrupt_request(&self) -> bool {
        self.interrupt_requested.swap(false, Ordering::AcqRel)
    }

    fn release_deferred(&self) {
        let released = self
            .releases
            .drain()
            .into_iter()
            // SAFETY: queued by a `ScriptObject` of this engine, which held
            // one reference on it.
            .filter_map(|raw| unsafe { ComPtr::from_raw(raw as *mut _) })
            .count();
        if released > 0 {
            trace!(engine = self.engine_id, released, "deferred releases performed");
        }
    }

    /// The global object of the script engine.
    pub(crate) fn global(&self) -> ActiveScriptResult<Ref<'_, ScriptDispatch>> {
        Ref::filter_map(self.global.borrow(), Option::as_ref)
            .map_err(|_| ActiveScriptError::Wrapper(WrapperError::Disposed))
    }

    fn next_source_context(&self) -> u32 {
        let next = self.next_source_context.get() + 1;
        self.next_source_context.set(next);
        next
    }

    /// Parses and runs `code`; with `expression` set the completion value is
    /// returned.
    pub(crate) fn run_script(
        &self,
        code: &str,
        document_name: &str,
        expression: bool,
    ) -> ActiveScriptResult<Variant> {
        let source_context = self.next_source_context();
        self.site.register_document(source_context, document_name);
        let flags = if expression {
            ScriptTextFlags::IS_EXPRESSION
        } else {
            ScriptTextFlags::IS_VISIBLE
        };
        Ok(self
            .wrapper
            .parse_script_text(code, None, None, None, source_context, 0, flags)?)
    }

    pub(crate) fn collect_garbage(&self) -> ActiveScriptResult<()> {
        Ok(self.wrapper.collect_garbage(ScriptGcType::Exhaustive)?)
    }
}

impl Drop for ActiveScriptRuntime {
    fn drop(&mut self) {
        self.interrupt.lock().take();
        let discarded = self.releases.close();
        self.global.borrow_mut().take();
        self.wrapper.dispose();
        debug!(
            engine = self.engine_id,
            discarded_releases = discarded,
            live_host_objects = self.marshaler.registry.len(),
            "{} runtime disposed",
            self.mode
        );
    }
}

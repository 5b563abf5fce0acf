//! Architecture-specific ActiveScript wrappers.

use std::cell::RefCell;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::*;
use crate::com::{self, ComError, ComPtr, ExcepInfo, Guid, HResult, Variant};

#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    #[error("{interface} is not supported by the script engine: {source}")]
    Unsupported {
        interface: &'static str,
        source: ComError,
    },
    #[error("the script engine has been closed")]
    Disposed,
    #[error("{description}")]
    Exception {
        hresult: HResult,
        source_name: String,
        description: String,
    },
    #[error(transparent)]
    Com(#[from] ComError),
}

impl WrapperError {
    pub fn hresult(&self) -> HResult {
        match self {
            WrapperError::Unsupported { source, .. } => source.hresult(),
            WrapperError::Disposed => HResult::E_UNEXPECTED,
            WrapperError::Exception { hresult, .. } => *hresult,
            WrapperError::Com(error) => error.hresult(),
        }
    }
}

pub type WrapperResult<T> = Result<T, WrapperError>;

/// The logical ActiveScript operation set, independent of the ABI.
pub trait ActiveScriptWrapper {
    fn architecture(&self) -> Architecture;
    fn is_debugging_enabled(&self) -> bool;

    fn init_new(&self) -> WrapperResult<()>;
    fn set_script_site(&self, site: &ComPtr) -> WrapperResult<()>;
    fn set_script_state(&self, state: ScriptState) -> WrapperResult<()>;
    fn get_script_state(&self) -> WrapperResult<ScriptState>;
    fn add_named_item(&self, name: &str, flags: ScriptItemFlags) -> WrapperResult<()>;
    fn add_type_lib(
        &self,
        type_lib: &Guid,
        major: u32,
        minor: u32,
        flags: ScriptTypeLibFlags,
    ) -> WrapperResult<()>;
    /// `IDispatch` of the global object, or of the named item's namespace.
    fn get_script_dispatch(&self, item_name: Option<&str>) -> WrapperResult<ComPtr>;
    #[allow(clippy::too_many_arguments)]
    fn parse_script_text(
        &self,
        code: &str,
        item_name: Option<&str>,
        context: Option<&ComPtr>,
        delimiter: Option<&str>,
        source_context: u32,
        starting_line: u32,
        flags: ScriptTextFlags,
    ) -> WrapperResult<Variant>;
    fn interrupt_script_thread(
        &self,
        thread: ScriptThreadId,
        flags: ScriptInterruptFlags,
    ) -> WrapperResult<()>;
    /// A handle that can interrupt running script from any thread.
    fn interrupt_handle(&self) -> InterruptHandle;
    fn collect_garbage(&self, kind: ScriptGcType) -> WrapperResult<()>;
    fn enum_code_contexts_of_position(
        &self,
        source_context: u32,
        offset: u32,
        length: u32,
    ) -> WrapperResult<CodeContextEnumerator>;
    /// Falls back to an empty enumerator when no sniffer is available.
    fn enum_stack_frames(&self) -> WrapperResult<StackFrameEnumerator>;
    /// Closes the engine and releases every interface exactly once.
    fn dispose(&self);
}

struct Interfaces {
    script: ComPtr,
    parse: ComPtr,
    debug: Option<ComPtr>,
    sniffer: Option<ComPtr>,
    collector: Option<ComPtr>,
}

/// [`ActiveScriptWrapper`] over the slot table of ABI `A`.
pub struct Wrapper<A: Abi> {
    interfaces: RefCell<Option<Interfaces>>,
    interrupt: InterruptHandle,
    debugging: bool,
    _abi: PhantomData<A>,
}

type UnknownFn = unsafe extern "system" fn(*mut c_void) -> HResult;
type SetSiteFn = unsafe extern "system" fn(*mut c_void, *mut c_void) -> HResult;
type StateFn = unsafe extern "system" fn(*mut c_void, u32) -> HResult;
type GetStateFn = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type AddNamedItemFn = unsafe extern "system" fn(*mut c_void, *const u16, u32) -> HResult;
type AddTypeLibFn = unsafe extern "system" fn(*mut c_void, *const Guid, u32, u32, u32) -> HResult;
type GetDispatchFn =
    unsafe extern "system" fn(*mut c_void, *const u16, *mut *mut c_void) -> HResult;
type InterruptFn = unsafe extern "system" fn(*mut c_void, u32, *const ExcepInfo, u32) -> HResult;
type ParseScriptTextFn<C> = unsafe extern "system" fn(
    *mut c_void,
    *const u16,
    *const u16,
    *mut c_void,
    *const u16,
    C,
    u32,
    u32,
    *mut Variant,
    *mut ExcepInfo,
) -> HResult;
type EnumCodeContextsFn<C> =
    unsafe extern "system" fn(*mut c_void, C, u32, u32, *mut *mut c_void) -> HResult;
type EnumStackFramesFn = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult;

fn optional_wide(value: Option<&str>) -> Option<Vec<u16>> {
    value.map(com::to_wide)
}

fn wide_ptr(value: &Option<Vec<u16>>) -> *const u16 {
    value.as_ref().map_or(std::ptr::null(), |wide| wide.as_ptr())
}

impl<A: Abi> Wrapper<A> {
    /// Wraps an `IActiveScript` instance, querying the parser (required),
    /// the debugger (required when debugging), the stack frame sniffer
    /// (classic engine with debugging only, optional) and the garbage
    /// collector (optional).
    pub fn from_active_script(
        script: ComPtr,
        enable_debugging: bool,
        classic: bool,
    ) -> WrapperResult<Self> {
        let methods = A::METHODS;

        let parse = script
            .query_interface(&methods.parse_iid)
            .map_err(|source| WrapperError::Unsupported {
                interface: "IActiveScriptParse",
                source,
            })?;

        let debug = if enable_debugging {
            Some(script.query_interface(&methods.debug_iid).map_err(|source| {
                WrapperError::Unsupported {
                    interface: "IActiveScriptDebug",
                    source,
                }
            })?)
        } else {
            None
        };

        let sniffer = if enable_debugging && classic {
            script.query_interface(&methods.sniffer_iid).ok()
        } else {
            None
        };

        let collector = script
            .query_interface(&IID_IACTIVE_SCRIPT_GARBAGE_COLLECTOR)
            .ok();

        debug!(
            "ActiveScript wrapper created ({:?}, debugging: {}, sniffer: {}, collector: {})",
            methods.architecture,
            enable_debugging,
            sniffer.is_some(),
            collector.is_some()
        );

        Ok(Self {
            interrupt: InterruptHandle::new(script.as_raw(), methods.interrupt_script_thread),
            interfaces: RefCell::new(Some(Interfaces {
                script,
                parse,
                debug,
                sniffer,
                collector,
            })),
            debugging: enable_debugging,
            _abi: PhantomData,
        })
    }

    fn with<R>(&self, f: impl FnOnce(&Interfaces) -> WrapperResult<R>) -> WrapperResult<R> {
        let interfaces = self.interfaces.borrow();
        match interfaces.as_ref() {
            Some(interfaces) => f(interfaces),
            None => Err(WrapperError::Disposed),
        }
    }
}

impl<A: Abi> ActiveScriptWrapper for Wrapper<A> {
    fn architecture(&self) -> Architecture {
        A::METHODS.architecture
    }

    fn is_debugging_enabled(&self) -> bool {
        self.debugging
    }

    fn init_new(&self) -> WrapperResult<()> {
        self.with(|i| unsafe {
            let init: UnknownFn = i.parse.slot(A::METHODS.init_new);
            Ok(init(i.parse.as_raw()).ok()?)
        })
    }

    fn set_script_site(&self, site: &ComPtr) -> WrapperResult<()> {
        self.with(|i| unsafe {
            let set: SetSiteFn = i.script.slot(A::METHODS.set_script_site);
            Ok(set(i.script.as_raw(), site.as_raw()).ok()?)
        })
    }

    fn set_script_state(&self, state: ScriptState) -> WrapperResult<()> {
        self.with(|i| unsafe {
            let set: StateFn = i.script.slot(A::METHODS.set_script_state);
            Ok(set(i.script.as_raw(), state as u32).ok()?)
        })
    }

    fn get_script_state(&self) -> WrapperResult<ScriptState> {
        self.with(|i| unsafe {
            let get: GetStateFn = i.script.slot(A::METHODS.get_script_state);
            let mut raw = 0u32;
            get(i.script.as_raw(), &mut raw).ok()?;
            ScriptState::from_raw(raw)
                .ok_or(WrapperError::Com(ComError::Call(HResult::E_UNEXPECTED)))
        })
    }

    fn add_named_item(&self, name: &str, flags: ScriptItemFlags) -> WrapperResult<()> {
        let name = com::to_wide(name);
        self.with(|i| unsafe {
            let add: AddNamedItemFn = i.script.slot(A::METHODS.add_named_item);
            Ok(add(i.script.as_raw(), name.as_ptr(), flags.0).ok()?)
        })
    }

    fn add_type_lib(
        &self,
        type_lib: &Guid,
        major: u32,
        minor: u32,
        flags: ScriptTypeLibFlags,
    ) -> WrapperResult<()> {
        self.with(|i| unsafe {
            let add: AddTypeLibFn = i.script.slot(A::METHODS.add_type_lib);
            Ok(add(i.script.as_raw(), type_lib, major, minor, flags.0).ok()?)
        })
    }

    fn get_script_dispatch(&self, item_name: Option<&str>) -> WrapperResult<ComPtr> {
        let item_name = optional_wide(item_name);
        self.with(|i| unsafe {
            let get: GetDispatchFn = i.script.slot(A::METHODS.get_script_dispatch);
            let mut dispatch = std::ptr::null_mut();
            get(i.script.as_raw(), wide_ptr(&item_name), &mut dispatch).ok()?;
            ComPtr::from_raw(dispatch).ok_or(WrapperError::Com(ComError::NullPointer))
        })
    }

    fn parse_script_text(
        &self,
        code: &str,
        item_name: Option<&str>,
        context: Option<&ComPtr>,
        delimiter: Option<&str>,
        source_context: u32,
        starting_line: u32,
        flags: ScriptTextFlags,
    ) -> WrapperResult<Variant> {
        let code = com::to_wide(code);
        let item_name = optional_wide(item_name);
        let delimiter = optional_wide(delimiter);
        let context = context.map_or(std::ptr::null_mut(), ComPtr::as_raw);

        self.with(|i| unsafe {
            let parse: ParseScriptTextFn<A::Cookie> = i.parse.slot(A::METHODS.parse_script_text);
            let mut result = Variant::empty();
            let mut exception = ExcepInfo::default();
            let hr = parse(
                i.parse.as_raw(),
                code.as_ptr(),
                wide_ptr(&item_name),
                context,
                wide_ptr(&delimiter),
                A::Cookie::from(source_context),
                starting_line,
                flags.0,
                &mut result,
                &mut exception,
            );
            if hr.is_ok() {
                return Ok(result);
            }

            exception.fill_deferred();
            let description = exception.description();
            if exception.scode != 0 || !description.is_empty() {
                Err(WrapperError::Exception {
                    hresult: hr,
                    source_name: exception.source(),
                    description,
                })
            } else {
                Err(ComError::Call(hr).into())
            }
        })
    }

    fn interrupt_script_thread(
        &self,
        thread: ScriptThreadId,
        flags: ScriptInterruptFlags,
    ) -> WrapperResult<()> {
        self.with(|i| unsafe {
            let interrupt: InterruptFn = i.script.slot(A::METHODS.interrupt_script_thread);
            let exception = ExcepInfo::default();
            Ok(interrupt(i.script.as_raw(), thread as u32, &exception, flags.0).ok()?)
        })
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    fn collect_garbage(&self, kind: ScriptGcType) -> WrapperResult<()> {
        self.with(|i| {
            let Some(collector) = &i.collector else {
                trace!("Script engine has no garbage collector interface");
                return Ok(());
            };
            unsafe {
                let collect: StateFn = collector.slot(A::METHODS.collect_garbage);
                Ok(collect(collector.as_raw(), kind as u32).ok()?)
            }
        })
    }

    fn enum_code_contexts_of_position(
        &self,
        source_context: u32,
        offset: u32,
        length: u32,
    ) -> WrapperResult<CodeContextEnumerator> {
        self.with(|i| {
            let debug = i.debug.as_ref().ok_or(WrapperError::Unsupported {
                interface: "IActiveScriptDebug",
                source: ComError::NoInterface(A::METHODS.debug_iid),
            })?;
            unsafe {
                let enumerate: EnumCodeContextsFn<A::Cookie> =
                    debug.slot(A::METHODS.enum_code_contexts_of_position);
                let mut contexts = std::ptr::null_mut();
                enumerate(
                    debug.as_raw(),
                    A::Cookie::from(source_context),
                    offset,
                    length,
                    &mut contexts,
                )
                .ok()?;
                let contexts = ComPtr::from_raw(contexts).ok_or(ComError::NullPointer)?;
                Ok(CodeContextEnumerator::new(contexts))
            }
        })
    }

    fn enum_stack_frames(&self) -> WrapperResult<StackFrameEnumerator> {
        self.with(|i| {
            let Some(sniffer) = &i.sniffer else {
                return Ok(StackFrameEnumerator::empty());
            };
            unsafe {
                let enumerate: EnumStackFramesFn = sniffer.slot(A::METHODS.enum_stack_frames);
                let mut frames = std::ptr::null_mut();
                enumerate(sniffer.as_raw(), &mut frames).ok()?;
                Ok(ComPtr::from_raw(frames)
                    .map(StackFrameEnumerator::new)
                    .unwrap_or_else(StackFrameEnumerator::empty))
            }
        })
    }

    fn dispose(&self) {
        let Some(interfaces) = self.interfaces.borrow_mut().take() else {
            return;
        };
        self.interrupt.invalidate();

        let Interfaces {
            script,
            parse,
            debug,
            sniffer,
            collector,
        } = interfaces;

        drop(sniffer);
        drop(debug);
        drop(parse);
        drop(collector);

        // SAFETY: slot 7 of IActiveScript is Close; the engine is still referenced.
        let hr = unsafe {
            let close: UnknownFn = script.slot(A::METHODS.close);
            close(script.as_raw())
        };
        if !hr.is_ok() {
            debug!("IActiveScript::Close failed with {}", hr);
        }
        drop(script);
    }
}

impl<A: Abi> Drop for Wrapper<A> {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct RawScript(*mut c_void);

// SAFETY: only used for InterruptScriptThread, which the ActiveScript
// contract allows from any thread; the pointer is cleared before release.
unsafe impl Send for RawScript {}

/// Cross-thread access to `IActiveScript::InterruptScriptThread`.
#[derive(Clone)]
pub struct InterruptHandle {
    target: Arc<Mutex<Option<RawScript>>>,
    slot: usize,
}

impl InterruptHandle {
    fn new(script: *mut c_void, slot: usize) -> Self {
        Self {
            target: Arc::new(Mutex::new(Some(RawScript(script)))),
            slot,
        }
    }

    fn invalidate(&self) {
        self.target.lock().take();
    }

    /// Interrupts every script thread of the engine. Returns
    /// [`WrapperError::Disposed`] once the engine has been closed.
    pub fn interrupt(&self) -> WrapperResult<()> {
        let target = self.target.lock();
        let Some(script) = target.as_ref() else {
            return Err(WrapperError::Disposed);
        };
        let exception = ExcepInfo::default();
        // SAFETY: the pointer stays referenced while the lock is held.
        let hr = unsafe {
            let interrupt: InterruptFn = com::vtable_slot(script.0, self.slot);
            interrupt(
                script.0,
                ScriptThreadId::All as u32,
                &exception,
                ScriptInterruptFlags::NONE.0,
            )
        };
        Ok(hr.ok()?)
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("live", &self.target.lock().is_some())
            .finish()
    }
}

/// Wraps `script` with the slot table of the running process.
pub fn wrap_for_current_architecture(
    script: ComPtr,
    enable_debugging: bool,
    classic: bool,
) -> WrapperResult<Box<dyn ActiveScriptWrapper>> {
    Ok(match Architecture::current() {
        Architecture::X64 => Box::new(Wrapper::<Abi64>::from_active_script(
            script,
            enable_debugging,
            classic,
        )?),
        Architecture::X86 => Box::new(Wrapper::<Abi32>::from_active_script(
            script,
            enable_debugging,
            classic,
        )?),
    })
}

/// Instantiates the engine class `clsid` and wraps it.
#[cfg(target_os = "windows")]
pub fn create_wrapper(
    clsid: &Guid,
    enable_debugging: bool,
    classic: bool,
) -> WrapperResult<Box<dyn ActiveScriptWrapper>> {
    let script = com::create_instance(clsid, &IID_IACTIVE_SCRIPT).map_err(|source| {
        WrapperError::Unsupported {
            interface: "IActiveScript",
            source,
        }
    })?;
    wrap_for_current_architecture(script, enable_debugging, classic)
}

/// Instantiates the engine class `clsid` and wraps it.
#[cfg(not(target_os = "windows"))]
pub fn create_wrapper(
    _clsid: &Guid,
    _enable_debugging: bool,
    _classic: bool,
) -> WrapperResult<Box<dyn ActiveScriptWrapper>> {
    Err(WrapperError::Unsupported {
        interface: "IActiveScript",
        source: ComError::Call(HResult::REGDB_E_CLASSNOTREG),
    })
}

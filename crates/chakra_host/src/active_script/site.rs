//! The `IActiveScriptSite` handed to the engine
//!
//! The site remembers which document each parse cookie belongs to and keeps
//! the first error the engine reports during a call, together with the
//! script call stack at the time of the report.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::rc::{Rc, Weak};

use chakra_native::active_script::{ActiveScriptWrapper, IID_IACTIVE_SCRIPT_SITE};
use chakra_native::com::*;
use tracing::{debug, trace};

use super::translate::ReportedError;

const LOCALE_USER_DEFAULT: u32 = 0x0400;

pub(crate) struct SiteState {
    documents: RefCell<HashMap<u32, String>>,
    error: RefCell<Option<ReportedError>>,
    stack_source: RefCell<Option<Weak<dyn ActiveScriptWrapper>>>,
}

impl SiteState {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            documents: RefCell::new(HashMap::new()),
            error: RefCell::new(None),
            stack_source: RefCell::new(None),
        })
    }

    /// The `IActiveScriptSite` over this state.
    pub(crate) fn site(self: &Rc<Self>) -> ComPtr {
        ComObject::create(&SITE_VTBL, IID_IACTIVE_SCRIPT_SITE, self.clone())
    }

    /// Engine whose stack frames are captured with each error report.
    pub(crate) fn capture_stacks_of(&self, wrapper: &Rc<dyn ActiveScriptWrapper>) {
        *self.stack_source.borrow_mut() = Some(Rc::downgrade(wrapper));
    }

    pub(crate) fn register_document(&self, source_context: u32, document_name: &str) {
        self.documents
            .borrow_mut()
            .insert(source_context, document_name.to_owned());
    }

    pub(crate) fn take_error(&self) -> Option<ReportedError> {
        self.error.borrow_mut().take()
    }

    pub(crate) fn clear_error(&self) {
        self.error.borrow_mut().take();
    }

    fn record(&self, error: ReportedError) {
        let mut slot = self.error.borrow_mut();
        if slot.is_some() {
            trace!(status = %error.hresult, "later script error ignored");
            return;
        }
        debug!(status = %error.hresult, document = %error.document_name, "script error reported");
        *slot = Some(error);
    }

    fn call_stack(&self) -> Vec<String> {
        let Some(wrapper) = self.stack_source.borrow().as_ref().and_then(Weak::upgrade) else {
            return Vec::new();
        };
        match wrapper.enum_stack_frames() {
            Ok(frames) => frames.descriptions(),
            Err(err) => {
                trace!("stack frames unavailable: {err}");
                Vec::new()
            }
        }
    }

    /// Reads an `IActiveScriptError`.
    fn read(&self, error: &ComPtr) -> ReportedError {
        let mut exception = ExcepInfo::default();
        let mut context = 0u32;
        let mut line = 0u32;
        let mut column = 0i32;
        let mut text = std::ptr::null_mut();

        // SAFETY: slots 3 to 5 of IActiveScriptError; every out pointer is
        // valid for the call.
        let (has_position, has_text) = unsafe {
            let get_exception_info: GetExceptionInfoFn = error.slot(3);
            if get_exception_info(error.as_raw(), &mut exception).is_ok() {
                exception.fill_deferred();
            }
            let get_source_position: GetSourcePositionFn = error.slot(4);
            let has_position =
                get_source_position(error.as_raw(), &mut context, &mut line, &mut column).is_ok();
            let get_source_line_text: GetSourceLineTextFn = error.slot(5);
            let has_text = get_source_line_text(error.as_raw(), &mut text).is_ok();
            (has_position, has_text)
        };
        // SAFETY: a BSTR handed over by GetSourceLineText, or null.
        let text = unsafe { Bstr::from_raw(text) };

        ReportedError {
            hresult: ReportedError::status_of(&exception, HResult::E_FAIL),
            description: exception.description(),
            document_name: if has_position {
                self.documents.borrow().get(&context).cloned().unwrap_or_default()
            } else {
                String::new()
            },
            line: has_position.then_some(line),
            column: has_position.then(|| column.max(0) as u32),
            source_line: if has_text { text.to_string() } else { String::new() },
            call_stack: self.call_stack(),
        }
    }
}

type GetExceptionInfoFn = unsafe extern "system" fn(*mut c_void, *mut ExcepInfo) -> HResult;
type GetSourcePositionFn =
    unsafe extern "system" fn(*mut c_void, *mut u32, *mut u32, *mut i32) -> HResult;
type GetSourceLineTextFn = unsafe extern "system" fn(*mut c_void, *mut *mut u16) -> HResult;

#[repr(C)]
struct SiteVtbl {
    base: IUnknownVtbl,
    get_lcid: unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult,
    get_item_info: unsafe extern "system" fn(
        *mut c_void,
        *const u16,
        u32,
        *mut *mut c_void,
        *mut *mut c_void,
    ) -> HResult,
    get_doc_version_string: unsafe extern "system" fn(*mut c_void, *mut *mut u16) -> HResult,
    on_script_terminate:
        unsafe extern "system" fn(*mut c_void, *const Variant, *const ExcepInfo) -> HResult,
    on_state_change: unsafe extern "system" fn(*mut c_void, u32) -> HResult,
    on_script_error: unsafe extern "system" fn(*mut c_void, *mut c_void) -> HResult,
    on_enter_script: unsafe extern "system" fn(*mut c_void) -> HResult,
    on_leave_script: unsafe extern "system" fn(*mut c_void) -> HResult,
}

static SITE_VTBL: SiteVtbl = SiteVtbl {
    base: IUnknownVtbl::of::<Rc<SiteState>>(),
    get_lcid,
    get_item_info,
    get_doc_version_string,
    on_script_terminate,
    on_state_change,
    on_script_error,
    on_enter_script,
    on_leave_script,
};

unsafe fn state<'a>(this: *mut c_void) -> &'a SiteState {
    &ComObject::<Rc<SiteState>>::from_this(this).value
}

unsafe extern "system" fn get_lcid(_this: *mut c_void, lcid: *mut u32) -> HResult {
    if lcid.is_null() {
        return HResult::E_POINTER;
    }
    *lcid = LOCALE_USER_DEFAULT;
    HResult::S_OK
}

unsafe extern "system" fn get_item_info(
    _this: *mut c_void,
    _name: *const u16,
    _mask: u32,
    item: *mut *mut c_void,
    type_info: *mut *mut c_void,
) -> HResult {
    // globals are set on the script dispatch, never as named items
    if !item.is_null() {
        *item = std::ptr::null_mut();
    }
    if !type_info.is_null() {
        *type_info = std::ptr::null_mut();
    }
    HResult::TYPE_E_ELEMENTNOTFOUND
}

unsafe extern "system" fn get_doc_version_string(
    _this: *mut c_void,
    version: *mut *mut u16,
) -> HResult {
    if !version.is_null() {
        *version = std::ptr::null_mut();
    }
    HResult::E_NOTIMPL
}

unsafe extern "system" fn on_script_terminate(
    _this: *mut c_void,
    _result: *const Variant,
    _exception: *const ExcepInfo,
) -> HResult {
    HResult::S_OK
}

unsafe extern "system" fn on_state_change(_this: *mut c_void, state: u32) -> HResult {
    trace!(state, "script state changed");
    HResult::S_OK
}

unsafe extern "system" fn on_script_error(this: *mut c_void, error: *mut c_void) -> HResult {
    let Some(error) = ComPtr::from_raw_borrowed(error) else {
        return HResult::E_POINTER;
    };
    let state = state(this);
    let reported = state.read(&error);
    state.record(reported);
    HResult::S_OK
}

unsafe extern "system" fn on_enter_script(_this: *mut c_void) -> HResult {
    HResult::S_OK
}

unsafe extern "system" fn on_leave_script(_this: *mut c_void) -> HResult {
    HResult::S_OK
}

//! Process debug manager enumerators used for error diagnostics.

use std::ffi::c_void;

use crate::com::{Bstr, ComPtr, HResult};

/// `DebugStackFrameDescriptor`
#[repr(C)]
struct StackFrameDescriptor {
    frame: *mut c_void,
    min: u32,
    lim: u32,
    is_final: i32,
    final_object: *mut c_void,
}

const DOCUMENTNAMETYPE_TITLE: u32 = 1;

type NextFramesFn =
    unsafe extern "system" fn(*mut c_void, u32, *mut StackFrameDescriptor, *mut u32) -> HResult;
type GetDescriptionStringFn = unsafe extern "system" fn(*mut c_void, i32, *mut *mut u16) -> HResult;
type NextContextsFn =
    unsafe extern "system" fn(*mut c_void, u32, *mut *mut c_void, *mut u32) -> HResult;
type GetInterfaceFn = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult;
type GetNameFn = unsafe extern "system" fn(*mut c_void, u32, *mut *mut u16) -> HResult;

/// `IEnumDebugStackFrames`, or an empty sequence when the engine offers no
/// stack frame sniffer.
pub struct StackFrameEnumerator {
    inner: Option<ComPtr>,
}

impl StackFrameEnumerator {
    pub fn new(inner: ComPtr) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn empty() -> Self {
        Self { inner: None }
    }

    pub fn is_empty_enumerator(&self) -> bool {
        self.inner.is_none()
    }

    /// Long descriptions of every remaining frame, innermost first.
    pub fn descriptions(&self) -> Vec<String> {
        let mut descriptions = Vec::new();
        let Some(inner) = &self.inner else {
            return descriptions;
        };

        loop {
            let mut descriptor = StackFrameDescriptor {
                frame: std::ptr::null_mut(),
                min: 0,
                lim: 0,
                is_final: 0,
                final_object: std::ptr::null_mut(),
            };
            let mut fetched = 0u32;
            // SAFETY: slot 3 of IEnumDebugStackFrames is Next.
            let hr = unsafe {
                let next: NextFramesFn = inner.slot(3);
                next(inner.as_raw(), 1, &mut descriptor, &mut fetched)
            };
            if !hr.is_ok() || fetched == 0 {
                break;
            }

            // SAFETY: the descriptor owns one reference to each interface.
            let frame = unsafe { ComPtr::from_raw(descriptor.frame) };
            drop(unsafe { ComPtr::from_raw(descriptor.final_object) });

            if let Some(frame) = frame {
                let mut description = std::ptr::null_mut();
                // SAFETY: slot 4 of IDebugStackFrame is GetDescriptionString.
                let hr = unsafe {
                    let describe: GetDescriptionStringFn = frame.slot(4);
                    describe(frame.as_raw(), 1, &mut description)
                };
                let description = unsafe { Bstr::from_raw(description) };
                if hr.is_ok() && !description.is_empty() {
                    descriptions.push(description.to_string());
                }
            }
        }

        descriptions
    }
}

/// `IEnumDebugCodeContexts` for one source position.
pub struct CodeContextEnumerator {
    inner: ComPtr,
}

impl CodeContextEnumerator {
    pub fn new(inner: ComPtr) -> Self {
        Self { inner }
    }

    /// Title of the document owning the first code context, if the engine
    /// knows one.
    pub fn document_name(&self) -> Option<String> {
        let mut context = std::ptr::null_mut();
        let mut fetched = 0u32;
        // SAFETY: slot 3 of IEnumDebugCodeContexts is Next.
        let hr = unsafe {
            let next: NextContextsFn = self.inner.slot(3);
            next(self.inner.as_raw(), 1, &mut context, &mut fetched)
        };
        if !hr.is_ok() || fetched == 0 {
            return None;
        }
        let code_context = unsafe { ComPtr::from_raw(context) }?;

        // IDebugCodeContext::GetDocumentContext, IDebugDocumentContext::GetDocument
        let document_context = follow(&code_context, 3)?;
        let document = follow(&document_context, 3)?;

        let mut name = std::ptr::null_mut();
        // SAFETY: slot 3 of IDebugDocumentInfo is GetName.
        let hr = unsafe {
            let get_name: GetNameFn = document.slot(3);
            get_name(document.as_raw(), DOCUMENTNAMETYPE_TITLE, &mut name)
        };
        let name = unsafe { Bstr::from_raw(name) };
        (hr.is_ok() && !name.is_empty()).then(|| name.to_string())
    }
}

fn follow(ptr: &ComPtr, slot: usize) -> Option<ComPtr> {
    let mut out = std::ptr::null_mut();
    // SAFETY: callers pass the slot of a getter returning one interface reference.
    let hr = unsafe {
        let get: GetInterfaceFn = ptr.slot(slot);
        get(ptr.as_raw(), &mut out)
    };
    if hr.is_ok() {
        unsafe { ComPtr::from_raw(out) }
    } else {
        None
    }
}

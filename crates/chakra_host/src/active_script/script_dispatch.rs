//! Calls into script objects through `IDispatch`

use std::ffi::c_void;

use chakra_native::active_script::{WrapperError, WrapperResult};
use chakra_native::com::*;

use super::translate::ReportedError;

type GetIdsOfNamesFn = unsafe extern "system" fn(
    *mut c_void,
    *const Guid,
    *const *const u16,
    u32,
    u32,
    *mut DispId,
) -> HResult;
type InvokeFn = unsafe extern "system" fn(
    *mut c_void,
    DispId,
    *const Guid,
    u32,
    u16,
    *mut DispParams,
    *mut Variant,
    *mut ExcepInfo,
    *mut u32,
) -> HResult;
type GetDispIdFn = unsafe extern "system" fn(*mut c_void, *const u16, u32, *mut DispId) -> HResult;
type InvokeExFn = unsafe extern "system" fn(
    *mut c_void,
    DispId,
    u32,
    u16,
    *mut DispParams,
    *mut Variant,
    *mut ExcepInfo,
    *mut c_void,
) -> HResult;

const LOCALE_USER_DEFAULT: u32 = 0x0400;

/// An `IDispatch` of the engine, with its `IDispatchEx` when available.
pub(crate) struct ScriptDispatch {
    inner: ComPtr,
    ex: Option<ComPtr>,
}

impl ScriptDispatch {
    pub(crate) fn new(dispatch: ComPtr) -> Self {
        let ex = dispatch.query_interface(&IID_IDISPATCH_EX).ok();
        Self { inner: dispatch, ex }
    }

    /// Dispatch id of `name`, or `None` when the object has no such member.
    pub(crate) fn id_of(&self, name: &str) -> ComResult<Option<DispId>> {
        self.lookup(name, FDEX_NAME_CASE_SENSITIVE)
    }

    /// Dispatch id of `name`, creating the member when it does not exist.
    pub(crate) fn ensure_id(&self, name: &str) -> WrapperResult<DispId> {
        match self.lookup(name, FDEX_NAME_CASE_SENSITIVE | FDEX_NAME_ENSURE)? {
            Some(id) => Ok(id),
            None => Err(ComError::Call(HResult::DISP_E_UNKNOWNNAME).into()),
        }
    }

    fn lookup(&self, name: &str, flags: u32) -> ComResult<Option<DispId>> {
        let mut id = DISPID_UNKNOWN;
        let hr = match &self.ex {
            Some(ex) => {
                let name = Bstr::new(name);
                // SAFETY: slot 7 of IDispatchEx is GetDispID.
                unsafe {
                    let get_disp_id: GetDispIdFn = ex.slot(7);
                    get_disp_id(ex.as_raw(), name.as_ptr(), flags, &mut id)
                }
            }
            None => {
                let name = to_wide(name);
                let names = [name.as_ptr()];
                let null_iid = Guid::default();
                // SAFETY: slot 5 of IDispatch is GetIDsOfNames.
                unsafe {
                    let get_ids: GetIdsOfNamesFn = self.inner.slot(5);
                    get_ids(
                        self.inner.as_raw(),
                        &null_iid,
                        names.as_ptr(),
                        1,
                        LOCALE_USER_DEFAULT,
                        &mut id,
                    )
                }
            }
        };
        match hr {
            HResult::DISP_E_UNKNOWNNAME | HResult::DISP_E_MEMBERNOTFOUND => Ok(None),
            hr => hr.ok().map(|()| Some(id)),
        }
    }

    /// Invokes member `id`. `args` are in `DISPPARAMS` order, last first.
    pub(crate) fn invoke(
        &self,
        id: DispId,
        flags: u16,
        args: &mut [Variant],
    ) -> WrapperResult<Variant> {
        let mut params = DispParams::new(args);
        let mut named = DISPID_PROPERTYPUT;
        if flags & (DISPATCH_PROPERTYPUT | DISPATCH_PROPERTYPUTREF) != 0 {
            params.rgdispid_named_args = &mut named;
            params.c_named_args = 1;
        }

        let mut result = Variant::empty();
        let mut exception = ExcepInfo::default();
        let hr = match &self.ex {
            // SAFETY: slot 8 of IDispatchEx is InvokeEx; every pointer
            // outlives the call.
            Some(ex) => unsafe {
                let invoke_ex: InvokeExFn = ex.slot(8);
                invoke_ex(
                    ex.as_raw(),
                    id,
                    LOCALE_USER_DEFAULT,
                    flags,
                    &mut params,
                    &mut result,
                    &mut exception,
                    std::ptr::null_mut(),
                )
            },
            // SAFETY: slot 6 of IDispatch is Invoke.
            None => unsafe {
                let null_iid = Guid::default();
                let mut arg_error = 0;
                let invoke: InvokeFn = self.inner.slot(6);
                invoke(
                    self.inner.as_raw(),
                    id,
                    &null_iid,
                    LOCALE_USER_DEFAULT,
                    flags,
                    &mut params,
                    &mut result,
                    &mut exception,
                    &mut arg_error,
                )
            },
        };

        if hr.is_ok() {
            return Ok(result);
        }
        Err(exception_error(hr, exception))
    }

    pub(crate) fn get(&self, id: DispId) -> WrapperResult<Variant> {
        self.invoke(id, DISPATCH_PROPERTYGET, &mut [])
    }

    pub(crate) fn put(&self, id: DispId, value: Variant) -> WrapperResult<()> {
        self.invoke(id, DISPATCH_PROPERTYPUT, &mut [value])?;
        Ok(())
    }

    /// Calls member `id` (or the object itself for `DISPID_VALUE`).
    pub(crate) fn call(&self, id: DispId, mut args: Vec<Variant>) -> WrapperResult<Variant> {
        self.invoke(id, DISPATCH_METHOD, &mut args)
    }
}

/// Error of a failed `Invoke`, with the exception details when the callee
/// raised one.
pub(crate) fn exception_error(hr: HResult, mut exception: ExcepInfo) -> WrapperError {
    if hr != HResult::DISP_E_EXCEPTION {
        return ComError::Call(hr).into();
    }
    exception.fill_deferred();
    WrapperError::Exception {
        hresult: ReportedError::status_of(&exception, hr),
        source_name: exception.source(),
        description: exception.description(),
    }
}

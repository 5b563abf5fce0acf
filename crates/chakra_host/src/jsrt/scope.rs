//! Context scopes
//!
//! JsRT calls act on the context that is current on the calling thread. A
//! [`Scope`] makes a context current, publishes the function table the
//! value handles call through, and restores the previous context on drop.

use std::cell::RefCell;
use std::sync::Arc;

use chakra_native::jsrt::{JsContextRef, JsErrorCode, JsRtApi, NativeError, NativeResult};
use tracing::warn;

thread_local! {
    static CURRENT_API: RefCell<Vec<Arc<dyn JsRtApi>>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` with the function table of the innermost scope on this thread.
pub(crate) fn with_api<R>(f: impl FnOnce(&dyn JsRtApi) -> NativeResult<R>) -> NativeResult<R> {
    // cloned so that callbacks made from inside `f` can open nested scopes
    let api = CURRENT_API
        .with(|current| current.borrow().last().cloned())
        .ok_or(NativeError::from(JsErrorCode::NO_CURRENT_CONTEXT))?;
    f(&*api)
}

pub(crate) fn in_scope() -> bool {
    CURRENT_API.with(|current| !current.borrow().is_empty())
}

pub(crate) struct Scope {
    api: Arc<dyn JsRtApi>,
    previous: JsContextRef,
}

impl Scope {
    /// # Safety
    ///
    /// `context` must be a live context created by `api` on a runtime owned
    /// by the calling thread.
    pub(crate) unsafe fn enter(
        api: &Arc<dyn JsRtApi>,
        context: JsContextRef,
    ) -> NativeResult<Self> {
        let previous = api.get_current_context()?;
        api.set_current_context(context)?;
        CURRENT_API.with(|current| current.borrow_mut().push(api.clone()));
        Ok(Self {
            api: api.clone(),
            previous,
        })
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        CURRENT_API.with(|current| current.borrow_mut().pop());
        // SAFETY: `previous` was current on this thread when the scope was
        // entered, or null.
        if let Err(err) = unsafe { self.api.set_current_context(self.previous) } {
            warn!("failed to restore the previous JsRT context: {err}");
        }
    }
}

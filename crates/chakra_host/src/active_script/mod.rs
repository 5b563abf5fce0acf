//! Chakra and classic JScript over the ActiveScript COM interfaces
//!
//! [`ChakraActiveScriptEngine`] dispatches every request onto a thread that
//! has joined a single-threaded COM apartment. There an
//! [`ActiveScriptRuntime`](runtime::ActiveScriptRuntime) owns the
//! architecture-specific wrapper, the script site that collects error
//! reports and the global object's `IDispatch`. Host values cross into
//! script as `IDispatchEx` objects implemented in [`host_dispatch`].

mod engine;
mod host_dispatch;
mod runtime;
mod script_dispatch;
mod site;
mod translate;
mod variant;

pub use engine::ChakraActiveScriptEngine;

use chakra_native::active_script::WrapperError;
use chakra_native::com::{ComError, HResult};
use thiserror::Error;

use crate::reflect::MemberError;

/// Failure inside the ActiveScript backend, before translation into an
/// [`EngineError`](crate::EngineError).
#[derive(Debug, Error)]
pub enum ActiveScriptError {
    #[error(transparent)]
    Wrapper(#[from] WrapperError),

    #[error(transparent)]
    Member(#[from] MemberError),

    /// The host rejected the request, as a usage error.
    #[error("{0}")]
    Usage(String),

    /// The request failed the way a script error would.
    #[error("{0}")]
    Runtime(String),
}

impl From<ComError> for ActiveScriptError {
    fn from(error: ComError) -> Self {
        Self::Wrapper(error.into())
    }
}

impl ActiveScriptError {
    pub fn hresult(&self) -> Option<HResult> {
        match self {
            Self::Wrapper(err) => Some(err.hresult()),
            _ => None,
        }
    }
}

pub type ActiveScriptResult<T> = Result<T, ActiveScriptError>;

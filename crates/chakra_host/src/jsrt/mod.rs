//! ChakraCore JsRT backend
//!
//! The engine façade ([`ChakraJsRtEngine`]) dispatches every request onto
//! the runtime's own thread, where a [`JsRtRuntime`](runtime::JsRtRuntime)
//! owns the runtime, its single context and everything projected into it.

mod engine;
mod projector;
mod registry;
mod runtime;
mod scope;
mod translate;
mod value;

#[cfg(test)]
pub(crate) mod fake;

pub use engine::ChakraJsRtEngine;
pub use registry::{ExternalObjectRegistry, EXTERNAL_DATA_MAGIC};
pub use value::{JsPropertyId, JsValue, Pinned};

use chakra_native::jsrt::{JsErrorCode, NativeError};
use thiserror::Error;

use crate::reflect::MemberError;

/// Failure inside the JsRT backend, before translation into an
/// [`EngineError`](crate::EngineError).
#[derive(Debug, Clone, Error)]
pub enum JsRtError {
    #[error(transparent)]
    Native(#[from] NativeError),

    #[error(transparent)]
    Member(#[from] MemberError),

    /// The host rejected the request, as a usage error.
    #[error("{0}")]
    Usage(String),

    /// The request failed the way a script error would.
    #[error("{0}")]
    Runtime(String),
}

impl JsRtError {
    pub fn code(&self) -> Option<JsErrorCode> {
        match self {
            Self::Native(err) => Some(err.code),
            _ => None,
        }
    }
}

pub type JsRtResult<T> = Result<T, JsRtError>;

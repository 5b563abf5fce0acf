//! The uniform engine contract

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{EngineResult, UsageError};
use crate::reflect::HostType;
use crate::settings::JsEngineMode;
use crate::value::{FromHostValue, HostValue};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_engine_id() -> u64 {
    NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Script code compiled ahead of time by one engine mode.
#[derive(Debug, Clone)]
pub struct PrecompiledScript {
    engine_mode: JsEngineMode,
    document_name: String,
    code: String,
    cached_data: Vec<u8>,
}

impl PrecompiledScript {
    pub(crate) fn new(
        engine_mode: JsEngineMode,
        document_name: &str,
        code: &str,
        cached_data: Vec<u8>,
    ) -> Self {
        Self {
            engine_mode,
            document_name: document_name.to_owned(),
            code: code.to_owned(),
            cached_data,
        }
    }

    pub fn engine_mode(&self) -> JsEngineMode {
        self.engine_mode
    }

    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn cached_data(&self) -> &[u8] {
        &self.cached_data
    }
}

/// A script engine instance.
///
/// Every operation except [`interrupt`](ScriptEngine::interrupt) runs on the
/// engine's own thread and blocks the caller until it completes. After
/// [`dispose`](ScriptEngine::dispose) every operation fails with a usage
/// error.
pub trait ScriptEngine: Send + Sync {
    fn mode(&self) -> JsEngineMode;

    /// Identifies the engine that produced a [`ScriptObject`](crate::ScriptObject).
    fn engine_id(&self) -> u64;

    fn supports_script_precompilation(&self) -> bool;

    fn precompile(&self, code: &str, document_name: &str) -> EngineResult<PrecompiledScript>;

    fn evaluate(&self, expression: &str, document_name: &str) -> EngineResult<HostValue>;

    fn execute(&self, code: &str, document_name: &str) -> EngineResult<()>;

    fn execute_precompiled(&self, script: &PrecompiledScript) -> EngineResult<()>;

    /// Calls a global function. Fails when the global object has no such
    /// property.
    fn call_function(&self, name: &str, args: &[HostValue]) -> EngineResult<HostValue>;

    /// `true` when the global variable exists and is not `undefined`.
    fn has_variable(&self, name: &str) -> EngineResult<bool>;

    fn get_variable_value(&self, name: &str) -> EngineResult<HostValue>;

    fn set_variable_value(&self, name: &str, value: HostValue) -> EngineResult<()>;

    /// Sets the variable to `undefined` if it exists. The property itself
    /// is kept.
    fn remove_variable(&self, name: &str) -> EngineResult<()>;

    fn embed_host_object(&self, name: &str, value: HostValue) -> EngineResult<()>;

    fn embed_host_type(&self, name: &str, host_type: Arc<HostType>) -> EngineResult<()>;

    /// Asks the running script to stop at its next interrupt check. Callable
    /// from any thread; does not wait.
    fn interrupt(&self) -> EngineResult<()>;

    fn collect_garbage(&self) -> EngineResult<()>;

    /// Releases all native resources. Repeated calls do nothing.
    fn dispose(&self);
}

/// Typed conveniences over [`ScriptEngine`].
pub trait ScriptEngineExt: ScriptEngine {
    fn evaluate_as<T: FromHostValue>(
        &self,
        expression: &str,
        document_name: &str,
    ) -> EngineResult<T> {
        let value = self.evaluate(expression, document_name)?;
        convert_result(self.mode(), &value)
    }

    fn get_variable_value_as<T: FromHostValue>(&self, name: &str) -> EngineResult<T> {
        let value = self.get_variable_value(name)?;
        convert_result(self.mode(), &value)
    }

    fn call_function_as<T: FromHostValue>(
        &self,
        name: &str,
        args: &[HostValue],
    ) -> EngineResult<T> {
        let value = self.call_function(name, args)?;
        convert_result(self.mode(), &value)
    }
}

impl<E: ScriptEngine + ?Sized> ScriptEngineExt for E {}

fn convert_result<T: FromHostValue>(mode: JsEngineMode, value: &HostValue) -> EngineResult<T> {
    T::from_host_value(value).ok_or_else(|| {
        UsageError::new(
            mode.name(),
            format!(
                "cannot convert a value of type {} to {}",
                value.type_name(),
                std::any::type_name::<T>()
            ),
        )
        .into()
    })
}

//! Chakra script hosting
//!
//! One [`ScriptEngine`] interface over the two native hosting surfaces of the
//! Chakra JavaScript engine:
//!
//! - [`jsrt::ChakraJsRtEngine`]: the JsRT C API of ChakraCore
//! - [`active_script::ChakraActiveScriptEngine`]: the COM ActiveScript API
//!   (Windows only)
//!
//! Both run every native call on a dedicated thread ([`dispatcher`]), project
//! host values and registered [`HostType`]s into script and translate script
//! failures into [`EngineError`]s.
//!
//! ```no_run
//! use chakra_host::{create_engine, EngineSettings, ScriptEngine, ScriptEngineExt};
//!
//! let engine = create_engine(&EngineSettings::default())?;
//! let sum: i32 = engine.evaluate_as("1 + 2", "sum.js")?;
//! assert_eq!(sum, 3);
//! engine.dispose();
//! # Ok::<(), chakra_host::EngineError>(())
//! ```

pub mod active_script;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod factory;
pub mod jsrt;
pub mod reflect;
pub mod settings;
pub mod value;

mod flag;
mod release;

pub use engine::{PrecompiledScript, ScriptEngine, ScriptEngineExt};
pub use error::{
    EngineError, EngineLoadError, EngineResult, ErrorCategory, ScriptEngineError, ScriptError,
    ScriptErrorDetails, ScriptInterruptedError, UsageError,
};
pub use factory::{create_engine, is_supported};
pub use reflect::{HostObject, HostType, HostTypeBuilder, ParamType};
pub use settings::{EngineSettings, JsEngineMode};
pub use value::{FromHostValue, HostError, HostFunction, HostValue, ScriptObject};

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! JsRT C API surface
//!
//! Opaque handle types, status codes and the [`JsRtApi`] native function
//! table. Every entry of the table maps one-to-one onto an exported JsRT
//! function; implementations only forward and report the native status.

mod library;

pub use library::{ChakraLibrary, LibraryError};

use std::ffi::c_void;
use std::fmt;
use std::ops::BitOr;

/// Generic reference to any JsRT object that can be ref-counted.
pub type JsRef = *mut c_void;
/// Reference to a script value.
pub type JsValueRef = JsRef;
/// Reference to an execution context.
pub type JsContextRef = JsRef;
/// Reference to an interned property name.
pub type JsPropertyIdRef = JsRef;
/// Handle to a runtime (one isolated heap, one thread at a time).
pub type JsRuntimeHandle = *mut c_void;
/// Cookie identifying a source text, reported back in diagnostics.
pub type JsSourceContext = usize;

/// Native callback invoked when script calls a host-created function.
pub type JsNativeFunction = unsafe extern "system" fn(
    callee: JsValueRef,
    is_construct_call: bool,
    arguments: *mut JsValueRef,
    argument_count: u16,
    callback_state: *mut c_void,
) -> JsValueRef;

/// Native callback invoked when the engine collects an external object.
pub type JsFinalizeCallback = unsafe extern "system" fn(data: *mut c_void);

/// Native callback asked for the source of a lazily deserialized script.
pub type JsSerializedLoadScriptCallback = unsafe extern "system" fn(
    source_context: JsSourceContext,
    value: *mut JsValueRef,
    parse_attributes: *mut JsParseScriptAttributes,
) -> bool;

/// Status code returned by every JsRT function.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct JsErrorCode(pub u32);

impl JsErrorCode {
    pub const NO_ERROR: Self = Self(0);

    pub const CATEGORY_USAGE: Self = Self(0x10000);
    pub const INVALID_ARGUMENT: Self = Self(0x10001);
    pub const NULL_ARGUMENT: Self = Self(0x10002);
    pub const NO_CURRENT_CONTEXT: Self = Self(0x10003);
    pub const IN_EXCEPTION_STATE: Self = Self(0x10004);
    pub const NOT_IMPLEMENTED: Self = Self(0x10005);
    pub const WRONG_THREAD: Self = Self(0x10006);
    pub const RUNTIME_IN_USE: Self = Self(0x10007);
    pub const BAD_SERIALIZED_SCRIPT: Self = Self(0x10008);
    pub const IN_DISABLED_STATE: Self = Self(0x10009);
    pub const CANNOT_DISABLE_EXECUTION: Self = Self(0x1000A);
    pub const HEAP_ENUM_IN_PROGRESS: Self = Self(0x1000B);
    pub const ARGUMENT_NOT_OBJECT: Self = Self(0x1000C);
    pub const IN_PROFILE_CALLBACK: Self = Self(0x1000D);
    pub const IN_THREAD_SERVICE_CALLBACK: Self = Self(0x1000E);
    pub const CANNOT_SERIALIZE_DEBUG_SCRIPT: Self = Self(0x1000F);
    pub const ALREADY_DEBUGGING_CONTEXT: Self = Self(0x10010);
    pub const ALREADY_PROFILING_CONTEXT: Self = Self(0x10011);
    pub const IDLE_NOT_ENABLED: Self = Self(0x10012);

    pub const CATEGORY_ENGINE: Self = Self(0x20000);
    pub const OUT_OF_MEMORY: Self = Self(0x20001);
    pub const BAD_FPU_STATE: Self = Self(0x20002);

    pub const CATEGORY_SCRIPT: Self = Self(0x30000);
    pub const SCRIPT_EXCEPTION: Self = Self(0x30001);
    pub const SCRIPT_COMPILE: Self = Self(0x30002);
    pub const SCRIPT_TERMINATED: Self = Self(0x30003);
    pub const SCRIPT_EVAL_DISABLED: Self = Self(0x30004);

    pub const CATEGORY_FATAL: Self = Self(0x40000);
    pub const FATAL: Self = Self(0x40001);
    pub const WRONG_RUNTIME: Self = Self(0x40002);

    const CATEGORY_MASK: u32 = 0xF_0000;

    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub const fn category(self) -> JsErrorCategory {
        match self.0 & Self::CATEGORY_MASK {
            0 if self.0 == 0 => JsErrorCategory::None,
            0x10000 => JsErrorCategory::Usage,
            0x20000 => JsErrorCategory::Engine,
            0x30000 => JsErrorCategory::Script,
            0x40000 => JsErrorCategory::Fatal,
            _ => JsErrorCategory::Unknown,
        }
    }

    /// Converts a status into a `Result`.
    #[inline]
    pub fn ok(self) -> NativeResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(NativeError { code: self })
        }
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::NO_ERROR => "NoError",
            Self::INVALID_ARGUMENT => "InvalidArgument",
            Self::NULL_ARGUMENT => "NullArgument",
            Self::NO_CURRENT_CONTEXT => "NoCurrentContext",
            Self::IN_EXCEPTION_STATE => "InExceptionState",
            Self::NOT_IMPLEMENTED => "NotImplemented",
            Self::WRONG_THREAD => "WrongThread",
            Self::RUNTIME_IN_USE => "RuntimeInUse",
            Self::BAD_SERIALIZED_SCRIPT => "BadSerializedScript",
            Self::IN_DISABLED_STATE => "InDisabledState",
            Self::CANNOT_DISABLE_EXECUTION => "CannotDisableExecution",
            Self::HEAP_ENUM_IN_PROGRESS => "HeapEnumInProgress",
            Self::ARGUMENT_NOT_OBJECT => "ArgumentNotObject",
            Self::IN_PROFILE_CALLBACK => "InProfileCallback",
            Self::IN_THREAD_SERVICE_CALLBACK => "InThreadServiceCallback",
            Self::CANNOT_SERIALIZE_DEBUG_SCRIPT => "CannotSerializeDebugScript",
            Self::ALREADY_DEBUGGING_CONTEXT => "AlreadyDebuggingContext",
            Self::ALREADY_PROFILING_CONTEXT => "AlreadyProfilingContext",
            Self::IDLE_NOT_ENABLED => "IdleNotEnabled",
            Self::OUT_OF_MEMORY => "OutOfMemory",
            Self::BAD_FPU_STATE => "BadFPUState",
            Self::SCRIPT_EXCEPTION => "ScriptException",
            Self::SCRIPT_COMPILE => "ScriptCompile",
            Self::SCRIPT_TERMINATED => "ScriptTerminated",
            Self::SCRIPT_EVAL_DISABLED => "ScriptEvalDisabled",
            Self::FATAL => "Fatal",
            Self::WRONG_RUNTIME => "WrongRuntime",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for JsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}(0x{:05X})", name, self.0),
            None => write!(f, "JsErrorCode(0x{:05X})", self.0),
        }
    }
}

impl fmt::Display for JsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Coarse classification of a [`JsErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsErrorCategory {
    None,
    /// The host used the API incorrectly.
    Usage,
    /// The engine ran into a resource problem.
    Engine,
    /// Script raised, failed to compile or was terminated.
    Script,
    /// The engine is in an unrecoverable state.
    Fatal,
    Unknown,
}

/// A failed JsRT call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("JsRT call failed with {code}")]
pub struct NativeError {
    pub code: JsErrorCode,
}

impl From<JsErrorCode> for NativeError {
    fn from(code: JsErrorCode) -> Self {
        Self { code }
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

/// Type tag of a script value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsValueType {
    Undefined,
    Null,
    Number,
    String,
    Boolean,
    Object,
    Function,
    Error,
    Array,
    Symbol,
    ArrayBuffer,
    TypedArray,
    DataView,
    Unknown(u32),
}

impl JsValueType {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Undefined,
            1 => Self::Null,
            2 => Self::Number,
            3 => Self::String,
            4 => Self::Boolean,
            5 => Self::Object,
            6 => Self::Function,
            7 => Self::Error,
            8 => Self::Array,
            9 => Self::Symbol,
            10 => Self::ArrayBuffer,
            11 => Self::TypedArray,
            12 => Self::DataView,
            other => Self::Unknown(other),
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::Null => 1,
            Self::Number => 2,
            Self::String => 3,
            Self::Boolean => 4,
            Self::Object => 5,
            Self::Function => 6,
            Self::Error => 7,
            Self::Array => 8,
            Self::Symbol => 9,
            Self::ArrayBuffer => 10,
            Self::TypedArray => 11,
            Self::DataView => 12,
            Self::Unknown(raw) => raw,
        }
    }

    /// Values of these kinds are not heap allocated by the engine and
    /// ignore reference counting.
    pub const fn is_primitive_without_identity(self) -> bool {
        matches!(self, Self::Undefined | Self::Null | Self::Boolean)
    }
}

/// Runtime creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct JsRuntimeAttributes(pub u32);

impl JsRuntimeAttributes {
    pub const NONE: Self = Self(0x0000_0000);
    pub const DISABLE_BACKGROUND_WORK: Self = Self(0x0000_0001);
    pub const ALLOW_SCRIPT_INTERRUPT: Self = Self(0x0000_0002);
    pub const ENABLE_IDLE_PROCESSING: Self = Self(0x0000_0004);
    pub const DISABLE_NATIVE_CODE_GENERATION: Self = Self(0x0000_0008);
    pub const DISABLE_EVAL: Self = Self(0x0000_0010);
    pub const ENABLE_EXPERIMENTAL_FEATURES: Self = Self(0x0000_0020);
    pub const DISPATCH_SET_EXCEPTIONS_TO_DEBUGGER: Self = Self(0x0000_0040);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for JsRuntimeAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags for parsing a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct JsParseScriptAttributes(pub u32);

impl JsParseScriptAttributes {
    pub const NONE: Self = Self(0x0);
    pub const LIBRARY_CODE: Self = Self(0x1);
    pub const ARRAY_BUFFER_IS_UTF16_ENCODED: Self = Self(0x2);
}

/// Built-in error constructors reachable through the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsErrorKind {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    SyntaxError,
    UriError,
}

/// The JsRT native function table.
///
/// # Safety
///
/// Every method forwards to native code. Handles passed in must have been
/// produced by the same table, belong to a live runtime and be used on the
/// thread that currently owns that runtime. Methods that need a current
/// context must only be called while one is set.
pub trait JsRtApi: Send + Sync {
    unsafe fn create_runtime(
        &self,
        attributes: JsRuntimeAttributes,
    ) -> NativeResult<JsRuntimeHandle>;
    unsafe fn dispose_runtime(&self, runtime: JsRuntimeHandle) -> NativeResult<()>;
    unsafe fn collect_garbage(&self, runtime: JsRuntimeHandle) -> NativeResult<()>;
    /// Safe to call from any thread.
    unsafe fn disable_runtime_execution(&self, runtime: JsRuntimeHandle) -> NativeResult<()>;
    unsafe fn enable_runtime_execution(&self, runtime: JsRuntimeHandle) -> NativeResult<()>;
    unsafe fn is_runtime_execution_disabled(&self, runtime: JsRuntimeHandle) -> NativeResult<bool>;

    unsafe fn create_context(&self, runtime: JsRuntimeHandle) -> NativeResult<JsContextRef>;
    unsafe fn get_current_context(&self) -> NativeResult<JsContextRef>;
    unsafe fn set_current_context(&self, context: JsContextRef) -> NativeResult<()>;
    /// Returns `JsErrorCode::NOT_IMPLEMENTED` when the library has no debugger hook.
    unsafe fn start_debugging(&self) -> NativeResult<()>;

    unsafe fn add_ref(&self, reference: JsRef) -> NativeResult<u32>;
    unsafe fn release(&self, reference: JsRef) -> NativeResult<u32>;

    unsafe fn run(
        &self,
        script: JsValueRef,
        source_context: JsSourceContext,
        source_url: JsValueRef,
        attributes: JsParseScriptAttributes,
    ) -> NativeResult<JsValueRef>;
    unsafe fn serialize(
        &self,
        script: JsValueRef,
        attributes: JsParseScriptAttributes,
    ) -> NativeResult<JsValueRef>;
    unsafe fn run_serialized(
        &self,
        buffer: JsValueRef,
        load_script: JsSerializedLoadScriptCallback,
        source_context: JsSourceContext,
        source_url: JsValueRef,
    ) -> NativeResult<JsValueRef>;
    unsafe fn create_external_array_buffer(
        &self,
        data: *mut c_void,
        byte_length: u32,
        finalize: Option<JsFinalizeCallback>,
        callback_state: *mut c_void,
    ) -> NativeResult<JsValueRef>;
    unsafe fn get_array_buffer_storage(&self, buffer: JsValueRef) -> NativeResult<(*mut u8, u32)>;

    unsafe fn get_value_type(&self, value: JsValueRef) -> NativeResult<JsValueType>;
    unsafe fn get_undefined_value(&self) -> NativeResult<JsValueRef>;
    unsafe fn get_null_value(&self) -> NativeResult<JsValueRef>;
    unsafe fn bool_to_boolean(&self, value: bool) -> NativeResult<JsValueRef>;
    unsafe fn boolean_to_bool(&self, value: JsValueRef) -> NativeResult<bool>;
    unsafe fn int_to_number(&self, value: i32) -> NativeResult<JsValueRef>;
    unsafe fn double_to_number(&self, value: f64) -> NativeResult<JsValueRef>;
    unsafe fn number_to_double(&self, value: JsValueRef) -> NativeResult<f64>;
    unsafe fn create_string(&self, content: &str) -> NativeResult<JsValueRef>;
    unsafe fn copy_string(&self, value: JsValueRef) -> NativeResult<String>;

    unsafe fn convert_value_to_boolean(&self, value: JsValueRef) -> NativeResult<JsValueRef>;
    unsafe fn convert_value_to_number(&self, value: JsValueRef) -> NativeResult<JsValueRef>;
    unsafe fn convert_value_to_string(&self, value: JsValueRef) -> NativeResult<JsValueRef>;
    unsafe fn convert_value_to_object(&self, value: JsValueRef) -> NativeResult<JsValueRef>;

    unsafe fn get_global_object(&self) -> NativeResult<JsValueRef>;
    unsafe fn create_object(&self) -> NativeResult<JsValueRef>;
    unsafe fn create_external_object(
        &self,
        data: *mut c_void,
        finalize: Option<JsFinalizeCallback>,
    ) -> NativeResult<JsValueRef>;
    unsafe fn has_external_data(&self, object: JsValueRef) -> NativeResult<bool>;
    unsafe fn get_external_data(&self, object: JsValueRef) -> NativeResult<*mut c_void>;
    unsafe fn get_prototype(&self, object: JsValueRef) -> NativeResult<JsValueRef>;
    unsafe fn set_prototype(&self, object: JsValueRef, prototype: JsValueRef) -> NativeResult<()>;

    unsafe fn create_property_id(&self, name: &str) -> NativeResult<JsPropertyIdRef>;
    unsafe fn get_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
    ) -> NativeResult<JsValueRef>;
    unsafe fn set_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
        value: JsValueRef,
        use_strict_rules: bool,
    ) -> NativeResult<()>;
    unsafe fn has_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
    ) -> NativeResult<bool>;
    unsafe fn define_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
        descriptor: JsValueRef,
    ) -> NativeResult<bool>;

    /// `arguments[0]` is the `this` value.
    unsafe fn call_function(
        &self,
        function: JsValueRef,
        arguments: &[JsValueRef],
    ) -> NativeResult<JsValueRef>;
    /// `arguments[0]` is ignored by the engine but must be present.
    unsafe fn construct_object(
        &self,
        function: JsValueRef,
        arguments: &[JsValueRef],
    ) -> NativeResult<JsValueRef>;
    unsafe fn create_function(
        &self,
        native_function: JsNativeFunction,
        callback_state: *mut c_void,
    ) -> NativeResult<JsValueRef>;

    unsafe fn create_error(
        &self,
        kind: JsErrorKind,
        message: JsValueRef,
    ) -> NativeResult<JsValueRef>;
    unsafe fn set_exception(&self, error: JsValueRef) -> NativeResult<()>;
    unsafe fn get_and_clear_exception(&self) -> NativeResult<JsValueRef>;
    unsafe fn has_exception(&self) -> NativeResult<bool>;
}

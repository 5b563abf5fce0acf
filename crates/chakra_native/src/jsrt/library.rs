//! [`JsRtApi`] backed by a dynamically loaded ChakraCore library.

use super::*;

use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

/// Failure to load the engine library or one of its exports.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("failed to load '{path}': {reason}")]
    LoadFailed { path: PathBuf, reason: String },
    #[error("'{path}' does not export '{symbol}'")]
    MissingSymbol { path: PathBuf, symbol: &'static str },
}

#[cfg(target_os = "windows")]
const DEFAULT_LIBRARY_NAME: &str = "ChakraCore.dll";
#[cfg(target_os = "macos")]
const DEFAULT_LIBRARY_NAME: &str = "libChakraCore.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_LIBRARY_NAME: &str = "libChakraCore.so";

type JsCreateRuntime =
    unsafe extern "system" fn(u32, *mut c_void, *mut JsRuntimeHandle) -> JsErrorCode;
type JsRuntimeFn = unsafe extern "system" fn(JsRuntimeHandle) -> JsErrorCode;
type JsRuntimeQuery = unsafe extern "system" fn(JsRuntimeHandle, *mut bool) -> JsErrorCode;
type JsCreateContext = unsafe extern "system" fn(JsRuntimeHandle, *mut JsContextRef) -> JsErrorCode;
type JsOut = unsafe extern "system" fn(*mut JsRef) -> JsErrorCode;
type JsIn = unsafe extern "system" fn(JsRef) -> JsErrorCode;
type JsVoid = unsafe extern "system" fn() -> JsErrorCode;
type JsRefCount = unsafe extern "system" fn(JsRef, *mut u32) -> JsErrorCode;
type JsUnary = unsafe extern "system" fn(JsValueRef, *mut JsValueRef) -> JsErrorCode;
type JsRun = unsafe extern "system" fn(
    JsValueRef,
    JsSourceContext,
    JsValueRef,
    JsParseScriptAttributes,
    *mut JsValueRef,
) -> JsErrorCode;
type JsSerialize =
    unsafe extern "system" fn(JsValueRef, *mut JsValueRef, JsParseScriptAttributes) -> JsErrorCode;
type JsRunSerialized = unsafe extern "system" fn(
    JsValueRef,
    JsSerializedLoadScriptCallback,
    JsSourceContext,
    JsValueRef,
    *mut JsValueRef,
) -> JsErrorCode;
type JsCreateExternalArrayBuffer = unsafe extern "system" fn(
    *mut c_void,
    u32,
    Option<JsFinalizeCallback>,
    *mut c_void,
    *mut JsValueRef,
) -> JsErrorCode;
type JsGetArrayBufferStorage =
    unsafe extern "system" fn(JsValueRef, *mut *mut u8, *mut u32) -> JsErrorCode;
type JsGetValueType = unsafe extern "system" fn(JsValueRef, *mut u32) -> JsErrorCode;
type JsBoolToBoolean = unsafe extern "system" fn(bool, *mut JsValueRef) -> JsErrorCode;
type JsBooleanToBool = unsafe extern "system" fn(JsValueRef, *mut bool) -> JsErrorCode;
type JsIntToNumber = unsafe extern "system" fn(i32, *mut JsValueRef) -> JsErrorCode;
type JsDoubleToNumber = unsafe extern "system" fn(f64, *mut JsValueRef) -> JsErrorCode;
type JsNumberToDouble = unsafe extern "system" fn(JsValueRef, *mut f64) -> JsErrorCode;
type JsCreateUtf8 = unsafe extern "system" fn(*const u8, usize, *mut JsRef) -> JsErrorCode;
type JsCopyString =
    unsafe extern "system" fn(JsValueRef, *mut u8, usize, *mut usize) -> JsErrorCode;
type JsCreateExternalObject = unsafe extern "system" fn(
    *mut c_void,
    Option<JsFinalizeCallback>,
    *mut JsValueRef,
) -> JsErrorCode;
type JsObjectQuery = unsafe extern "system" fn(JsValueRef, *mut bool) -> JsErrorCode;
type JsGetExternalData = unsafe extern "system" fn(JsValueRef, *mut *mut c_void) -> JsErrorCode;
type JsSetPrototype = unsafe extern "system" fn(JsValueRef, JsValueRef) -> JsErrorCode;
type JsGetProperty =
    unsafe extern "system" fn(JsValueRef, JsPropertyIdRef, *mut JsValueRef) -> JsErrorCode;
type JsSetProperty =
    unsafe extern "system" fn(JsValueRef, JsPropertyIdRef, JsValueRef, bool) -> JsErrorCode;
type JsHasProperty =
    unsafe extern "system" fn(JsValueRef, JsPropertyIdRef, *mut bool) -> JsErrorCode;
type JsDefineProperty =
    unsafe extern "system" fn(JsValueRef, JsPropertyIdRef, JsValueRef, *mut bool) -> JsErrorCode;
type JsCall =
    unsafe extern "system" fn(JsValueRef, *const JsValueRef, u16, *mut JsValueRef) -> JsErrorCode;
type JsCreateFunction =
    unsafe extern "system" fn(JsNativeFunction, *mut c_void, *mut JsValueRef) -> JsErrorCode;
type JsHasException = unsafe extern "system" fn(*mut bool) -> JsErrorCode;

macro_rules! function_table {
    ($($field:ident: $ty:ty = $symbol:literal,)*) => {
        struct Functions {
            $($field: $ty,)*
        }

        impl Functions {
            unsafe fn resolve(library: &Library, path: &Path) -> Result<Self, LibraryError> {
                Ok(Self {
                    $($field: *library
                        .get::<$ty>(concat!($symbol, "\0").as_bytes())
                        .map_err(|_| LibraryError::MissingSymbol {
                            path: path.to_path_buf(),
                            symbol: $symbol,
                        })?,)*
                })
            }
        }
    };
}

function_table! {
    create_runtime: JsCreateRuntime = "JsCreateRuntime",
    dispose_runtime: JsRuntimeFn = "JsDisposeRuntime",
    collect_garbage: JsRuntimeFn = "JsCollectGarbage",
    disable_runtime_execution: JsRuntimeFn = "JsDisableRuntimeExecution",
    enable_runtime_execution: JsRuntimeFn = "JsEnableRuntimeExecution",
    is_runtime_execution_disabled: JsRuntimeQuery = "JsIsRuntimeExecutionDisabled",
    create_context: JsCreateContext = "JsCreateContext",
    get_current_context: JsOut = "JsGetCurrentContext",
    set_current_context: JsIn = "JsSetCurrentContext",
    add_ref: JsRefCount = "JsAddRef",
    release: JsRefCount = "JsRelease",
    run: JsRun = "JsRun",
    serialize: JsSerialize = "JsSerialize",
    run_serialized: JsRunSerialized = "JsRunSerialized",
    create_external_array_buffer: JsCreateExternalArrayBuffer = "JsCreateExternalArrayBuffer",
    get_array_buffer_storage: JsGetArrayBufferStorage = "JsGetArrayBufferStorage",
    get_value_type: JsGetValueType = "JsGetValueType",
    get_undefined_value: JsOut = "JsGetUndefinedValue",
    get_null_value: JsOut = "JsGetNullValue",
    bool_to_boolean: JsBoolToBoolean = "JsBoolToBoolean",
    boolean_to_bool: JsBooleanToBool = "JsBooleanToBool",
    int_to_number: JsIntToNumber = "JsIntToNumber",
    double_to_number: JsDoubleToNumber = "JsDoubleToNumber",
    number_to_double: JsNumberToDouble = "JsNumberToDouble",
    create_string: JsCreateUtf8 = "JsCreateString",
    copy_string: JsCopyString = "JsCopyString",
    convert_value_to_boolean: JsUnary = "JsConvertValueToBoolean",
    convert_value_to_number: JsUnary = "JsConvertValueToNumber",
    convert_value_to_string: JsUnary = "JsConvertValueToString",
    convert_value_to_object: JsUnary = "JsConvertValueToObject",
    get_global_object: JsOut = "JsGetGlobalObject",
    create_object: JsOut = "JsCreateObject",
    create_external_object: JsCreateExternalObject = "JsCreateExternalObject",
    has_external_data: JsObjectQuery = "JsHasExternalData",
    get_external_data: JsGetExternalData = "JsGetExternalData",
    get_prototype: JsUnary = "JsGetPrototype",
    set_prototype: JsSetPrototype = "JsSetPrototype",
    create_property_id: JsCreateUtf8 = "JsCreatePropertyId",
    get_property: JsGetProperty = "JsGetProperty",
    set_property: JsSetProperty = "JsSetProperty",
    has_property: JsHasProperty = "JsHasProperty",
    define_property: JsDefineProperty = "JsDefineProperty",
    call_function: JsCall = "JsCallFunction",
    construct_object: JsCall = "JsConstructObject",
    create_function: JsCreateFunction = "JsCreateFunction",
    create_error: JsUnary = "JsCreateError",
    create_type_error: JsUnary = "JsCreateTypeError",
    create_reference_error: JsUnary = "JsCreateReferenceError",
    create_range_error: JsUnary = "JsCreateRangeError",
    create_syntax_error: JsUnary = "JsCreateSyntaxError",
    create_uri_error: JsUnary = "JsCreateURIError",
    set_exception: JsIn = "JsSetException",
    get_and_clear_exception: JsOut = "JsGetAndClearException",
    has_exception: JsHasException = "JsHasException",
}

/// A loaded ChakraCore library.
///
/// The library stays mapped for the lifetime of this value; the resolved
/// function pointers are only valid while it is alive.
pub struct ChakraLibrary {
    functions: Functions,
    start_debugging: Option<JsVoid>,
    path: PathBuf,
    _library: Library,
}

impl ChakraLibrary {
    /// Loads the engine from `path`, or from the platform default name
    /// through the regular library search order.
    pub fn load(path: Option<&Path>) -> Result<Self, LibraryError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBRARY_NAME));

        debug!("Loading JsRT library from {}", path.display());

        // SAFETY: loading runs the library initializers; ChakraCore has no
        // initialization-order requirements beyond being loaded once.
        let library = unsafe { Library::new(&path) }.map_err(|e| LibraryError::LoadFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        // SAFETY: every signature in the table matches the exported C prototype.
        let functions = unsafe { Functions::resolve(&library, &path)? };
        let start_debugging = unsafe { library.get::<JsVoid>(b"JsStartDebugging\0") }
            .ok()
            .map(|symbol| *symbol);

        info!("JsRT library loaded from {}", path.display());

        Ok(Self {
            functions,
            start_debugging,
            path,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_library_name() -> &'static str {
        DEFAULT_LIBRARY_NAME
    }
}

impl std::fmt::Debug for ChakraLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChakraLibrary").field("path", &self.path).finish()
    }
}

#[inline]
unsafe fn out<T: Default>(call: impl FnOnce(*mut T) -> JsErrorCode) -> NativeResult<T> {
    let mut value = T::default();
    call(&mut value).ok()?;
    Ok(value)
}

#[inline]
unsafe fn out_ref(call: impl FnOnce(*mut JsRef) -> JsErrorCode) -> NativeResult<JsRef> {
    let mut value: JsRef = std::ptr::null_mut();
    call(&mut value).ok()?;
    Ok(value)
}

fn argument_count(arguments: &[JsValueRef]) -> NativeResult<u16> {
    u16::try_from(arguments.len()).map_err(|_| NativeError::from(JsErrorCode::INVALID_ARGUMENT))
}

impl JsRtApi for ChakraLibrary {
    unsafe fn create_runtime(
        &self,
        attributes: JsRuntimeAttributes,
    ) -> NativeResult<JsRuntimeHandle> {
        out_ref(|rt| (self.functions.create_runtime)(attributes.0, std::ptr::null_mut(), rt))
    }

    unsafe fn dispose_runtime(&self, runtime: JsRuntimeHandle) -> NativeResult<()> {
        (self.functions.dispose_runtime)(runtime).ok()
    }

    unsafe fn collect_garbage(&self, runtime: JsRuntimeHandle) -> NativeResult<()> {
        (self.functions.collect_garbage)(runtime).ok()
    }

    unsafe fn disable_runtime_execution(&self, runtime: JsRuntimeHandle) -> NativeResult<()> {
        (self.functions.disable_runtime_execution)(runtime).ok()
    }

    unsafe fn enable_runtime_execution(&self, runtime: JsRuntimeHandle) -> NativeResult<()> {
        (self.functions.enable_runtime_execution)(runtime).ok()
    }

    unsafe fn is_runtime_execution_disabled(&self, runtime: JsRuntimeHandle) -> NativeResult<bool> {
        out(|disabled| (self.functions.is_runtime_execution_disabled)(runtime, disabled))
    }

    unsafe fn create_context(&self, runtime: JsRuntimeHandle) -> NativeResult<JsContextRef> {
        out_ref(|context| (self.functions.create_context)(runtime, context))
    }

    unsafe fn get_current_context(&self) -> NativeResult<JsContextRef> {
        out_ref(|context| (self.functions.get_current_context)(context))
    }

    unsafe fn set_current_context(&self, context: JsContextRef) -> NativeResult<()> {
        (self.functions.set_current_context)(context).ok()
    }

    unsafe fn start_debugging(&self) -> NativeResult<()> {
        match self.start_debugging {
            Some(start) => start().ok(),
            None => Err(JsErrorCode::NOT_IMPLEMENTED.into()),
        }
    }

    unsafe fn add_ref(&self, reference: JsRef) -> NativeResult<u32> {
        out(|count| (self.functions.add_ref)(reference, count))
    }

    unsafe fn release(&self, reference: JsRef) -> NativeResult<u32> {
        out(|count| (self.functions.release)(reference, count))
    }

    unsafe fn run(
        &self,
        script: JsValueRef,
        source_context: JsSourceContext,
        source_url: JsValueRef,
        attributes: JsParseScriptAttributes,
    ) -> NativeResult<JsValueRef> {
        out_ref(|result| {
            (self.functions.run)(script, source_context, source_url, attributes, result)
        })
    }

    unsafe fn serialize(
        &self,
        script: JsValueRef,
        attributes: JsParseScriptAttributes,
    ) -> NativeResult<JsValueRef> {
        out_ref(|buffer| (self.functions.serialize)(script, buffer, attributes))
    }

    unsafe fn run_serialized(
        &self,
        buffer: JsValueRef,
        load_script: JsSerializedLoadScriptCallback,
        source_context: JsSourceContext,
        source_url: JsValueRef,
    ) -> NativeResult<JsValueRef> {
        out_ref(|result| {
            (self.functions.run_serialized)(buffer, load_script, source_context, source_url, result)
        })
    }

    unsafe fn create_external_array_buffer(
        &self,
        data: *mut c_void,
        byte_length: u32,
        finalize: Option<JsFinalizeCallback>,
        callback_state: *mut c_void,
    ) -> NativeResult<JsValueRef> {
        out_ref(|buffer| {
            (self.functions.create_external_array_buffer)(
                data,
                byte_length,
                finalize,
                callback_state,
                buffer,
            )
        })
    }

    unsafe fn get_array_buffer_storage(&self, buffer: JsValueRef) -> NativeResult<(*mut u8, u32)> {
        let mut storage = std::ptr::null_mut();
        let mut length = 0u32;
        (self.functions.get_array_buffer_storage)(buffer, &mut storage, &mut length).ok()?;
        Ok((storage, length))
    }

    unsafe fn get_value_type(&self, value: JsValueRef) -> NativeResult<JsValueType> {
        out(|raw| (self.functions.get_value_type)(value, raw)).map(JsValueType::from_raw)
    }

    unsafe fn get_undefined_value(&self) -> NativeResult<JsValueRef> {
        out_ref(|value| (self.functions.get_undefined_value)(value))
    }

    unsafe fn get_null_value(&self) -> NativeResult<JsValueRef> {
        out_ref(|value| (self.functions.get_null_value)(value))
    }

    unsafe fn bool_to_boolean(&self, value: bool) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.bool_to_boolean)(value, result))
    }

    unsafe fn boolean_to_bool(&self, value: JsValueRef) -> NativeResult<bool> {
        out(|result| (self.functions.boolean_to_bool)(value, result))
    }

    unsafe fn int_to_number(&self, value: i32) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.int_to_number)(value, result))
    }

    unsafe fn double_to_number(&self, value: f64) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.double_to_number)(value, result))
    }

    unsafe fn number_to_double(&self, value: JsValueRef) -> NativeResult<f64> {
        out(|result| (self.functions.number_to_double)(value, result))
    }

    unsafe fn create_string(&self, content: &str) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.create_string)(content.as_ptr(), content.len(), result))
    }

    unsafe fn copy_string(&self, value: JsValueRef) -> NativeResult<String> {
        let mut length = 0usize;
        (self.functions.copy_string)(value, std::ptr::null_mut(), 0, &mut length).ok()?;
        let mut buffer = vec![0u8; length];
        let mut written = 0usize;
        (self.functions.copy_string)(value, buffer.as_mut_ptr(), buffer.len(), &mut written).ok()?;
        buffer.truncate(written);
        Ok(String::from_utf8(buffer)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    unsafe fn convert_value_to_boolean(&self, value: JsValueRef) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.convert_value_to_boolean)(value, result))
    }

    unsafe fn convert_value_to_number(&self, value: JsValueRef) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.convert_value_to_number)(value, result))
    }

    unsafe fn convert_value_to_string(&self, value: JsValueRef) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.convert_value_to_string)(value, result))
    }

    unsafe fn convert_value_to_object(&self, value: JsValueRef) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.convert_value_to_object)(value, result))
    }

    unsafe fn get_global_object(&self) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.get_global_object)(result))
    }

    unsafe fn create_object(&self) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.create_object)(result))
    }

    unsafe fn create_external_object(
        &self,
        data: *mut c_void,
        finalize: Option<JsFinalizeCallback>,
    ) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.create_external_object)(data, finalize, result))
    }

    unsafe fn has_external_data(&self, object: JsValueRef) -> NativeResult<bool> {
        out(|result| (self.functions.has_external_data)(object, result))
    }

    unsafe fn get_external_data(&self, object: JsValueRef) -> NativeResult<*mut c_void> {
        out_ref(|result| (self.functions.get_external_data)(object, result))
    }

    unsafe fn get_prototype(&self, object: JsValueRef) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.get_prototype)(object, result))
    }

    unsafe fn set_prototype(&self, object: JsValueRef, prototype: JsValueRef) -> NativeResult<()> {
        (self.functions.set_prototype)(object, prototype).ok()
    }

    unsafe fn create_property_id(&self, name: &str) -> NativeResult<JsPropertyIdRef> {
        out_ref(|result| (self.functions.create_property_id)(name.as_ptr(), name.len(), result))
    }

    unsafe fn get_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
    ) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.get_property)(object, property, result))
    }

    unsafe fn set_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
        value: JsValueRef,
        use_strict_rules: bool,
    ) -> NativeResult<()> {
        (self.functions.set_property)(object, property, value, use_strict_rules).ok()
    }

    unsafe fn has_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
    ) -> NativeResult<bool> {
        out(|result| (self.functions.has_property)(object, property, result))
    }

    unsafe fn define_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
        descriptor: JsValueRef,
    ) -> NativeResult<bool> {
        out(|result| (self.functions.define_property)(object, property, descriptor, result))
    }

    unsafe fn call_function(
        &self,
        function: JsValueRef,
        arguments: &[JsValueRef],
    ) -> NativeResult<JsValueRef> {
        let count = argument_count(arguments)?;
        out_ref(|result| {
            (self.functions.call_function)(function, arguments.as_ptr(), count, result)
        })
    }

    unsafe fn construct_object(
        &self,
        function: JsValueRef,
        arguments: &[JsValueRef],
    ) -> NativeResult<JsValueRef> {
        let count = argument_count(arguments)?;
        out_ref(|result| {
            (self.functions.construct_object)(function, arguments.as_ptr(), count, result)
        })
    }

    unsafe fn create_function(
        &self,
        native_function: JsNativeFunction,
        callback_state: *mut c_void,
    ) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.create_function)(native_function, callback_state, result))
    }

    unsafe fn create_error(
        &self,
        kind: JsErrorKind,
        message: JsValueRef,
    ) -> NativeResult<JsValueRef> {
        let create = match kind {
            JsErrorKind::Error => self.functions.create_error,
            JsErrorKind::TypeError => self.functions.create_type_error,
            JsErrorKind::ReferenceError => self.functions.create_reference_error,
            JsErrorKind::RangeError => self.functions.create_range_error,
            JsErrorKind::SyntaxError => self.functions.create_syntax_error,
            JsErrorKind::UriError => self.functions.create_uri_error,
        };
        out_ref(|result| create(message, result))
    }

    unsafe fn set_exception(&self, error: JsValueRef) -> NativeResult<()> {
        (self.functions.set_exception)(error).ok()
    }

    unsafe fn get_and_clear_exception(&self) -> NativeResult<JsValueRef> {
        out_ref(|result| (self.functions.get_and_clear_exception)(result))
    }

    unsafe fn has_exception(&self) -> NativeResult<bool> {
        out(|result| (self.functions.has_exception)(result))
    }
}

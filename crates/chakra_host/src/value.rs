//! Host-side values exchanged with script engines

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::reflect::{coerce, HostArgs, HostObject, ParamType};
use crate::release::DeferredReleases;

/// Failure raised by host code called from script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

/// A value crossing the host/script boundary.
#[derive(Clone, Default)]
pub enum HostValue {
    /// The script `undefined` sentinel.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    /// An instance of a registered host type.
    Object(HostObject),
    /// A host callable.
    Function(HostFunction),
    /// A script object that is not a host object.
    Script(ScriptObject),
}

impl HostValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        crate::reflect::numeric_value(self)
    }

    /// Converts into a concrete host type, accepting value-preserving numeric
    /// conversions.
    pub fn get<T: FromHostValue>(&self) -> Option<T> {
        T::from_host_value(self)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::U8(_) => "u8",
            Self::I16(_) => "i16",
            Self::U16(_) => "u16",
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Object(_) => "host object",
            Self::Function(_) => "host function",
            Self::Script(_) => "script object",
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        use HostValue::*;
        match (self, other) {
            (Undefined, Undefined) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F32(a), F32(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Object(a), Object(b)) => a.ptr_eq(b),
            (Function(a), Function(b)) => a.ptr_eq(b),
            (Script(a), Script(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::I8(v) => write!(f, "I8({v})"),
            Self::U8(v) => write!(f, "U8({v})"),
            Self::I16(v) => write!(f, "I16({v})"),
            Self::U16(v) => write!(f, "U16({v})"),
            Self::I32(v) => write!(f, "I32({v})"),
            Self::U32(v) => write!(f, "U32({v})"),
            Self::I64(v) => write!(f, "I64({v})"),
            Self::U64(v) => write!(f, "U64({v})"),
            Self::F32(v) => write!(f, "F32({v:?})"),
            Self::F64(v) => write!(f, "F64({v:?})"),
            Self::Char(v) => write!(f, "Char({v:?})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Object(v) => write!(f, "Object({})", v.host_type().name()),
            Self::Function(_) => f.write_str("Function"),
            Self::Script(v) => write!(f, "{v:?}"),
        }
    }
}

macro_rules! host_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

host_value_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    char => Char,
    String => String,
    HostObject => Object,
    HostFunction => Function,
    ScriptObject => Script,
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        Self::Undefined
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Extraction of a concrete host type from a [`HostValue`].
pub trait FromHostValue: Sized {
    fn from_host_value(value: &HostValue) -> Option<Self>;
}

impl FromHostValue for HostValue {
    fn from_host_value(value: &HostValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromHostValue for () {
    fn from_host_value(value: &HostValue) -> Option<Self> {
        matches!(value, HostValue::Undefined | HostValue::Null).then_some(())
    }
}

impl<T: FromHostValue> FromHostValue for Option<T> {
    fn from_host_value(value: &HostValue) -> Option<Self> {
        match value {
            HostValue::Undefined | HostValue::Null => Some(None),
            other => T::from_host_value(other).map(Some),
        }
    }
}

type Callback = dyn Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync;

/// A host callable that scripts can invoke.
#[derive(Clone)]
pub struct HostFunction {
    params: Option<Arc<[ParamType]>>,
    callback: Arc<Callback>,
}

impl HostFunction {
    /// A variadic function receiving script arguments as they arrive.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        Self {
            params: None,
            callback: Arc::new(callback),
        }
    }

    /// A function with a fixed parameter list. Calls with another number of
    /// arguments fail; arguments are converted to the declared types first.
    pub fn typed<A, R, F>(callback: F) -> Self
    where
        A: HostArgs,
        R: Into<HostValue>,
        F: Fn(A) -> Result<R, HostError> + Send + Sync + 'static,
    {
        Self {
            params: Some(A::param_types().into()),
            callback: Arc::new(move |args: &[HostValue]| -> Result<HostValue, HostError> {
                let args = A::from_values(args)?;
                callback(args).map(Into::into)
            }),
        }
    }

    pub fn params(&self) -> Option<&[ParamType]> {
        self.params.as_deref()
    }

    pub fn call(&self, args: &[HostValue]) -> Result<HostValue, HostError> {
        match &self.params {
            None => (self.callback)(args),
            Some(params) => {
                if params.len() != args.len() {
                    return Err(HostError::new("Parameter count mismatch"));
                }
                let fixed = params
                    .iter()
                    .zip(args)
                    .enumerate()
                    .map(|(index, (param, arg))| {
                        coerce(arg, *param).ok_or_else(|| {
                            HostError::new(format!(
                                "argument {} of type {} cannot be converted to {}",
                                index + 1,
                                arg.type_name(),
                                param.name()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (self.callback)(&fixed)
            }
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("params", &self.params).finish()
    }
}

struct ScriptObjectHandle {
    engine_id: u64,
    raw: usize,
    releases: Arc<DeferredReleases>,
}

impl Drop for ScriptObjectHandle {
    fn drop(&mut self) {
        self.releases.push(self.raw);
    }
}

/// A script object held by host code.
///
/// The handle owns one native reference. Dropping the last clone, on any
/// thread, queues the release for the owning engine, which performs it on
/// its own thread at the next dispatched call.
#[derive(Clone)]
pub struct ScriptObject {
    handle: Arc<ScriptObjectHandle>,
}

impl ScriptObject {
    /// `raw` must already carry the reference this handle takes over.
    pub(crate) fn new(engine_id: u64, raw: usize, releases: Arc<DeferredReleases>) -> Self {
        Self {
            handle: Arc::new(ScriptObjectHandle {
                engine_id,
                raw,
                releases,
            }),
        }
    }

    pub fn engine_id(&self) -> u64 {
        self.handle.engine_id
    }

    pub(crate) fn raw(&self) -> usize {
        self.handle.raw
    }
}

impl PartialEq for ScriptObject {
    fn eq(&self, other: &Self) -> bool {
        self.handle.engine_id == other.handle.engine_id && self.handle.raw == other.handle.raw
    }
}

impl fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptObject(engine {}, {:#x})", self.handle.engine_id, self.handle.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_variant() {
        assert_eq!(HostValue::from(5), HostValue::I32(5));
        assert_ne!(HostValue::I32(5), HostValue::I64(5));
        assert_ne!(HostValue::F64(f64::NAN), HostValue::F64(f64::NAN));
        assert_eq!(HostValue::from(None::<i32>), HostValue::Null);
        assert_eq!(HostValue::from("a"), HostValue::String("a".into()));
        assert_eq!(HostValue::default(), HostValue::Undefined);
    }

    #[test]
    fn lenient_extraction() {
        assert_eq!(HostValue::I32(7).get::<u8>(), Some(7));
        assert_eq!(HostValue::I32(-1).get::<u8>(), None);
        assert_eq!(HostValue::F64(2.0).get::<i64>(), Some(2));
        assert_eq!(HostValue::F64(2.5).get::<i64>(), None);
        assert_eq!(HostValue::Null.get::<Option<i32>>(), Some(None));
        assert_eq!(HostValue::String("x".into()).get::<char>(), Some('x'));
    }

    #[test]
    fn typed_functions_check_arity_and_convert() {
        let add = HostFunction::typed(|(a, b): (i32, f64)| Ok(a as f64 + b));
        assert_eq!(add.params(), Some(&[ParamType::I32, ParamType::F64][..]));
        assert_eq!(add.call(&[HostValue::I32(1), HostValue::I32(2)]), Ok(HostValue::F64(3.0)));

        let err = add.call(&[HostValue::I32(1)]).unwrap_err();
        assert_eq!(err.0, "Parameter count mismatch");

        let err = add.call(&[HostValue::String("a".into()), HostValue::I32(2)]).unwrap_err();
        assert!(err.0.contains("cannot be converted to i32"), "{err}");
    }

    #[test]
    fn variadic_functions_see_raw_arguments() {
        let count = HostFunction::new(|args| Ok(HostValue::I32(args.len() as i32)));
        assert!(count.params().is_none());
        assert_eq!(count.call(&[HostValue::Null, HostValue::Undefined]), Ok(HostValue::I32(2)));
        assert!(count.ptr_eq(&count.clone()));
    }

    #[test]
    fn dropping_script_objects_queues_release() {
        let releases = Arc::new(DeferredReleases::default());
        let object = ScriptObject::new(3, 0x40, releases.clone());
        let copy = object.clone();
        assert_eq!(object, copy);
        drop(object);
        assert_eq!(releases.pending(), 0);
        drop(copy);
        assert_eq!(releases.drain(), vec![0x40]);
    }
}

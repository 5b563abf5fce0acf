//! Registered signature tables for host types
//!
//! Scripts reach host code only through what a [`HostType`] declares:
//! constructors, fields, properties and method groups, each with an explicit
//! parameter list. Calls are resolved against those lists by the best-fit
//! matcher in [`overload`].

mod convert;
mod host_type;
pub mod overload;

pub use convert::{coerce, exact_type, narrow_number, numeric_value, MAX_SAFE_INTEGER};
pub use host_type::{
    Accessor, Constructor, HostObject, HostType, HostTypeBuilder, MemberError, MemberKind,
    MethodGroup, Overload,
};
pub use overload::{conversion_cost, select_best_fit, Signature};

use std::fmt;

use crate::value::{FromHostValue, HostError, HostFunction, HostValue, ScriptObject};

/// Declared type of a parameter, field or property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
    String,
    /// A host object.
    Object,
    Function,
    ScriptObject,
    /// Any value, passed through unchanged.
    Any,
}

impl ParamType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Char => "char",
            Self::String => "string",
            Self::Object => "host object",
            Self::Function => "host function",
            Self::ScriptObject => "script object",
            Self::Any => "any",
        }
    }

    /// Whether script `null` binds to this type.
    pub fn is_reference(self) -> bool {
        matches!(self, Self::String | Self::Object | Self::Function | Self::ScriptObject)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A Rust type usable as a parameter, field or return value of host members.
pub trait HostParam: FromHostValue + Into<HostValue> + 'static {
    const TYPE: ParamType;
}

macro_rules! host_params {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl HostParam for $ty {
                const TYPE: ParamType = ParamType::$variant;
            }

            impl FromHostValue for $ty {
                fn from_host_value(value: &HostValue) -> Option<Self> {
                    match coerce(value, ParamType::$variant)? {
                        HostValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

host_params! {
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
}

impl HostParam for ScriptObject {
    const TYPE: ParamType = ParamType::ScriptObject;
}

impl FromHostValue for ScriptObject {
    fn from_host_value(value: &HostValue) -> Option<Self> {
        match value {
            HostValue::Script(object) => Some(object.clone()),
            _ => None,
        }
    }
}

impl HostParam for HostValue {
    const TYPE: ParamType = ParamType::Any;
}

/// `None` stands for script `null` (or `undefined`).
impl<T: HostParam> HostParam for Option<T> {
    const TYPE: ParamType = T::TYPE;
}

/// A parameter list, as a tuple of [`HostParam`]s.
pub trait HostArgs: Sized {
    fn param_types() -> Vec<ParamType>;

    /// Binds already matched arguments.
    fn from_values(values: &[HostValue]) -> Result<Self, HostError>;
}

fn bind<T: HostParam>(values: &[HostValue], index: usize) -> Result<T, HostError> {
    let value = values
        .get(index)
        .ok_or_else(|| HostError::new("Parameter count mismatch"))?;
    T::from_host_value(value).ok_or_else(|| {
        HostError::new(format!(
            "argument {} of type {} cannot be converted to {}",
            index + 1,
            value.type_name(),
            T::TYPE
        ))
    })
}

macro_rules! host_args {
    ($(($($name:ident : $index:tt),*)),* $(,)?) => {
        $(
            impl<$($name: HostParam),*> HostArgs for ($($name,)*) {
                fn param_types() -> Vec<ParamType> {
                    vec![$($name::TYPE),*]
                }

                #[allow(unused_variables)]
                fn from_values(values: &[HostValue]) -> Result<Self, HostError> {
                    if values.len() != Self::param_types().len() {
                        return Err(HostError::new("Parameter count mismatch"));
                    }
                    Ok(($(bind::<$name>(values, $index)?,)*))
                }
            }
        )*
    };
}

host_args! {
    (),
    (A: 0),
    (A: 0, B: 1),
    (A: 0, B: 1, C: 2),
    (A: 0, B: 1, C: 2, D: 3),
    (A: 0, B: 1, C: 2, D: 3, E: 4),
    (A: 0, B: 1, C: 2, D: 3, E: 4, F: 5),
}

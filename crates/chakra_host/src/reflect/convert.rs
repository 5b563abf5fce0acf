//! Numeric narrowing and argument coercion

use super::ParamType;
use crate::value::HostValue;

/// Largest magnitude up to which every integer is exactly representable as
/// a double (2^53).
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Picks the narrowest host representation of a script number.
///
/// Integral values with a magnitude up to 2^53 become `I32` when they fit,
/// `I64` otherwise. Everything else, fractions, NaN and the infinities
/// included, stays `F64`. Negative zero becomes `I32(0)`.
pub fn narrow_number(value: f64) -> HostValue {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        if value >= i32::MIN as f64 && value <= i32::MAX as f64 {
            HostValue::I32(value as i32)
        } else {
            HostValue::I64(value as i64)
        }
    } else {
        HostValue::F64(value)
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i128),
    Float(f64),
}

fn number_of(value: &HostValue) -> Option<Number> {
    Some(match value {
        HostValue::I8(v) => Number::Int(*v as i128),
        HostValue::U8(v) => Number::Int(*v as i128),
        HostValue::I16(v) => Number::Int(*v as i128),
        HostValue::U16(v) => Number::Int(*v as i128),
        HostValue::I32(v) => Number::Int(*v as i128),
        HostValue::U32(v) => Number::Int(*v as i128),
        HostValue::I64(v) => Number::Int(*v as i128),
        HostValue::U64(v) => Number::Int(*v as i128),
        HostValue::F32(v) => Number::Float(*v as f64),
        HostValue::F64(v) => Number::Float(*v),
        _ => return None,
    })
}

/// The numeric value of a number-like host value.
pub fn numeric_value(value: &HostValue) -> Option<f64> {
    number_of(value).map(|number| match number {
        Number::Int(v) => v as f64,
        Number::Float(v) => v,
    })
}

/// The parameter type a value matches exactly, if any.
pub fn exact_type(value: &HostValue) -> Option<ParamType> {
    Some(match value {
        HostValue::Bool(_) => ParamType::Bool,
        HostValue::I8(_) => ParamType::I8,
        HostValue::U8(_) => ParamType::U8,
        HostValue::I16(_) => ParamType::I16,
        HostValue::U16(_) => ParamType::U16,
        HostValue::I32(_) => ParamType::I32,
        HostValue::U32(_) => ParamType::U32,
        HostValue::I64(_) => ParamType::I64,
        HostValue::U64(_) => ParamType::U64,
        HostValue::F32(_) => ParamType::F32,
        HostValue::F64(_) => ParamType::F64,
        HostValue::Char(_) => ParamType::Char,
        HostValue::String(_) => ParamType::String,
        HostValue::Object(_) => ParamType::Object,
        HostValue::Function(_) => ParamType::Function,
        HostValue::Script(_) => ParamType::ScriptObject,
        HostValue::Undefined | HostValue::Null => return None,
    })
}

fn integer_in<T: TryFrom<i128>>(number: Number) -> Option<T> {
    let value = match number {
        Number::Int(v) => v,
        Number::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e38 => v as i128,
        Number::Float(_) => return None,
    };
    T::try_from(value).ok()
}

fn to_f32(number: Number, lossy: bool) -> Option<f32> {
    match number {
        Number::Int(v) => Some(v as f32),
        Number::Float(v) => {
            let narrowed = v as f32;
            (lossy || !v.is_finite() || narrowed as f64 == v).then_some(narrowed)
        }
    }
}

/// Converts `value` to exactly the representation `target` expects, when
/// that is possible without losing the value.
///
/// Implicit widenings that may round (integers to floats) are accepted, as
/// is a one-character string for `Char`, and `null` for reference types.
pub fn coerce(value: &HostValue, target: ParamType) -> Option<HostValue> {
    if target == ParamType::Any || exact_type(value) == Some(target) {
        return Some(value.clone());
    }
    if matches!(value, HostValue::Null) {
        return target.is_reference().then_some(HostValue::Null);
    }

    if let HostValue::Char(c) = value {
        if super::overload::is_widening(ParamType::Char, target) {
            return coerce(&HostValue::U32(*c as u32), target);
        }
        return None;
    }

    if target == ParamType::Char {
        let text = value.as_str()?;
        let mut chars = text.chars();
        let first = chars.next()?;
        return chars.next().is_none().then_some(HostValue::Char(first));
    }

    let number = number_of(value)?;
    let widening =
        exact_type(value).is_some_and(|source| super::overload::is_widening(source, target));
    Some(match target {
        ParamType::I8 => HostValue::I8(integer_in(number)?),
        ParamType::U8 => HostValue::U8(integer_in(number)?),
        ParamType::I16 => HostValue::I16(integer_in(number)?),
        ParamType::U16 => HostValue::U16(integer_in(number)?),
        ParamType::I32 => HostValue::I32(integer_in(number)?),
        ParamType::U32 => HostValue::U32(integer_in(number)?),
        ParamType::I64 => HostValue::I64(integer_in(number)?),
        ParamType::U64 => HostValue::U64(integer_in(number)?),
        ParamType::F32 => HostValue::F32(to_f32(number, widening)?),
        ParamType::F64 => HostValue::F64(match number {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_boundaries() {
        assert_eq!(narrow_number(0.0), HostValue::I32(0));
        assert_eq!(narrow_number(-0.0), HostValue::I32(0));
        assert_eq!(narrow_number(i32::MAX as f64), HostValue::I32(i32::MAX));
        assert_eq!(narrow_number(i32::MIN as f64), HostValue::I32(i32::MIN));
        assert_eq!(narrow_number(i32::MAX as f64 + 1.0), HostValue::I64(2_147_483_648));
        assert_eq!(narrow_number(i32::MIN as f64 - 1.0), HostValue::I64(-2_147_483_649));
        assert_eq!(narrow_number(MAX_SAFE_INTEGER), HostValue::I64(9_007_199_254_740_992));
        assert_eq!(narrow_number(-MAX_SAFE_INTEGER), HostValue::I64(-9_007_199_254_740_992));
        assert_eq!(narrow_number(MAX_SAFE_INTEGER * 2.0), HostValue::F64(MAX_SAFE_INTEGER * 2.0));
        assert_eq!(narrow_number(1.5), HostValue::F64(1.5));
        assert_eq!(narrow_number(f64::INFINITY), HostValue::F64(f64::INFINITY));
        assert!(matches!(narrow_number(f64::NAN), HostValue::F64(v) if v.is_nan()));
    }

    #[test]
    fn integer_coercion_checks_range() {
        assert_eq!(coerce(&HostValue::I32(255), ParamType::U8), Some(HostValue::U8(255)));
        assert_eq!(coerce(&HostValue::I32(256), ParamType::U8), None);
        assert_eq!(coerce(&HostValue::I32(-1), ParamType::U32), None);
        assert_eq!(coerce(&HostValue::F64(3.0), ParamType::I16), Some(HostValue::I16(3)));
        assert_eq!(coerce(&HostValue::F64(3.25), ParamType::I16), None);
        assert_eq!(coerce(&HostValue::I64(1 << 40), ParamType::U64), Some(HostValue::U64(1 << 40)));
    }

    #[test]
    fn float_coercion() {
        assert_eq!(coerce(&HostValue::I32(3), ParamType::F64), Some(HostValue::F64(3.0)));
        assert_eq!(coerce(&HostValue::F64(0.5), ParamType::F32), Some(HostValue::F32(0.5)));
        assert_eq!(coerce(&HostValue::F64(0.1), ParamType::F32), None);
        assert_eq!(
            coerce(&HostValue::I32(16_777_217), ParamType::F32),
            Some(HostValue::F32(16_777_216.0))
        );
    }

    #[test]
    fn char_and_string() {
        assert_eq!(
            coerce(&HostValue::String("é".into()), ParamType::Char),
            Some(HostValue::Char('é'))
        );
        assert_eq!(coerce(&HostValue::String("ab".into()), ParamType::Char), None);
        assert_eq!(coerce(&HostValue::String(String::new()), ParamType::Char), None);
        assert_eq!(coerce(&HostValue::Char('A'), ParamType::I32), Some(HostValue::I32(65)));
        assert_eq!(coerce(&HostValue::Char('A'), ParamType::I8), None);
        assert_eq!(coerce(&HostValue::I32(65), ParamType::Char), None);
        assert_eq!(coerce(&HostValue::I32(1), ParamType::String), None);
    }

    #[test]
    fn any_accepts_everything() {
        assert_eq!(coerce(&HostValue::Null, ParamType::Any), Some(HostValue::Null));
        assert_eq!(coerce(&HostValue::Bool(true), ParamType::I32), None);
    }

    #[test]
    fn null_passes_into_reference_types_only() {
        for target in [
            ParamType::String,
            ParamType::Object,
            ParamType::Function,
            ParamType::ScriptObject,
        ] {
            assert_eq!(coerce(&HostValue::Null, target), Some(HostValue::Null), "{target}");
        }
        assert_eq!(coerce(&HostValue::Null, ParamType::I32), None);
        assert_eq!(coerce(&HostValue::Null, ParamType::Char), None);
        assert_eq!(coerce(&HostValue::Undefined, ParamType::String), None);
    }
}

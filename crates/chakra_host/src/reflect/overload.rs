//! Best-fit overload selection
//!
//! Every argument is scored against the parameter it would bind to:
//!
//! | cost | conversion |
//! |------|------------|
//! | 0    | exact type |
//! | 1    | implicit widening, any value into `Any`, null into a reference type |
//! | 2    | value-preserving narrowing, one-character string into `Char` |
//!
//! Candidates whose arity differs from the argument count, or with any
//! argument that does not convert at all, are discarded. The lowest total
//! wins. No candidate, or several sharing the lowest total, means no
//! suitable member exists.

use super::convert::{coerce, exact_type};
use super::ParamType;
use crate::value::HostValue;

/// Anything with a parameter list.
pub trait Signature {
    fn params(&self) -> &[ParamType];
}

impl Signature for Vec<ParamType> {
    fn params(&self) -> &[ParamType] {
        self
    }
}

/// Conversions that never lose range, in the manner of implicit numeric
/// conversions of statically typed hosts.
pub fn is_widening(from: ParamType, to: ParamType) -> bool {
    use ParamType::*;
    match from {
        I8 => matches!(to, I16 | I32 | I64 | F32 | F64),
        U8 => matches!(to, I16 | U16 | I32 | U32 | I64 | U64 | F32 | F64),
        I16 => matches!(to, I32 | I64 | F32 | F64),
        U16 => matches!(to, I32 | U32 | I64 | U64 | F32 | F64),
        I32 => matches!(to, I64 | F32 | F64),
        U32 => matches!(to, I64 | U64 | F32 | F64),
        I64 | U64 => matches!(to, F32 | F64),
        F32 => matches!(to, F64),
        Char => matches!(to, U16 | I32 | U32 | I64 | U64 | F32 | F64),
        _ => false,
    }
}

/// Cost of binding `value` to a parameter of type `target`, `None` when it
/// cannot bind.
pub fn conversion_cost(value: &HostValue, target: ParamType) -> Option<u32> {
    let cost = match exact_type(value) {
        Some(source) if source == target => return Some(0),
        Some(source) if is_widening(source, target) => 1,
        Some(_) if target != ParamType::Any => 2,
        // null, undefined and anything into `Any`
        _ => 1,
    };
    coerce(value, target).map(|_| cost)
}

/// Total cost of a call, `None` when the candidate does not apply.
pub fn signature_cost(params: &[ParamType], args: &[HostValue]) -> Option<u32> {
    if params.len() != args.len() {
        return None;
    }
    params
        .iter()
        .zip(args)
        .try_fold(0, |total, (param, arg)| Some(total + conversion_cost(arg, *param)?))
}

/// Picks the single cheapest applicable candidate.
pub fn select_best_fit<'a, C: Signature>(candidates: &'a [C], args: &[HostValue]) -> Option<&'a C> {
    let mut best: Option<(&C, u32)> = None;
    let mut ambiguous = false;

    for candidate in candidates {
        let Some(cost) = signature_cost(candidate.params(), args) else {
            continue;
        };
        match best {
            Some((_, best_cost)) if cost > best_cost => {}
            Some((_, best_cost)) if cost == best_cost => ambiguous = true,
            _ => {
                best = Some((candidate, cost));
                ambiguous = false;
            }
        }
    }

    if ambiguous {
        None
    } else {
        best.map(|(candidate, _)| candidate)
    }
}

/// Converts arguments to the parameter types of the selected candidate.
pub fn fix_argument_types(params: &[ParamType], args: &[HostValue]) -> Option<Vec<HostValue>> {
    params.iter().zip(args).map(|(param, arg)| coerce(arg, *param)).collect()
}

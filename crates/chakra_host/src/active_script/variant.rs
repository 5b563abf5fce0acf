//! Host values to VARIANTs and back

use std::rc::Rc;
use std::sync::Arc;

use chakra_native::com::*;

use super::host_dispatch::{host_value_of, HostItem, HostItemKind};
use super::{ActiveScriptError, ActiveScriptResult};
use crate::jsrt::ExternalObjectRegistry;
use crate::reflect::narrow_number;
use crate::release::DeferredReleases;
use crate::settings::JsEngineMode;
use crate::value::{HostValue, ScriptObject};

/// Converts values for one engine. Lives on the engine's thread.
pub(crate) struct Marshaler {
    pub(crate) engine_id: u64,
    pub(crate) mode: JsEngineMode,
    pub(crate) registry: Arc<ExternalObjectRegistry>,
    pub(crate) releases: Arc<DeferredReleases>,
}

fn integer(value: i64) -> Variant {
    match i32::try_from(value) {
        Ok(value) => Variant::from_i32(value),
        Err(_) => Variant::from_f64(value as f64),
    }
}

impl Marshaler {
    pub(crate) fn new(
        engine_id: u64,
        mode: JsEngineMode,
        registry: Arc<ExternalObjectRegistry>,
        releases: Arc<DeferredReleases>,
    ) -> Rc<Self> {
        Rc::new(Self {
            engine_id,
            mode,
            registry,
            releases,
        })
    }

    pub(crate) fn to_variant(self: &Rc<Self>, value: &HostValue) -> ActiveScriptResult<Variant> {
        Ok(match value {
            HostValue::Undefined => Variant::empty(),
            HostValue::Null => Variant::null(),
            HostValue::Bool(value) => Variant::from_bool(*value),
            HostValue::I8(value) => Variant::from_i32(*value as i32),
            HostValue::U8(value) => Variant::from_i32(*value as i32),
            HostValue::I16(value) => Variant::from_i32(*value as i32),
            HostValue::U16(value) => Variant::from_i32(*value as i32),
            HostValue::I32(value) => Variant::from_i32(*value),
            HostValue::U32(value) => integer(*value as i64),
            HostValue::I64(value) => integer(*value),
            HostValue::U64(value) => match i64::try_from(*value) {
                Ok(value) => integer(value),
                Err(_) => Variant::from_f64(*value as f64),
            },
            HostValue::F32(value) => Variant::from_f64(*value as f64),
            HostValue::F64(value) => Variant::from_f64(*value),
            HostValue::Char(value) => Variant::from_string(value.encode_utf8(&mut [0; 4])),
            HostValue::String(value) => Variant::from_string(value),
            HostValue::Object(object) => {
                let kind = HostItemKind::Object(object.clone());
                Variant::from_dispatch(HostItem::create(self, kind))
            }
            HostValue::Function(function) => {
                let kind = HostItemKind::Function(function.clone());
                Variant::from_dispatch(HostItem::create(self, kind))
            }
            HostValue::Script(object) => {
                if object.engine_id() != self.engine_id {
                    return Err(ActiveScriptError::Usage(format!(
                        "script object of engine {} cannot be used by engine {}",
                        object.engine_id(),
                        self.engine_id
                    )));
                }
                // SAFETY: the handle keeps its reference until it is released
                // on this thread.
                let dispatch = unsafe { ComPtr::from_raw_borrowed(object.raw() as *mut _) }
                    .ok_or(ComError::NullPointer)?;
                Variant::from_dispatch(dispatch)
            }
        })
    }

    /// Converts arguments into the reversed order `DISPPARAMS` expects.
    pub(crate) fn to_variant_args(
        self: &Rc<Self>,
        args: &[HostValue],
    ) -> ActiveScriptResult<Vec<Variant>> {
        args.iter().rev().map(|arg| self.to_variant(arg)).collect()
    }

    pub(crate) fn to_host(&self, variant: &Variant) -> ActiveScriptResult<HostValue> {
        // SAFETY: variants reaching the host come from the engine, which
        // keeps referenced variants alive for the duration of the call.
        let variant = unsafe { variant.dereference() };
        let vt = variant.vt();
        // SAFETY: every arm reads the union member matching `vt`.
        let data = unsafe { variant.data() };
        Ok(unsafe {
            match vt {
                VT_EMPTY => HostValue::Undefined,
                VT_NULL => HostValue::Null,
                VT_BOOL => HostValue::Bool(data.bool_val != VARIANT_FALSE),
                VT_I1 => HostValue::I32(data.b_val as i8 as i32),
                VT_UI1 => HostValue::I32(data.b_val as i32),
                VT_I2 => HostValue::I32(data.i_val as i32),
                VT_UI2 => HostValue::I32(data.i_val as u16 as i32),
                VT_I4 | VT_INT => HostValue::I32(data.l_val),
                VT_UI4 | VT_UINT => narrow_number(data.l_val as u32 as f64),
                VT_I8 => match i32::try_from(data.ll_val) {
                    Ok(value) => HostValue::I32(value),
                    Err(_) => HostValue::I64(data.ll_val),
                },
                VT_UI8 => match i32::try_from(data.ll_val as u64) {
                    Ok(value) => HostValue::I32(value),
                    Err(_) => match i64::try_from(data.ll_val as u64) {
                        Ok(value) => HostValue::I64(value),
                        Err(_) => HostValue::F64(data.ll_val as u64 as f64),
                    },
                },
                VT_R4 => narrow_number(data.flt_val as f64),
                VT_R8 => narrow_number(data.dbl_val),
                VT_BSTR => HostValue::String(variant.bstr_value().unwrap_or_default()),
                VT_ERROR if HResult(data.scode) == HResult::DISP_E_PARAMNOTFOUND => {
                    HostValue::Undefined
                }
                VT_DISPATCH | VT_UNKNOWN => match variant.interface_value() {
                    None => HostValue::Null,
                    Some(interface) => self.interface_to_host(interface)?,
                },
                other => {
                    return Err(ActiveScriptError::Usage(format!(
                        "values of variant type {other} are not supported"
                    )))
                }
            }
        })
    }

    pub(crate) fn to_host_args(&self, args: &[&Variant]) -> ActiveScriptResult<Vec<HostValue>> {
        args.iter().map(|arg| self.to_host(arg)).collect()
    }

    fn interface_to_host(&self, interface: ComPtr) -> ActiveScriptResult<HostValue> {
        if let Some(value) = host_value_of(&interface) {
            return Ok(value);
        }
        let dispatch = interface.query_interface(&IID_IDISPATCH)?;
        Ok(HostValue::Script(ScriptObject::new(
            self.engine_id,
            dispatch.into_raw() as usize,
            self.releases.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::HostType;
    use crate::value::HostFunction;

    fn marshaler() -> Rc<Marshaler> {
        Marshaler::new(
            7,
            JsEngineMode::ChakraActiveScript,
            Arc::new(ExternalObjectRegistry::default()),
            Arc::new(DeferredReleases::default()),
        )
    }

    #[test]
    fn primitives_take_automation_types() {
        let m = marshaler();
        assert_eq!(m.to_variant(&HostValue::Undefined).unwrap().vt(), VT_EMPTY);
        assert_eq!(m.to_variant(&HostValue::Null).unwrap().vt(), VT_NULL);
        assert_eq!(m.to_variant(&HostValue::U8(200)).unwrap().vt(), VT_I4);
        assert_eq!(m.to_variant(&HostValue::U32(u32::MAX)).unwrap().vt(), VT_R8);
        assert_eq!(m.to_variant(&HostValue::I64(-5)).unwrap().vt(), VT_I4);
        assert_eq!(m.to_variant(&HostValue::U64(u64::MAX)).unwrap().vt(), VT_R8);
        assert_eq!(m.to_variant(&HostValue::F32(0.5)).unwrap().vt(), VT_R8);
        assert_eq!(m.to_variant(&HostValue::Char('q')).unwrap().bstr_value().as_deref(), Some("q"));
    }

    #[test]
    fn script_values_are_narrowed() {
        let m = marshaler();
        assert_eq!(m.to_host(&Variant::from_f64(4.0)).unwrap(), HostValue::I32(4));
        assert_eq!(m.to_host(&Variant::from_f64(0.5)).unwrap(), HostValue::F64(0.5));
        assert_eq!(m.to_host(&Variant::from_f64(2f64.powi(40))).unwrap(), HostValue::I64(1 << 40));
        assert_eq!(m.to_host(&Variant::from_i32(-3)).unwrap(), HostValue::I32(-3));
        assert_eq!(m.to_host(&Variant::from_bool(true)).unwrap(), HostValue::Bool(true));
        assert_eq!(m.to_host(&Variant::from_string("s")).unwrap(), HostValue::String("s".into()));
        assert_eq!(m.to_host(&Variant::empty()).unwrap(), HostValue::Undefined);
        assert_eq!(m.to_host(&Variant::null()).unwrap(), HostValue::Null);
    }

    #[test]
    fn every_width_round_trips_narrowed() {
        let m = marshaler();
        let cases = [
            (HostValue::Bool(false), HostValue::Bool(false)),
            (HostValue::I8(i8::MIN), HostValue::I32(-128)),
            (HostValue::U8(u8::MAX), HostValue::I32(255)),
            (HostValue::I16(i16::MIN), HostValue::I32(-32_768)),
            (HostValue::U16(u16::MAX), HostValue::I32(65_535)),
            (HostValue::I32(i32::MIN), HostValue::I32(i32::MIN)),
            (HostValue::U32(7), HostValue::I32(7)),
            (HostValue::U32(u32::MAX), HostValue::I64(4_294_967_295)),
            (HostValue::I64(i32::MAX as i64 + 1), HostValue::I64(2_147_483_648)),
            (HostValue::I64(-3), HostValue::I32(-3)),
            (HostValue::U64(u64::MAX), HostValue::F64(u64::MAX as f64)),
            (HostValue::F32(1.5), HostValue::F64(1.5)),
            (HostValue::F32(-2.0), HostValue::I32(-2)),
            (HostValue::F64(-0.0), HostValue::I32(0)),
            (HostValue::Char('é'), HostValue::String("é".into())),
            (HostValue::String(String::new()), HostValue::String(String::new())),
        ];
        for (input, expected) in cases {
            let variant = m.to_variant(&input).unwrap();
            assert_eq!(m.to_host(&variant).unwrap(), expected, "{input:?}");
        }
    }

    #[test]
    fn large_integers_stay_exact() {
        let m = marshaler();
        let variant = m.to_variant(&HostValue::U64(1 << 40)).unwrap();
        assert_eq!(variant.vt(), VT_R8);
        assert_eq!(m.to_host(&variant).unwrap(), HostValue::I64(1 << 40));
    }

    #[test]
    fn host_objects_come_back_as_themselves() {
        #[derive(Default)]
        struct Marker;

        let m = marshaler();
        let object = HostType::builder::<Marker>("Marker").build().instance(Marker).unwrap();
        let variant = m.to_variant(&HostValue::Object(object.clone())).unwrap();
        assert_eq!(variant.vt(), VT_DISPATCH);
        assert_eq!(m.registry.len(), 1);
        match m.to_host(&variant).unwrap() {
            HostValue::Object(back) => assert!(back.ptr_eq(&object)),
            other => panic!("expected the host object, got {other:?}"),
        }
        drop(variant);
        assert_eq!(m.registry.len(), 0);

        let function = HostFunction::new(|_| Ok(HostValue::Null));
        let variant = m.to_variant(&HostValue::Function(function.clone())).unwrap();
        match m.to_host(&variant).unwrap() {
            HostValue::Function(back) => assert!(back.ptr_eq(&function)),
            other => panic!("expected the host function, got {other:?}"),
        }
    }

    #[test]
    fn foreign_script_objects_are_rejected() {
        let m = marshaler();
        let foreign = ScriptObject::new(99, 0x10, m.releases.clone());
        let err = m.to_variant(&HostValue::Script(foreign)).unwrap_err();
        assert_eq!(err.to_string(), "script object of engine 99 cannot be used by engine 7");
        // never ours to release
        m.releases.drain();
    }

    #[test]
    fn arguments_are_reversed() {
        let m = marshaler();
        let args = m.to_variant_args(&[HostValue::I32(1), HostValue::I32(2)]).unwrap();
        assert_eq!(args.iter().map(|v| unsafe { v.data().l_val }).collect::<Vec<_>>(), vec![2, 1]);
    }
}

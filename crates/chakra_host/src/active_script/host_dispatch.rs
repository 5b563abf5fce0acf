//! Host values as `IDispatchEx` objects
//!
//! Every host object, host type, host function and bound host method handed
//! to the engine is a [`HostItem`]. Member names get dispatch ids in
//! declaration order, starting at 1; `DISPID_VALUE` is the item itself.
//! Objects and types also hand out ids for names they do not declare, so that
//! touching such a name raises a `TypeError` rather than reading `undefined`.

use std::cell::RefCell;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use chakra_native::com::*;
use tracing::trace;

use super::translate::script_error_code;
use super::variant::Marshaler;
use super::ActiveScriptError;
use crate::dispatcher::panic_message;
use crate::reflect::{HostObject, HostType, MemberError};
use crate::value::{HostFunction, HostValue};

/// Identifies objects implemented here, so that they cross back into the
/// host as the values they wrap.
const IID_HOST_ITEM: Guid = Guid::from_u128(0x6c1a41f0_3b8e_4d0a_9a57_c4a2f1e0b7d3);

const DISPID_STARTENUM: DispId = DISPID_UNKNOWN;

/// Names every script object answers, left to the engine.
const OBJECT_PROTOTYPE_NAMES: [&str; 8] = [
    "constructor",
    "hasOwnProperty",
    "isPrototypeOf",
    "propertyIsEnumerable",
    "toLocaleString",
    "toString",
    "valueOf",
    "__proto__",
];

pub(crate) enum HostItemKind {
    Object(HostObject),
    Type(Arc<HostType>),
    Function(HostFunction),
    /// A method read as a value, bound to its receiver.
    Method {
        this: Option<HostObject>,
        host_type: Arc<HostType>,
        instance: bool,
        name: String,
    },
}

pub(crate) struct HostItem {
    kind: HostItemKind,
    names: Vec<String>,
    /// Undeclared names asked for so far; their ids follow `names`.
    missing: RefCell<Vec<String>>,
    marshaler: Rc<Marshaler>,
    registration: Option<u64>,
}

enum DispatchFailure {
    UnknownMember,
    Member(MemberError),
    Host(String),
    Marshal(ActiveScriptError),
}

/// Outcome of a dispatch request.
enum Reply {
    Value(HostValue),
    /// A dispatch object without a host value of its own.
    Item(ComPtr),
}

impl From<HostValue> for Reply {
    fn from(value: HostValue) -> Self {
        Self::Value(value)
    }
}

impl From<MemberError> for DispatchFailure {
    fn from(error: MemberError) -> Self {
        Self::Member(error)
    }
}

impl From<ActiveScriptError> for DispatchFailure {
    fn from(error: ActiveScriptError) -> Self {
        Self::Marshal(error)
    }
}

fn member_names(host_type: &HostType, instance: bool) -> Vec<String> {
    host_type
        .accessors(instance)
        .iter()
        .map(|accessor| accessor.name().to_owned())
        .chain(host_type.methods(instance).iter().map(|group| group.name().to_owned()))
        .collect()
}

impl HostItem {
    pub(crate) fn create(marshaler: &Rc<Marshaler>, kind: HostItemKind) -> ComPtr {
        let (names, registration) = match &kind {
            HostItemKind::Object(object) => (
                member_names(object.host_type(), true),
                Some(marshaler.registry.insert(object.clone())),
            ),
            HostItemKind::Type(host_type) => (member_names(host_type, false), None),
            HostItemKind::Function(_) | HostItemKind::Method { .. } => (Vec::new(), None),
        };
        let item = HostItem {
            kind,
            names,
            missing: RefCell::new(Vec::new()),
            marshaler: marshaler.clone(),
            registration,
        };
        ComObject::create(&HOST_ITEM_VTBL, IID_IDISPATCH_EX, item)
    }

    fn id_of(&self, name: &str) -> Option<DispId> {
        if let Some(index) = self.names.iter().position(|candidate| candidate == name) {
            return Some(index as DispId + 1);
        }
        let guarded = matches!(self.kind, HostItemKind::Object(_) | HostItemKind::Type(_));
        if !guarded || OBJECT_PROTOTYPE_NAMES.contains(&name) {
            return None;
        }
        let mut missing = self.missing.borrow_mut();
        let index = match missing.iter().position(|candidate| candidate == name) {
            Some(index) => index,
            None => {
                missing.push(name.to_owned());
                missing.len() - 1
            }
        };
        Some((self.names.len() + index) as DispId + 1)
    }

    fn missing_name(&self, id: DispId) -> Option<String> {
        let index = usize::try_from(id).ok()?.checked_sub(self.names.len() + 1)?;
        self.missing.borrow().get(index).cloned()
    }

    fn name_of(&self, id: DispId) -> Option<&str> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.names.get(index).map(String::as_str)
    }

    fn describe(&self) -> String {
        match &self.kind {
            HostItemKind::Object(object) => format!("[object {}]", object.host_type().name()),
            HostItemKind::Type(host_type) => {
                format!("function {}() {{ [native code] }}", host_type.name())
            }
            HostItemKind::Function(_) => "function () { [native code] }".to_owned(),
            HostItemKind::Method { name, .. } => format!("function {name}() {{ [native code] }}"),
        }
    }

    fn dispatch(
        &self,
        id: DispId,
        flags: u16,
        args: &[HostValue],
    ) -> Result<Reply, DispatchFailure> {
        let putting = flags & (DISPATCH_PROPERTYPUT | DISPATCH_PROPERTYPUTREF) != 0;
        if id == DISPID_VALUE {
            return self.dispatch_value(flags, putting, args).map(Reply::Value);
        }

        let Some(name) = self.name_of(id) else {
            return Err(match self.missing_name(id) {
                Some(name) => MemberError::MemberNotFound { name }.into(),
                None => DispatchFailure::UnknownMember,
            });
        };
        let (this, host_type, instance) = match &self.kind {
            HostItemKind::Object(object) => (Some(object), object.host_type(), true),
            HostItemKind::Type(host_type) => (None, host_type, false),
            _ => return Err(DispatchFailure::UnknownMember),
        };
        let owner = host_type.owner(instance);

        if let Some(accessor) = host_type.find_accessor(instance, name) {
            return if putting {
                let value = args.last().cloned().unwrap_or_default();
                accessor.set(this, &value, &owner)?;
                Ok(HostValue::Undefined.into())
            } else {
                Ok(accessor.get(this, &owner)?.into())
            };
        }

        let group = host_type
            .find_method(instance, name)
            .ok_or(DispatchFailure::UnknownMember)?;
        if putting {
            Err(DispatchFailure::UnknownMember)
        } else if flags & DISPATCH_METHOD != 0 {
            Ok(group.invoke(this, args, &owner)?.into())
        } else {
            Ok(self.bind(this, host_type, instance, name))
        }
    }

    fn dispatch_value(
        &self,
        flags: u16,
        putting: bool,
        args: &[HostValue],
    ) -> Result<HostValue, DispatchFailure> {
        let calling = flags & (DISPATCH_METHOD | DISPATCH_CONSTRUCT) != 0;
        if putting {
            return Err(DispatchFailure::UnknownMember);
        }
        match &self.kind {
            HostItemKind::Function(function) if calling => function.call(args).map_err(|err| {
                DispatchFailure::Host(format!("host delegate invocation failed: {err}"))
            }),
            HostItemKind::Type(host_type) if calling => {
                Ok(HostValue::Object(host_type.construct(args)?))
            }
            HostItemKind::Method {
                this,
                host_type,
                instance,
                name,
            } if calling => {
                let owner = host_type.owner(*instance);
                let group = host_type
                    .find_method(*instance, name)
                    .ok_or(DispatchFailure::UnknownMember)?;
                Ok(group.invoke(this.as_ref(), args, &owner)?)
            }
            _ => Ok(HostValue::String(self.describe())),
        }
    }

    fn bind(
        &self,
        this: Option<&HostObject>,
        host_type: &Arc<HostType>,
        instance: bool,
        name: &str,
    ) -> Reply {
        Reply::Item(HostItem::create(
            &self.marshaler,
            HostItemKind::Method {
                this: this.cloned(),
                host_type: host_type.clone(),
                instance,
                name: name.to_owned(),
            },
        ))
    }

    /// Runs a dispatch request and writes its outcome for the caller.
    unsafe fn invoke(
        &self,
        id: DispId,
        flags: u16,
        params: *mut DispParams,
        result: *mut Variant,
        exception: *mut ExcepInfo,
    ) -> HResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Variant, DispatchFailure> {
            let args = if params.is_null() {
                Vec::new()
            } else {
                self.marshaler.to_host_args(&(*params).arguments())?
            };
            match self.dispatch(id, flags, &args)? {
                Reply::Value(value) => Ok(self.marshaler.to_variant(&value)?),
                Reply::Item(item) => Ok(Variant::from_dispatch(item)),
            }
        }));

        let failure = match outcome {
            Ok(Ok(value)) => {
                value.write_to(result);
                return HResult::S_OK;
            }
            Ok(Err(failure)) => failure,
            Err(payload) => {
                let message = panic_message(&*payload);
                DispatchFailure::Host(format!("host callback panicked: {message}"))
            }
        };

        let (status, description) = match failure {
            DispatchFailure::UnknownMember => return HResult::DISP_E_MEMBERNOTFOUND,
            DispatchFailure::Member(err) => (script_error_code(err.script_kind()), err.to_string()),
            DispatchFailure::Host(message) => (HResult::E_FAIL, message),
            DispatchFailure::Marshal(err) => (HResult::E_FAIL, err.to_string()),
        };
        trace!(engine = self.marshaler.engine_id, %status, "host member failed: {description}");
        if exception.is_null() {
            return status;
        }
        ExcepInfo::write_to(exception, self.marshaler.mode.name(), &description, status.0);
        HResult::DISP_E_EXCEPTION
    }
}

impl Drop for HostItem {
    fn drop(&mut self) {
        if let Some(id) = self.registration.take() {
            self.marshaler.registry.remove(id);
        }
    }
}

/// The host value behind `interface`, if it is a host object or function
/// implemented here.
pub(crate) fn host_value_of(interface: &ComPtr) -> Option<HostValue> {
    let item = interface.query_interface(&IID_HOST_ITEM).ok()?;
    // SAFETY: only `HostItem` objects answer `IID_HOST_ITEM`.
    let item = unsafe { ComObject::<HostItem>::from_ptr(&item) };
    match &item.value.kind {
        HostItemKind::Object(object) => Some(HostValue::Object(object.clone())),
        HostItemKind::Function(function) => Some(HostValue::Function(function.clone())),
        HostItemKind::Type(_) | HostItemKind::Method { .. } => None,
    }
}

#[repr(C)]
struct HostItemVtbl {
    base: IUnknownVtbl,
    get_type_info_count: unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult,
    get_type_info: unsafe extern "system" fn(*mut c_void, u32, u32, *mut *mut c_void) -> HResult,
    get_ids_of_names: unsafe extern "system" fn(
        *mut c_void,
        *const Guid,
        *const *const u16,
        u32,
        u32,
        *mut DispId,
    ) -> HResult,
    invoke: unsafe extern "system" fn(
        *mut c_void,
        DispId,
        *const Guid,
        u32,
        u16,
        *mut DispParams,
        *mut Variant,
        *mut ExcepInfo,
        *mut u32,
    ) -> HResult,
    get_disp_id: unsafe extern "system" fn(*mut c_void, *const u16, u32, *mut DispId) -> HResult,
    invoke_ex: unsafe extern "system" fn(
        *mut c_void,
        DispId,
        u32,
        u16,
        *mut DispParams,
        *mut Variant,
        *mut ExcepInfo,
        *mut c_void,
    ) -> HResult,
    delete_member_by_name: unsafe extern "system" fn(*mut c_void, *const u16, u32) -> HResult,
    delete_member_by_disp_id: unsafe extern "system" fn(*mut c_void, DispId) -> HResult,
    get_member_properties: unsafe extern "system" fn(*mut c_void, DispId, u32, *mut u32) -> HResult,
    get_member_name: unsafe extern "system" fn(*mut c_void, DispId, *mut *mut u16) -> HResult,
    get_next_disp_id: unsafe extern "system" fn(*mut c_void, u32, DispId, *mut DispId) -> HResult,
    get_name_space_parent: unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult,
}

static HOST_ITEM_VTBL: HostItemVtbl = HostItemVtbl {
    base: IUnknownVtbl {
        query_interface,
        add_ref: ComObject::<HostItem>::add_ref,
        release: ComObject::<HostItem>::release,
    },
    get_type_info_count,
    get_type_info,
    get_ids_of_names,
    invoke,
    get_disp_id,
    invoke_ex,
    delete_member_by_name,
    delete_member_by_disp_id,
    get_member_properties,
    get_member_name,
    get_next_disp_id,
    get_name_space_parent,
};

unsafe fn item<'a>(this: *mut c_void) -> &'a HostItem {
    &ComObject::<HostItem>::from_this(this).value
}

unsafe extern "system" fn query_interface(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if !iid.is_null() && !out.is_null() && (*iid == IID_IDISPATCH || *iid == IID_HOST_ITEM) {
        ComObject::<HostItem>::add_ref(this);
        *out = this;
        return HResult::S_OK;
    }
    ComObject::<HostItem>::query_interface(this, iid, out)
}

unsafe extern "system" fn get_type_info_count(_this: *mut c_void, count: *mut u32) -> HResult {
    if count.is_null() {
        return HResult::E_POINTER;
    }
    *count = 0;
    HResult::S_OK
}

unsafe extern "system" fn get_type_info(
    _this: *mut c_void,
    _index: u32,
    _lcid: u32,
    out: *mut *mut c_void,
) -> HResult {
    if !out.is_null() {
        *out = std::ptr::null_mut();
    }
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_ids_of_names(
    this: *mut c_void,
    _iid: *const Guid,
    names: *const *const u16,
    count: u32,
    _lcid: u32,
    ids: *mut DispId,
) -> HResult {
    if names.is_null() || ids.is_null() {
        return HResult::E_POINTER;
    }
    let item = item(this);
    let mut status = HResult::S_OK;
    for index in 0..count as usize {
        // later names are named arguments, which host members do not take
        let id = match (index, from_wide_ptr(*names.add(index))) {
            (0, Some(name)) => item.id_of(&name),
            _ => None,
        };
        if id.is_none() {
            status = HResult::DISP_E_UNKNOWNNAME;
        }
        *ids.add(index) = id.unwrap_or(DISPID_UNKNOWN);
    }
    status
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn invoke(
    this: *mut c_void,
    id: DispId,
    _iid: *const Guid,
    _lcid: u32,
    flags: u16,
    params: *mut DispParams,
    result: *mut Variant,
    exception: *mut ExcepInfo,
    _arg_error: *mut u32,
) -> HResult {
    item(this).invoke(id, flags, params, result, exception)
}

unsafe extern "system" fn get_disp_id(
    this: *mut c_void,
    name: *const u16,
    _flags: u32,
    id: *mut DispId,
) -> HResult {
    if id.is_null() {
        return HResult::E_POINTER;
    }
    match item(this).id_of(&Bstr::read(name)) {
        Some(found) => {
            *id = found;
            HResult::S_OK
        }
        None => {
            *id = DISPID_UNKNOWN;
            HResult::DISP_E_UNKNOWNNAME
        }
    }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn invoke_ex(
    this: *mut c_void,
    id: DispId,
    _lcid: u32,
    flags: u16,
    params: *mut DispParams,
    result: *mut Variant,
    exception: *mut ExcepInfo,
    _caller: *mut c_void,
) -> HResult {
    item(this).invoke(id, flags, params, result, exception)
}

unsafe extern "system" fn delete_member_by_name(
    _this: *mut c_void,
    _name: *const u16,
    _flags: u32,
) -> HResult {
    HResult::S_FALSE
}

unsafe extern "system" fn delete_member_by_disp_id(_this: *mut c_void, _id: DispId) -> HResult {
    HResult::S_FALSE
}

unsafe extern "system" fn get_member_properties(
    _this: *mut c_void,
    _id: DispId,
    _fetch: u32,
    _properties: *mut u32,
) -> HResult {
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_member_name(
    this: *mut c_void,
    id: DispId,
    name: *mut *mut u16,
) -> HResult {
    if name.is_null() {
        return HResult::E_POINTER;
    }
    match item(this).name_of(id) {
        Some(found) => {
            *name = Bstr::new(found).into_raw();
            HResult::S_OK
        }
        None => {
            *name = std::ptr::null_mut();
            HResult::DISP_E_UNKNOWNNAME
        }
    }
}

unsafe extern "system" fn get_next_disp_id(
    this: *mut c_void,
    _flags: u32,
    id: DispId,
    next: *mut DispId,
) -> HResult {
    if next.is_null() {
        return HResult::E_POINTER;
    }
    let candidate = if id == DISPID_STARTENUM { 1 } else { id.saturating_add(1) };
    if item(this).name_of(candidate).is_some() {
        *next = candidate;
        HResult::S_OK
    } else {
        *next = DISPID_UNKNOWN;
        HResult::S_FALSE
    }
}

unsafe extern "system" fn get_name_space_parent(
    _this: *mut c_void,
    parent: *mut *mut c_void,
) -> HResult {
    if !parent.is_null() {
        *parent = std::ptr::null_mut();
    }
    HResult::E_NOTIMPL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_script::script_dispatch::ScriptDispatch;
    use crate::active_script::translate::error_type_of;
    use crate::jsrt::ExternalObjectRegistry;
    use crate::release::DeferredReleases;
    use crate::settings::JsEngineMode;
    use crate::value::HostError;
    use chakra_native::active_script::WrapperError;

    #[derive(Default)]
    struct Counter {
        count: i32,
    }

    fn counter_type() -> Arc<HostType> {
        HostType::builder::<Counter>("Counter")
            .default_constructor()
            .field("count", |c: &Counter| c.count, |c: &mut Counter, v| c.count = v)
            .method("plus", |c: &Counter, (n,): (i32,)| Ok(c.count + n))
            .method("fail", |_: &Counter, ()| Err::<(), _>(HostError::new("nope")))
            .static_property("kind", || "counter".to_owned())
            .build()
    }

    fn marshaler() -> Rc<Marshaler> {
        Marshaler::new(
            1,
            JsEngineMode::ChakraActiveScript,
            Arc::new(ExternalObjectRegistry::default()),
            Arc::new(DeferredReleases::default()),
        )
    }

    fn dispatch_of(m: &Rc<Marshaler>, kind: HostItemKind) -> ScriptDispatch {
        ScriptDispatch::new(HostItem::create(m, kind))
    }

    #[test]
    fn members_resolve_by_name() {
        let m = marshaler();
        let object = counter_type().instance(Counter { count: 2 }).unwrap();
        let item = dispatch_of(&m, HostItemKind::Object(object.clone()));

        let count = item.id_of("count").unwrap().expect("count is a member");
        assert_eq!(count, 1);
        assert_eq!(item.id_of("toString").unwrap(), None);

        assert_eq!(m.to_host(&item.get(count).unwrap()).unwrap(), HostValue::I32(2));
        item.put(count, Variant::from_i32(5)).unwrap();
        assert_eq!(object.with(|c: &Counter| c.count), Some(5));

        let plus = item.id_of("plus").unwrap().expect("plus is a member");
        let result = item.call(plus, vec![Variant::from_i32(4)]).unwrap();
        assert_eq!(m.to_host(&result).unwrap(), HostValue::I32(9));
    }

    #[test]
    fn member_failures_raise_exceptions() {
        let m = marshaler();
        let object = counter_type().instance(Counter::default()).unwrap();
        let item = dispatch_of(&m, HostItemKind::Object(object));

        let fail = item.id_of("fail").unwrap().unwrap();
        match item.call(fail, Vec::new()) {
            Err(WrapperError::Exception {
                hresult,
                source_name,
                description,
            }) => {
                assert_eq!(hresult, HResult::E_FAIL);
                assert_eq!(source_name, "Chakra ActiveScript");
                assert!(description.ends_with("nope"), "{description}");
            }
            other => panic!("expected an exception, got {other:?}"),
        }

        let missing = item.id_of("Count").unwrap().expect("undeclared names get an id");
        assert_eq!(item.id_of("Count").unwrap(), Some(missing));
        for outcome in [item.get(missing).map(drop), item.put(missing, Variant::from_i32(1))] {
            match outcome {
                Err(WrapperError::Exception { hresult, description, .. }) => {
                    assert_eq!(error_type_of(hresult), "TypeError");
                    assert_eq!(description, "member 'Count' of host object not found");
                }
                other => panic!("expected an exception, got {other:?}"),
            }
        }

        let plus = item.id_of("plus").unwrap().unwrap();
        match item.call(plus, vec![Variant::from_string("x")]) {
            Err(WrapperError::Exception { hresult, description, .. }) => {
                assert_eq!(error_type_of(hresult), "ReferenceError");
                assert_eq!(description, "suitable method 'plus' of host object not found");
            }
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn reading_a_method_binds_it() {
        let m = marshaler();
        let object = counter_type().instance(Counter { count: 10 }).unwrap();
        let item = dispatch_of(&m, HostItemKind::Object(object));

        let plus = item.id_of("plus").unwrap().unwrap();
        let bound = item.get(plus).unwrap();
        let bound = ScriptDispatch::new(bound.interface_value().expect("a dispatch object"));
        let result = bound.call(DISPID_VALUE, vec![Variant::from_i32(1)]).unwrap();
        assert_eq!(m.to_host(&result).unwrap(), HostValue::I32(11));
        assert_eq!(m.releases.pending(), 0);
    }

    #[test]
    fn types_construct_and_expose_statics() {
        let m = marshaler();
        let item = dispatch_of(&m, HostItemKind::Type(counter_type()));

        let kind = item.id_of("kind").unwrap().unwrap();
        let value = m.to_host(&item.get(kind).unwrap()).unwrap();
        assert_eq!(value, HostValue::String("counter".into()));
        let count = item.id_of("count").unwrap().expect("undeclared names get an id");
        assert!(matches!(item.get(count), Err(WrapperError::Exception { .. })));

        let created = item.invoke(DISPID_VALUE, DISPATCH_CONSTRUCT, &mut []).unwrap();
        match m.to_host(&created).unwrap() {
            HostValue::Object(object) => assert_eq!(object.with(|c: &Counter| c.count), Some(0)),
            other => panic!("expected a host object, got {other:?}"),
        }
    }

    #[test]
    fn functions_report_failures_and_panics() {
        let m = marshaler();
        let add = HostFunction::typed(|(a, b): (i32, i32)| Ok(a + b));
        let item = dispatch_of(&m, HostItemKind::Function(add));
        let sum = item
            .call(DISPID_VALUE, vec![Variant::from_i32(2), Variant::from_i32(1)])
            .unwrap();
        assert_eq!(m.to_host(&sum).unwrap(), HostValue::I32(3));

        match item.call(DISPID_VALUE, vec![Variant::from_i32(1)]) {
            Err(WrapperError::Exception { description, .. }) => {
                assert_eq!(description, "host delegate invocation failed: Parameter count mismatch")
            }
            other => panic!("expected an exception, got {other:?}"),
        }

        let kaboom = HostFunction::new(|_| panic!("kaboom"));
        let explode = dispatch_of(&m, HostItemKind::Function(kaboom));
        match explode.call(DISPID_VALUE, Vec::new()) {
            Err(WrapperError::Exception { description, .. }) => {
                assert_eq!(description, "host callback panicked: kaboom")
            }
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let m = marshaler();
        let item = dispatch_of(&m, HostItemKind::Type(counter_type()));
        match item.get(42) {
            Err(err) => assert_eq!(err.hresult(), HResult::DISP_E_MEMBERNOTFOUND),
            Ok(value) => panic!("expected a failure, got {value:?}"),
        }

        let identity = HostFunction::typed(|(a,): (i32,)| Ok(a));
        let add = dispatch_of(&m, HostItemKind::Function(identity));
        assert_eq!(add.id_of("length").unwrap(), None);
    }

    #[test]
    fn registration_follows_the_wrapper() {
        let m = marshaler();
        let object = counter_type().instance(Counter::default()).unwrap();
        let item = HostItem::create(&m, HostItemKind::Object(object.clone()));
        let copy = item.clone();
        assert_eq!(m.registry.len(), 1);
        let value = host_value_of(&copy);
        assert!(matches!(value, Some(HostValue::Object(back)) if back.ptr_eq(&object)));
        drop(item);
        assert_eq!(m.registry.len(), 1);
        drop(copy);
        assert_eq!(m.registry.len(), 0);
    }
}

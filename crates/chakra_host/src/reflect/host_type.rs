use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chakra_native::jsrt::JsErrorKind;
use parking_lot::RwLock;
use thiserror::Error;

use super::overload::{fix_argument_types, select_best_fit, Signature};
use super::{HostArgs, HostParam, ParamType};
use crate::value::{HostError, HostValue};

type ObjectCell = Arc<RwLock<dyn Any + Send + Sync>>;
type GetFn = dyn Fn(Option<&HostObject>) -> Result<HostValue, HostError> + Send + Sync;
type SetFn = dyn Fn(Option<&HostObject>, &HostValue) -> Result<(), HostError> + Send + Sync;
type InvokeFn =
    dyn Fn(Option<&HostObject>, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync;
type ConstructFn = dyn Fn(&[HostValue]) -> Result<ObjectCell, HostError> + Send + Sync;
type DefaultFn = dyn Fn() -> ObjectCell + Send + Sync;

/// Failure of a projected member, mapped onto a script error by the engines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemberError {
    #[error("invalid 'this' context for host object {kind} '{name}'")]
    InvalidThis { kind: &'static str, name: String },

    #[error("member '{name}' of host object not found")]
    MemberNotFound { name: String },

    #[error("constructor of host type '{type_name}' not found")]
    ConstructorNotFound { type_name: String },

    #[error("suitable constructor of host type '{type_name}' not found")]
    SuitableConstructorNotFound { type_name: String },

    #[error("suitable method '{name}' of {owner} not found")]
    SuitableMethodNotFound { name: String, owner: String },

    #[error("{operation} of {owner} failed: {source}")]
    Failed {
        operation: String,
        owner: String,
        source: HostError,
    },
}

impl MemberError {
    /// The script error constructor this failure surfaces as.
    pub fn script_kind(&self) -> JsErrorKind {
        match self {
            Self::InvalidThis { .. } | Self::MemberNotFound { .. } => JsErrorKind::TypeError,
            Self::SuitableConstructorNotFound { .. } | Self::SuitableMethodNotFound { .. } => {
                JsErrorKind::ReferenceError
            }
            Self::ConstructorNotFound { .. } | Self::Failed { .. } => JsErrorKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Property,
}

impl MemberKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::Property => "property",
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance of a registered host type.
#[derive(Clone)]
pub struct HostObject {
    cell: ObjectCell,
    host_type: Arc<HostType>,
}

impl HostObject {
    pub fn host_type(&self) -> &Arc<HostType> {
        &self.host_type
    }

    pub fn is<T: Any>(&self) -> bool {
        self.cell.read_recursive().is::<T>()
    }

    /// Runs `f` on the wrapped value under a shared lock.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.cell.read_recursive();
        guard.downcast_ref::<T>().map(f)
    }

    /// Runs `f` on the wrapped value under an exclusive lock.
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.cell.write();
        guard.downcast_mut::<T>().map(f)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.cell), Arc::as_ptr(&other.cell))
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("type", &self.host_type.name)
            .finish_non_exhaustive()
    }
}

/// A field or property: an optional getter and an optional setter.
pub struct Accessor {
    name: String,
    kind: MemberKind,
    value_type: ParamType,
    get: Option<Arc<GetFn>>,
    set: Option<Arc<SetFn>>,
}

impl Accessor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn value_type(&self) -> ParamType {
        self.value_type
    }

    pub fn can_read(&self) -> bool {
        self.get.is_some()
    }

    pub fn can_write(&self) -> bool {
        self.set.is_some()
    }

    pub fn get(&self, this: Option<&HostObject>, owner: &str) -> Result<HostValue, MemberError> {
        let get = self.get.as_ref().ok_or_else(|| self.failed("getting", owner, "no getter"))?;
        get(this).map_err(|source| self.failed("getting", owner, source))
    }

    pub fn set(
        &self,
        this: Option<&HostObject>,
        value: &HostValue,
        owner: &str,
    ) -> Result<(), MemberError> {
        let set = self.set.as_ref().ok_or_else(|| self.failed("setting", owner, "no setter"))?;
        let value = super::coerce(value, self.value_type).ok_or_else(|| {
            let reason = format!(
                "value of type {} cannot be converted to {}",
                value.type_name(),
                self.value_type
            );
            self.failed("setting", owner, reason.as_str())
        })?;
        set(this, &value).map_err(|source| self.failed("setting", owner, source))
    }

    fn failed(&self, action: &str, owner: &str, source: impl Into<HostError>) -> MemberError {
        MemberError::Failed {
            operation: format!("{action} {} '{}'", self.kind, self.name),
            owner: owner.to_owned(),
            source: source.into(),
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value_type", &self.value_type)
            .field("read", &self.can_read())
            .field("write", &self.can_write())
            .finish()
    }
}

/// One signature of a method group.
#[derive(Clone)]
pub struct Overload {
    params: Vec<ParamType>,
    invoke: Arc<InvokeFn>,
}

impl Signature for Overload {
    fn params(&self) -> &[ParamType] {
        &self.params
    }
}

/// All methods sharing one script-visible name.
pub struct MethodGroup {
    name: String,
    overloads: Vec<Overload>,
}

impl MethodGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn overloads(&self) -> &[Overload] {
        &self.overloads
    }

    /// Resolves the best-fit overload for `args` and calls it.
    pub fn invoke(
        &self,
        this: Option<&HostObject>,
        args: &[HostValue],
        owner: &str,
    ) -> Result<HostValue, MemberError> {
        let not_found = || MemberError::SuitableMethodNotFound {
            name: self.name.clone(),
            owner: owner.to_owned(),
        };
        let overload = select_best_fit(&self.overloads, args).ok_or_else(not_found)?;
        let args = fix_argument_types(&overload.params, args).ok_or_else(not_found)?;
        (overload.invoke)(this, &args).map_err(|source| MemberError::Failed {
            operation: format!("invocation of method '{}'", self.name),
            owner: owner.to_owned(),
            source,
        })
    }
}

impl fmt::Debug for MethodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodGroup")
            .field("name", &self.name)
            .field("overloads", &self.overloads.iter().map(|o| &o.params).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone)]
pub struct Constructor {
    params: Vec<ParamType>,
    construct: Arc<ConstructFn>,
}

impl Signature for Constructor {
    fn params(&self) -> &[ParamType] {
        &self.params
    }
}

/// The script-visible surface of a Rust type.
pub struct HostType {
    name: String,
    type_id: TypeId,
    constructors: Vec<Constructor>,
    default: Option<Arc<DefaultFn>>,
    instance_accessors: Vec<Accessor>,
    instance_methods: Vec<MethodGroup>,
    static_accessors: Vec<Accessor>,
    static_methods: Vec<MethodGroup>,
}

impl HostType {
    pub fn builder<T: Any + Send + Sync>(name: impl Into<String>) -> HostTypeBuilder<T> {
        HostTypeBuilder {
            ty: HostType {
                name: name.into(),
                type_id: TypeId::of::<T>(),
                constructors: Vec::new(),
                default: None,
                instance_accessors: Vec::new(),
                instance_methods: Vec::new(),
                static_accessors: Vec::new(),
                static_methods: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    pub fn accessors(&self, instance: bool) -> &[Accessor] {
        if instance {
            &self.instance_accessors
        } else {
            &self.static_accessors
        }
    }

    pub fn methods(&self, instance: bool) -> &[MethodGroup] {
        if instance {
            &self.instance_methods
        } else {
            &self.static_methods
        }
    }

    pub fn find_accessor(&self, instance: bool, name: &str) -> Option<&Accessor> {
        self.accessors(instance).iter().find(|accessor| accessor.name == name)
    }

    pub fn find_method(&self, instance: bool, name: &str) -> Option<&MethodGroup> {
        self.methods(instance).iter().find(|group| group.name == name)
    }

    /// How error messages refer to members of this type.
    pub fn owner(&self, instance: bool) -> String {
        if instance {
            "host object".to_owned()
        } else {
            format!("host type '{}'", self.name)
        }
    }

    /// Wraps an existing value. Fails when `T` is not the registered type.
    pub fn instance<T: Any + Send + Sync>(
        self: &Arc<Self>,
        value: T,
    ) -> Result<HostObject, HostError> {
        if TypeId::of::<T>() != self.type_id {
            return Err(HostError::new(format!(
                "{} is not the type registered as '{}'",
                std::any::type_name::<T>(),
                self.name
            )));
        }
        Ok(self.wrap(Arc::new(RwLock::new(value))))
    }

    /// Creates an instance the way `new Type(...)` does in script.
    ///
    /// Without arguments a type with a default constructor is built through
    /// it; otherwise the best-fit registered constructor is chosen.
    pub fn construct(self: &Arc<Self>, args: &[HostValue]) -> Result<HostObject, MemberError> {
        if args.is_empty() {
            if let Some(default) = &self.default {
                return Ok(self.wrap(default()));
            }
        }
        if self.constructors.is_empty() {
            return Err(MemberError::ConstructorNotFound {
                type_name: self.name.clone(),
            });
        }

        let not_found = || MemberError::SuitableConstructorNotFound {
            type_name: self.name.clone(),
        };
        let constructor = select_best_fit(&self.constructors, args).ok_or_else(not_found)?;
        let args = fix_argument_types(&constructor.params, args).ok_or_else(not_found)?;
        let cell = (constructor.construct)(&args).map_err(|source| MemberError::Failed {
            operation: "construction".to_owned(),
            owner: self.owner(false),
            source,
        })?;
        Ok(self.wrap(cell))
    }

    fn wrap(self: &Arc<Self>, cell: ObjectCell) -> HostObject {
        HostObject {
            cell,
            host_type: Arc::clone(self),
        }
    }
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostType")
            .field("name", &self.name)
            .field("constructors", &self.constructors.len())
            .field("instance_accessors", &self.instance_accessors)
            .field("instance_methods", &self.instance_methods)
            .field("static_accessors", &self.static_accessors)
            .field("static_methods", &self.static_methods)
            .finish()
    }
}

fn receiver(this: Option<&HostObject>) -> Result<&HostObject, HostError> {
    this.ok_or_else(|| HostError::new("missing host object"))
}

fn type_mismatch<T>() -> HostError {
    HostError::new(format!("host object is not a {}", std::any::type_name::<T>()))
}

fn convert<V: HostParam>(value: &HostValue) -> Result<V, HostError> {
    V::from_host_value(value).ok_or_else(|| {
        HostError::new(format!(
            "value of type {} cannot be converted to {}",
            value.type_name(),
            V::TYPE
        ))
    })
}

/// Declares the members of a [`HostType`].
pub struct HostTypeBuilder<T> {
    ty: HostType,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> HostTypeBuilder<T> {
    fn accessor<V: HostParam>(
        mut self,
        instance: bool,
        name: &str,
        kind: MemberKind,
        get: Option<Arc<GetFn>>,
        set: Option<Arc<SetFn>>,
    ) -> Self {
        let accessor = Accessor {
            name: name.to_owned(),
            kind,
            value_type: V::TYPE,
            get,
            set,
        };
        let accessors = if instance {
            &mut self.ty.instance_accessors
        } else {
            &mut self.ty.static_accessors
        };
        accessors.retain(|existing| existing.name != accessor.name);
        accessors.push(accessor);
        self
    }

    fn instance_getter<V: HostParam>(get: impl Fn(&T) -> V + Send + Sync + 'static) -> Arc<GetFn> {
        Arc::new(move |this: Option<&HostObject>| -> Result<HostValue, HostError> {
            receiver(this)?
                .with(|value: &T| get(value).into())
                .ok_or_else(type_mismatch::<T>)
        })
    }

    fn instance_setter<V: HostParam>(
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Arc<SetFn> {
        Arc::new(move |this: Option<&HostObject>, value: &HostValue| -> Result<(), HostError> {
            let value = convert::<V>(value)?;
            receiver(this)?
                .with_mut(|target: &mut T| set(target, value))
                .ok_or_else(type_mismatch::<T>)
        })
    }

    fn add_method(
        mut self,
        instance: bool,
        name: &str,
        params: Vec<ParamType>,
        invoke: Arc<InvokeFn>,
    ) -> Self {
        let groups = if instance {
            &mut self.ty.instance_methods
        } else {
            &mut self.ty.static_methods
        };
        let overload = Overload { params, invoke };
        match groups.iter_mut().find(|group| group.name == name) {
            Some(group) => group.overloads.push(overload),
            None => groups.push(MethodGroup {
                name: name.to_owned(),
                overloads: vec![overload],
            }),
        }
        self
    }

    /// A readable and writable instance field.
    pub fn field<V: HostParam>(
        self,
        name: &str,
        get: impl Fn(&T) -> V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        let get = Self::instance_getter(get);
        let set = Self::instance_setter(set);
        self.accessor::<V>(true, name, MemberKind::Field, Some(get), Some(set))
    }

    /// A read-only instance property.
    pub fn property<V: HostParam>(
        self,
        name: &str,
        get: impl Fn(&T) -> V + Send + Sync + 'static,
    ) -> Self {
        let get = Self::instance_getter(get);
        self.accessor::<V>(true, name, MemberKind::Property, Some(get), None)
    }

    pub fn property_rw<V: HostParam>(
        self,
        name: &str,
        get: impl Fn(&T) -> V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        let get = Self::instance_getter(get);
        let set = Self::instance_setter(set);
        self.accessor::<V>(true, name, MemberKind::Property, Some(get), Some(set))
    }

    /// An instance method. Registering the same name again adds an overload.
    pub fn method<A, R>(
        self,
        name: &str,
        f: impl Fn(&T, A) -> Result<R, HostError> + Send + Sync + 'static,
    ) -> Self
    where
        A: HostArgs,
        R: Into<HostValue>,
    {
        let invoke: Arc<InvokeFn> = Arc::new(
            move |this: Option<&HostObject>, args: &[HostValue]| -> Result<HostValue, HostError> {
                let args = A::from_values(args)?;
                receiver(this)?
                    .with(|value: &T| f(value, args))
                    .ok_or_else(type_mismatch::<T>)?
                    .map(Into::into)
            },
        );
        self.add_method(true, name, A::param_types(), invoke)
    }

    /// An instance method that mutates the receiver.
    pub fn method_mut<A, R>(
        self,
        name: &str,
        f: impl Fn(&mut T, A) -> Result<R, HostError> + Send + Sync + 'static,
    ) -> Self
    where
        A: HostArgs,
        R: Into<HostValue>,
    {
        let invoke: Arc<InvokeFn> = Arc::new(
            move |this: Option<&HostObject>, args: &[HostValue]| -> Result<HostValue, HostError> {
                let args = A::from_values(args)?;
                receiver(this)?
                    .with_mut(|value: &mut T| f(value, args))
                    .ok_or_else(type_mismatch::<T>)?
                    .map(Into::into)
            },
        );
        self.add_method(true, name, A::param_types(), invoke)
    }

    pub fn constructor<A: HostArgs>(
        mut self,
        f: impl Fn(A) -> Result<T, HostError> + Send + Sync + 'static,
    ) -> Self {
        let construct: Arc<ConstructFn> =
            Arc::new(move |args: &[HostValue]| -> Result<ObjectCell, HostError> {
                let value = f(A::from_values(args)?)?;
                let cell: ObjectCell = Arc::new(RwLock::new(value));
                Ok(cell)
            });
        self.ty.constructors.push(Constructor {
            params: A::param_types(),
            construct,
        });
        self
    }

    /// Lets scripts create instances without arguments through `Default`.
    pub fn default_constructor(mut self) -> Self
    where
        T: Default,
    {
        self.ty.default = Some(Arc::new(|| {
            let cell: ObjectCell = Arc::new(RwLock::new(T::default()));
            cell
        }));
        self
    }

    pub fn static_field<V: HostParam>(
        self,
        name: &str,
        get: impl Fn() -> V + Send + Sync + 'static,
        set: impl Fn(V) + Send + Sync + 'static,
    ) -> Self {
        let get: Arc<GetFn> =
            Arc::new(move |_: Option<&HostObject>| -> Result<HostValue, HostError> {
                Ok(get().into())
            });
        let set: Arc<SetFn> =
            Arc::new(move |_: Option<&HostObject>, value: &HostValue| -> Result<(), HostError> {
                set(convert::<V>(value)?);
                Ok(())
            });
        self.accessor::<V>(false, name, MemberKind::Field, Some(get), Some(set))
    }

    pub fn static_property<V: HostParam>(
        self,
        name: &str,
        get: impl Fn() -> V + Send + Sync + 'static,
    ) -> Self {
        let get: Arc<GetFn> =
            Arc::new(move |_: Option<&HostObject>| -> Result<HostValue, HostError> {
                Ok(get().into())
            });
        self.accessor::<V>(false, name, MemberKind::Property, Some(get), None)
    }

    pub fn static_method<A, R>(
        self,
        name: &str,
        f: impl Fn(A) -> Result<R, HostError> + Send + Sync + 'static,
    ) -> Self
    where
        A: HostArgs,
        R: Into<HostValue>,
    {
        let invoke: Arc<InvokeFn> = Arc::new(
            move |_: Option<&HostObject>, args: &[HostValue]| -> Result<HostValue, HostError> {
                f(A::from_values(args)?).map(Into::into)
            },
        );
        self.add_method(false, name, A::param_types(), invoke)
    }

    pub fn build(self) -> Arc<HostType> {
        Arc::new(self.ty)
    }
}

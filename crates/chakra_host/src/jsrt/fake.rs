//! In-memory JsRT function table for unit tests
//!
//! Implements enough of the native API to drive the backend without
//! ChakraCore: a collected heap of objects and functions, proxies with a
//! `get` trap, freezing, external objects and array buffers. Nothing is
//! parsed; tests register a closure per source text and script bodies call
//! back into the heap through the helpers below.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chakra_native::jsrt::{
    JsContextRef, JsErrorCode, JsErrorKind, JsFinalizeCallback, JsNativeFunction,
    JsParseScriptAttributes, JsPropertyIdRef, JsRef, JsRtApi, JsRuntimeAttributes, JsRuntimeHandle,
    JsSerializedLoadScriptCallback, JsSourceContext, JsValueRef, JsValueType, NativeError,
    NativeResult,
};
use parking_lot::Mutex;

pub(crate) type FakeScript = Arc<dyn Fn(&FakeJsRt) -> NativeResult<JsValueRef> + Send + Sync>;
/// `args[0]` is `this`.
pub(crate) type FakeFunction =
    Arc<dyn Fn(&FakeJsRt, &[JsValueRef]) -> NativeResult<JsValueRef> + Send + Sync>;

const RUNTIME_HANDLE: usize = 0x5254_0000;
const CONTEXT_HANDLE: usize = 0x4354_0000;
const SERIALIZED_PREFIX: &[u8] = b"FAKE";

type Finalizer = (JsFinalizeCallback, *mut c_void);

fn fail<T>(code: JsErrorCode) -> NativeResult<T> {
    Err(NativeError::from(code))
}

fn handle(index: usize) -> JsValueRef {
    (index + 1) as JsValueRef
}

fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value.is_infinite() {
        (if value > 0.0 { "Infinity" } else { "-Infinity" }).to_owned()
    } else if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

enum Slot {
    Free,
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Object),
}

struct Object {
    kind: Kind,
    properties: Vec<(String, Property)>,
    prototype: Option<usize>,
    external: Option<(*mut c_void, Option<JsFinalizeCallback>)>,
    frozen: bool,
}

impl Object {
    fn new(kind: Kind, prototype: Option<usize>) -> Self {
        Self {
            kind,
            properties: Vec::new(),
            prototype,
            external: None,
            frozen: false,
        }
    }

    fn own(&self, name: &str) -> Option<Property> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, property)| *property)
    }

    fn put(&mut self, name: &str, property: Property) {
        match self.properties.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = property,
            None => self.properties.push((name.to_owned(), property)),
        }
    }
}

enum Kind {
    Plain,
    Error,
    Function(Callable),
    ArrayBuffer(Buffer),
    Proxy { target: usize, handler: usize },
}

enum Storage {
    Owned(Box<[u8]>),
    External(*mut u8, u32),
}

struct Buffer {
    storage: Storage,
    finalize: Option<Finalizer>,
}

#[derive(Clone)]
enum Callable {
    Native(JsNativeFunction, *mut c_void),
    Script(FakeFunction),
    ObjectConstructor,
    Freeze,
    ProxyConstructor,
    ObjectToString,
}

#[derive(Clone, Copy)]
enum Property {
    Data(usize),
    Accessor { get: Option<usize>, set: Option<usize> },
}

enum Lookup {
    Value(usize),
    Getter(usize),
    Trap { trap: usize, handler: usize, target: usize },
    Missing,
}

enum Assignment {
    Setter(usize),
    ReadOnly,
    Frozen,
    Assign,
}

struct Heap {
    slots: Vec<Slot>,
    refs: Vec<u32>,
    names: Vec<String>,
    undefined: usize,
    null: usize,
    true_value: usize,
    false_value: usize,
    object_prototype: usize,
    global: usize,
    exception: Option<usize>,
    current_context: usize,
}

// SAFETY: the raw pointers kept here are only handed back to the callbacks
// they were registered with.
unsafe impl Send for Heap {}

impl Heap {
    fn new() -> Self {
        let mut heap = Self {
            slots: Vec::new(),
            refs: Vec::new(),
            names: Vec::new(),
            undefined: 0,
            null: 0,
            true_value: 0,
            false_value: 0,
            object_prototype: 0,
            global: 0,
            exception: None,
            current_context: 0,
        };
        heap.undefined = heap.alloc(Slot::Undefined);
        heap.null = heap.alloc(Slot::Null);
        heap.true_value = heap.alloc(Slot::Bool(true));
        heap.false_value = heap.alloc(Slot::Bool(false));

        heap.object_prototype = heap.alloc(Slot::Object(Object::new(Kind::Plain, None)));
        let to_string = heap.function(Callable::ObjectToString);
        heap.put(heap.object_prototype, "toString", Property::Data(to_string));

        heap.global = heap.plain();
        let object = heap.function(Callable::ObjectConstructor);
        let freeze = heap.function(Callable::Freeze);
        heap.put(object, "freeze", Property::Data(freeze));
        heap.put(object, "prototype", Property::Data(heap.object_prototype));
        heap.put(heap.global, "Object", Property::Data(object));
        let proxy = heap.function(Callable::ProxyConstructor);
        heap.put(heap.global, "Proxy", Property::Data(proxy));
        heap
    }

    fn alloc(&mut self, slot: Slot) -> usize {
        self.slots.push(slot);
        self.refs.push(0);
        self.slots.len() - 1
    }

    fn plain(&mut self) -> usize {
        let prototype = self.object_prototype;
        self.alloc(Slot::Object(Object::new(Kind::Plain, Some(prototype))))
    }

    fn function(&mut self, callable: Callable) -> usize {
        let prototype = self.object_prototype;
        self.alloc(Slot::Object(Object::new(Kind::Function(callable), Some(prototype))))
    }

    fn string(&mut self, value: &str) -> usize {
        self.alloc(Slot::String(value.to_owned()))
    }

    fn error(&mut self, name: &str, message: &str) -> usize {
        let prototype = self.object_prototype;
        let error = self.alloc(Slot::Object(Object::new(Kind::Error, Some(prototype))));
        let name = self.string(name);
        let message = self.string(message);
        self.put(error, "name", Property::Data(name));
        self.put(error, "message", Property::Data(message));
        error
    }

    fn put(&mut self, object: usize, name: &str, property: Property) {
        if let Some(Slot::Object(object)) = self.slots.get_mut(object) {
            object.put(name, property);
        }
    }

    fn index(&self, reference: JsRef) -> NativeResult<usize> {
        let raw = reference as usize;
        if raw == 0 {
            return fail(JsErrorCode::NULL_ARGUMENT);
        }
        match self.slots.get(raw - 1) {
            None | Some(Slot::Free) => fail(JsErrorCode::INVALID_ARGUMENT),
            Some(_) => Ok(raw - 1),
        }
    }

    fn object(&self, index: usize) -> NativeResult<&Object> {
        match &self.slots[index] {
            Slot::Object(object) => Ok(object),
            _ => fail(JsErrorCode::ARGUMENT_NOT_OBJECT),
        }
    }

    fn object_mut(&mut self, index: usize) -> NativeResult<&mut Object> {
        match &mut self.slots[index] {
            Slot::Object(object) => Ok(object),
            _ => fail(JsErrorCode::ARGUMENT_NOT_OBJECT),
        }
    }

    fn is_object(&self, index: usize) -> bool {
        matches!(self.slots[index], Slot::Object(_))
    }

    fn is_callable(&self, index: usize) -> bool {
        matches!(
            &self.slots[index],
            Slot::Object(Object {
                kind: Kind::Function(_),
                ..
            })
        )
    }

    fn name(&self, id: JsPropertyIdRef) -> NativeResult<String> {
        let raw = id as usize;
        match raw.checked_sub(1).and_then(|index| self.names.get(index)) {
            Some(name) => Ok(name.clone()),
            None => fail(JsErrorCode::INVALID_ARGUMENT),
        }
    }

    fn string_at(&self, reference: JsValueRef) -> NativeResult<String> {
        match &self.slots[self.index(reference)?] {
            Slot::String(value) => Ok(value.clone()),
            _ => fail(JsErrorCode::INVALID_ARGUMENT),
        }
    }

    fn value_type(&self, index: usize) -> JsValueType {
        match &self.slots[index] {
            Slot::Free | Slot::Undefined => JsValueType::Undefined,
            Slot::Null => JsValueType::Null,
            Slot::Bool(_) => JsValueType::Boolean,
            Slot::Number(_) => JsValueType::Number,
            Slot::String(_) => JsValueType::String,
            Slot::Object(object) => match object.kind {
                Kind::Plain | Kind::Proxy { .. } => JsValueType::Object,
                Kind::Error => JsValueType::Error,
                Kind::Function(_) => JsValueType::Function,
                Kind::ArrayBuffer(_) => JsValueType::ArrayBuffer,
            },
        }
    }

    fn display(&self, index: usize) -> String {
        match &self.slots[index] {
            Slot::Free | Slot::Undefined => "undefined".to_owned(),
            Slot::Null => "null".to_owned(),
            Slot::Bool(value) => value.to_string(),
            Slot::Number(value) => format_number(*value),
            Slot::String(value) => value.clone(),
            Slot::Object(object) => match object.kind {
                Kind::Error => {
                    let name = self
                        .data_string(object, "name")
                        .unwrap_or_else(|| "Error".to_owned());
                    match self.data_string(object, "message") {
                        Some(message) if !message.is_empty() => format!("{name}: {message}"),
                        _ => name,
                    }
                }
                Kind::Function(_) => "function() { [native code] }".to_owned(),
                _ => "[object Object]".to_owned(),
            },
        }
    }

    fn data_string(&self, object: &Object, name: &str) -> Option<String> {
        match object.own(name)? {
            Property::Data(value) => Some(self.display(value)),
            Property::Accessor { .. } => None,
        }
    }

    fn numeric(&self, index: usize) -> f64 {
        match &self.slots[index] {
            Slot::Null => 0.0,
            Slot::Bool(value) => f64::from(u8::from(*value)),
            Slot::Number(value) => *value,
            Slot::String(value) => {
                let value = value.trim();
                if value.is_empty() {
                    0.0
                } else {
                    value.parse().unwrap_or(f64::NAN)
                }
            }
            Slot::Free | Slot::Undefined | Slot::Object(_) => f64::NAN,
        }
    }

    fn truthy(&self, index: usize) -> bool {
        match &self.slots[index] {
            Slot::Free | Slot::Undefined | Slot::Null => false,
            Slot::Bool(value) => *value,
            Slot::Number(value) => *value != 0.0 && !value.is_nan(),
            Slot::String(value) => !value.is_empty(),
            Slot::Object(_) => true,
        }
    }

    fn lookup(&self, object: usize, name: &str) -> NativeResult<Lookup> {
        let mut current = Some(object);
        while let Some(index) = current {
            let object = self.object(index)?;
            if let Kind::Proxy { target, handler } = object.kind {
                if let Some(Property::Data(trap)) = self.object(handler)?.own("get") {
                    if self.is_callable(trap) {
                        return Ok(Lookup::Trap { trap, handler, target });
                    }
                }
                current = Some(target);
                continue;
            }
            match object.own(name) {
                Some(Property::Data(value)) => return Ok(Lookup::Value(value)),
                Some(Property::Accessor { get: Some(get), .. }) => return Ok(Lookup::Getter(get)),
                Some(Property::Accessor { get: None, .. }) => return Ok(Lookup::Missing),
                None => current = object.prototype,
            }
        }
        Ok(Lookup::Missing)
    }

    fn has(&self, object: usize, name: &str) -> NativeResult<bool> {
        let mut current = Some(object);
        while let Some(index) = current {
            let object = self.object(index)?;
            if let Kind::Proxy { target, .. } = object.kind {
                current = Some(target);
                continue;
            }
            if object.own(name).is_some() {
                return Ok(true);
            }
            current = object.prototype;
        }
        Ok(false)
    }

    fn assignment(&self, receiver: usize, name: &str) -> NativeResult<Assignment> {
        let mut current = Some(receiver);
        while let Some(index) = current {
            let object = self.object(index)?;
            if let Kind::Proxy { target, .. } = object.kind {
                current = Some(target);
                continue;
            }
            match object.own(name) {
                Some(Property::Accessor { set: Some(set), .. }) => {
                    return Ok(Assignment::Setter(set))
                }
                Some(Property::Accessor { set: None, .. }) => return Ok(Assignment::ReadOnly),
                Some(Property::Data(_)) => break,
                None => current = object.prototype,
            }
        }
        if self.object(receiver)?.frozen {
            Ok(Assignment::Frozen)
        } else {
            Ok(Assignment::Assign)
        }
    }

    /// Frees unreachable slots, or all of them, and returns the finalizers
    /// to run once the heap is unlocked.
    fn collect(&mut self, everything: bool) -> Vec<Finalizer> {
        let mut marked = vec![false; self.slots.len()];
        if !everything {
            let mut pending = vec![
                self.undefined,
                self.null,
                self.true_value,
                self.false_value,
                self.object_prototype,
                self.global,
            ];
            pending.extend(self.exception);
            pending.extend(
                self.refs
                    .iter()
                    .enumerate()
                    .filter(|(_, count)| **count > 0)
                    .map(|(index, _)| index),
            );
            while let Some(index) = pending.pop() {
                if marked[index] {
                    continue;
                }
                marked[index] = true;
                if let Slot::Object(object) = &self.slots[index] {
                    pending.extend(object.prototype);
                    for (_, property) in &object.properties {
                        match *property {
                            Property::Data(value) => pending.push(value),
                            Property::Accessor { get, set } => {
                                pending.extend(get);
                                pending.extend(set);
                            }
                        }
                    }
                    if let Kind::Proxy { target, handler } = object.kind {
                        pending.push(target);
                        pending.push(handler);
                    }
                }
            }
        }

        let mut finalizers = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if marked[index] || matches!(slot, Slot::Free) {
                continue;
            }
            if let Slot::Object(object) = std::mem::replace(slot, Slot::Free) {
                if let Some((data, Some(finalize))) = object.external {
                    finalizers.push((finalize, data));
                }
                if let Kind::ArrayBuffer(Buffer {
                    finalize: Some(finalize),
                    ..
                }) = object.kind
                {
                    finalizers.push(finalize);
                }
            }
            self.refs[index] = 0;
        }
        finalizers
    }
}

fn finalize(finalizers: Vec<Finalizer>) {
    for (callback, data) in finalizers {
        // SAFETY: each finalizer runs once, with the data it was created with.
        unsafe { callback(data) };
    }
}

/// A JsRT function table backed by an in-memory heap.
pub(crate) struct FakeJsRt {
    heap: Mutex<Heap>,
    scripts: Mutex<HashMap<String, FakeScript>>,
    disabled: AtomicBool,
    debugging_starts: AtomicUsize,
    documents: Mutex<Vec<String>>,
    runtime_disposed: AtomicBool,
}

impl FakeJsRt {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            heap: Mutex::new(Heap::new()),
            scripts: Mutex::new(HashMap::new()),
            disabled: AtomicBool::new(false),
            debugging_starts: AtomicUsize::new(0),
            documents: Mutex::new(Vec::new()),
            runtime_disposed: AtomicBool::new(false),
        })
    }

    /// Registers what running `source` does.
    pub(crate) fn define_script(
        &self,
        source: &str,
        script: impl Fn(&FakeJsRt) -> NativeResult<JsValueRef> + Send + Sync + 'static,
    ) {
        self.scripts.lock().insert(source.to_owned(), Arc::new(script));
    }

    /// Defines a global function implemented by the test.
    pub(crate) fn define_function(
        &self,
        name: &str,
        function: impl Fn(&FakeJsRt, &[JsValueRef]) -> NativeResult<JsValueRef>
            + Send
            + Sync
            + 'static,
    ) {
        let mut heap = self.heap.lock();
        let function = heap.function(Callable::Script(Arc::new(function)));
        let global = heap.global;
        heap.put(global, name, Property::Data(function));
    }

    pub(crate) fn global(&self) -> JsValueRef {
        handle(self.heap.lock().global)
    }

    pub(crate) fn undefined(&self) -> JsValueRef {
        handle(self.heap.lock().undefined)
    }

    pub(crate) fn boolean(&self, value: bool) -> JsValueRef {
        let heap = self.heap.lock();
        handle(if value { heap.true_value } else { heap.false_value })
    }

    pub(crate) fn number(&self, value: f64) -> JsValueRef {
        handle(self.heap.lock().alloc(Slot::Number(value)))
    }

    pub(crate) fn string(&self, value: &str) -> JsValueRef {
        handle(self.heap.lock().string(value))
    }

    pub(crate) fn object(&self) -> JsValueRef {
        handle(self.heap.lock().plain())
    }

    pub(crate) fn get(&self, object: JsValueRef, name: &str) -> NativeResult<JsValueRef> {
        let lookup = {
            let heap = self.heap.lock();
            let index = heap.index(object)?;
            heap.lookup(index, name)?
        };
        match lookup {
            Lookup::Value(value) => Ok(handle(value)),
            Lookup::Getter(getter) => self.invoke(handle(getter), &[object], false),
            Lookup::Trap { trap, handler, target } => {
                let key = self.string(name);
                self.invoke(handle(trap), &[handle(handler), handle(target), key, object], false)
            }
            Lookup::Missing => Ok(self.undefined()),
        }
    }

    /// Assigns with strict-mode rules.
    pub(crate) fn set(
        &self,
        object: JsValueRef,
        name: &str,
        value: JsValueRef,
    ) -> NativeResult<()> {
        self.assign(object, name, value, true)
    }

    pub(crate) fn call(
        &self,
        function: JsValueRef,
        this: JsValueRef,
        args: &[JsValueRef],
    ) -> NativeResult<JsValueRef> {
        let mut all = vec![this];
        all.extend_from_slice(args);
        self.invoke(function, &all, false)
    }

    pub(crate) fn construct(
        &self,
        function: JsValueRef,
        args: &[JsValueRef],
    ) -> NativeResult<JsValueRef> {
        let mut all = vec![self.undefined()];
        all.extend_from_slice(args);
        self.invoke(function, &all, true)
    }

    pub(crate) fn number_of(&self, value: JsValueRef) -> NativeResult<f64> {
        let heap = self.heap.lock();
        Ok(heap.numeric(heap.index(value)?))
    }

    pub(crate) fn string_of(&self, value: JsValueRef) -> NativeResult<String> {
        let heap = self.heap.lock();
        Ok(heap.display(heap.index(value)?))
    }

    /// Leaves an error pending the way a `throw` in script does. `location`
    /// is 0-based.
    pub(crate) fn throw_error(
        &self,
        name: &str,
        message: &str,
        location: Option<(u32, u32)>,
        stack: Option<&str>,
    ) -> NativeError {
        let mut heap = self.heap.lock();
        let error = heap.error(name, message);
        if let Some((line, column)) = location {
            let line = heap.alloc(Slot::Number(f64::from(line)));
            let column = heap.alloc(Slot::Number(f64::from(column)));
            heap.put(error, "line", Property::Data(line));
            heap.put(error, "column", Property::Data(column));
        }
        if let Some(stack) = stack {
            let stack = heap.string(stack);
            heap.put(error, "stack", Property::Data(stack));
        }
        heap.exception = Some(error);
        NativeError::from(JsErrorCode::SCRIPT_EXCEPTION)
    }

    /// Throws a plain value instead of an error object.
    pub(crate) fn throw_value(&self, value: JsValueRef) -> NativeError {
        let mut heap = self.heap.lock();
        match heap.index(value) {
            Ok(index) => {
                heap.exception = Some(index);
                NativeError::from(JsErrorCode::SCRIPT_EXCEPTION)
            }
            Err(err) => err,
        }
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub(crate) fn debugging_starts(&self) -> usize {
        self.debugging_starts.load(Ordering::SeqCst)
    }

    pub(crate) fn is_runtime_disposed(&self) -> bool {
        self.runtime_disposed.load(Ordering::SeqCst)
    }

    /// Document names scripts were run under, in order.
    pub(crate) fn documents(&self) -> Vec<String> {
        self.documents.lock().clone()
    }

    /// Values holding at least one reference.
    pub(crate) fn pinned(&self) -> usize {
        self.heap.lock().refs.iter().filter(|count| **count > 0).count()
    }

    pub(crate) fn external_objects(&self) -> usize {
        self.heap
            .lock()
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Object(Object { external: Some(_), .. })))
            .count()
    }

    fn raise(&self, name: &str, message: &str) -> NativeError {
        self.throw_error(name, message, None, None)
    }

    fn assign(
        &self,
        object: JsValueRef,
        name: &str,
        value: JsValueRef,
        strict: bool,
    ) -> NativeResult<()> {
        let assignment = {
            let heap = self.heap.lock();
            heap.index(value)?;
            heap.assignment(heap.index(object)?, name)?
        };
        match assignment {
            Assignment::Setter(setter) => {
                self.invoke(handle(setter), &[object, value], false)?;
                Ok(())
            }
            Assignment::ReadOnly if strict => Err(self.raise(
                "TypeError",
                &format!("Assignment to read-only property '{name}' is not allowed in strict mode"),
            )),
            Assignment::Frozen if strict => {
                let message = format!("Cannot modify property '{name}' of a frozen object");
                Err(self.raise("TypeError", &message))
            }
            Assignment::ReadOnly | Assignment::Frozen => Ok(()),
            Assignment::Assign => {
                let mut heap = self.heap.lock();
                let object = heap.index(object)?;
                let value = heap.index(value)?;
                heap.put(object, name, Property::Data(value));
                Ok(())
            }
        }
    }

    fn invoke(
        &self,
        function: JsValueRef,
        args: &[JsValueRef],
        construct: bool,
    ) -> NativeResult<JsValueRef> {
        if self.is_disabled() {
            return fail(JsErrorCode::IN_DISABLED_STATE);
        }
        let (callable, undefined) = {
            let heap = self.heap.lock();
            if heap.exception.is_some() {
                return fail(JsErrorCode::IN_EXCEPTION_STATE);
            }
            let index = heap.index(function)?;
            for arg in args {
                heap.index(*arg)?;
            }
            let callable = match &heap.slots[index] {
                Slot::Object(Object {
                    kind: Kind::Function(callable),
                    ..
                }) => Some(callable.clone()),
                _ => None,
            };
            (callable, handle(heap.undefined))
        };
        let Some(callable) = callable else {
            return Err(self.raise("TypeError", "Function expected"));
        };

        let mut argv = args.to_vec();
        if argv.is_empty() {
            argv.push(undefined);
        }
        match callable {
            Callable::Native(native, state) => {
                // SAFETY: `state` was registered with `native`.
                let argc = argv.len() as u16;
                let result = unsafe { native(function, construct, argv.as_mut_ptr(), argc, state) };
                if self.heap.lock().exception.is_some() {
                    return fail(JsErrorCode::SCRIPT_EXCEPTION);
                }
                Ok(if result.is_null() { undefined } else { result })
            }
            Callable::Script(function) => function(self, &argv),
            Callable::ObjectConstructor => {
                let heap = self.heap.lock();
                match argv.get(1) {
                    Some(value) if heap.is_object(heap.index(*value)?) => Ok(*value),
                    _ => {
                        drop(heap);
                        Ok(self.object())
                    }
                }
            }
            Callable::Freeze => {
                let target = argv.get(1).copied().unwrap_or(undefined);
                let mut heap = self.heap.lock();
                let index = heap.index(target)?;
                if let Slot::Object(object) = &mut heap.slots[index] {
                    object.frozen = true;
                }
                Ok(target)
            }
            Callable::ProxyConstructor => {
                let created = if construct {
                    let mut heap = self.heap.lock();
                    match (argv.get(1), argv.get(2)) {
                        (Some(target), Some(handler)) => {
                            let target = heap.index(*target)?;
                            let handler = heap.index(*handler)?;
                            if heap.is_object(target) && heap.is_object(handler) {
                                let proxy = Object::new(Kind::Proxy { target, handler }, None);
                                Some(heap.alloc(Slot::Object(proxy)))
                            } else {
                                None
                            }
                        }
                        _ => None,
                    }
                } else {
                    None
                };
                match created {
                    Some(proxy) => Ok(handle(proxy)),
                    None => Err(self.raise(
                        "TypeError",
                        "Proxy requires 'new' with a target and a handler object",
                    )),
                }
            }
            Callable::ObjectToString => Ok(self.string("[object Object]")),
        }
    }

    fn run_source(&self, source: &str) -> NativeResult<JsValueRef> {
        if self.is_disabled() {
            return fail(JsErrorCode::IN_DISABLED_STATE);
        }
        if self.heap.lock().exception.is_some() {
            return fail(JsErrorCode::IN_EXCEPTION_STATE);
        }
        let script = self.scripts.lock().get(source).cloned();
        match script {
            Some(script) => script(self),
            None => Err(self.compile_error(source)),
        }
    }

    fn compile_error(&self, source: &str) -> NativeError {
        let mut heap = self.heap.lock();
        let error = heap.error("SyntaxError", "Syntax error");
        let zero = heap.alloc(Slot::Number(0.0));
        heap.put(error, "line", Property::Data(zero));
        heap.put(error, "column", Property::Data(zero));
        let source = heap.string(source);
        heap.put(error, "source", Property::Data(source));
        heap.exception = Some(error);
        NativeError::from(JsErrorCode::SCRIPT_COMPILE)
    }

    fn check_runtime(runtime: JsRuntimeHandle) -> NativeResult<()> {
        if runtime as usize == RUNTIME_HANDLE {
            Ok(())
        } else {
            fail(JsErrorCode::INVALID_ARGUMENT)
        }
    }
}

impl JsRtApi for FakeJsRt {
    unsafe fn create_runtime(
        &self,
        _attributes: JsRuntimeAttributes,
    ) -> NativeResult<JsRuntimeHandle> {
        Ok(RUNTIME_HANDLE as JsRuntimeHandle)
    }

    unsafe fn dispose_runtime(&self, runtime: JsRuntimeHandle) -> NativeResult<()> {
        Self::check_runtime(runtime)?;
        let finalizers = {
            let mut heap = self.heap.lock();
            if heap.current_context != 0 {
                return fail(JsErrorCode::RUNTIME_IN_USE);
            }
            heap.collect(true)
        };
        finalize(finalizers);
        self.runtime_disposed.store(true, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn collect_garbage(&self, runtime: JsRuntimeHandle) -> NativeResult<()> {
        Self::check_runtime(runtime)?;
        let finalizers = self.heap.lock().collect(false);
        finalize(finalizers);
        Ok(())
    }

    unsafe fn disable_runtime_execution(&self, runtime: JsRuntimeHandle) -> NativeResult<()> {
        Self::check_runtime(runtime)?;
        self.disabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn enable_runtime_execution(&self, runtime: JsRuntimeHandle) -> NativeResult<()> {
        Self::check_runtime(runtime)?;
        self.disabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn is_runtime_execution_disabled(&self, runtime: JsRuntimeHandle) -> NativeResult<bool> {
        Self::check_runtime(runtime)?;
        Ok(self.is_disabled())
    }

    unsafe fn create_context(&self, runtime: JsRuntimeHandle) -> NativeResult<JsContextRef> {
        Self::check_runtime(runtime)?;
        Ok(CONTEXT_HANDLE as JsContextRef)
    }

    unsafe fn get_current_context(&self) -> NativeResult<JsContextRef> {
        Ok(self.heap.lock().current_context as JsContextRef)
    }

    unsafe fn set_current_context(&self, context: JsContextRef) -> NativeResult<()> {
        let raw = context as usize;
        if raw != 0 && raw != CONTEXT_HANDLE {
            return fail(JsErrorCode::INVALID_ARGUMENT);
        }
        self.heap.lock().current_context = raw;
        Ok(())
    }

    unsafe fn start_debugging(&self) -> NativeResult<()> {
        self.debugging_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn add_ref(&self, reference: JsRef) -> NativeResult<u32> {
        if reference as usize == CONTEXT_HANDLE {
            return Ok(1);
        }
        let mut heap = self.heap.lock();
        let index = heap.index(reference)?;
        heap.refs[index] += 1;
        Ok(heap.refs[index])
    }

    unsafe fn release(&self, reference: JsRef) -> NativeResult<u32> {
        if reference as usize == CONTEXT_HANDLE {
            return Ok(0);
        }
        let mut heap = self.heap.lock();
        let index = heap.index(reference)?;
        heap.refs[index] = heap.refs[index].saturating_sub(1);
        Ok(heap.refs[index])
    }

    unsafe fn run(
        &self,
        script: JsValueRef,
        _source_context: JsSourceContext,
        source_url: JsValueRef,
        _attributes: JsParseScriptAttributes,
    ) -> NativeResult<JsValueRef> {
        let (source, url) = {
            let heap = self.heap.lock();
            (heap.string_at(script)?, heap.string_at(source_url)?)
        };
        self.documents.lock().push(url);
        self.run_source(&source)
    }

    unsafe fn serialize(
        &self,
        script: JsValueRef,
        _attributes: JsParseScriptAttributes,
    ) -> NativeResult<JsValueRef> {
        let source = self.heap.lock().string_at(script)?;
        if !self.scripts.lock().contains_key(&source) {
            return Err(self.compile_error(&source));
        }
        let mut bytes = SERIALIZED_PREFIX.to_vec();
        bytes.extend_from_slice(source.as_bytes());
        let mut heap = self.heap.lock();
        let prototype = heap.object_prototype;
        let buffer = Buffer {
            storage: Storage::Owned(bytes.into_boxed_slice()),
            finalize: None,
        };
        let object = Object::new(Kind::ArrayBuffer(buffer), Some(prototype));
        Ok(handle(heap.alloc(Slot::Object(object))))
    }

    unsafe fn run_serialized(
        &self,
        buffer: JsValueRef,
        load_script: JsSerializedLoadScriptCallback,
        source_context: JsSourceContext,
        source_url: JsValueRef,
    ) -> NativeResult<JsValueRef> {
        let (data, length) = self.get_array_buffer_storage(buffer)?;
        let bytes = if data.is_null() {
            Vec::new()
        } else {
            slice::from_raw_parts(data, length as usize).to_vec()
        };
        let url = self.heap.lock().string_at(source_url)?;
        let Some(embedded) = bytes.strip_prefix(SERIALIZED_PREFIX) else {
            return fail(JsErrorCode::BAD_SERIALIZED_SCRIPT);
        };

        let mut value: JsValueRef = ptr::null_mut();
        let mut attributes = JsParseScriptAttributes::NONE;
        if !load_script(source_context, &mut value, &mut attributes) {
            return fail(JsErrorCode::BAD_SERIALIZED_SCRIPT);
        }
        let source = self.heap.lock().string_at(value)?;
        if source.as_bytes() != embedded {
            return fail(JsErrorCode::BAD_SERIALIZED_SCRIPT);
        }
        self.documents.lock().push(url);
        self.run_source(&source)
    }

    unsafe fn create_external_array_buffer(
        &self,
        data: *mut c_void,
        byte_length: u32,
        finalize: Option<JsFinalizeCallback>,
        callback_state: *mut c_void,
    ) -> NativeResult<JsValueRef> {
        let mut heap = self.heap.lock();
        let prototype = heap.object_prototype;
        let buffer = Buffer {
            storage: Storage::External(data as *mut u8, byte_length),
            finalize: finalize.map(|callback| (callback, callback_state)),
        };
        let object = Object::new(Kind::ArrayBuffer(buffer), Some(prototype));
        Ok(handle(heap.alloc(Slot::Object(object))))
    }

    unsafe fn get_array_buffer_storage(&self, buffer: JsValueRef) -> NativeResult<(*mut u8, u32)> {
        let heap = self.heap.lock();
        match &heap.object(heap.index(buffer)?)?.kind {
            Kind::ArrayBuffer(Buffer {
                storage: Storage::Owned(bytes),
                ..
            }) => Ok((bytes.as_ptr() as *mut u8, bytes.len() as u32)),
            Kind::ArrayBuffer(Buffer {
                storage: Storage::External(data, length),
                ..
            }) => Ok((*data, *length)),
            _ => fail(JsErrorCode::INVALID_ARGUMENT),
        }
    }

    unsafe fn get_value_type(&self, value: JsValueRef) -> NativeResult<JsValueType> {
        let heap = self.heap.lock();
        Ok(heap.value_type(heap.index(value)?))
    }

    unsafe fn get_undefined_value(&self) -> NativeResult<JsValueRef> {
        Ok(self.undefined())
    }

    unsafe fn get_null_value(&self) -> NativeResult<JsValueRef> {
        Ok(handle(self.heap.lock().null))
    }

    unsafe fn bool_to_boolean(&self, value: bool) -> NativeResult<JsValueRef> {
        Ok(self.boolean(value))
    }

    unsafe fn boolean_to_bool(&self, value: JsValueRef) -> NativeResult<bool> {
        let heap = self.heap.lock();
        match heap.slots[heap.index(value)?] {
            Slot::Bool(value) => Ok(value),
            _ => fail(JsErrorCode::INVALID_ARGUMENT),
        }
    }

    unsafe fn int_to_number(&self, value: i32) -> NativeResult<JsValueRef> {
        Ok(self.number(f64::from(value)))
    }

    unsafe fn double_to_number(&self, value: f64) -> NativeResult<JsValueRef> {
        Ok(self.number(value))
    }

    unsafe fn number_to_double(&self, value: JsValueRef) -> NativeResult<f64> {
        let heap = self.heap.lock();
        match heap.slots[heap.index(value)?] {
            Slot::Number(value) => Ok(value),
            _ => fail(JsErrorCode::INVALID_ARGUMENT),
        }
    }

    unsafe fn create_string(&self, content: &str) -> NativeResult<JsValueRef> {
        Ok(self.string(content))
    }

    unsafe fn copy_string(&self, value: JsValueRef) -> NativeResult<String> {
        self.heap.lock().string_at(value)
    }

    unsafe fn convert_value_to_boolean(&self, value: JsValueRef) -> NativeResult<JsValueRef> {
        let truthy = {
            let heap = self.heap.lock();
            heap.truthy(heap.index(value)?)
        };
        Ok(self.boolean(truthy))
    }

    unsafe fn convert_value_to_number(&self, value: JsValueRef) -> NativeResult<JsValueRef> {
        let mut heap = self.heap.lock();
        let index = heap.index(value)?;
        if let Slot::Number(_) = heap.slots[index] {
            return Ok(value);
        }
        let number = heap.numeric(index);
        Ok(handle(heap.alloc(Slot::Number(number))))
    }

    unsafe fn convert_value_to_string(&self, value: JsValueRef) -> NativeResult<JsValueRef> {
        let mut heap = self.heap.lock();
        let index = heap.index(value)?;
        if let Slot::String(_) = heap.slots[index] {
            return Ok(value);
        }
        let text = heap.display(index);
        Ok(handle(heap.string(&text)))
    }

    unsafe fn convert_value_to_object(&self, value: JsValueRef) -> NativeResult<JsValueRef> {
        let nullish = {
            let heap = self.heap.lock();
            let index = heap.index(value)?;
            if heap.is_object(index) {
                return Ok(value);
            }
            matches!(heap.slots[index], Slot::Undefined | Slot::Null)
        };
        if nullish {
            return Err(self.raise("TypeError", "Object expected"));
        }
        Ok(self.object())
    }

    unsafe fn get_global_object(&self) -> NativeResult<JsValueRef> {
        Ok(self.global())
    }

    unsafe fn create_object(&self) -> NativeResult<JsValueRef> {
        Ok(self.object())
    }

    unsafe fn create_external_object(
        &self,
        data: *mut c_void,
        finalize: Option<JsFinalizeCallback>,
    ) -> NativeResult<JsValueRef> {
        let mut heap = self.heap.lock();
        let index = heap.plain();
        heap.object_mut(index)?.external = Some((data, finalize));
        Ok(handle(index))
    }

    unsafe fn has_external_data(&self, object: JsValueRef) -> NativeResult<bool> {
        let heap = self.heap.lock();
        match &heap.slots[heap.index(object)?] {
            Slot::Object(object) => Ok(object.external.is_some()),
            _ => Ok(false),
        }
    }

    unsafe fn get_external_data(&self, object: JsValueRef) -> NativeResult<*mut c_void> {
        let heap = self.heap.lock();
        match heap.object(heap.index(object)?)?.external {
            Some((data, _)) => Ok(data),
            None => fail(JsErrorCode::INVALID_ARGUMENT),
        }
    }

    unsafe fn get_prototype(&self, object: JsValueRef) -> NativeResult<JsValueRef> {
        let heap = self.heap.lock();
        let prototype = heap.object(heap.index(object)?)?.prototype;
        Ok(handle(prototype.unwrap_or(heap.null)))
    }

    unsafe fn set_prototype(&self, object: JsValueRef, prototype: JsValueRef) -> NativeResult<()> {
        let mut heap = self.heap.lock();
        let object = heap.index(object)?;
        let prototype = heap.index(prototype)?;
        let prototype = match heap.slots[prototype] {
            Slot::Null => None,
            Slot::Object(_) => Some(prototype),
            _ => return fail(JsErrorCode::ARGUMENT_NOT_OBJECT),
        };
        let object = heap.object_mut(object)?;
        if object.frozen {
            return fail(JsErrorCode::INVALID_ARGUMENT);
        }
        object.prototype = prototype;
        Ok(())
    }

    unsafe fn create_property_id(&self, name: &str) -> NativeResult<JsPropertyIdRef> {
        let mut heap = self.heap.lock();
        let index = match heap.names.iter().position(|known| known == name) {
            Some(index) => index,
            None => {
                heap.names.push(name.to_owned());
                heap.names.len() - 1
            }
        };
        Ok(handle(index))
    }

    unsafe fn get_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
    ) -> NativeResult<JsValueRef> {
        let name = self.heap.lock().name(property)?;
        self.get(object, &name)
    }

    unsafe fn set_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
        value: JsValueRef,
        use_strict_rules: bool,
    ) -> NativeResult<()> {
        let name = self.heap.lock().name(property)?;
        self.assign(object, &name, value, use_strict_rules)
    }

    unsafe fn has_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
    ) -> NativeResult<bool> {
        let heap = self.heap.lock();
        let name = heap.name(property)?;
        heap.has(heap.index(object)?, &name)
    }

    unsafe fn define_property(
        &self,
        object: JsValueRef,
        property: JsPropertyIdRef,
        descriptor: JsValueRef,
    ) -> NativeResult<bool> {
        let mut heap = self.heap.lock();
        let object = heap.index(object)?;
        let name = heap.name(property)?;
        let descriptor = heap.index(descriptor)?;

        let field = |key: &str| -> NativeResult<Option<usize>> {
            Ok(match heap.object(descriptor)?.own(key) {
                Some(Property::Data(value)) => Some(value),
                _ => None,
            })
        };
        let get = field("get")?.filter(|value| heap.is_callable(*value));
        let set = field("set")?.filter(|value| heap.is_callable(*value));
        let value = field("value")?;
        if heap.object(object)?.frozen {
            return Ok(false);
        }

        let property = if get.is_some() || set.is_some() {
            Property::Accessor { get, set }
        } else {
            Property::Data(value.unwrap_or(heap.undefined))
        };
        heap.put(object, &name, property);
        Ok(true)
    }

    unsafe fn call_function(
        &self,
        function: JsValueRef,
        arguments: &[JsValueRef],
    ) -> NativeResult<JsValueRef> {
        if arguments.is_empty() {
            return fail(JsErrorCode::INVALID_ARGUMENT);
        }
        self.invoke(function, arguments, false)
    }

    unsafe fn construct_object(
        &self,
        function: JsValueRef,
        arguments: &[JsValueRef],
    ) -> NativeResult<JsValueRef> {
        if arguments.is_empty() {
            return fail(JsErrorCode::INVALID_ARGUMENT);
        }
        self.invoke(function, arguments, true)
    }

    unsafe fn create_function(
        &self,
        native_function: JsNativeFunction,
        callback_state: *mut c_void,
    ) -> NativeResult<JsValueRef> {
        Ok(handle(self.heap.lock().function(Callable::Native(native_function, callback_state))))
    }

    unsafe fn create_error(
        &self,
        kind: JsErrorKind,
        message: JsValueRef,
    ) -> NativeResult<JsValueRef> {
        let name = match kind {
            JsErrorKind::Error => "Error",
            JsErrorKind::TypeError => "TypeError",
            JsErrorKind::ReferenceError => "ReferenceError",
            JsErrorKind::RangeError => "RangeError",
            JsErrorKind::SyntaxError => "SyntaxError",
            JsErrorKind::UriError => "URIError",
        };
        let mut heap = self.heap.lock();
        let message = heap.index(message)?;
        let error = heap.error(name, "");
        heap.put(error, "message", Property::Data(message));
        Ok(handle(error))
    }

    unsafe fn set_exception(&self, error: JsValueRef) -> NativeResult<()> {
        let mut heap = self.heap.lock();
        let error = heap.index(error)?;
        if heap.exception.is_some() {
            return fail(JsErrorCode::IN_EXCEPTION_STATE);
        }
        heap.exception = Some(error);
        Ok(())
    }

    unsafe fn get_and_clear_exception(&self) -> NativeResult<JsValueRef> {
        match self.heap.lock().exception.take() {
            Some(error) => Ok(handle(error)),
            None => fail(JsErrorCode::INVALID_ARGUMENT),
        }
    }

    unsafe fn has_exception(&self) -> NativeResult<bool> {
        Ok(self.heap.lock().exception.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_objects_reject_strict_writes() {
        let js = FakeJsRt::new();
        let object = js.object();
        js.set(object, "a", js.number(1.0)).expect("writable");
        let freeze = js
            .get(js.get(js.global(), "Object").expect("Object"), "freeze")
            .expect("freeze");
        js.call(freeze, js.undefined(), &[object]).expect("frozen");

        let err = js.set(object, "a", js.number(2.0)).expect_err("frozen");
        assert_eq!(err.code, JsErrorCode::SCRIPT_EXCEPTION);
        assert_eq!(js.number_of(js.get(object, "a").expect("read")).expect("number"), 1.0);
    }

    #[test]
    fn unreachable_external_objects_are_finalized() {
        use std::sync::atomic::AtomicUsize;

        static FINALIZED: AtomicUsize = AtomicUsize::new(0);
        unsafe extern "system" fn count(_: *mut c_void) {
            FINALIZED.fetch_add(1, Ordering::SeqCst);
        }

        let js = FakeJsRt::new();
        let kept =
            unsafe { js.create_external_object(ptr::null_mut(), Some(count)) }.expect("created");
        unsafe { js.create_external_object(ptr::null_mut(), Some(count)) }.expect("created");
        js.set(js.global(), "kept", kept).expect("stored");

        unsafe { js.collect_garbage(RUNTIME_HANDLE as JsRuntimeHandle) }.expect("collected");
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
        assert_eq!(js.external_objects(), 1);

        unsafe { js.dispose_runtime(RUNTIME_HANDLE as JsRuntimeHandle) }.expect("disposed");
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn numbers_print_like_script() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }
}

//! Method discovery for bindable host objects.
//!
//! A bindable type lists its methods once in [`Bindable::register`]. Each entry pairs a
//! script-visible name with a Rust function taking `&mut Self` plus up to eight
//! deserializable parameters. The parameter count is the method's arity and the parameter
//! types drive argument decoding. At bind time the entries are closed over the shared
//! receiver.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::invoke::DecodeFailure;
use super::{lock, BindError};
use crate::config::is_script_identifier;

/// A host type whose methods can be exposed to script.
///
/// ```ignore
/// #[derive(Serialize)]
/// struct Counter { value: i64 }
///
/// impl Counter {
///     fn add(&mut self, n: i64) { self.value += n; }
/// }
///
/// impl Bindable for Counter {
///     fn register(methods: &mut MethodTable<Self>) {
///         methods.method("Add", Counter::add);
///     }
/// }
/// ```
pub trait Bindable: Serialize + Send + Sized + 'static {
    fn register(methods: &mut MethodTable<Self>);

    /// Whether there is a value to bind. Only wrappers around an optional value say no.
    fn is_present(&self) -> bool {
        true
    }
}

impl<T: Bindable> Bindable for Box<T> {
    fn register(methods: &mut MethodTable<Self>) {
        methods.absorb(project_box::<T>);
    }

    fn is_present(&self) -> bool {
        (**self).is_present()
    }
}

impl<T: Bindable> Bindable for Option<T> {
    fn register(methods: &mut MethodTable<Self>) {
        methods.absorb(project_option::<T>);
    }

    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(T::is_present)
    }
}

fn project_box<T>(outer: &mut Box<T>) -> Option<&mut T> {
    Some(outer.as_mut())
}

fn project_option<T>(outer: &mut Option<T>) -> Option<&mut T> {
    outer.as_mut()
}

type TypedInvoker<T> =
    Arc<dyn Fn(&mut T, &[JsonValue]) -> Result<(), DecodeFailure> + Send + Sync>;

/// Invoker already bound to its receiver.
pub type Invoker = Arc<dyn Fn(&[JsonValue]) -> Result<(), DecodeFailure> + Send + Sync>;

/// A Rust function usable as a bound method on `T`.
///
/// Implemented for every `Fn(&mut T, A0, .., An) -> R` with `n < 8` and deserializable
/// parameters. The `Marker` parameter only keeps the arity impls apart. Return values are
/// discarded; state changes reach script through the next sync.
pub trait Method<T, Marker>: Send + Sync + 'static {
    const ARITY: usize;

    fn call(&self, target: &mut T, params: &[JsonValue]) -> Result<(), DecodeFailure>;
}

fn decode_param<A: DeserializeOwned>(
    params: &[JsonValue],
    index: usize,
) -> Result<A, DecodeFailure> {
    let value = params
        .get(index)
        .ok_or(DecodeFailure::MissingParam { index })?;
    A::deserialize(value).map_err(|source| DecodeFailure::Param { index, source })
}

macro_rules! impl_method {
    ($arity:literal $(, $ty:ident => $var:ident @ $index:literal)*) => {
        impl<T, F, R, $($ty,)*> Method<T, fn($($ty,)*) -> R> for F
        where
            F: Fn(&mut T, $($ty,)*) -> R + Send + Sync + 'static,
            $($ty: DeserializeOwned,)*
        {
            const ARITY: usize = $arity;

            #[allow(unused_variables)]
            fn call(&self, target: &mut T, params: &[JsonValue]) -> Result<(), DecodeFailure> {
                // Every argument is decoded before the receiver is touched.
                $(let $var = decode_param::<$ty>(params, $index)?;)*
                let _ = (self)(target, $($var,)*);
                Ok(())
            }
        }
    };
}

impl_method!(0);
impl_method!(1, A0 => a0 @ 0);
impl_method!(2, A0 => a0 @ 0, A1 => a1 @ 1);
impl_method!(3, A0 => a0 @ 0, A1 => a1 @ 1, A2 => a2 @ 2);
impl_method!(4, A0 => a0 @ 0, A1 => a1 @ 1, A2 => a2 @ 2, A3 => a3 @ 3);
impl_method!(5, A0 => a0 @ 0, A1 => a1 @ 1, A2 => a2 @ 2, A3 => a3 @ 3, A4 => a4 @ 4);
impl_method!(6, A0 => a0 @ 0, A1 => a1 @ 1, A2 => a2 @ 2, A3 => a3 @ 3, A4 => a4 @ 4, A5 => a5 @ 5);
impl_method!(7, A0 => a0 @ 0, A1 => a1 @ 1, A2 => a2 @ 2, A3 => a3 @ 3, A4 => a4 @ 4, A5 => a5 @ 5, A6 => a6 @ 6);
impl_method!(8, A0 => a0 @ 0, A1 => a1 @ 1, A2 => a2 @ 2, A3 => a3 @ 3, A4 => a4 @ 4, A5 => a5 @ 5, A6 => a6 @ 6, A7 => a7 @ 7);

struct TableEntry<T> {
    name: String,
    arity: usize,
    invoker: TypedInvoker<T>,
}

/// Registration table filled by [`Bindable::register`], in declaration order.
pub struct MethodTable<T> {
    entries: Vec<TableEntry<T>>,
}

impl<T: 'static> MethodTable<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `handler` under `name`. Re-registering a name replaces the earlier handler
    /// but keeps its position.
    pub fn method<M, H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: Method<T, M>,
    {
        let invoker: TypedInvoker<T> =
            Arc::new(move |target: &mut T, params: &[JsonValue]| handler.call(target, params));
        self.insert(TableEntry {
            name: name.into(),
            arity: H::ARITY,
            invoker,
        });
        self
    }

    /// Expose the methods of an inner bindable value reachable through `project`.
    /// Calls made while `project` yields nothing fail to decode.
    pub fn absorb<I: Bindable>(&mut self, project: fn(&mut T) -> Option<&mut I>) -> &mut Self {
        let mut inner = MethodTable::<I>::new();
        I::register(&mut inner);
        for entry in inner.entries {
            let invoker = entry.invoker;
            let projected: TypedInvoker<T> =
                Arc::new(move |outer: &mut T, params: &[JsonValue]| match project(outer) {
                    Some(target) => invoker(target, params),
                    None => Err(DecodeFailure::Absent),
                });
            self.insert(TableEntry {
                name: entry.name,
                arity: entry.arity,
                invoker: projected,
            });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, entry: TableEntry<T>) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }
}

/// A public method of a bound object, ready to be called with decoded script params.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    js_name: String,
    arity: usize,
    invoker: Invoker,
}

impl MethodDescriptor {
    /// Host-side name, as sent in the `method` field of invoke payloads.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Script-side property name: the host name with its first letter lower-cased.
    pub fn js_name(&self) -> &str {
        &self.js_name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn invoke(&self, params: &[JsonValue]) -> Result<(), DecodeFailure> {
        (self.invoker)(params)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("js_name", &self.js_name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Discover the public methods of `target` and bind them to it.
pub fn introspect<T: Bindable>(target: &Arc<Mutex<T>>) -> Result<Vec<MethodDescriptor>, BindError> {
    {
        let guard = lock(target);
        if !guard.is_present() {
            return Err(BindError::NotBindable("bound value is absent".into()));
        }
        let shape = serde_json::to_value(&*guard)
            .map_err(|err| BindError::NotBindable(format!("state is not serializable: {err}")))?;
        // Unit structs serialize to null.
        if !matches!(shape, JsonValue::Object(_) | JsonValue::Null) {
            return Err(BindError::NotBindable(format!(
                "expected a struct-like value, found {}",
                shape_name(&shape)
            )));
        }
    }

    let mut table = MethodTable::new();
    T::register(&mut table);

    let mut methods = Vec::with_capacity(table.len());
    for entry in table.entries {
        if !is_public(&entry.name) {
            tracing::trace!(target = "bridge", method = %entry.name, "skipping private method");
            continue;
        }
        if !is_script_identifier(&entry.name) {
            return Err(BindError::InvalidMethodName(entry.name));
        }

        let receiver = Arc::clone(target);
        let typed = entry.invoker;
        let invoker: Invoker = Arc::new(move |params: &[JsonValue]| {
            let mut guard = lock(&receiver);
            typed(&mut *guard, params)
        });

        methods.push(MethodDescriptor {
            js_name: js_name(&entry.name),
            name: entry.name,
            arity: entry.arity,
            invoker,
        });
    }

    Ok(methods)
}

fn is_public(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn js_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn shape_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a sequence",
        JsonValue::Object(_) => "an object",
    }
}

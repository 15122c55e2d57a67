use std::fmt;
use std::sync::{Arc, Mutex};

use super::introspect::{introspect, Bindable, MethodDescriptor};
use super::{lock, BindError};
use crate::config::is_script_identifier;

type Snapshot = Box<dyn Fn() -> serde_json::Result<String> + Send + Sync>;

/// A host object exposed to script under `name`.
///
/// The binding shares the target with the caller: the host can keep mutating it through
/// its own `Arc` and push the new state with the [`SyncFn`](super::SyncFn) returned by
/// [`Window::bind`](crate::window::Window::bind).
pub struct Binding {
    name: String,
    methods: Vec<MethodDescriptor>,
    snapshot: Snapshot,
}

impl Binding {
    pub fn new<T: Bindable>(name: impl Into<String>, target: Arc<Mutex<T>>) -> Result<Self, BindError> {
        let name = name.into();
        if !is_script_identifier(&name) {
            return Err(BindError::InvalidName(name));
        }

        let methods = introspect(&target)?;
        let snapshot: Snapshot = Box::new(move || serde_json::to_string(&*lock(&target)));

        Ok(Self {
            name,
            methods,
            snapshot,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|method| method.name() == name)
    }

    /// Current state of the target as JSON.
    pub fn state_json(&self) -> serde_json::Result<String> {
        (self.snapshot)()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

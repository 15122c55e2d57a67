pub mod binding;
pub mod introspect;
pub mod invoke;
pub mod registry;
pub mod stub;
pub mod sync;

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::js::EvalError;

pub use binding::Binding;
pub use introspect::{introspect, Bindable, MethodDescriptor, MethodTable};
pub use invoke::{handle_invoke, DecodeFailure, InvokeRequest};
pub use registry::{BindingRegistry, HandlerId, InvokeHandler};
pub use stub::generate_stub;
pub use sync::{sync_script, SyncFn};

#[derive(Debug, Error)]
pub enum BindError {
    #[error("value cannot be bound: {0}")]
    NotBindable(String),
    #[error("binding name {0:?} is not a valid script identifier")]
    InvalidName(String),
    #[error("method name {0:?} is not a valid script identifier")]
    InvalidMethodName(String),
    #[error("a binding named {0:?} already exists on this window")]
    DuplicateName(String),
    #[error("failed to install binding script: {0}")]
    Eval(#[from] EvalError),
}

/// Bound objects stay usable after a method panicked while holding their lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::trace;

use super::binding::Binding;
use super::{lock, BindError};
use crate::window::Window;

/// Handler in the invoke chain. Returns whether it consumed the payload.
pub type InvokeHandler<E> = Arc<dyn Fn(&Window<E>, &str) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct HandlerEntry<E> {
    id: HandlerId,
    handler: InvokeHandler<E>,
}

impl<E> Clone for HandlerEntry<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct BoundEntry {
    binding: Arc<Binding>,
    handler: HandlerId,
}

/// Bindings and invoke handlers of one window.
///
/// The handler chain is replaced wholesale on every change, so routing walks an immutable
/// snapshot and a handler may add or remove handlers while it runs.
pub struct BindingRegistry<E> {
    bindings: Mutex<HashMap<String, BoundEntry>>,
    chain: RwLock<Arc<[HandlerEntry<E>]>>,
    next_id: AtomicU64,
}

impl<E> Default for BindingRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> BindingRegistry<E> {
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            chain: RwLock::new(Arc::from(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Fail early when `name` is taken, before any script is evaluated for it.
    pub(crate) fn check_free(&self, name: &str) -> Result<(), BindError> {
        if lock(&self.bindings).contains_key(name) {
            return Err(BindError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Register `binding` together with the chain handler serving it.
    pub(crate) fn install(
        &self,
        binding: Arc<Binding>,
        handler: InvokeHandler<E>,
    ) -> Result<HandlerId, BindError> {
        let mut bindings = lock(&self.bindings);
        if bindings.contains_key(binding.name()) {
            return Err(BindError::DuplicateName(binding.name().to_string()));
        }
        let id = self.push_handler(handler);
        bindings.insert(binding.name().to_string(), BoundEntry { binding, handler: id });
        Ok(id)
    }

    /// Remove a binding and its chain handler.
    pub(crate) fn uninstall(&self, name: &str) -> Option<Arc<Binding>> {
        let entry = lock(&self.bindings).remove(name)?;
        self.remove_handler(entry.handler);
        Some(entry.binding)
    }

    pub fn binding(&self, name: &str) -> Option<Arc<Binding>> {
        lock(&self.bindings)
            .get(name)
            .map(|entry| Arc::clone(&entry.binding))
    }

    pub fn binding_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.bindings).keys().cloned().collect();
        names.sort();
        names
    }

    /// Add a handler in front of every existing one.
    pub fn push_handler(&self, handler: InvokeHandler<E>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut chain = self.chain.write().unwrap_or_else(|e| e.into_inner());
        let mut entries = chain.to_vec();
        entries.push(HandlerEntry { id, handler });
        *chain = Arc::from(entries);
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut chain = self.chain.write().unwrap_or_else(|e| e.into_inner());
        if !chain.iter().any(|entry| entry.id == id) {
            return false;
        }
        let entries: Vec<_> = chain.iter().filter(|entry| entry.id != id).cloned().collect();
        *chain = Arc::from(entries);
        true
    }

    pub fn handler_count(&self) -> usize {
        self.chain.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn snapshot(&self) -> Arc<[HandlerEntry<E>]> {
        Arc::clone(&self.chain.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Offer `payload` to each handler, most recently added first, until one consumes it.
    pub fn route(&self, window: &Window<E>, payload: &str) -> bool {
        let chain = self.snapshot();
        for entry in chain.iter().rev() {
            if (entry.handler)(window, payload) {
                trace!(target = "bridge", handler = entry.id.0, "invoke consumed");
                return true;
            }
        }
        trace!(target = "bridge", handlers = chain.len(), "invoke unhandled");
        false
    }
}

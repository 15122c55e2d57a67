use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace, warn};

use crate::bridge::{
    generate_stub, handle_invoke, BindError, Bindable, Binding, BindingRegistry, HandlerId,
    InvokeHandler, SyncFn,
};
use crate::config::BridgeConfig;
use crate::dispatch::{DispatchError, DispatchHandle, DispatchQueue, DispatchToken};
use crate::js::{EvalError, QuickJsEngine, ScriptEngine};

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

impl WindowId {
    fn next() -> Self {
        Self(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Work for a window's UI thread.
#[derive(Debug)]
pub enum UiEvent {
    Dispatch(DispatchToken),
    Invoke(String),
}

/// Where an engine posts the payloads script sends through the invoke channel.
///
/// Payloads are queued and routed by the window loop, never while the engine is still
/// inside the evaluation that produced them.
#[derive(Clone)]
pub struct InvokeSink {
    window: WindowId,
    events: UnboundedSender<UiEvent>,
}

impl InvokeSink {
    pub fn post(&self, payload: impl Into<String>) {
        if self.events.send(UiEvent::Invoke(payload.into())).is_err() {
            debug!(target = "bridge", window = %self.window, "invoke dropped, window is gone");
        }
    }
}

pub struct WindowBuilder<E> {
    config: BridgeConfig,
    catch_all: Option<InvokeHandler<E>>,
}

impl<E> Default for WindowBuilder<E> {
    fn default() -> Self {
        Self {
            config: BridgeConfig::default(),
            catch_all: None,
        }
    }
}

impl<E: ScriptEngine + 'static> WindowBuilder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Receives every invoke no binding handled.
    pub fn invoke_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Window<E>, &str) + Send + Sync + 'static,
    {
        self.catch_all = Some(Arc::new(move |window: &Window<E>, payload: &str| {
            handler(window, payload);
            true
        }));
        self
    }

    /// Build the window. `engine` gets the sink its invoke channel must post into.
    pub fn build<F>(self, engine: F) -> Result<Window<E>>
    where
        F: FnOnce(InvokeSink, &BridgeConfig) -> Result<E>,
    {
        self.config.validate()?;

        let id = WindowId::next();
        let (events_tx, events_rx) = unbounded_channel();
        let sink = InvokeSink {
            window: id,
            events: events_tx.clone(),
        };
        let engine = engine(sink, &self.config)
            .with_context(|| format!("failed to create script engine for {id}"))?;

        let registry = BindingRegistry::new();
        if let Some(catch_all) = self.catch_all {
            registry.push_handler(catch_all);
        }

        debug!(target = "bridge", window = %id, "window created");
        Ok(Window {
            id,
            engine,
            config: self.config,
            registry,
            queue: Arc::new(DispatchQueue::new()),
            events_tx,
            events_rx,
            terminated: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// One window: its engine, its bindings and its UI event loop.
///
/// The window lives on the UI thread. Other threads reach it through a [`DispatchHandle`].
pub struct Window<E> {
    id: WindowId,
    engine: E,
    config: BridgeConfig,
    registry: BindingRegistry<E>,
    queue: Arc<DispatchQueue<E>>,
    events_tx: UnboundedSender<UiEvent>,
    events_rx: UnboundedReceiver<UiEvent>,
    terminated: Arc<AtomicBool>,
}

impl Window<QuickJsEngine> {
    pub fn quickjs(config: BridgeConfig) -> Result<Self> {
        WindowBuilder::new().config(config).build(QuickJsEngine::new)
    }
}

impl<E: ScriptEngine + 'static> Window<E> {
    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn binding(&self, name: &str) -> Option<Arc<Binding>> {
        self.registry.binding(name)
    }

    pub fn binding_names(&self) -> Vec<String> {
        self.registry.binding_names()
    }

    pub fn evaluate(&self, script: &str) -> Result<(), EvalError> {
        if self.is_terminated() {
            return Err(EvalError::Terminated);
        }
        self.engine.evaluate(script)
    }

    /// Expose `target` to script as `name`.
    ///
    /// Script calls `name.method(..)` for every registered method; the current state is
    /// readable as `name.data` and handed to `name.render` after each handled call.
    pub fn bind<T: Bindable>(&self, name: &str, target: Arc<Mutex<T>>) -> Result<SyncFn, BindError> {
        self.registry.check_free(name)?;
        let binding = Arc::new(Binding::new(name, target)?);

        let stub = generate_stub(&binding, &self.config.invoke_channel);
        self.evaluate(&stub)?;

        let sync = SyncFn::new(Arc::clone(&binding), self.config.json_parse_threshold);
        let handler = self.binding_handler(Arc::clone(&binding), sync.clone());
        self.registry.install(Arc::clone(&binding), handler)?;

        if let Err(err) = sync.sync(self) {
            warn!(target = "bridge", window = %self.id, binding = name, error = %err, "initial sync failed");
        }

        info!(
            target = "bridge",
            window = %self.id,
            binding = name,
            methods = binding.methods().len(),
            "bound"
        );
        Ok(sync)
    }

    fn binding_handler(&self, binding: Arc<Binding>, sync: SyncFn) -> InvokeHandler<E> {
        let sync_after_invoke = self.config.sync_after_invoke;
        Arc::new(move |window: &Window<E>, payload: &str| {
            if !handle_invoke(&binding, payload) {
                return false;
            }
            if sync_after_invoke {
                if let Err(err) = sync.sync(window) {
                    warn!(
                        target = "bridge",
                        window = %window.id,
                        binding = binding.name(),
                        error = %err,
                        "sync after invoke failed"
                    );
                }
            }
            true
        })
    }

    /// Drop a binding and stop routing invokes to it. The script-side proxies stay defined.
    pub fn unbind(&self, name: &str) -> bool {
        let removed = self.registry.uninstall(name).is_some();
        if removed {
            info!(target = "bridge", window = %self.id, binding = name, "unbound");
        }
        removed
    }

    /// Add a handler consulted before every existing one.
    pub fn add_invoke_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Window<E>, &str) -> bool + Send + Sync + 'static,
    {
        self.registry.push_handler(Arc::new(handler))
    }

    pub fn remove_invoke_handler(&self, id: HandlerId) -> bool {
        self.registry.remove_handler(id)
    }

    /// Hand a script invoke to the handler chain. Returns whether a handler took it.
    pub fn route_invoke(&self, payload: &str) -> bool {
        let handled = self.registry.route(self, payload);
        if !handled {
            debug!(target = "bridge", window = %self.id, "no handler took invoke");
        }
        handled
    }

    pub fn dispatch_handle(&self) -> DispatchHandle<E> {
        DispatchHandle::new(
            Arc::clone(&self.queue),
            self.events_tx.clone(),
            Arc::clone(&self.terminated),
        )
    }

    /// Queue `job` for a later turn of this window's loop.
    pub fn dispatch<F>(&self, job: F) -> Result<DispatchToken, DispatchError>
    where
        F: FnOnce(&mut Window<E>) + Send + 'static,
    {
        self.dispatch_handle().dispatch(job)
    }

    /// Run the job behind `token`, if it is still pending. Stale tokens are ignored.
    pub fn drain_one(&mut self, token: DispatchToken) -> bool {
        let Some(job) = self.queue.take(token) else {
            trace!(target = "dispatch", token = token.into_raw(), "stale token");
            return false;
        };
        trace!(target = "dispatch", token = token.into_raw(), "running job");
        job(self);
        true
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Process at most one event. Returns `false` once the window is terminated.
    pub fn step(&mut self, blocking: bool) -> bool {
        if self.is_terminated() {
            return false;
        }

        let event = if blocking {
            self.events_rx.blocking_recv()
        } else {
            self.events_rx.try_recv().ok()
        };
        if let Some(event) = event {
            self.handle_event(event);
        }

        !self.is_terminated()
    }

    pub fn run(&mut self) {
        while self.step(true) {}
    }

    /// Process every ready event without blocking. Returns how many were handled.
    pub fn run_until_idle(&mut self) -> usize {
        let mut handled = 0;
        while !self.is_terminated() {
            let Ok(event) = self.events_rx.try_recv() else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Dispatch(token) => {
                self.drain_one(token);
            }
            UiEvent::Invoke(payload) => {
                self.route_invoke(&payload);
            }
        }
    }

    /// Stop the event loop. Pending jobs are never run.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            info!(
                target = "bridge",
                window = %self.id,
                pending = self.queue.len(),
                "window terminated"
            );
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

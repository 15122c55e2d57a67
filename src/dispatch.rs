use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{trace, warn};

use crate::arena::{Arena, ArenaHandle};
use crate::bridge::lock;
use crate::window::{UiEvent, Window};

pub(crate) type Job<E> = Box<dyn FnOnce(&mut Window<E>) + Send>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("window has been terminated")]
    Terminated,
    #[error("window is closed")]
    WindowClosed,
    #[error("dispatch queue has no free slots")]
    Exhausted,
}

/// Address of a pending job. Stale tokens never resolve to a newer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchToken(ArenaHandle);

impl DispatchToken {
    /// Opaque integer form, for handing the token through a foreign boundary.
    pub fn into_raw(self) -> u64 {
        self.0.into_raw()
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(ArenaHandle::from_raw(raw))
    }
}

/// Jobs waiting for the UI thread.
pub struct DispatchQueue<E> {
    jobs: Mutex<Arena<Job<E>>>,
}

impl<E> Default for DispatchQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> DispatchQueue<E> {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Arena::new()),
        }
    }

    /// Queue holding at most `limit` pending jobs.
    pub fn with_capacity_limit(limit: u32) -> Self {
        Self {
            jobs: Mutex::new(Arena::with_slot_limit(limit)),
        }
    }

    /// `None` when every token slot is taken.
    pub(crate) fn enqueue(&self, job: Job<E>) -> Option<DispatchToken> {
        lock(&self.jobs).insert(job).map(DispatchToken)
    }

    /// Remove the job so it can run outside the lock.
    pub(crate) fn take(&self, token: DispatchToken) -> Option<Job<E>> {
        lock(&self.jobs).remove(token.0)
    }

    pub fn contains(&self, token: DispatchToken) -> bool {
        lock(&self.jobs).contains(token.0)
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Submits jobs to a window's UI thread. Cheap to clone and usable from any thread.
pub struct DispatchHandle<E> {
    queue: Arc<DispatchQueue<E>>,
    events: UnboundedSender<UiEvent>,
    terminated: Arc<AtomicBool>,
}

impl<E> Clone for DispatchHandle<E> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            events: self.events.clone(),
            terminated: Arc::clone(&self.terminated),
        }
    }
}

impl<E> DispatchHandle<E> {
    pub(crate) fn new(
        queue: Arc<DispatchQueue<E>>,
        events: UnboundedSender<UiEvent>,
        terminated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            events,
            terminated,
        }
    }

    /// Queue `job` to run once on the UI thread.
    pub fn dispatch<F>(&self, job: F) -> Result<DispatchToken, DispatchError>
    where
        F: FnOnce(&mut Window<E>) + Send + 'static,
    {
        if self.terminated.load(Ordering::Acquire) {
            return Err(DispatchError::Terminated);
        }

        let Some(token) = self.queue.enqueue(Box::new(job)) else {
            warn!(target = "dispatch", pending = self.queue.len(), "dispatch queue exhausted");
            return Err(DispatchError::Exhausted);
        };
        if self.events.send(UiEvent::Dispatch(token)).is_err() {
            drop(self.queue.take(token));
            return Err(DispatchError::WindowClosed);
        }

        trace!(target = "dispatch", token = token.into_raw(), "job queued");
        Ok(token)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

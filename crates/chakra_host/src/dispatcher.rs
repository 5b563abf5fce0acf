//! Single-threaded execution discipline
//!
//! A native runtime must only be touched from the thread that created it.
//! [`ScriptDispatcher`] owns that thread together with the state built on
//! it, and runs every job there synchronously: the caller blocks until the
//! job finishes, receives its result, and sees its panic re-raised.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("the dispatcher thread could not be started: {0}")]
    Spawn(String),

    #[error("the dispatcher has been shut down")]
    Stopped,
}

type Job<S> = Box<dyn FnOnce(&S) + Send>;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// States owned by the dispatchers running on this thread.
    static ACTIVE: RefCell<Vec<(u64, *const ())>> = const { RefCell::new(Vec::new()) };
}

/// Runs jobs against a state `S` that lives on one dedicated thread.
pub struct ScriptDispatcher<S: 'static> {
    id: u64,
    name: String,
    thread_id: ThreadId,
    sender: Mutex<Option<mpsc::Sender<Job<S>>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<S: 'static> ScriptDispatcher<S> {
    /// Starts the worker and builds the state on it.
    ///
    /// Initialization errors are returned here and the worker exits.
    pub fn spawn<E, F>(
        name: &str,
        stack_size: usize,
        init: F,
    ) -> Result<Result<Self, E>, DispatchError>
    where
        E: Send + 'static,
        F: FnOnce() -> Result<S, E> + Send + 'static,
    {
        let id = NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel::<Job<S>>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), E>>(1);

        let thread = thread::Builder::new()
            .name(name.to_owned())
            .stack_size(stack_size)
            .spawn(move || {
                let state = match init() {
                    Ok(state) => state,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                drop(ready_tx);

                ACTIVE.with(|active| {
                    active.borrow_mut().push((id, &state as *const S as *const ()))
                });
                while let Ok(job) = receiver.recv() {
                    job(&state);
                }
                ACTIVE.with(|active| active.borrow_mut().retain(|(active_id, _)| *active_id != id));

                trace!(dispatcher = id, "dispatcher queue closed");
                drop(state);
            })
            .map_err(|err| DispatchError::Spawn(err.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = thread.join();
                return Ok(Err(err));
            }
            Err(_) => {
                // init panicked
                return match thread.join() {
                    Err(payload) => panic::resume_unwind(payload),
                    Ok(()) => Err(DispatchError::Stopped),
                };
            }
        }

        debug!(dispatcher = id, name, "dispatcher started");
        Ok(Ok(Self {
            id,
            name: name.to_owned(),
            thread_id: thread.thread().id(),
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Runs `job` on the owning thread and waits for it.
    ///
    /// Calls made from the owning thread itself run inline.
    pub fn invoke<R, F>(&self, job: F) -> Result<R, DispatchError>
    where
        R: Send + 'static,
        F: FnOnce(&S) -> R + Send + 'static,
    {
        if self.is_owning_thread() {
            return self.invoke_inline(job);
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel::<thread::Result<R>>(1);
        let wrapped: Job<S> = Box::new(move |state: &S| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(state)));
            let _ = reply_tx.send(outcome);
        });

        {
            let sender = self.sender.lock();
            let sender = sender.as_ref().ok_or(DispatchError::Stopped)?;
            sender.send(wrapped).map_err(|_| DispatchError::Stopped)?;
        }

        match reply_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(DispatchError::Stopped),
        }
    }

    fn invoke_inline<R, F>(&self, job: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&S) -> R,
    {
        let state = ACTIVE.with(|active| {
            active
                .borrow()
                .iter()
                .find(|(id, _)| *id == self.id)
                .map(|(_, state)| *state)
        });
        let state = state.ok_or(DispatchError::Stopped)?;
        // SAFETY: the pointer was registered by this dispatcher's worker for
        // a state of type `S`, which stays alive until it is unregistered on
        // this very thread.
        Ok(job(unsafe { &*(state as *const S) }))
    }

    /// Stops accepting work, lets queued jobs finish, drops the state on the
    /// worker and joins it.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if self.is_owning_thread() {
            warn!(
                dispatcher = self.id,
                "shutdown requested from the dispatcher thread; not joining"
            );
            return;
        }
        if let Err(payload) = thread.join() {
            warn!(dispatcher = self.id, "dispatcher thread panicked: {}", panic_message(&*payload));
        }
        debug!(dispatcher = self.id, name = %self.name, "dispatcher stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl<S: 'static> Drop for ScriptDispatcher<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

//! Single owner executor.
//!
//! State that must only be touched from one thread, such as an [`RtpSender`][crate::RtpSender]
//! or a [`Vp9Encoder`][crate::svc::Vp9Encoder], is moved onto a dedicated thread. Other
//! threads reach it by posting closures, which run in posting order.
//!
//! ```
//! use rtpsvc::worker::Worker;
//!
//! let worker = Worker::spawn("counter", 0_u32).unwrap();
//! worker.post(|n| *n += 1).unwrap();
//! assert_eq!(worker.invoke(|n| *n).unwrap(), 1);
//! ```

use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Errors talking to a [`Worker`].
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker thread has stopped, i.e. a task panicked.
    #[error("Worker is gone")]
    Gone,

    /// Failed to start the worker thread or runtime.
    #[error("Failed to start worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Owns a state `S` on a dedicated thread.
///
/// Dropping the worker stops the thread once the queued tasks have run.
pub struct Worker<S> {
    name: String,
    tx: Option<mpsc::UnboundedSender<Task<S>>>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> Worker<S> {
    /// Move `state` onto a new thread named `name`.
    pub fn spawn(name: &str, state: S) -> Result<Worker<S>, WorkerError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task<S>>();

        let rt = tokio::runtime::Builder::new_current_thread().build()?;

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = state;
            rt.block_on(async move {
                while let Some(task) = rx.recv().await {
                    task(&mut state);
                }
            });
        })?;

        debug!("Spawned worker: {}", name);

        Ok(Worker {
            name: name.to_string(),
            tx: Some(tx),
            thread_id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    /// The thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is the worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `f` on the worker without waiting for it.
    pub fn post<F>(&self, f: F) -> Result<(), WorkerError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(WorkerError::Gone)?;
        tx.send(Box::new(f)).map_err(|_| WorkerError::Gone)
    }

    /// Run `f` on the worker and block until it returns.
    ///
    /// Only for synchronous callers. Async callers use [`Worker::call`].
    ///
    /// # Panics
    ///
    /// If called from the worker thread itself, since that would never return.
    pub fn invoke<F, R>(&self, f: F) -> Result<R, WorkerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        assert!(
            !self.is_current(),
            "Blocking invoke on worker {} from its own thread",
            self.name
        );
        let rx = self.send_with_reply(f)?;
        rx.blocking_recv().map_err(|_| WorkerError::Gone)
    }

    /// Run `f` on the worker and await the result.
    pub async fn call<F, R>(&self, f: F) -> Result<R, WorkerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let rx = self.send_with_reply(f)?;
        rx.await.map_err(|_| WorkerError::Gone)
    }

    fn send_with_reply<F, R>(&self, f: F) -> Result<oneshot::Receiver<R>, WorkerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move |state| {
            // The caller may have stopped waiting.
            let _ = reply_tx.send(f(state));
        })?;
        Ok(reply_rx)
    }
}

impl<S> Drop for Worker<S> {
    fn drop(&mut self) {
        // Closing the channel ends the task loop.
        self.tx.take();

        if thread::current().id() == self.thread_id {
            return;
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Worker {} panicked", self.name);
            }
        }
    }
}

impl<S> std::fmt::Debug for Worker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tasks_run_in_order() {
        let worker = Worker::spawn("order", vec![]).unwrap();
        for i in 0..10 {
            worker.post(move |v: &mut Vec<i32>| v.push(i)).unwrap();
        }
        let v = worker.invoke(|v| v.clone()).unwrap();
        assert_eq!(v, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn invoke_runs_on_worker_thread() {
        let worker = Worker::spawn("thread", ()).unwrap();
        let name = worker
            .invoke(|_| thread::current().name().map(|s| s.to_string()))
            .unwrap();
        assert_eq!(name.as_deref(), Some("thread"));
        assert!(!worker.is_current());
    }

    #[test]
    fn gone_after_panic() {
        let worker = Worker::spawn("panics", ()).unwrap();
        let r: Result<(), _> = worker.invoke(|_| panic!("boom"));
        assert!(matches!(r, Err(WorkerError::Gone)));
        assert!(matches!(worker.invoke(|_| 1), Err(WorkerError::Gone)));
    }

    #[test]
    fn call_from_async() {
        let worker = Worker::spawn("async", 41).unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let v = rt.block_on(worker.call(|n| {
            *n += 1;
            *n
        }));
        assert_eq!(v.unwrap(), 42);
    }
}

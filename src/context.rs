//! I/O Context
//!
//! The asynchronous execution engine a Client or Server schedules all socket
//! work on.
//!
//! ## Threading
//! - A single-threaded tokio runtime, driven by one dedicated OS thread.
//! - Work may be posted from any thread, before or after `run()`.
//! - `stop()` wakes the driver thread, which drops the runtime (cancelling
//!   every pending task) before `stop()` joins it. Work posted after that is
//!   discarded.

use std::future::Future;
use std::thread;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;

use crate::error::{NetError, Result};

/// Owns a runtime and the thread that drives it
pub struct IoContext {
    /// Name given to the driver thread
    name: String,

    /// Spawn handle, valid for the whole lifetime of the context
    handle: Handle,

    /// Present until `run()` moves it onto the driver thread
    runtime: Option<Runtime>,

    /// Fires to make the driver thread return
    stop_tx: Option<oneshot::Sender<()>>,

    thread: Option<thread::JoinHandle<()>>,
}

impl IoContext {
    /// Build a context; nothing executes until `run()`
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;

        Ok(Self {
            name: name.into(),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            stop_tx: None,
            thread: None,
        })
    }

    /// Handle for spawning onto this context
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Schedule a closure to run on the I/O thread
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move { f() });
    }

    /// Schedule a task on the I/O thread
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    /// Start the driver thread
    pub fn run(&mut self) -> Result<()> {
        let runtime = self
            .runtime
            .take()
            .ok_or_else(|| NetError::InvalidState(format!("{} already ran", self.name)))?;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let name = self.name.clone();

        let thread = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                tracing::debug!("{} running", name);
                runtime.block_on(async {
                    // Either a stop signal or the sender being dropped ends the loop
                    let _ = stop_rx.await;
                });
                drop(runtime);
                tracing::debug!("{} stopped", name);
            })?;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        Ok(())
    }

    /// Whether the driver thread is running
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the event loop and join the driver thread
    ///
    /// Safe to call repeatedly and before `run()`.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("{} thread panicked", self.name);
            }
        }

        // Never ran: the runtime is still here and drops now
        self.runtime.take();
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.stop();
    }
}

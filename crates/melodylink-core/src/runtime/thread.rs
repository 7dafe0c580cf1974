//! Runtime thread for melodylink.
//!
//! Each runtime thread owns one [`Actor`] (a playback controller, conductor
//! or listener). It:
//! - Drains the actor's FIFO task queue
//! - Ticks the actor at a fixed period
//! - Survives panics in a task or tick, logging them

use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// State owned by a runtime thread.
///
/// All mutation of the actor happens on that thread; other threads reach it
/// only through messages.
pub trait Actor: Send + 'static {
    type Message: Send + 'static;

    /// Apply one queued task.
    fn handle(&mut self, msg: Self::Message);

    /// Called once per period after the queue is drained.
    fn tick(&mut self);
}

/// Handle to a running actor.
pub struct RuntimeHandle<M> {
    /// Sender for queued tasks.
    message_tx: Sender<M>,
    /// Flag to signal shutdown.
    shutdown: Arc<AtomicBool>,
}

impl<M> Clone for RuntimeHandle<M> {
    fn clone(&self) -> Self {
        Self {
            message_tx: self.message_tx.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<M> RuntimeHandle<M> {
    /// Queue a task for the runtime thread.
    pub fn send(&self, msg: M) -> Result<()> {
        if self.is_shutdown_requested() {
            return Err(Error::RuntimeClosed);
        }
        self.message_tx.send(msg).map_err(|_| Error::RuntimeClosed)
    }

    /// Get a clone of the message sender.
    pub fn message_sender(&self) -> Sender<M> {
        self.message_tx.clone()
    }

    /// Signal the runtime to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// A named runtime thread driving one actor.
pub struct Runtime<M> {
    name: String,
    handle: RuntimeHandle<M>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> Runtime<M> {
    /// Start a thread that ticks `actor` every `interval`.
    pub fn spawn<A>(name: &str, actor: A, interval: Duration) -> Result<Self>
    where
        A: Actor<Message = M>,
    {
        let (message_tx, message_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = RuntimeHandle {
            message_tx,
            shutdown: Arc::clone(&shutdown),
        };

        let thread_name = name.to_string();
        let thread_handle = thread::Builder::new()
            .name(format!("melodylink-{}", name))
            .spawn(move || {
                let mut rt = RuntimeThread {
                    name: thread_name,
                    actor,
                    message_rx,
                };
                rt.run(shutdown, interval);
            })?;

        log::info!("[RUNTIME] Started '{}' ticking every {:?}", name, interval);
        Ok(Self {
            name: name.to_string(),
            handle,
            thread_handle: Some(thread_handle),
        })
    }
}

impl<M> Runtime<M> {
    /// Get a handle to interact with the runtime.
    pub fn handle(&self) -> &RuntimeHandle<M> {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shut down the runtime and wait for its thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.handle.shutdown();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            log::info!("[RUNTIME] Stopped '{}'", self.name);
        }
    }
}

impl<M> Drop for Runtime<M> {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

struct RuntimeThread<A: Actor> {
    name: String,
    actor: A,
    message_rx: Receiver<A::Message>,
}

impl<A: Actor> RuntimeThread<A> {
    fn run(&mut self, shutdown: Arc<AtomicBool>, interval: Duration) {
        let mut next = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            self.drain_messages();
            self.guarded("tick", |actor| actor.tick());

            next += interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                // Fell behind; do not try to catch up with a burst of ticks.
                next = now;
            }
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.message_rx.try_recv() {
            self.guarded("task", move |actor| actor.handle(msg));
        }
    }

    fn guarded(&mut self, what: &str, f: impl FnOnce(&mut A)) {
        let actor = &mut self.actor;
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| f(actor))) {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("[RUNTIME] '{}' {} panicked: {}", self.name, what, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records what it saw into shared state.
    struct Probe {
        seen: Arc<Mutex<Vec<u32>>>,
        ticks: Arc<Mutex<u32>>,
    }

    impl Actor for Probe {
        type Message = u32;

        fn handle(&mut self, msg: u32) {
            if msg == 0 {
                panic!("zero");
            }
            self.seen.lock().unwrap().push(msg);
        }

        fn tick(&mut self) {
            *self.ticks.lock().unwrap() += 1;
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_tasks_run_in_order_and_survive_panics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ticks = Arc::new(Mutex::new(0));
        let probe = Probe {
            seen: Arc::clone(&seen),
            ticks: Arc::clone(&ticks),
        };
        let runtime = Runtime::spawn("probe", probe, Duration::from_millis(1)).unwrap();

        for msg in [1, 2, 0, 3] {
            runtime.handle().send(msg).unwrap();
        }
        wait_for(|| seen.lock().unwrap().len() == 3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        wait_for(|| *ticks.lock().unwrap() > 2);

        let handle = runtime.handle().clone();
        runtime.shutdown();
        assert!(matches!(handle.send(4), Err(Error::RuntimeClosed)));
    }
}

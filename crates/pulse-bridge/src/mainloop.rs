//! Threaded mainloop: the server's callback thread and the single lock
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   lock()/wait()    ┌─────────────────────────┐
//! │   Host threads   │───────────────────►│  Mutex<Session<S>>      │
//! │ open/reset/read  │◄───notify_all()────│  + Condvar              │
//! └──────────────────┘                    └────────────▲────────────┘
//!                                                      │ lock, drain
//!                                                      │ next_event(),
//!                                                      │ dispatch
//!                                         ┌────────────┴────────────┐
//!                                         │  pulse-mainloop thread  │
//!                                         │  (idles on ServerIo     │
//!                                         │   with the lock free)   │
//!                                         └─────────────────────────┘
//! ```
//!
//! The mainloop thread holds the lock for the whole time it runs callbacks,
//! so audio copies never race with teardown or a resize. A host thread that
//! must wait for the server calls [`LoopGuard::wait`], which releases the lock
//! until the next signal. Waits have no timeout: every caller re-checks its
//! own predicate after each wake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{BackendError, BackendResult};
use crate::server::{AudioServer, ServerIo};
use crate::session::Session;

/// How long the mainloop thread idles before re-checking for shutdown
const IDLE_TIMEOUT: Duration = Duration::from_millis(50);

struct Shared<S> {
    session: Mutex<Session<S>>,
    cond: Condvar,
}

/// Dedicated callback thread plus the lock serializing server access
///
/// Stops (and joins the thread) when dropped. Never drop it while holding a
/// [`LoopGuard`] from the same loop.
pub struct ThreadedMainloop<S: AudioServer> {
    shared: Arc<Shared<S>>,
    io: S::Io,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl<S: AudioServer> ThreadedMainloop<S> {
    /// Move the session behind the lock and start the callback thread
    pub fn start(session: Session<S>) -> BackendResult<Self> {
        let io = session.server.io();
        let shared = Arc::new(Shared {
            session: Mutex::new(session),
            cond: Condvar::new(),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_shared = shared.clone();
        let thread_io = io.clone();
        let thread_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name("pulse-mainloop".to_string())
            .spawn(move || Self::run(thread_shared, thread_io, thread_shutdown))
            .map_err(|e| BackendError::Thread(e.to_string()))?;

        Ok(Self {
            shared,
            io,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Acquire the mainloop lock
    pub fn lock(&self) -> LoopGuard<'_, S> {
        LoopGuard {
            guard: self.shared.session.lock(),
            cond: &self.shared.cond,
        }
    }

    /// Stop the callback thread and wait for it to exit
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        self.io.wake();
        if handle.join().is_err() {
            log::error!("Mainloop thread panicked");
        }
        log::debug!("Mainloop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Main loop running on the dedicated thread
    fn run(shared: Arc<Shared<S>>, io: S::Io, shutdown: Arc<AtomicBool>) {
        log::debug!("Mainloop thread started");

        while !shutdown.load(Ordering::Acquire) {
            io.wait(IDLE_TIMEOUT);

            let mut signal = false;
            {
                let mut session = shared.session.lock();
                while let Some(event) = session.server.next_event() {
                    log::trace!("Dispatching {:?}", event);
                    signal |= session.dispatch(event);
                }
            }

            if signal {
                shared.cond.notify_all();
            }
        }

        log::debug!("Mainloop thread exiting");
    }
}

impl<S: AudioServer> Drop for ThreadedMainloop<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Host-side hold on the mainloop lock
pub struct LoopGuard<'a, S> {
    guard: MutexGuard<'a, Session<S>>,
    cond: &'a Condvar,
}

impl<S> LoopGuard<'_, S> {
    /// Release the lock until the mainloop thread signals, then re-acquire it
    ///
    /// Wakes can be spurious or caused by unrelated transitions; callers loop
    /// on their own condition.
    pub fn wait(&mut self) {
        self.cond.wait(&mut self.guard);
    }
}

impl<S> std::ops::Deref for LoopGuard<'_, S> {
    type Target = Session<S>;

    fn deref(&self) -> &Session<S> {
        &self.guard
    }
}

impl<S> std::ops::DerefMut for LoopGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut Session<S> {
        &mut self.guard
    }
}

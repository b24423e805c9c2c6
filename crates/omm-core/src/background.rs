//! Periodic background threads (gauge saver, trash sweep).

use omm_common::{OmError, OmResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Longest stretch a worker sleeps before re-checking the stop flag
const STOP_POLL: Duration = Duration::from_millis(50);

/// A named thread running `tick` every `interval` until shut down
pub struct BackgroundWorker {
    name: String,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl BackgroundWorker {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> OmResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("omm-{name}"))
            .spawn(move || {
                info!("Background worker '{}' started", thread_name);
                while sleep_unless_stopped(&stop, interval) {
                    tick();
                }
                debug!("Background worker '{}' exiting", thread_name);
            })
            .map_err(|e| OmError::internal(format!("failed to spawn {name} worker: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the thread and wait for the tick in progress to finish
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
            info!("Background worker '{}' stopped", self.name);
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleep for `interval`; false if the stop flag was raised meanwhile
fn sleep_unless_stopped(stop: &AtomicBool, interval: Duration) -> bool {
    let until = Instant::now() + interval;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= until {
            return true;
        }
        thread::sleep((until - now).min(STOP_POLL));
    }
}

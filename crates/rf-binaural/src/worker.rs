//! Background reinit worker
//!
//! Polls the controller's reinit routine at a fixed interval on a named
//! thread, standing in for a host timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::binauraliser::Inner;

/// Owns the worker thread; stops and joins it on drop
pub struct ReinitWorker {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl ReinitWorker {
    pub(crate) fn start(inner: Arc<Inner>, interval: Duration) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("rf-binaural-reinit".into())
            .spawn(move || {
                while flag.load(Ordering::Relaxed) {
                    if let Err(err) = inner.perform_reinit() {
                        log::error!("Binaural reinit failed: {err}");
                    }
                    thread::sleep(interval);
                }
                log::debug!("Reinit worker exiting");
            })?;

        log::debug!("Reinit worker started ({} ms interval)", interval.as_millis());
        Ok(Self {
            handle: Some(handle),
            running,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Reinit worker panicked");
            }
        }
    }
}

impl Drop for ReinitWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

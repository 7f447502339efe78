//! Processing thread
//!
//! Owns the [`Processor`] while running. Stopping hands it back, so the
//! pipeline state (baseline, carriers, zones) survives a stop/start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::processor::Processor;

/// Processing thread handle
///
/// When dropped, signals the thread to stop and waits for it.
pub struct ProcessingThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<Processor>>,
}

impl ProcessingThread {
    /// Spawn the loop; it runs until [`stop`](Self::stop) or drop
    pub fn spawn(mut processor: Processor) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("soundplane-process".to_string())
            .spawn(move || {
                log::info!("[PROCESS] Thread started");
                let timeout = processor.queue_timeout();
                while !shutdown_clone.load(Ordering::Relaxed) {
                    processor.cycle(timeout);
                }
                log::info!("[PROCESS] Thread stopped");
                processor
            })
            .expect("Failed to spawn processing thread");

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal shutdown and wait; returns the processor unless the thread panicked
    pub fn stop(mut self) -> Option<Processor> {
        self.join()
    }

    fn join(&mut self) -> Option<Processor> {
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(processor) => Some(processor),
            Err(_) => {
                log::error!("[PROCESS] Thread panicked");
                None
            }
        }
    }
}

impl Drop for ProcessingThread {
    fn drop(&mut self) {
        self.join();
    }
}

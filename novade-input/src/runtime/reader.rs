// src/runtime/reader.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use super::multiplexer::MultiplexingDispatchable;
use crate::error::InputError;

/// Thread driving one platform's [`MultiplexingDispatchable`].
pub struct ReaderThread {
    name: String,
    multiplexer: Arc<MultiplexingDispatchable>,
    stop_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderThread {
    pub fn new(name: impl Into<String>, multiplexer: Arc<MultiplexingDispatchable>) -> Self {
        Self {
            name: name.into(),
            multiplexer,
            stop_requested: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> Result<(), InputError> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        let multiplexer = self.multiplexer.clone();
        let stop_requested = self.stop_requested.clone();
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                debug!("ReaderThread: '{}' running.", name);
                while !stop_requested.load(Ordering::SeqCst) {
                    if let Err(e) = multiplexer.dispatch(None) {
                        error!("ReaderThread: '{}' failed to wait for input: {}", name, e);
                        break;
                    }
                }
                debug!("ReaderThread: '{}' exiting.", name);
            })
            .map_err(|e| InputError::Thread(format!("failed to spawn '{}': {}", self.name, e)))?;
        self.handle = Some(handle);
        info!("ReaderThread: Started '{}'.", self.name);
        Ok(())
    }

    /// Requests the loop to exit, wakes it and joins.
    pub fn stop(&mut self) -> Result<(), InputError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop_requested.store(true, Ordering::SeqCst);
        self.multiplexer.wake()?;
        handle
            .join()
            .map_err(|_| InputError::Thread(format!("'{}' panicked", self.name)))?;
        info!("ReaderThread: Stopped '{}'.", self.name);
        Ok(())
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("ReaderThread: Failed to stop '{}' on drop: {}", self.name, e);
        }
    }
}

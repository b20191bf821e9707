//! Edge-triggered readiness multiplexing over device descriptors.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use polling::{Event, Events, PollMode, Poller};
use tracing::{debug, trace, warn};

use crate::error::InputError;

/// A readiness-driven source of work.
///
/// Watches are edge-triggered: `dispatch` must consume everything available on
/// `watch_fd` before returning.
pub trait Dispatchable: Send + Sync {
    fn watch_fd(&self) -> BorrowedFd<'_>;

    /// Handles readiness. Returning `false` removes the watch.
    fn dispatch(&self) -> bool;
}

/// Key identifying one watch inside a [`MultiplexingDispatchable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchKey(usize);

pub struct MultiplexingDispatchable {
    poller: Poller,
    watches: Mutex<HashMap<usize, Arc<dyn Dispatchable>>>,
    next_key: AtomicUsize,
}

impl MultiplexingDispatchable {
    pub fn new() -> Result<Self, InputError> {
        Ok(Self {
            poller: Poller::new()?,
            watches: Mutex::new(HashMap::new()),
            next_key: AtomicUsize::new(1),
        })
    }

    pub fn add_watch(&self, dispatchable: Arc<dyn Dispatchable>) -> Result<WatchKey, InputError> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let raw_fd = dispatchable.watch_fd().as_raw_fd();
        // SAFETY: the descriptor is owned by `dispatchable`, which stays in `watches`
        // until `remove_watch` deletes it from the poller.
        unsafe {
            self.poller
                .add_with_mode(raw_fd, Event::readable(key), PollMode::Edge)?;
        }
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, dispatchable);
        debug!("MultiplexingDispatchable: Watching fd {} as key {}", raw_fd, key);
        Ok(WatchKey(key))
    }

    pub fn remove_watch(&self, key: WatchKey) {
        let removed = self
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key.0);
        match removed {
            Some(dispatchable) => {
                if let Err(e) = self.poller.delete(dispatchable.watch_fd()) {
                    warn!("MultiplexingDispatchable: Failed to delete watch {}: {}", key.0, e);
                }
                debug!("MultiplexingDispatchable: Removed watch {}", key.0);
            }
            None => trace!("MultiplexingDispatchable: Watch {} already gone", key.0),
        }
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Forces a blocked [`dispatch`](Self::dispatch) to return.
    pub fn wake(&self) -> Result<(), InputError> {
        self.poller.notify()?;
        Ok(())
    }

    /// Waits for readiness and dispatches every ready watch. Returns the number of
    /// watches dispatched; a wake-up alone yields zero.
    pub fn dispatch(&self, timeout: Option<Duration>) -> Result<usize, InputError> {
        let mut events = Events::new();
        match self.poller.wait(&mut events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e.into()),
        }

        let mut dispatched = 0;
        for event in events.iter() {
            let target = self
                .watches
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&event.key)
                .cloned();
            let Some(target) = target else {
                trace!("MultiplexingDispatchable: Readiness for removed watch {}", event.key);
                continue;
            };
            dispatched += 1;
            if !target.dispatch() {
                debug!("MultiplexingDispatchable: Watch {} finished", event.key);
                self.remove_watch(WatchKey(event.key));
            }
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    struct Drain {
        stream: UnixStream,
        bytes: Mutex<Vec<u8>>,
    }

    impl Dispatchable for Drain {
        fn watch_fd(&self) -> BorrowedFd<'_> {
            self.stream.as_fd()
        }

        fn dispatch(&self) -> bool {
            let mut buf = [0u8; 64];
            loop {
                match (&self.stream).read(&mut buf) {
                    Ok(0) => return false,
                    Ok(n) => self.bytes.lock().unwrap().extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
                    Err(_) => return false,
                }
            }
        }
    }

    #[test]
    fn test_dispatches_ready_watch_and_drops_closed_one() {
        let multiplexer = MultiplexingDispatchable::new().unwrap();
        let (mut writer, reader) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let drain = Arc::new(Drain {
            stream: reader,
            bytes: Mutex::new(Vec::new()),
        });
        multiplexer.add_watch(drain.clone()).unwrap();

        writer.write_all(b"abc").unwrap();
        assert_eq!(multiplexer.dispatch(Some(Duration::from_secs(1))).unwrap(), 1);
        assert_eq!(*drain.bytes.lock().unwrap(), b"abc".to_vec());

        drop(writer);
        multiplexer.dispatch(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(multiplexer.watch_count(), 0);
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let multiplexer = Arc::new(MultiplexingDispatchable::new().unwrap());
        let waiter = {
            let multiplexer = multiplexer.clone();
            std::thread::spawn(move || multiplexer.dispatch(None).unwrap())
        };
        std::thread::sleep(Duration::from_millis(20));
        multiplexer.wake().unwrap();
        assert_eq!(waiter.join().unwrap(), 0);
    }
}

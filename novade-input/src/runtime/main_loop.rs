// src/runtime/main_loop.rs
use std::time::{Duration, Instant};

use calloop::channel::{self, Channel, Sender};
use calloop::{EventLoop, LoopHandle};
use tracing::{debug, warn};

use crate::error::InputError;

/// State handed to every action and event source on the owning thread.
pub struct MainLoopContext {
    pub handle: LoopHandle<'static, MainLoopContext>,
}

pub type ServerAction = Box<dyn FnOnce(&mut MainLoopContext) + Send + 'static>;

/// Serialized queue of closures executed on the owning thread.
///
/// Hub notifications and sender registrations are marshaled through this queue
/// so observers only ever run on the thread driving [`MainLoop`].
#[derive(Clone)]
pub struct ServerActionQueue {
    sender: Sender<ServerAction>,
}

impl std::fmt::Debug for ServerActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerActionQueue").finish_non_exhaustive()
    }
}

impl ServerActionQueue {
    pub fn enqueue<F>(&self, action: F)
    where
        F: FnOnce(&mut MainLoopContext) + Send + 'static,
    {
        if self.sender.send(Box::new(action)).is_err() {
            warn!("ServerActionQueue: Main loop is gone, dropping action.");
        }
    }
}

/// The owning thread's event loop.
pub struct MainLoop {
    event_loop: EventLoop<'static, MainLoopContext>,
    context: MainLoopContext,
    queue: ServerActionQueue,
}

impl MainLoop {
    pub fn new() -> Result<Self, InputError> {
        let event_loop: EventLoop<'static, MainLoopContext> =
            EventLoop::try_new().map_err(|e| InputError::EventLoop(e.to_string()))?;
        let (sender, actions): (Sender<ServerAction>, Channel<ServerAction>) = channel::channel();

        event_loop
            .handle()
            .insert_source(actions, |event, _, context| match event {
                channel::Event::Msg(action) => action(context),
                channel::Event::Closed => debug!("MainLoop: Action queue closed."),
            })
            .map_err(|e| InputError::EventLoop(e.error.to_string()))?;

        let context = MainLoopContext {
            handle: event_loop.handle(),
        };
        debug!("MainLoop: Created.");
        Ok(Self {
            event_loop,
            context,
            queue: ServerActionQueue { sender },
        })
    }

    pub fn queue(&self) -> ServerActionQueue {
        self.queue.clone()
    }

    pub fn handle(&self) -> LoopHandle<'static, MainLoopContext> {
        self.event_loop.handle()
    }

    /// Runs one iteration, waiting at most `timeout` for readiness.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<(), InputError> {
        self.event_loop
            .dispatch(timeout, &mut self.context)
            .map_err(|e| InputError::EventLoop(e.to_string()))
    }

    /// Dispatches until `done` returns true or `timeout` elapses. Returns whether
    /// the condition was met.
    pub fn run_until(&mut self, timeout: Duration, mut done: impl FnMut() -> bool) -> Result<bool, InputError> {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.dispatch(Some((deadline - now).min(Duration::from_millis(10))))?;
        }
    }
}

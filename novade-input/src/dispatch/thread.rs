// src/dispatch/thread.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use calloop::channel::{self, Channel, Sender};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle};
use tracing::{debug, error, info, trace, warn};

use super::{InputDispatcher, RepeatArm, SurfaceInputDispatcher};
use crate::error::InputError;
use crate::events::NormalizedEvent;

enum DispatchMessage {
    Event(NormalizedEvent),
    Flush(mpsc::Sender<()>),
    Stop,
}

/// Producer side of the dispatch thread. Cloned into every device sink.
#[derive(Clone)]
pub struct DispatchQueue {
    sender: Sender<DispatchMessage>,
    admitting: Arc<AtomicBool>,
}

impl DispatchQueue {
    /// Blocks until every event queued before this call has been processed.
    pub fn flush(&self, timeout: Duration) -> Result<(), InputError> {
        let (reply, done) = mpsc::channel();
        self.sender
            .send(DispatchMessage::Flush(reply))
            .map_err(|_| InputError::Thread("dispatch thread is not running".to_string()))?;
        done.recv_timeout(timeout)
            .map_err(|e| InputError::Thread(format!("dispatch flush did not complete: {}", e)))
    }

    pub fn is_admitting(&self) -> bool {
        self.admitting.load(Ordering::SeqCst)
    }
}

impl InputDispatcher for DispatchQueue {
    fn dispatch(&self, event: NormalizedEvent) {
        if !self.is_admitting() {
            trace!("DispatchQueue: Not admitting, dropping {} event", event.kind_name());
            return;
        }
        if self.sender.send(DispatchMessage::Event(event)).is_err() {
            warn!("DispatchQueue: Dispatch thread is gone, dropping event");
        }
    }
}

struct DispatchState {
    dispatcher: SurfaceInputDispatcher,
    handle: LoopHandle<'static, DispatchState>,
    running: bool,
}

impl DispatchState {
    fn process(&mut self, event: NormalizedEvent) {
        let dispositions = self.dispatcher.process(event);
        trace!("DispatchThread: {:?}", dispositions);
        for arm in self.dispatcher.take_repeat_requests() {
            self.schedule_repeat(arm);
        }
    }

    fn schedule_repeat(&mut self, arm: RepeatArm) {
        let timer = Timer::from_duration(arm.delay);
        let inserted = self.handle.insert_source(timer, move |_, _, state: &mut DispatchState| {
            match state
                .dispatcher
                .repeat_key(arm.device, arm.scan_code, arm.generation)
            {
                Some(dispositions) => {
                    trace!("DispatchThread: Key repeat {:?}", dispositions);
                    TimeoutAction::ToDuration(state.dispatcher.repeat_interval())
                }
                None => TimeoutAction::Drop,
            }
        });
        if let Err(e) = inserted {
            warn!("DispatchThread: Failed to arm key repeat: {}", e.error);
        }
    }
}

/// Dedicated thread running the dispatch pipeline on its own calloop loop.
pub struct DispatchThread {
    queue: DispatchQueue,
    pending: Option<(Channel<DispatchMessage>, SurfaceInputDispatcher)>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchThread {
    pub fn new(dispatcher: SurfaceInputDispatcher) -> Self {
        let (sender, channel) = channel::channel();
        Self {
            queue: DispatchQueue {
                sender,
                admitting: Arc::new(AtomicBool::new(false)),
            },
            pending: Some((channel, dispatcher)),
            handle: None,
        }
    }

    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the thread and opens admission once its loop is ready.
    pub fn start(&mut self) -> Result<(), InputError> {
        let Some((channel, dispatcher)) = self.pending.take() else {
            return Err(InputError::Thread("dispatch thread can only be started once".to_string()));
        };
        let (ready_tx, ready_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("input-dispatch".to_string())
            .spawn(move || run_dispatch_loop(channel, dispatcher, ready_tx))
            .map_err(|e| InputError::Thread(format!("failed to spawn dispatch thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(InputError::Thread("dispatch thread exited during start-up".to_string()));
            }
        }
        self.handle = Some(handle);
        self.queue.admitting.store(true, Ordering::SeqCst);
        info!("DispatchThread: Started.");
        Ok(())
    }

    /// Closes admission, lets queued events drain and joins the thread.
    pub fn stop(&mut self) -> Result<(), InputError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.queue.admitting.store(false, Ordering::SeqCst);
        if self.queue.sender.send(DispatchMessage::Stop).is_err() {
            debug!("DispatchThread: Loop already closed.");
        }
        handle
            .join()
            .map_err(|_| InputError::Thread("dispatch thread panicked".to_string()))?;
        info!("DispatchThread: Stopped.");
        Ok(())
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("DispatchThread: Failed to stop on drop: {}", e);
        }
    }
}

fn run_dispatch_loop(
    channel: Channel<DispatchMessage>,
    dispatcher: SurfaceInputDispatcher,
    ready: mpsc::Sender<Result<(), InputError>>,
) {
    let mut event_loop: EventLoop<'static, DispatchState> = match EventLoop::try_new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            let _ = ready.send(Err(InputError::EventLoop(e.to_string())));
            return;
        }
    };
    let inserted = event_loop
        .handle()
        .insert_source(channel, |event, _, state: &mut DispatchState| match event {
            channel::Event::Msg(DispatchMessage::Event(event)) => state.process(event),
            channel::Event::Msg(DispatchMessage::Flush(reply)) => {
                let _ = reply.send(());
            }
            channel::Event::Msg(DispatchMessage::Stop) | channel::Event::Closed => state.running = false,
        });
    if let Err(e) = inserted {
        let _ = ready.send(Err(InputError::EventLoop(e.error.to_string())));
        return;
    }

    let mut state = DispatchState {
        dispatcher,
        handle: event_loop.handle(),
        running: true,
    };
    let _ = ready.send(Ok(()));
    debug!("DispatchThread: Loop running.");
    while state.running {
        if let Err(e) = event_loop.dispatch(None, &mut state) {
            error!("DispatchThread: Event loop failed: {}", e);
            break;
        }
    }
    debug!("DispatchThread: Loop exiting.");
}

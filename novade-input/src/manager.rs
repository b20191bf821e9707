// src/manager.rs
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::InputConfig;
use crate::device::evdev::{enumerate_device_nodes, DeviceNode, EvdevProvider};
use crate::device::{DefaultInputDeviceHub, InputPlatform, ProbingDeviceFactory};
use crate::dispatch::{
    CompositeEventFilter, DispatchQueue, DispatchThread, EventRouter, InputScene, KeyboardFocus,
    SurfaceInputDispatcher,
};
use crate::error::InputError;
use crate::runtime::{MultiplexingDispatchable, ReaderThread, ServerActionQueue};
use crate::sender::{InputSendObserver, InputSender};

/// Owns the input threads and the objects connecting them.
///
/// Device events flow reader thread → hub sink → [`DispatchQueue`] → dispatch
/// thread → [`InputSender`]. Hub observers and acknowledgements run on the
/// thread driving the main loop behind `queue`.
pub struct InputManager {
    config: InputConfig,
    hub: Arc<DefaultInputDeviceHub>,
    platform: InputPlatform,
    sender: InputSender,
    focus: Arc<KeyboardFocus>,
    filters: Arc<CompositeEventFilter>,
    dispatch_queue: DispatchQueue,
    dispatch: DispatchThread,
    reader: ReaderThread,
}

impl InputManager {
    pub fn new(
        config: InputConfig,
        queue: ServerActionQueue,
        scene: Arc<dyn InputScene>,
        send_observer: Arc<dyn InputSendObserver>,
    ) -> Result<Self, InputError> {
        config.validate()?;
        info!("InputManager: Initializing...");

        let sender = InputSender::new(send_observer, queue.clone(), config.sender.backpressure_threshold)?;
        let focus = Arc::new(KeyboardFocus::new());
        let filters = Arc::new(CompositeEventFilter::new());
        let dispatcher = SurfaceInputDispatcher::new(
            EventRouter::new(scene, focus.clone()),
            filters.clone(),
            sender.clone(),
            &config.keyboard,
        );
        let dispatch = DispatchThread::new(dispatcher);
        let dispatch_queue = dispatch.queue();

        let multiplexer = Arc::new(MultiplexingDispatchable::new()?);
        let reader = ReaderThread::new("input-reader", multiplexer.clone());
        let hub = Arc::new(DefaultInputDeviceHub::new(
            Arc::new(dispatch_queue.clone()),
            multiplexer,
            queue,
        ));

        let mut factory = ProbingDeviceFactory::new();
        factory.add_provider(Arc::new(EvdevProvider::new(config.clone())));
        let platform = InputPlatform::new(factory, hub.clone());

        Ok(Self {
            config,
            hub,
            platform,
            sender,
            focus,
            filters,
            dispatch_queue,
            dispatch,
            reader,
        })
    }

    /// Starts the dispatch thread, then the reader thread.
    pub fn start(&mut self) -> Result<(), InputError> {
        self.dispatch.start()?;
        if let Err(e) = self.reader.start() {
            error!("InputManager: Reader thread failed to start: {}", e);
            self.dispatch.stop()?;
            return Err(e);
        }
        info!("InputManager: Started.");
        Ok(())
    }

    /// Stops the reader thread, then drains and stops the dispatch thread.
    pub fn stop(&mut self) -> Result<(), InputError> {
        self.reader.stop()?;
        self.dispatch.stop()?;
        info!("InputManager: Stopped.");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.dispatch.is_running() && self.reader.is_running()
    }

    /// Probes every `event*` node in `dir` and registers the supported ones.
    /// Returns how many devices were registered.
    pub fn scan_devices(&self, dir: &Path) -> Result<usize, InputError> {
        let mut registered = 0;
        for path in enumerate_device_nodes(dir)? {
            let node = match DeviceNode::probe_path(&path) {
                Ok(node) => node,
                Err(e) => {
                    warn!("InputManager: Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            match self.platform.device_node_added(&node) {
                Ok(Some(_)) => registered += 1,
                Ok(None) => {}
                Err(e) => warn!("InputManager: Failed to open {}: {}", path.display(), e),
            }
        }
        info!("InputManager: Registered {} devices from {}", registered, dir.display());
        Ok(registered)
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<DefaultInputDeviceHub> {
        &self.hub
    }

    pub fn platform(&self) -> &InputPlatform {
        &self.platform
    }

    pub fn sender(&self) -> &InputSender {
        &self.sender
    }

    pub fn keyboard_focus(&self) -> &Arc<KeyboardFocus> {
        &self.focus
    }

    pub fn event_filters(&self) -> &Arc<CompositeEventFilter> {
        &self.filters
    }

    pub fn dispatch_queue(&self) -> &DispatchQueue {
        &self.dispatch_queue
    }
}

impl Drop for InputManager {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("InputManager: Failed to stop on drop: {}", e);
        }
    }
}

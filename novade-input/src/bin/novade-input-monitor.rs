//! Standalone monitor for the NovaDE input pipeline.
//!
//! Scans `/dev/input` (or the directory given as second argument), registers every
//! supported device and delivers all input to a single full-screen surface whose
//! client end logs and acknowledges each event. Runs until SIGINT or SIGTERM.
//!
//! Usage: `novade-input-monitor [config.toml] [device-dir]`

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, error, info, warn};

use novade_input::device::InputDeviceInfo;
use novade_input::dispatch::EventFilter;
use novade_input::events::{Point, Rectangle};
use novade_input::sender::{ChannelId, FailureReason, InputResponse, SendEntry};
use novade_input::{
    init_logging, init_minimal_logging, InputChannel, InputConfig, InputDeviceObserver, InputError, InputManager,
    InputReceiver, InputScene, InputSendObserver, InputSurface, MainLoop, NormalizedEvent,
};

struct MonitorSurface {
    bounds: Rectangle,
    channel: Arc<InputChannel>,
}

impl InputSurface for MonitorSurface {
    fn name(&self) -> String {
        "monitor".to_string()
    }

    fn input_bounds(&self) -> Rectangle {
        self.bounds
    }

    fn input_channel(&self) -> Option<Arc<InputChannel>> {
        Some(self.channel.clone())
    }
}

struct MonitorScene {
    surface: Arc<dyn InputSurface>,
}

impl InputScene for MonitorScene {
    fn surface_at(&self, point: Point) -> Option<Arc<dyn InputSurface>> {
        self.surface
            .input_area_contains(point)
            .then(|| self.surface.clone())
    }
}

struct DeviceLog;

impl InputDeviceObserver for DeviceLog {
    fn device_added(&self, device: &InputDeviceInfo) {
        info!(
            "Monitor: + device {} '{}' [{}] {:?}",
            device.id, device.name, device.unique_id, device.capabilities
        );
    }

    fn device_removed(&self, device: &InputDeviceInfo) {
        info!("Monitor: - device {} '{}'", device.id, device.name);
    }

    fn changes_complete(&self) {
        debug!("Monitor: Device list settled");
    }
}

struct EventLog;

impl EventFilter for EventLog {
    fn handle(&self, event: &NormalizedEvent) -> bool {
        debug!("Monitor: {} event from device {}", event.kind_name(), event.device_id);
        false
    }
}

struct DeliveryLog;

impl InputSendObserver for DeliveryLog {
    fn send_succeeded(&self, entry: &SendEntry, response: InputResponse) {
        debug!("Monitor: Sequence {} finished: {:?}", entry.sequence_id(), response);
    }

    fn send_failed(&self, entry: &SendEntry, reason: FailureReason) {
        warn!("Monitor: Sequence {} failed: {:?}", entry.sequence_id(), reason);
    }

    fn client_blocked(&self, _event: &NormalizedEvent, channel: ChannelId) {
        warn!("Monitor: Client on channel {} is not keeping up", channel);
    }
}

fn run_client(receiver: InputReceiver, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        match receiver.wait(Duration::from_millis(200)) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                error!("Monitor: Waiting for input failed: {}", e);
                return;
            }
        }
        loop {
            match receiver.receive() {
                Ok(Some((sequence_id, event))) => {
                    info!("Monitor: #{} {:?}", sequence_id, event);
                    if let Err(e) = receiver.finish(sequence_id, true) {
                        warn!("Monitor: Failed to acknowledge {}: {}", sequence_id, e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    info!("Monitor: Channel closed: {}", e);
                    return;
                }
            }
        }
    }
}

fn main() -> Result<(), InputError> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => InputConfig::load_from_file(&PathBuf::from(path))?,
        None => InputConfig::default(),
    };
    let device_dir = args.next().map_or_else(|| PathBuf::from("/dev/input"), PathBuf::from);
    if let Err(e) = init_logging(&config.logging) {
        init_minimal_logging();
        warn!("Monitor: Falling back to minimal logging: {}", e);
    }

    let mut main_loop = MainLoop::new()?;
    let channel = InputChannel::new("monitor")?;
    let receiver = channel
        .take_receiver()
        .ok_or_else(|| InputError::InvalidArgument("client end already taken".to_string()))?;
    let surface: Arc<dyn InputSurface> = Arc::new(MonitorSurface {
        bounds: config.touch.target_rect(),
        channel,
    });

    let mut manager = InputManager::new(
        config,
        main_loop.queue(),
        Arc::new(MonitorScene {
            surface: surface.clone(),
        }),
        Arc::new(DeliveryLog),
    )?;
    manager.keyboard_focus().set_focus(Some(&surface));
    manager.event_filters().append(Arc::new(EventLog));
    manager.hub().add_observer(Arc::new(DeviceLog));
    manager.start()?;
    manager.scan_devices(&device_dir)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signal_flag = shutdown.clone();
    std::thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!("Monitor: Received signal {}, shutting down", signal);
                signal_flag.store(true, Ordering::SeqCst);
            }
        })?;
    let client_flag = shutdown.clone();
    let client = std::thread::Builder::new()
        .name("monitor-client".to_string())
        .spawn(move || run_client(receiver, client_flag))?;

    while !shutdown.load(Ordering::SeqCst) {
        main_loop.dispatch(Some(Duration::from_millis(100)))?;
    }

    manager.stop()?;
    if client.join().is_err() {
        error!("Monitor: Client thread panicked");
    }
    info!("Monitor: Bye");
    Ok(())
}

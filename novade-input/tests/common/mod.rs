// novade-input/tests/common/mod.rs
#![allow(dead_code)]

use std::io::Read;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use novade_input::config::InputConfig;
use novade_input::device::{
    DeviceCapability, DeviceSettings, InputDevice, InputDeviceIdentifier, InputDeviceInfo, InputDeviceObserver,
    InputSink, SharedDeviceSettings,
};
use novade_input::dispatch::{InputDispatcher, InputScene, InputSurface};
use novade_input::events::{NormalizedEvent, Point, Rectangle};
use novade_input::runtime::Dispatchable;
use novade_input::sender::{ChannelId, FailureReason, InputChannel, InputResponse, InputSendObserver, SendEntry};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing() {
    let _ = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Readable descriptor standing in for a device node.
struct FakeSource {
    reader: UnixStream,
    _writer: UnixStream,
}

impl Dispatchable for FakeSource {
    fn watch_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    fn dispatch(&self) -> bool {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.reader).read(&mut buf) {
            if n == 0 {
                return false;
            }
        }
        true
    }
}

/// Device whose events are injected by the test through [`FakeInputDevice::emit`].
pub struct FakeInputDevice {
    identifier: InputDeviceIdentifier,
    capabilities: DeviceCapability,
    settings: SharedDeviceSettings,
    source: Arc<FakeSource>,
    sink: Mutex<Option<Arc<dyn InputSink>>>,
    started: AtomicBool,
}

impl FakeInputDevice {
    pub fn new(name: &str, capabilities: DeviceCapability) -> Arc<Self> {
        let (reader, writer) = UnixStream::pair().expect("socket pair");
        reader.set_nonblocking(true).expect("non-blocking reader");
        Arc::new(Self {
            identifier: InputDeviceIdentifier {
                name: name.to_string(),
                unique_id: format!("{}-uid", name),
                ..Default::default()
            },
            capabilities,
            settings: SharedDeviceSettings::new(DeviceSettings::for_capabilities(
                name,
                capabilities,
                &InputConfig::default(),
            )),
            source: Arc::new(FakeSource {
                reader,
                _writer: writer,
            }),
            sink: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Hands `event` to the sink the hub installed; returns false when stopped.
    pub fn emit(&self, event: NormalizedEvent) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        match sink {
            Some(sink) => {
                sink.handle_input(event);
                true
            }
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl InputDevice for FakeInputDevice {
    fn start(&self, sink: Arc<dyn InputSink>) {
        *self.sink.lock().unwrap() = Some(sink);
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.sink.lock().unwrap().take();
        self.started.store(false, Ordering::SeqCst);
    }

    fn dispatchable(&self) -> Arc<dyn Dispatchable> {
        self.source.clone()
    }

    fn identifier(&self) -> InputDeviceIdentifier {
        self.identifier.clone()
    }

    fn capabilities(&self) -> DeviceCapability {
        self.capabilities
    }

    fn settings(&self) -> SharedDeviceSettings {
        self.settings.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceNotification {
    Added(InputDeviceInfo),
    Removed(InputDeviceInfo),
    Complete,
}

#[derive(Default)]
pub struct RecordingObserver {
    pub notifications: Mutex<Vec<DeviceNotification>>,
}

impl RecordingObserver {
    pub fn take(&self) -> Vec<DeviceNotification> {
        std::mem::take(&mut *self.notifications.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

impl InputDeviceObserver for RecordingObserver {
    fn device_added(&self, device: &InputDeviceInfo) {
        self.notifications
            .lock()
            .unwrap()
            .push(DeviceNotification::Added(device.clone()));
    }

    fn device_removed(&self, device: &InputDeviceInfo) {
        self.notifications
            .lock()
            .unwrap()
            .push(DeviceNotification::Removed(device.clone()));
    }

    fn changes_complete(&self) {
        self.notifications.lock().unwrap().push(DeviceNotification::Complete);
    }
}

/// Dispatcher collecting everything the hub forwards.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub events: Mutex<Vec<NormalizedEvent>>,
}

impl InputDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: NormalizedEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingSendObserver {
    pub succeeded: Mutex<Vec<(u32, InputResponse)>>,
    pub failed: Mutex<Vec<(u32, FailureReason)>>,
    pub blocked: Mutex<Vec<ChannelId>>,
}

impl InputSendObserver for RecordingSendObserver {
    fn send_succeeded(&self, entry: &SendEntry, response: InputResponse) {
        self.succeeded.lock().unwrap().push((entry.sequence_id(), response));
    }

    fn send_failed(&self, entry: &SendEntry, reason: FailureReason) {
        self.failed.lock().unwrap().push((entry.sequence_id(), reason));
    }

    fn client_blocked(&self, _event: &NormalizedEvent, channel: ChannelId) {
        self.blocked.lock().unwrap().push(channel);
    }
}

pub struct StaticSurface {
    pub name: &'static str,
    pub bounds: Rectangle,
    pub channel: Arc<InputChannel>,
}

impl InputSurface for StaticSurface {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn input_bounds(&self) -> Rectangle {
        self.bounds
    }

    fn input_channel(&self) -> Option<Arc<InputChannel>> {
        Some(self.channel.clone())
    }
}

/// Scene of fixed surfaces, topmost first.
pub struct StaticScene {
    pub surfaces: Vec<Arc<dyn InputSurface>>,
}

impl InputScene for StaticScene {
    fn surface_at(&self, point: Point) -> Option<Arc<dyn InputSurface>> {
        self.surfaces.iter().find(|s| s.input_area_contains(point)).cloned()
    }
}

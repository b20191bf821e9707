// src/device/hub.rs
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, trace};

use super::{InputDevice, InputDeviceInfo, InputDeviceObserver, InputSink, SharedDeviceSettings};
use crate::dispatch::InputDispatcher;
use crate::error::InputError;
use crate::events::{DeviceId, DeviceLifecycleAction, EventKind, NormalizedEvent};
use crate::runtime::{MultiplexingDispatchable, ServerActionQueue, WatchKey};

/// Process-wide source of device ids; ids are never reused.
static NEXT_DEVICE_ID: AtomicI32 = AtomicI32::new(1);

fn next_device_id() -> DeviceId {
    DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::SeqCst))
}

fn same_device(a: &Arc<dyn InputDevice>, b: &Arc<dyn InputDevice>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Sink handed to a started device; tags events with the device id.
struct DeviceSink {
    id: DeviceId,
    attached: AtomicBool,
    dispatcher: Arc<dyn InputDispatcher>,
}

impl DeviceSink {
    fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }
}

impl InputSink for DeviceSink {
    fn handle_input(&self, mut event: NormalizedEvent) {
        if let EventKind::DeviceLifecycle(lifecycle) = &event.kind {
            panic!(
                "InputDeviceHub: Device {} emitted a {:?} lifecycle event; devices only produce key, pointer and touch input",
                self.id, lifecycle.action
            );
        }
        if !self.attached.load(Ordering::SeqCst) {
            trace!("InputDeviceHub: Dropping {} event from detached device {}", event.kind_name(), self.id);
            return;
        }
        event.device_id = self.id;
        self.dispatcher.dispatch(event);
    }
}

struct RegisteredDevice {
    device: Arc<dyn InputDevice>,
    info: InputDeviceInfo,
    sink: Arc<DeviceSink>,
    watch: WatchKey,
}

#[derive(Default)]
struct ObserverState {
    observers: Vec<Arc<dyn InputDeviceObserver>>,
    infos: Vec<InputDeviceInfo>,
}

/// Registry of the currently known input devices.
pub struct DefaultInputDeviceHub {
    dispatcher: Arc<dyn InputDispatcher>,
    multiplexer: Arc<MultiplexingDispatchable>,
    queue: ServerActionQueue,
    devices: Mutex<Vec<RegisteredDevice>>,
    // Only touched from actions running on the queue's thread.
    observer_state: Arc<Mutex<ObserverState>>,
}

impl DefaultInputDeviceHub {
    pub fn new(
        dispatcher: Arc<dyn InputDispatcher>,
        multiplexer: Arc<MultiplexingDispatchable>,
        queue: ServerActionQueue,
    ) -> Self {
        Self {
            dispatcher,
            multiplexer,
            queue,
            devices: Mutex::new(Vec::new()),
            observer_state: Arc::new(Mutex::new(ObserverState::default())),
        }
    }

    /// Registers and starts `device`, returning its newly assigned id.
    ///
    /// # Errors
    ///
    /// `DeviceAlreadyRegistered` when this device object is already managed.
    pub fn add_device(&self, device: Arc<dyn InputDevice>) -> Result<DeviceId, InputError> {
        let identifier = device.identifier();
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        if devices.iter().any(|registered| same_device(&registered.device, &device)) {
            return Err(InputError::DeviceAlreadyRegistered(identifier.name));
        }

        let id = next_device_id();
        let info = InputDeviceInfo {
            id,
            name: identifier.name,
            unique_id: identifier.unique_id,
            capabilities: device.capabilities(),
        };
        self.dispatcher
            .dispatch(NormalizedEvent::lifecycle(DeviceLifecycleAction::Added, id));

        let sink = Arc::new(DeviceSink {
            id,
            attached: AtomicBool::new(true),
            dispatcher: self.dispatcher.clone(),
        });
        device.start(sink.clone());
        let watch = match self.multiplexer.add_watch(device.dispatchable()) {
            Ok(watch) => watch,
            Err(e) => {
                sink.detach();
                device.stop();
                self.dispatcher
                    .dispatch(NormalizedEvent::lifecycle(DeviceLifecycleAction::Removed, id));
                return Err(e);
            }
        };
        devices.push(RegisteredDevice {
            device,
            info: info.clone(),
            sink,
            watch,
        });

        info!(
            "InputDeviceHub: Added device {} '{}' ({:?})",
            info.id, info.name, info.capabilities
        );
        // Queued under the device lock so notifications follow registration order.
        let state = self.observer_state.clone();
        self.queue.enqueue(move |_| {
            let observers = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.infos.push(info.clone());
                state.observers.clone()
            };
            for observer in observers {
                observer.device_added(&info);
                observer.changes_complete();
            }
        });
        drop(devices);
        Ok(id)
    }

    /// Stops and unregisters `device`.
    ///
    /// # Errors
    ///
    /// `DeviceNotRegistered` when this device object is not managed by the hub.
    pub fn remove_device(&self, device: &Arc<dyn InputDevice>) -> Result<(), InputError> {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = devices
            .iter()
            .position(|registered| same_device(&registered.device, device))
        else {
            return Err(InputError::DeviceNotRegistered(device.identifier().name));
        };
        let registered = devices.remove(index);

        registered.sink.detach();
        self.multiplexer.remove_watch(registered.watch);
        registered.device.stop();
        self.dispatcher.dispatch(NormalizedEvent::lifecycle(
            DeviceLifecycleAction::Removed,
            registered.info.id,
        ));

        info!(
            "InputDeviceHub: Removed device {} '{}'",
            registered.info.id, registered.info.name
        );
        let info = registered.info;
        let state = self.observer_state.clone();
        self.queue.enqueue(move |_| {
            let observers = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.infos.retain(|known| known.id != info.id);
                state.observers.clone()
            };
            for observer in observers {
                observer.device_removed(&info);
                observer.changes_complete();
            }
        });
        drop(devices);
        Ok(())
    }

    /// Registers `observer`; it first receives the devices known at that point of
    /// the notification history, then `changes_complete`.
    pub fn add_observer(&self, observer: Arc<dyn InputDeviceObserver>) {
        let state = self.observer_state.clone();
        self.queue.enqueue(move |_| {
            let infos = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.observers.push(observer.clone());
                state.infos.clone()
            };
            debug!("InputDeviceHub: Observer added, replaying {} devices", infos.len());
            for info in &infos {
                observer.device_added(info);
            }
            observer.changes_complete();
        });
    }

    pub fn remove_observer(&self, observer: &Arc<dyn InputDeviceObserver>) {
        let state = self.observer_state.clone();
        let target = Arc::as_ptr(observer) as *const () as usize;
        self.queue.enqueue(move |_| {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state
                .observers
                .retain(|known| Arc::as_ptr(known) as *const () as usize != target);
        });
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Snapshot of the registered devices, in registration order.
    pub fn devices(&self) -> Vec<InputDeviceInfo> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|registered| registered.info.clone())
            .collect()
    }

    pub fn device_settings(&self, id: DeviceId) -> Option<SharedDeviceSettings> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|registered| registered.info.id == id)
            .map(|registered| registered.device.settings())
    }
}

impl Drop for DefaultInputDeviceHub {
    fn drop(&mut self) {
        let devices = std::mem::take(self.devices.get_mut().unwrap_or_else(PoisonError::into_inner));
        for registered in devices {
            registered.sink.detach();
            self.multiplexer.remove_watch(registered.watch);
            registered.device.stop();
        }
    }
}

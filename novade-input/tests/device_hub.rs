// novade-input/tests/device_hub.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{init_tracing, DeviceNotification, FakeInputDevice, RecordingDispatcher, RecordingObserver};
use novade_input::device::InputDevice;
use novade_input::events::{DeviceLifecycleAction, EventKind, KeyAction, KeyEvent, Modifiers, Timestamp};
use novade_input::runtime::{MainLoop, MultiplexingDispatchable};
use novade_input::{DefaultInputDeviceHub, DeviceCapability, InputDeviceObserver, InputError, NormalizedEvent};

struct Fixture {
    main_loop: MainLoop,
    dispatcher: Arc<RecordingDispatcher>,
    hub: DefaultInputDeviceHub,
}

fn fixture() -> Fixture {
    init_tracing();
    let main_loop = MainLoop::new().unwrap();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let multiplexer = Arc::new(MultiplexingDispatchable::new().unwrap());
    let hub = DefaultInputDeviceHub::new(dispatcher.clone(), multiplexer, main_loop.queue());
    Fixture {
        main_loop,
        dispatcher,
        hub,
    }
}

fn key_down() -> NormalizedEvent {
    NormalizedEvent::key(
        Timestamp(10),
        Modifiers::empty(),
        KeyEvent {
            action: KeyAction::Down,
            key_code: 'k' as u32,
            scan_code: 37,
        },
    )
}

#[test]
fn test_duplicate_add_is_rejected() {
    let f = fixture();
    let device: Arc<dyn InputDevice> = FakeInputDevice::new("kbd", DeviceCapability::KEYBOARD);

    f.hub.add_device(device.clone()).unwrap();
    let second = f.hub.add_device(device.clone());

    assert!(matches!(second, Err(InputError::DeviceAlreadyRegistered(_))));
    assert_eq!(f.hub.device_count(), 1);
}

#[test]
fn test_removing_unknown_device_fails() {
    let f = fixture();
    let device: Arc<dyn InputDevice> = FakeInputDevice::new("ghost", DeviceCapability::POINTER);

    let result = f.hub.remove_device(&device);

    assert!(matches!(result, Err(InputError::DeviceNotRegistered(_))));
    assert_eq!(f.hub.device_count(), 0);
}

#[test]
fn test_late_observer_sees_existing_devices() {
    let mut f = fixture();
    let keyboard = FakeInputDevice::new("keyboard", DeviceCapability::KEYBOARD | DeviceCapability::ALPHANUMERIC);
    let mouse = FakeInputDevice::new("mouse", DeviceCapability::POINTER);
    let touchscreen = FakeInputDevice::new("touchscreen", DeviceCapability::TOUCHSCREEN);

    let keyboard_id = f.hub.add_device(keyboard).unwrap();
    let mouse_id = f.hub.add_device(mouse).unwrap();
    let touch_id = f.hub.add_device(touchscreen).unwrap();
    f.main_loop.dispatch(Some(Duration::from_millis(10))).unwrap();

    let observer = Arc::new(RecordingObserver::default());
    f.hub.add_observer(observer.clone());
    let done = f
        .main_loop
        .run_until(Duration::from_secs(2), || observer.len() >= 4)
        .unwrap();
    assert!(done);

    let seen: Vec<_> = observer
        .take()
        .into_iter()
        .map(|notification| match notification {
            DeviceNotification::Added(info) => Some((info.id, info.capabilities)),
            DeviceNotification::Complete => None,
            DeviceNotification::Removed(info) => panic!("unexpected removal of {}", info.id),
        })
        .collect();
    assert_eq!(
        seen,
        vec![
            Some((keyboard_id, DeviceCapability::KEYBOARD | DeviceCapability::ALPHANUMERIC)),
            Some((mouse_id, DeviceCapability::POINTER)),
            Some((touch_id, DeviceCapability::TOUCHSCREEN)),
            None,
        ]
    );
}

#[test]
fn test_observer_is_told_about_removal() {
    let mut f = fixture();
    let observer = Arc::new(RecordingObserver::default());
    f.hub.add_observer(observer.clone());
    let mouse = FakeInputDevice::new("mouse", DeviceCapability::POINTER);
    let device: Arc<dyn InputDevice> = mouse.clone();

    let id = f.hub.add_device(device.clone()).unwrap();
    assert!(mouse.is_started());
    f.hub.remove_device(&device).unwrap();
    assert!(!mouse.is_started());

    let done = f
        .main_loop
        .run_until(Duration::from_secs(2), || observer.len() >= 5)
        .unwrap();
    assert!(done);
    let notifications = observer.take();
    assert_eq!(notifications[0], DeviceNotification::Complete);
    assert!(matches!(&notifications[1], DeviceNotification::Added(info) if info.id == id));
    assert_eq!(notifications[2], DeviceNotification::Complete);
    assert!(matches!(&notifications[3], DeviceNotification::Removed(info) if info.id == id));
    assert_eq!(notifications[4], DeviceNotification::Complete);
}

#[test]
fn test_removed_observer_gets_nothing_more() {
    let mut f = fixture();
    let observer = Arc::new(RecordingObserver::default());
    let as_observer: Arc<dyn InputDeviceObserver> = observer.clone();
    f.hub.add_observer(as_observer.clone());
    f.hub.remove_observer(&as_observer);

    f.hub
        .add_device(FakeInputDevice::new("pad", DeviceCapability::TOUCHPAD))
        .unwrap();
    f.main_loop.dispatch(Some(Duration::from_millis(10))).unwrap();

    assert_eq!(observer.take(), vec![DeviceNotification::Complete]);
}

#[test]
fn test_events_are_tagged_with_device_id() {
    let f = fixture();
    let keyboard = FakeInputDevice::new("keyboard", DeviceCapability::KEYBOARD);
    let id = f.hub.add_device(keyboard.clone()).unwrap();

    assert!(keyboard.emit(key_down()));

    let events = f.dispatcher.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0].kind,
        EventKind::DeviceLifecycle(lifecycle)
            if lifecycle.action == DeviceLifecycleAction::Added && lifecycle.device == id
    ));
    assert_eq!(events[1].device_id, id);
    assert_eq!(events[1].as_key().unwrap().action, KeyAction::Down);
}

#[test]
fn test_removed_device_no_longer_delivers() {
    let f = fixture();
    let keyboard = FakeInputDevice::new("keyboard", DeviceCapability::KEYBOARD);
    let device: Arc<dyn InputDevice> = keyboard.clone();
    let id = f.hub.add_device(device.clone()).unwrap();
    f.hub.remove_device(&device).unwrap();

    assert!(!keyboard.emit(key_down()));

    let events = f.dispatcher.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[1].kind,
        EventKind::DeviceLifecycle(lifecycle)
            if lifecycle.action == DeviceLifecycleAction::Removed && lifecycle.device == id
    ));
    assert!(f.hub.device_settings(id).is_none());
}

#[test]
fn test_settings_are_reachable_by_id() {
    let f = fixture();
    let id = f
        .hub
        .add_device(FakeInputDevice::new("mouse", DeviceCapability::POINTER))
        .unwrap();

    let settings = f.hub.device_settings(id).unwrap();
    assert!(!settings.snapshot().is_empty());
    assert_eq!(f.hub.devices()[0].name, "mouse");
}

#[test]
fn test_removal_racing_registration_keeps_history_linear() {
    let mut f = fixture();
    let watcher = Arc::new(RecordingObserver::default());
    f.hub.add_observer(watcher.clone());
    let hub = Arc::new(f.hub);
    let devices: Vec<Arc<dyn InputDevice>> = (0..200)
        .map(|i| FakeInputDevice::new(&format!("churn-{}", i), DeviceCapability::POINTER) as Arc<dyn InputDevice>)
        .collect();

    let adder = {
        let hub = hub.clone();
        let devices = devices.clone();
        std::thread::spawn(move || {
            for device in devices {
                hub.add_device(device).unwrap();
            }
        })
    };
    // Removes each device as soon as it shows up, often while `add_device` is still running.
    let remover = {
        let hub = hub.clone();
        std::thread::spawn(move || {
            for device in &devices {
                loop {
                    match hub.remove_device(device) {
                        Ok(()) => break,
                        Err(InputError::DeviceNotRegistered(_)) => std::thread::yield_now(),
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            }
        })
    };
    adder.join().unwrap();
    remover.join().unwrap();
    assert_eq!(hub.device_count(), 0);

    let late = Arc::new(RecordingObserver::default());
    hub.add_observer(late.clone());
    let done = f
        .main_loop
        .run_until(Duration::from_secs(5), || late.len() >= 1)
        .unwrap();
    assert!(done);
    assert_eq!(late.take(), vec![DeviceNotification::Complete]);

    let mut live = std::collections::HashSet::new();
    let mut removed = 0;
    for notification in watcher.take() {
        match notification {
            DeviceNotification::Added(info) => assert!(live.insert(info.id), "{} added twice", info.id),
            DeviceNotification::Removed(info) => {
                assert!(live.remove(&info.id), "{} removed before it was added", info.id);
                removed += 1;
            }
            DeviceNotification::Complete => {}
        }
    }
    assert!(live.is_empty());
    assert_eq!(removed, 200);
}

#[test]
#[should_panic(expected = "lifecycle event")]
fn test_device_emitting_lifecycle_event_is_fatal() {
    let f = fixture();
    let keyboard = FakeInputDevice::new("rogue", DeviceCapability::KEYBOARD);
    let id = f.hub.add_device(keyboard.clone()).unwrap();

    keyboard.emit(NormalizedEvent::lifecycle(DeviceLifecycleAction::Added, id));
}

//! Input devices, their registry and the providers that create them.

use std::sync::Arc;

use bitflags::bitflags;

use crate::events::{DeviceId, NormalizedEvent};
use crate::runtime::Dispatchable;

pub mod evdev;
pub mod hub;
pub mod provider;
pub mod settings;

pub use hub::DefaultInputDeviceHub;
pub use provider::{InputDeviceProvider, InputPlatform, Priority, ProbingDeviceFactory};
pub use settings::{DeviceSettings, SettingId, SettingValue, SharedDeviceSettings};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceCapability: u32 {
        const POINTER = 1 << 0;
        const KEYBOARD = 1 << 1;
        /// Keyboard with a full alphanumeric block, as opposed to a few media keys.
        const ALPHANUMERIC = 1 << 2;
        const TOUCHPAD = 1 << 3;
        const TOUCHSCREEN = 1 << 4;
        const MULTITOUCH = 1 << 5;
        const JOYSTICK = 1 << 6;
        const GAMEPAD = 1 << 7;
    }
}

/// Identity a device reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputDeviceIdentifier {
    pub name: String,
    pub unique_id: String,
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    /// Physical location, e.g. `usb-0000:00:14.0-1/input0`.
    pub location: String,
}

/// Snapshot published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub unique_id: String,
    pub capabilities: DeviceCapability,
}

/// Receives translated events from a started device.
pub trait InputSink: Send + Sync {
    fn handle_input(&self, event: NormalizedEvent);
}

/// A device object created by a provider and managed by the hub.
pub trait InputDevice: Send + Sync {
    /// Begins delivering events to `sink`.
    fn start(&self, sink: Arc<dyn InputSink>);

    /// Stops delivery and releases the sink.
    fn stop(&self);

    /// Resource the reader thread waits on.
    fn dispatchable(&self) -> Arc<dyn Dispatchable>;

    fn identifier(&self) -> InputDeviceIdentifier;

    fn capabilities(&self) -> DeviceCapability;

    fn settings(&self) -> SharedDeviceSettings;
}

/// Told about device changes, always on the thread that owns the action queue.
pub trait InputDeviceObserver: Send + Sync {
    fn device_added(&self, device: &InputDeviceInfo);
    fn device_removed(&self, device: &InputDeviceInfo);
    fn changes_complete(&self);
}

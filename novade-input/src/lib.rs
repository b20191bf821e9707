//! # NovaDE Input (`novade-input`)
//!
//! `novade-input` captures events from input hardware, normalizes them, routes
//! them to client surfaces and delivers them over acknowledged, sequence-numbered
//! channels.
//!
//! ## Pipeline
//!
//! - **Devices** (`device`): providers probe device nodes, the
//!   [`DefaultInputDeviceHub`] registers the resulting devices, assigns ids and
//!   notifies observers on the main loop thread.
//! - **Translation** (`translator`): each device owns an [`InputTranslator`] that
//!   turns raw samples into [`NormalizedEvent`]s and tracks its modifier state.
//! - **Touch validation** (`touch_validator`): repairs per-device touch streams
//!   so every contact goes down, changes and goes up in order.
//! - **Dispatch** (`dispatch`): filters, key repeat and routing on a dedicated
//!   thread.
//! - **Delivery** (`sender`): per-channel sequence ids, acknowledgements and
//!   advisory backpressure.
//!
//! [`InputManager`] wires the threads together.
//!
//! ```rust,ignore
//! use novade_input::{InputConfig, InputManager, MainLoop};
//!
//! let mut main_loop = MainLoop::new()?;
//! let mut manager = InputManager::new(InputConfig::default(), main_loop.queue(), scene, observer)?;
//! manager.scan_devices(std::path::Path::new("/dev/input"))?;
//! manager.start()?;
//! loop {
//!     main_loop.dispatch(None)?;
//! }
//! ```

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod runtime;
pub mod sender;
pub mod touch_validator;
pub mod translator;
pub mod wire;

pub use config::InputConfig;
pub use device::{
    DefaultInputDeviceHub, DeviceCapability, InputDevice, InputDeviceInfo, InputDeviceObserver, InputSink,
};
pub use dispatch::{EventFilter, InputDispatcher, InputScene, InputSurface, KeyboardFocus};
pub use error::{ConfigError, InputError, TouchStreamError, WireError};
pub use events::{DeviceId, EventKind, Modifiers, NormalizedEvent, Timestamp};
pub use logging::{init_logging, init_minimal_logging};
pub use manager::InputManager;
pub use runtime::{MainLoop, ServerActionQueue};
pub use sender::{InputChannel, InputReceiver, InputSendObserver, InputSender};
pub use touch_validator::TouchStreamValidator;
pub use translator::InputTranslator;

//! Error types for the NovaDE input pipeline.
//!
//! Four enums cover the failure domains of this crate:
//!
//! - [`InputError`] is returned by every fallible public operation. Precondition
//!   violations (duplicate devices, unknown settings, disconnected channels) are
//!   reported synchronously and are never retried automatically.
//! - [`ConfigError`] describes configuration loading and validation failures and is
//!   wrapped by [`InputError::Config`].
//! - [`WireError`] describes malformed records on a client channel and is wrapped by
//!   [`InputError::Wire`].
//! - [`TouchStreamError`] describes touch batches dropped by the touch stream
//!   validator. They are logged and never forwarded.
//!
//! Programmer errors (an event variant reaching a stage that has no handling branch
//! for it) are not represented here; they panic.

use std::path::PathBuf;
use thiserror::Error;

use crate::device::settings::SettingId;

/// Main error type of the input subsystem.
#[derive(Debug, Error)]
pub enum InputError {
    /// A caller passed an argument that can never be valid for the operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device object is already managed by the hub.
    #[error("Input device '{0}' is already managed by the hub")]
    DeviceAlreadyRegistered(String),

    /// The device object is not managed by the hub.
    #[error("Input device '{0}' is not managed by the hub")]
    DeviceNotRegistered(String),

    /// The setting is not applicable to the device.
    #[error("Setting {setting:?} is not applicable to device '{device}'")]
    UnknownSetting { device: String, setting: SettingId },

    /// The value variant does not match the variant the setting expects.
    #[error("Setting {setting:?} expects a {expected} value, got {found}")]
    SettingTypeMismatch {
        setting: SettingId,
        expected: &'static str,
        found: &'static str,
    },

    /// The channel was torn down and no longer accepts events.
    #[error("Input channel {0} is disconnected")]
    ChannelDisconnected(u64),

    /// Reading or writing a device or channel descriptor failed.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A record on a client channel could not be decoded or encoded.
    #[error("Wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// Probing a device node failed.
    #[error("Failed to probe device node {path:?}: {message}")]
    DeviceProbe { path: PathBuf, message: String },

    /// Creating or driving an event loop failed.
    #[error("Event loop error: {0}")]
    EventLoop(String),

    /// A worker thread could not be spawned or joined.
    #[error("Thread error: {0}")]
    Thread(String),

    /// Configuration could not be loaded.
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),
}

impl From<nix::errno::Errno> for InputError {
    fn from(errno: nix::errno::Errno) -> Self {
        InputError::Transport(std::io::Error::from(errno))
    }
}

/// Errors raised while loading or validating [`crate::config::InputConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::config::InputConfig`].
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration parsed but contains values outside their valid range.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Errors raised by the channel record codec in [`crate::wire`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("record is truncated")]
    Truncated,

    #[error("unknown message kind {0}")]
    UnknownMessage(u8),

    #[error("unknown event kind {0}")]
    UnknownEventKind(u8),

    #[error("event carries {0} contacts, more than a record can hold")]
    TooManyPointers(usize),

    #[error("invalid action value {0}")]
    InvalidAction(u8),
}

/// Reasons a touch event is rejected before reaching the dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TouchStreamError {
    #[error("touch event carries {0} contacts, at most {max} are allowed", max = crate::events::MAX_POINTER_COUNT)]
    TooManyPoints(usize),

    #[error("touch id {0} appears more than once in one event")]
    DuplicateId(i32),

    #[error("touch event carries {0} transitions, at most one is allowed")]
    MultipleTransitions(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::ErrorKind;

    #[test]
    fn test_config_error_wraps_into_input_error() {
        let err: InputError = ConfigError::ValidationError("threshold must be positive".into()).into();
        assert_eq!(
            err.to_string(),
            "Configuration Error: Configuration validation failed: threshold must be positive"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_errno_maps_to_transport() {
        let err: InputError = nix::errno::Errno::EPIPE.into();
        match err {
            InputError::Transport(io) => assert_eq!(io.kind(), ErrorKind::BrokenPipe),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_setting_mismatch_message() {
        let err = InputError::SettingTypeMismatch {
            setting: SettingId::CursorAcceleration,
            expected: "double",
            found: "bool",
        };
        assert_eq!(err.to_string(), "Setting CursorAcceleration expects a double value, got bool");
    }
}

//! Per-device configuration values.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use super::DeviceCapability;
use crate::config::InputConfig;
use crate::error::InputError;

pub type Matrix3 = [[f64; 3]; 3];

pub const IDENTITY_MATRIX: Matrix3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Scroll methods accepted by [`SettingId::ScrollMode`].
pub const SCROLL_MODES: [&str; 4] = ["none", "two-finger", "edge", "on-button-down"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingId {
    /// 0 when the left button is primary, 1 for left-handed setups.
    PrimaryButton,
    CursorAcceleration,
    ScrollSpeed,
    NaturalScroll,
    ScrollMode,
    TapToClick,
    DisableWhileTyping,
    /// Affine transform applied to normalized touch coordinates.
    CalibrationMatrix,
}

impl SettingId {
    /// Name of the value variant this setting holds.
    pub fn expected_kind(&self) -> &'static str {
        match self {
            SettingId::PrimaryButton => "int",
            SettingId::CursorAcceleration | SettingId::ScrollSpeed => "double",
            SettingId::NaturalScroll | SettingId::TapToClick | SettingId::DisableWhileTyping => "bool",
            SettingId::ScrollMode => "string",
            SettingId::CalibrationMatrix => "matrix",
        }
    }

    fn accepts(&self, value: &SettingValue) -> bool {
        match self {
            SettingId::PrimaryButton => matches!(value, SettingValue::Int(_)),
            SettingId::CursorAcceleration | SettingId::ScrollSpeed => matches!(value, SettingValue::Double(_)),
            SettingId::NaturalScroll | SettingId::TapToClick | SettingId::DisableWhileTyping => {
                matches!(value, SettingValue::Bool(_))
            }
            SettingId::ScrollMode => matches!(value, SettingValue::String(_)),
            SettingId::CalibrationMatrix => matches!(value, SettingValue::Matrix(_)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    NotApplicable,
    Int(i32),
    Double(f64),
    Bool(bool),
    String(String),
    Matrix(Matrix3),
}

impl SettingValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SettingValue::NotApplicable => "not-applicable",
            SettingValue::Int(_) => "int",
            SettingValue::Double(_) => "double",
            SettingValue::Bool(_) => "bool",
            SettingValue::String(_) => "string",
            SettingValue::Matrix(_) => "matrix",
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            SettingValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            SettingValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<Matrix3> {
        match self {
            SettingValue::Matrix(m) => Some(*m),
            _ => None,
        }
    }
}

/// The settings applicable to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    device: String,
    values: BTreeMap<SettingId, SettingValue>,
}

impl DeviceSettings {
    /// An empty settings set; every `get` yields `NotApplicable`.
    pub fn empty(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            values: BTreeMap::new(),
        }
    }

    /// Settings applicable to a device with `capabilities`, seeded from `config`.
    pub fn for_capabilities(device: impl Into<String>, capabilities: DeviceCapability, config: &InputConfig) -> Self {
        let mut settings = Self::empty(device);
        let values = &mut settings.values;

        if capabilities.intersects(DeviceCapability::POINTER | DeviceCapability::TOUCHPAD) {
            values.insert(
                SettingId::PrimaryButton,
                SettingValue::Int(i32::from(config.pointer.left_handed)),
            );
            values.insert(
                SettingId::CursorAcceleration,
                SettingValue::Double(config.pointer.acceleration),
            );
            values.insert(SettingId::ScrollSpeed, SettingValue::Double(config.pointer.scroll_speed));
            values.insert(SettingId::NaturalScroll, SettingValue::Bool(config.pointer.natural_scrolling));
        }
        if capabilities.contains(DeviceCapability::TOUCHPAD) {
            values.insert(SettingId::ScrollMode, SettingValue::String("two-finger".to_string()));
            values.insert(SettingId::TapToClick, SettingValue::Bool(config.touch.tap_to_click));
            values.insert(
                SettingId::DisableWhileTyping,
                SettingValue::Bool(config.touch.disable_while_typing),
            );
        }
        if capabilities.contains(DeviceCapability::TOUCHSCREEN) {
            values.insert(SettingId::CalibrationMatrix, SettingValue::Matrix(IDENTITY_MATRIX));
        }

        debug!(
            "DeviceSettings: '{}' has {} applicable settings",
            settings.device,
            settings.values.len()
        );
        settings
    }

    pub fn get(&self, setting: SettingId) -> SettingValue {
        self.values.get(&setting).cloned().unwrap_or(SettingValue::NotApplicable)
    }

    /// Replaces the value of an applicable setting.
    ///
    /// # Errors
    ///
    /// `UnknownSetting` when the device has no such setting, `SettingTypeMismatch`
    /// when the value variant differs from the setting's, and `InvalidArgument` for
    /// values outside the setting's range.
    pub fn set(&mut self, setting: SettingId, value: SettingValue) -> Result<(), InputError> {
        let Some(slot) = self.values.get_mut(&setting) else {
            return Err(InputError::UnknownSetting {
                device: self.device.clone(),
                setting,
            });
        };
        if !setting.accepts(&value) {
            return Err(InputError::SettingTypeMismatch {
                setting,
                expected: setting.expected_kind(),
                found: value.kind_name(),
            });
        }
        check_range(setting, &value)?;
        debug!("DeviceSettings: '{}' {:?} = {:?}", self.device, setting, value);
        *slot = value;
        Ok(())
    }

    /// Calls `f` for every applicable setting in ascending id order.
    pub fn for_each_setting(&self, mut f: impl FnMut(SettingId, &SettingValue)) {
        for (id, value) in &self.values {
            f(*id, value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn check_range(setting: SettingId, value: &SettingValue) -> Result<(), InputError> {
    let valid = match (setting, value) {
        (SettingId::PrimaryButton, SettingValue::Int(v)) => (0..=1).contains(v),
        (SettingId::CursorAcceleration, SettingValue::Double(v)) => (-1.0..=1.0).contains(v),
        (SettingId::ScrollSpeed, SettingValue::Double(v)) => *v > 0.0,
        (SettingId::ScrollMode, SettingValue::String(mode)) => SCROLL_MODES.contains(&mode.as_str()),
        (SettingId::CalibrationMatrix, SettingValue::Matrix(m)) => m.iter().flatten().all(|v| v.is_finite()),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(InputError::InvalidArgument(format!(
            "{:?} is out of range for {:?}",
            value, setting
        )))
    }
}

/// Settings shared between the device's translator and configuration tooling.
#[derive(Debug, Clone)]
pub struct SharedDeviceSettings(Arc<RwLock<DeviceSettings>>);

impl SharedDeviceSettings {
    pub fn new(settings: DeviceSettings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    pub fn get(&self, setting: SettingId) -> SettingValue {
        self.0.read().unwrap_or_else(PoisonError::into_inner).get(setting)
    }

    pub fn set(&self, setting: SettingId, value: SettingValue) -> Result<(), InputError> {
        self.0.write().unwrap_or_else(PoisonError::into_inner).set(setting, value)
    }

    pub fn for_each_setting(&self, f: impl FnMut(SettingId, &SettingValue)) {
        self.0.read().unwrap_or_else(PoisonError::into_inner).for_each_setting(f)
    }

    pub fn snapshot(&self) -> DeviceSettings {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

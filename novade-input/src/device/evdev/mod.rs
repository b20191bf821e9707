//! Linux evdev backend: probing `/dev/input/event*` nodes and reading them.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::provider::{InputDeviceProvider, Priority};
use super::{DeviceCapability, InputDevice, InputDeviceIdentifier};
use crate::config::InputConfig;
use crate::error::InputError;
use crate::translator::{AxisRange, TouchAxes};

pub mod decoder;
pub mod device;

pub use decoder::FrameDecoder;
pub use device::EvdevDevice;

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;

pub const SYN_REPORT: u16 = 0;
pub const SYN_DROPPED: u16 = 3;

pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;
pub const REL_HWHEEL: u16 = 0x06;
pub const REL_WHEEL: u16 = 0x08;

pub const ABS_X: u16 = 0x00;
pub const ABS_Y: u16 = 0x01;
pub const ABS_PRESSURE: u16 = 0x18;
pub const ABS_MT_SLOT: u16 = 0x2f;
pub const ABS_MT_TOUCH_MAJOR: u16 = 0x30;
pub const ABS_MT_TOUCH_MINOR: u16 = 0x31;
pub const ABS_MT_POSITION_X: u16 = 0x35;
pub const ABS_MT_POSITION_Y: u16 = 0x36;
pub const ABS_MT_TRACKING_ID: u16 = 0x39;
pub const ABS_MT_PRESSURE: u16 = 0x3a;

pub const BTN_MISC: u16 = 0x100;
pub const BTN_MOUSE: u16 = 0x110;
pub const BTN_JOYSTICK: u16 = 0x120;
pub const BTN_DIGI: u16 = 0x140;
pub const BTN_TOOL_PEN: u16 = 0x140;
pub const BTN_TOOL_RUBBER: u16 = 0x141;
pub const BTN_TOOL_FINGER: u16 = 0x145;
pub const BTN_TOUCH: u16 = 0x14a;
pub const KEY_OK: u16 = 0x160;

pub const INPUT_PROP_DIRECT: u16 = 0x01;

const KEY_MAX: usize = 0x2ff;
const REL_MAX: usize = 0x0f;
const ABS_MAX: usize = 0x3f;
const INPUT_PROP_MAX: usize = 0x1f;

const JOYSTICK_AXES: [u16; 19] = [
    0x02, 0x03, 0x04, 0x05, // Z, RX, RY, RZ
    0x06, 0x07, 0x08, 0x09, 0x0a, // throttle, rudder, wheel, gas, brake
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, // hats
    0x1a, 0x1b, // tilt
];

const ALPHANUMERIC_KEYS: [u16; 3] = [16, 30, 44]; // KEY_Q, KEY_A, KEY_Z

/// Bitmask sized for `bits` entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet(Vec<u8>);

impl BitSet {
    pub fn with_bits(bits: usize) -> Self {
        Self(vec![0; bits / 8 + 1])
    }

    pub fn from_bits(bits: usize, set: &[u16]) -> Self {
        let mut bitset = Self::with_bits(bits);
        for bit in set {
            bitset.set(*bit);
        }
        bitset
    }

    pub fn set(&mut self, bit: u16) {
        let index = usize::from(bit) / 8;
        if index >= self.0.len() {
            self.0.resize(index + 1, 0);
        }
        self.0[index] |= 1 << (bit % 8);
    }

    pub fn get(&self, bit: u16) -> bool {
        self.0
            .get(usize::from(bit) / 8)
            .map_or(false, |byte| byte & (1 << (bit % 8)) != 0)
    }

    /// Whether any byte in `first..last` (byte indices) is non-zero.
    fn any_in_bytes(&self, first: usize, last: usize) -> bool {
        let last = last.min(self.0.len());
        first < last && self.0[first..last].iter().any(|byte| *byte != 0)
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Byte holding the first bit at or after `bit`.
const fn byte_index(bit: u16) -> usize {
    (bit as usize + 7) / 8
}

/// A probed `/dev/input/event*` node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceNode {
    pub path: PathBuf,
    pub identifier: InputDeviceIdentifier,
    pub key_bits: BitSet,
    pub rel_bits: BitSet,
    pub abs_bits: BitSet,
    pub prop_bits: BitSet,
    pub abs_x: Option<AxisRange>,
    pub abs_y: Option<AxisRange>,
    pub mt_x: Option<AxisRange>,
    pub mt_y: Option<AxisRange>,
    pub pressure: Option<AxisRange>,
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct InputAbsInfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

mod ioctl {
    use super::{InputAbsInfo, InputId};

    nix::ioctl_read!(eviocgid, b'E', 0x02, InputId);
    nix::ioctl_read_buf!(eviocgname, b'E', 0x06, u8);
    nix::ioctl_read_buf!(eviocgphys, b'E', 0x07, u8);
    nix::ioctl_read_buf!(eviocguniq, b'E', 0x08, u8);
    nix::ioctl_read_buf!(eviocgprop, b'E', 0x09, u8);
    nix::ioctl_read_buf!(eviocgbit_key, b'E', 0x20 + super::EV_KEY, u8);
    nix::ioctl_read_buf!(eviocgbit_rel, b'E', 0x20 + super::EV_REL, u8);
    nix::ioctl_read_buf!(eviocgbit_abs, b'E', 0x20 + super::EV_ABS, u8);
    nix::ioctl_read!(eviocgabs_x, b'E', 0x40 + super::ABS_X, InputAbsInfo);
    nix::ioctl_read!(eviocgabs_y, b'E', 0x40 + super::ABS_Y, InputAbsInfo);
    nix::ioctl_read!(eviocgabs_pressure, b'E', 0x40 + super::ABS_PRESSURE, InputAbsInfo);
    nix::ioctl_read!(eviocgabs_mt_x, b'E', 0x40 + super::ABS_MT_POSITION_X, InputAbsInfo);
    nix::ioctl_read!(eviocgabs_mt_y, b'E', 0x40 + super::ABS_MT_POSITION_Y, InputAbsInfo);
    nix::ioctl_read!(eviocgabs_mt_pressure, b'E', 0x40 + super::ABS_MT_PRESSURE, InputAbsInfo);
}

fn c_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

type AbsQuery = unsafe fn(libc::c_int, *mut InputAbsInfo) -> nix::Result<libc::c_int>;

/// Range of an absolute axis, when the device reports it.
///
/// # Safety
///
/// `fd` must be an open evdev descriptor.
unsafe fn abs_range(fd: RawFd, present: bool, query: AbsQuery) -> Option<AxisRange> {
    if !present {
        return None;
    }
    let mut info = InputAbsInfo::default();
    query(fd, &mut info)
        .ok()
        .map(|_| AxisRange::new(info.minimum, info.maximum))
}

pub(crate) fn open_nonblocking(path: &Path) -> Result<File, InputError> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(path)
        .map_err(|e| InputError::DeviceProbe {
            path: path.to_path_buf(),
            message: format!("failed to open: {}", e),
        })
}

impl DeviceNode {
    /// Queries identity, event bitmasks and axis ranges of an evdev node.
    pub fn probe_path(path: &Path) -> Result<Self, InputError> {
        let file = open_nonblocking(path)?;
        let fd = file.as_raw_fd();
        let probe_error = |what: &str, errno: nix::errno::Errno| InputError::DeviceProbe {
            path: path.to_path_buf(),
            message: format!("{}: {}", what, errno),
        };

        let mut node = DeviceNode {
            path: path.to_path_buf(),
            key_bits: BitSet::with_bits(KEY_MAX),
            rel_bits: BitSet::with_bits(REL_MAX),
            abs_bits: BitSet::with_bits(ABS_MAX),
            prop_bits: BitSet::with_bits(INPUT_PROP_MAX),
            ..DeviceNode::default()
        };

        let mut buffer = [0u8; 256];
        // SAFETY: every ioctl below writes at most the length of the buffer or
        // struct it is handed, and `fd` stays open for the duration of the call.
        unsafe {
            ioctl::eviocgname(fd, &mut buffer).map_err(|e| probe_error("EVIOCGNAME", e))?;
            node.identifier.name = c_string(&buffer);

            let mut id = InputId::default();
            ioctl::eviocgid(fd, &mut id).map_err(|e| probe_error("EVIOCGID", e))?;
            node.identifier.bus = id.bustype;
            node.identifier.vendor = id.vendor;
            node.identifier.product = id.product;
            node.identifier.version = id.version;

            // Physical location and unique id are rarely available for built-in devices.
            buffer.fill(0);
            if ioctl::eviocgphys(fd, &mut buffer).is_ok() {
                node.identifier.location = c_string(&buffer);
            }
            buffer.fill(0);
            if ioctl::eviocguniq(fd, &mut buffer).is_ok() {
                node.identifier.unique_id = c_string(&buffer);
            }

            ioctl::eviocgbit_key(fd, node.key_bits.as_mut_slice()).map_err(|e| probe_error("EVIOCGBIT(EV_KEY)", e))?;
            ioctl::eviocgbit_rel(fd, node.rel_bits.as_mut_slice()).map_err(|e| probe_error("EVIOCGBIT(EV_REL)", e))?;
            ioctl::eviocgbit_abs(fd, node.abs_bits.as_mut_slice()).map_err(|e| probe_error("EVIOCGBIT(EV_ABS)", e))?;
            ioctl::eviocgprop(fd, node.prop_bits.as_mut_slice()).map_err(|e| probe_error("EVIOCGPROP", e))?;

            node.abs_x = abs_range(fd, node.abs_bits.get(ABS_X), ioctl::eviocgabs_x);
            node.abs_y = abs_range(fd, node.abs_bits.get(ABS_Y), ioctl::eviocgabs_y);
            node.mt_x = abs_range(fd, node.abs_bits.get(ABS_MT_POSITION_X), ioctl::eviocgabs_mt_x);
            node.mt_y = abs_range(fd, node.abs_bits.get(ABS_MT_POSITION_Y), ioctl::eviocgabs_mt_y);
            node.pressure = abs_range(fd, node.abs_bits.get(ABS_MT_PRESSURE), ioctl::eviocgabs_mt_pressure)
                .or_else(|| abs_range(fd, node.abs_bits.get(ABS_PRESSURE), ioctl::eviocgabs_pressure));
        }

        debug!(
            "EvdevProvider: Probed {} '{}' ({:04x}:{:04x})",
            path.display(),
            node.identifier.name,
            node.identifier.vendor,
            node.identifier.product
        );
        Ok(node)
    }

    pub fn has_multitouch(&self) -> bool {
        self.abs_bits.get(ABS_MT_POSITION_X) && self.abs_bits.get(ABS_MT_POSITION_Y)
    }

    /// Classifies the node from the events it can report.
    pub fn capabilities(&self) -> DeviceCapability {
        let mut caps = DeviceCapability::empty();
        let keys = &self.key_bits;

        let has_keys =
            keys.any_in_bytes(0, byte_index(BTN_MISC)) || keys.any_in_bytes(byte_index(KEY_OK), usize::MAX);
        let has_gamepad_buttons = keys.any_in_bytes(byte_index(BTN_MISC), byte_index(BTN_MOUSE))
            || keys.any_in_bytes(byte_index(BTN_JOYSTICK), byte_index(BTN_DIGI));

        if has_keys || has_gamepad_buttons {
            caps |= DeviceCapability::KEYBOARD;
        }
        if ALPHANUMERIC_KEYS.iter().all(|key| keys.get(*key)) {
            caps |= DeviceCapability::ALPHANUMERIC;
        }

        if keys.get(BTN_MOUSE) && self.rel_bits.get(REL_X) && self.rel_bits.get(REL_Y) {
            caps |= DeviceCapability::POINTER;
        }

        let has_coordinates = self.abs_bits.get(ABS_X) && self.abs_bits.get(ABS_Y);
        let has_mt_coordinates = self.has_multitouch();
        let is_direct = self.prop_bits.get(INPUT_PROP_DIRECT);
        let finger_but_no_pen = keys.get(BTN_TOOL_FINGER) && !keys.get(BTN_TOOL_PEN);
        let has_touch = keys.get(BTN_TOUCH);

        if finger_but_no_pen && !is_direct && (has_coordinates || has_mt_coordinates) {
            caps |= DeviceCapability::TOUCHPAD | DeviceCapability::POINTER;
        } else if has_touch && ((has_mt_coordinates && !has_gamepad_buttons) || has_coordinates) {
            caps |= DeviceCapability::TOUCHSCREEN;
        }
        if has_mt_coordinates && caps.intersects(DeviceCapability::TOUCHPAD | DeviceCapability::TOUCHSCREEN) {
            caps |= DeviceCapability::MULTITOUCH;
        }

        let has_joystick_axis = JOYSTICK_AXES.iter().any(|axis| self.abs_bits.get(*axis));
        if has_joystick_axis || (!has_touch && has_coordinates) {
            caps |= DeviceCapability::JOYSTICK;
        }
        if has_gamepad_buttons {
            caps |= DeviceCapability::GAMEPAD;
        }
        caps
    }

    /// Absolute axes used for touch translation, preferring multi-touch axes.
    pub fn touch_axes(&self) -> Option<TouchAxes> {
        let x = self.mt_x.or(self.abs_x)?;
        let y = self.mt_y.or(self.abs_y)?;
        Some(TouchAxes {
            x,
            y,
            pressure: self.pressure,
        })
    }
}

/// Lists `event*` nodes in `dir`, sorted by name.
pub fn enumerate_device_nodes(dir: &Path) -> Result<Vec<PathBuf>, InputError> {
    let mut nodes = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("event") {
            nodes.push(entry.path());
        }
    }
    nodes.sort();
    Ok(nodes)
}

/// Provides [`EvdevDevice`]s for keyboards, pointers and touch devices.
pub struct EvdevProvider {
    config: InputConfig,
}

impl EvdevProvider {
    pub fn new(config: InputConfig) -> Self {
        Self { config }
    }
}

impl InputDeviceProvider for EvdevProvider {
    fn name(&self) -> &str {
        "evdev"
    }

    fn probe(&self, node: &DeviceNode) -> Priority {
        let caps = node.capabilities();
        if caps.intersects(
            DeviceCapability::KEYBOARD
                | DeviceCapability::POINTER
                | DeviceCapability::TOUCHPAD
                | DeviceCapability::TOUCHSCREEN,
        ) && !caps.contains(DeviceCapability::GAMEPAD)
        {
            Priority::Best
        } else if caps.intersects(DeviceCapability::JOYSTICK | DeviceCapability::GAMEPAD) {
            Priority::Supported
        } else {
            Priority::Unsupported
        }
    }

    fn create_device(&self, node: &DeviceNode) -> Result<Arc<dyn InputDevice>, InputError> {
        match EvdevDevice::open(node, &self.config) {
            Ok(device) => Ok(Arc::new(device)),
            Err(e) => {
                warn!("EvdevProvider: Failed to open {}: {}", node.path.display(), e);
                Err(e)
            }
        }
    }
}

//! Conversion of raw device samples into [`NormalizedEvent`]s.
//!
//! Every device owns one [`InputTranslator`]; modifier and lock state, the cursor
//! position and the set of live contacts are tracked per device so that two
//! keyboards pressed at the same time never corrupt each other's modifiers.

use tracing::trace;

use crate::device::settings::{SettingId, SettingValue, SharedDeviceSettings, IDENTITY_MATRIX};
use crate::device::DeviceCapability;
use crate::events::{
    KeyAction, KeyEvent, Modifiers, NormalizedEvent, Point, PointerAction, PointerButtons, PointerEvent,
    Rectangle, Timestamp, ToolType, TouchAction, TouchEvent, TouchPoint,
};

pub mod keymap;

pub const BTN_LEFT: u32 = 0x110;
pub const BTN_RIGHT: u32 = 0x111;
pub const BTN_MIDDLE: u32 = 0x112;
pub const BTN_SIDE: u32 = 0x113;
pub const BTN_EXTRA: u32 = 0x114;
pub const BTN_FORWARD: u32 = 0x115;
pub const BTN_BACK: u32 = 0x116;

/// Longest contact still recognized as a tap.
const TAP_TIMEOUT_NS: i64 = 180_000_000;
/// Largest movement, in display units, still recognized as a tap.
const TAP_SLOP: f32 = 8.0;
/// Display units of two-finger movement per scroll step.
const SCROLL_STEP: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKeyAction {
    Down,
    Up,
    Repeat,
    /// Replay of an already composed key sequence.
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub timestamp: Timestamp,
    pub action: RawKeyAction,
    pub scan_code: u32,
}

/// Relative pointer sample accumulated over one device frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPointerFrame {
    pub timestamp: Timestamp,
    pub dx: f32,
    pub dy: f32,
    pub hscroll: f32,
    pub vscroll: f32,
    /// Button code and whether it is now pressed, in device order.
    pub buttons: Vec<(u32, bool)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawContactState {
    Down,
    Move,
    Up,
}

/// One contact in absolute device units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawContact {
    pub id: i32,
    pub state: RawContactState,
    pub x: i32,
    pub y: i32,
    pub pressure: i32,
    pub major: i32,
    pub minor: i32,
    pub tool: ToolType,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTouchFrame {
    pub timestamp: Timestamp,
    pub contacts: Vec<RawContact>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    Key(RawKeyEvent),
    Pointer(RawPointerFrame),
    Touch(RawTouchFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

impl AxisRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    // Widened so ranges spanning most of i32 do not overflow.
    pub fn span(&self) -> f32 {
        (i64::from(self.max) - i64::from(self.min)).max(1) as f32
    }

    /// Maps `value` onto `0.0..=1.0`.
    pub fn normalize(&self, value: i32) -> f32 {
        ((i64::from(value) - i64::from(self.min)) as f32 / self.span()).clamp(0.0, 1.0)
    }
}

/// Absolute axes a touch device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchAxes {
    pub x: AxisRange,
    pub y: AxisRange,
    pub pressure: Option<AxisRange>,
}

#[derive(Debug, Clone, Copy)]
struct TapCandidate {
    id: i32,
    started: Timestamp,
    origin: Point,
    moved: bool,
}

#[derive(Debug, Default)]
struct TouchpadState {
    /// Contact driving the cursor and its last position in display units.
    primary: Option<(i32, Point)>,
    live: Vec<i32>,
    tap: Option<TapCandidate>,
}

pub struct InputTranslator {
    capabilities: DeviceCapability,
    settings: SharedDeviceSettings,
    target: Rectangle,
    touch_axes: Option<TouchAxes>,
    held: Modifiers,
    locked: Modifiers,
    cursor: Point,
    buttons: PointerButtons,
    touches: Vec<TouchPoint>,
    touchpad: TouchpadState,
}

impl InputTranslator {
    /// A translator mapping absolute and pointer coordinates onto `target`.
    pub fn new(
        capabilities: DeviceCapability,
        settings: SharedDeviceSettings,
        target: Rectangle,
        touch_axes: Option<TouchAxes>,
    ) -> Self {
        Self {
            capabilities,
            settings,
            target,
            touch_axes,
            held: Modifiers::empty(),
            locked: Modifiers::empty(),
            cursor: Point::new(target.x + target.width / 2.0, target.y + target.height / 2.0),
            buttons: PointerButtons::empty(),
            touches: Vec::new(),
            touchpad: TouchpadState::default(),
        }
    }

    /// Current modifier bitmask, including the side-independent flags.
    pub fn modifiers(&self) -> Modifiers {
        let mut modifiers = self.held | self.locked;
        for (sides, combined) in [
            (Modifiers::SHIFT_LEFT | Modifiers::SHIFT_RIGHT, Modifiers::SHIFT),
            (Modifiers::CTRL_LEFT | Modifiers::CTRL_RIGHT, Modifiers::CTRL),
            (Modifiers::ALT_LEFT | Modifiers::ALT_RIGHT, Modifiers::ALT),
            (Modifiers::META_LEFT | Modifiers::META_RIGHT, Modifiers::META),
        ] {
            if modifiers.intersects(sides) {
                modifiers.insert(combined);
            }
        }
        modifiers
    }

    pub fn cursor_position(&self) -> Point {
        self.cursor
    }

    pub fn translate(&mut self, raw: &RawInput) -> Vec<NormalizedEvent> {
        match raw {
            RawInput::Key(key) => vec![self.translate_key(key)],
            RawInput::Pointer(frame) => self.translate_pointer(frame),
            RawInput::Touch(frame) if self.capabilities.contains(DeviceCapability::TOUCHPAD) => {
                self.translate_touchpad(frame)
            }
            RawInput::Touch(frame) => self.translate_touch(frame),
        }
    }

    /// Translates a key sample. Repeats and compose replays observe the modifier
    /// state but never change it.
    pub fn translate_key(&mut self, raw: &RawKeyEvent) -> NormalizedEvent {
        match raw.action {
            RawKeyAction::Down => {
                if let Some(modifier) = keymap::held_modifier(raw.scan_code) {
                    self.held.insert(modifier);
                }
                if let Some(lock) = keymap::lock_modifier(raw.scan_code) {
                    self.locked.toggle(lock);
                }
            }
            RawKeyAction::Up => {
                if let Some(modifier) = keymap::held_modifier(raw.scan_code) {
                    self.held.remove(modifier);
                }
            }
            RawKeyAction::Repeat | RawKeyAction::Multiple => {}
        }

        let modifiers = self.modifiers();
        let action = match raw.action {
            RawKeyAction::Down => KeyAction::Down,
            RawKeyAction::Up => KeyAction::Up,
            RawKeyAction::Repeat | RawKeyAction::Multiple => KeyAction::Repeat,
        };
        NormalizedEvent::key(
            raw.timestamp,
            modifiers,
            KeyEvent {
                action,
                key_code: keymap::keysym(raw.scan_code, modifiers),
                scan_code: raw.scan_code,
            },
        )
    }

    fn button_for_code(&self, code: u32) -> Option<PointerButtons> {
        let left_handed = self.settings.get(SettingId::PrimaryButton).as_int() == Some(1);
        let button = match code {
            BTN_LEFT if left_handed => PointerButtons::SECONDARY,
            BTN_RIGHT if left_handed => PointerButtons::PRIMARY,
            BTN_LEFT => PointerButtons::PRIMARY,
            BTN_RIGHT => PointerButtons::SECONDARY,
            BTN_MIDDLE => PointerButtons::TERTIARY,
            BTN_SIDE => PointerButtons::SIDE,
            BTN_EXTRA => PointerButtons::EXTRA,
            BTN_FORWARD => PointerButtons::FORWARD,
            BTN_BACK => PointerButtons::BACK,
            _ => return None,
        };
        Some(button)
    }

    /// Translates a relative pointer frame: accelerated motion clamped to the
    /// target area, scroll scaled by the device's speed and direction, then one
    /// event per button transition.
    pub fn translate_pointer(&mut self, raw: &RawPointerFrame) -> Vec<NormalizedEvent> {
        let acceleration = self
            .settings
            .get(SettingId::CursorAcceleration)
            .as_double()
            .unwrap_or(0.0);
        let factor = (1.0 + acceleration) as f32;
        let relative = Point::new(raw.dx * factor, raw.dy * factor);

        let speed = self.settings.get(SettingId::ScrollSpeed).as_double().unwrap_or(1.0) as f32;
        let direction = if self.settings.get(SettingId::NaturalScroll).as_bool() == Some(true) {
            -1.0
        } else {
            1.0
        };
        let scroll = Point::new(raw.hscroll * speed * direction, raw.vscroll * speed * direction);

        let mut events = Vec::new();
        let modifiers = self.modifiers();
        if relative != Point::default() || scroll != Point::default() {
            self.cursor = self
                .target
                .clamp(Point::new(self.cursor.x + relative.x, self.cursor.y + relative.y));
            events.push(NormalizedEvent::pointer(
                raw.timestamp,
                modifiers,
                PointerEvent {
                    action: PointerAction::Motion,
                    buttons: self.buttons,
                    position: self.cursor,
                    relative,
                    scroll,
                },
            ));
        }

        for &(code, pressed) in &raw.buttons {
            let Some(button) = self.button_for_code(code) else {
                trace!("InputTranslator: Ignoring unknown button code {:#x}", code);
                continue;
            };
            let action = if pressed {
                self.buttons.insert(button);
                PointerAction::ButtonDown
            } else {
                self.buttons.remove(button);
                PointerAction::ButtonUp
            };
            events.push(NormalizedEvent::pointer(
                raw.timestamp,
                modifiers,
                PointerEvent {
                    action,
                    buttons: self.buttons,
                    position: self.cursor,
                    relative: Point::default(),
                    scroll: Point::default(),
                },
            ));
        }
        events
    }

    fn axes(&self) -> TouchAxes {
        self.touch_axes.unwrap_or(TouchAxes {
            x: AxisRange::new(0, self.target.width as i32),
            y: AxisRange::new(0, self.target.height as i32),
            pressure: None,
        })
    }

    fn scale_contact(&self, contact: &RawContact) -> TouchPoint {
        let axes = self.axes();
        let nx = f64::from(axes.x.normalize(contact.x));
        let ny = f64::from(axes.y.normalize(contact.y));
        let m = self
            .settings
            .get(SettingId::CalibrationMatrix)
            .as_matrix()
            .unwrap_or(IDENTITY_MATRIX);
        let cx = (m[0][0] * nx + m[0][1] * ny + m[0][2]) as f32;
        let cy = (m[1][0] * nx + m[1][1] * ny + m[1][2]) as f32;

        let units_per_pixel = axes.x.span() / self.target.width.max(1.0);
        let touch_major = contact.major as f32 / units_per_pixel;
        let touch_minor = contact.minor as f32 / units_per_pixel;
        TouchPoint {
            id: contact.id,
            action: TouchAction::Change,
            tool: contact.tool,
            position: Point::new(self.target.x + cx * self.target.width, self.target.y + cy * self.target.height),
            pressure: axes.pressure.map_or(1.0, |range| range.normalize(contact.pressure)),
            touch_major,
            touch_minor,
            size: (touch_major + touch_minor) / 2.0,
        }
    }

    fn touch_snapshot(&self, timestamp: Timestamp, transition: Option<(i32, TouchAction)>) -> NormalizedEvent {
        let mut touch = TouchEvent {
            points: self.touches.clone(),
        };
        if let Some((id, action)) = transition {
            if let Some(point) = touch.point_mut(id) {
                point.action = action;
            }
        }
        NormalizedEvent::touch(timestamp, self.modifiers(), touch)
    }

    /// Translates an absolute multi-touch frame. Frames with several contacts
    /// going down or up are split so that every event carries at most one
    /// transition; new contacts are reported before released ones.
    pub fn translate_touch(&mut self, raw: &RawTouchFrame) -> Vec<NormalizedEvent> {
        let mut downs = Vec::new();
        let mut ups = Vec::new();
        for contact in &raw.contacts {
            let scaled = self.scale_contact(contact);
            let known = self.touches.iter().position(|p| p.id == contact.id);
            match (contact.state, known) {
                (RawContactState::Down, None) => downs.push(scaled),
                (RawContactState::Up, Some(_)) => ups.push(scaled),
                (RawContactState::Up, None) => {
                    trace!("InputTranslator: Release of unknown contact {}", contact.id);
                }
                (_, Some(index)) => self.touches[index] = scaled,
                (RawContactState::Move, None) => {
                    trace!("InputTranslator: Motion of unknown contact {}", contact.id);
                }
            }
        }

        let mut events = Vec::new();
        if downs.is_empty() && ups.is_empty() {
            if !self.touches.is_empty() {
                events.push(self.touch_snapshot(raw.timestamp, None));
            }
            return events;
        }
        for point in downs {
            let id = point.id;
            self.touches.push(point);
            events.push(self.touch_snapshot(raw.timestamp, Some((id, TouchAction::Down))));
        }
        for point in ups {
            if let Some(index) = self.touches.iter().position(|p| p.id == point.id) {
                self.touches[index] = point;
                events.push(self.touch_snapshot(raw.timestamp, Some((point.id, TouchAction::Up))));
                self.touches.remove(index);
            }
        }
        events
    }

    /// Touchpads drive the cursor: the first contact moves it, two-finger motion
    /// scrolls and a short stationary contact clicks when tapping is enabled.
    pub fn translate_touchpad(&mut self, raw: &RawTouchFrame) -> Vec<NormalizedEvent> {
        let two_finger_scroll = matches!(
            self.settings.get(SettingId::ScrollMode),
            SettingValue::String(ref mode) if mode == "two-finger"
        );
        let tap_enabled = self.settings.get(SettingId::TapToClick).as_bool() == Some(true);

        let mut delta = Point::default();
        let mut tapped = false;
        for contact in &raw.contacts {
            let position = self.scale_contact(contact).position;
            match contact.state {
                RawContactState::Down => {
                    if self.touchpad.live.is_empty() {
                        self.touchpad.tap = Some(TapCandidate {
                            id: contact.id,
                            started: raw.timestamp,
                            origin: position,
                            moved: false,
                        });
                    } else {
                        self.touchpad.tap = None;
                    }
                    if !self.touchpad.live.contains(&contact.id) {
                        self.touchpad.live.push(contact.id);
                    }
                    if self.touchpad.primary.is_none() {
                        self.touchpad.primary = Some((contact.id, position));
                    }
                }
                RawContactState::Move => {
                    if let Some((id, last)) = self.touchpad.primary {
                        if id == contact.id {
                            delta.x += position.x - last.x;
                            delta.y += position.y - last.y;
                            self.touchpad.primary = Some((id, position));
                        }
                    }
                    if let Some(tap) = self.touchpad.tap.as_mut() {
                        if tap.id == contact.id
                            && ((position.x - tap.origin.x).abs() > TAP_SLOP
                                || (position.y - tap.origin.y).abs() > TAP_SLOP)
                        {
                            tap.moved = true;
                        }
                    }
                }
                RawContactState::Up => {
                    self.touchpad.live.retain(|id| *id != contact.id);
                    if self.touchpad.primary.map(|(id, _)| id) == Some(contact.id) {
                        self.touchpad.primary = None;
                    }
                    if let Some(tap) = self.touchpad.tap.take() {
                        if tap.id == contact.id
                            && !tap.moved
                            && raw.timestamp.0 - tap.started.0 <= TAP_TIMEOUT_NS
                        {
                            tapped = tap_enabled;
                        }
                    }
                }
            }
        }

        let mut frame = RawPointerFrame {
            timestamp: raw.timestamp,
            ..RawPointerFrame::default()
        };
        if two_finger_scroll && self.touchpad.live.len() >= 2 {
            frame.hscroll = delta.x / SCROLL_STEP;
            frame.vscroll = delta.y / SCROLL_STEP;
        } else {
            frame.dx = delta.x;
            frame.dy = delta.y;
        }
        let mut events = self.translate_pointer(&frame);
        if tapped {
            let click = RawPointerFrame {
                timestamp: raw.timestamp,
                buttons: vec![(BTN_LEFT, true), (BTN_LEFT, false)],
                ..RawPointerFrame::default()
            };
            events.extend(self.translate_pointer(&click));
        }
        events
    }
}

//! Normalized event model shared by every stage of the input pipeline.
//!
//! Devices produce [`NormalizedEvent`]s through their translator, the hub tags them
//! with the assigned [`DeviceId`], the dispatcher routes them and the sender
//! serializes them onto client channels.

use bitflags::bitflags;
use std::fmt;

/// Largest number of contacts a single touch event may carry on the wire.
pub const MAX_POINTER_COUNT: usize = 16;

/// Identifier assigned by the device hub when a device is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceId(pub i32);

impl DeviceId {
    /// Placeholder carried by events before the hub has tagged them.
    pub const UNASSIGNED: DeviceId = DeviceId(0);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic event time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is always available on Linux.
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        Timestamp(ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64)
    }

    pub fn from_timeval(sec: i64, usec: i64) -> Self {
        Timestamp(sec * 1_000_000_000 + usec * 1_000)
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }
}

bitflags! {
    /// Modifier keys held (or locked) when an event was generated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const ALT = 1 << 0;
        const ALT_LEFT = 1 << 1;
        const ALT_RIGHT = 1 << 2;
        const SHIFT = 1 << 3;
        const SHIFT_LEFT = 1 << 4;
        const SHIFT_RIGHT = 1 << 5;
        const SYM = 1 << 6;
        const FUNCTION = 1 << 7;
        const CTRL = 1 << 8;
        const CTRL_LEFT = 1 << 9;
        const CTRL_RIGHT = 1 << 10;
        const META = 1 << 11;
        const META_LEFT = 1 << 12;
        const META_RIGHT = 1 << 13;
        const CAPS_LOCK = 1 << 14;
        const NUM_LOCK = 1 << 15;
        const SCROLL_LOCK = 1 << 16;
    }
}

bitflags! {
    /// Pointer buttons currently held.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PointerButtons: u32 {
        const PRIMARY = 1 << 0;
        const SECONDARY = 1 << 1;
        const TERTIARY = 1 << 2;
        const BACK = 1 << 3;
        const FORWARD = 1 << 4;
        const SIDE = 1 << 5;
        const EXTRA = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis aligned rectangle in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rectangle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rectangle {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && point.x < self.x + self.width
            && point.y < self.y + self.height
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Clamps a point into the rectangle, keeping it on the last addressable pixel.
    pub fn clamp(&self, point: Point) -> Point {
        let max_x = (self.x + self.width - 1.0).max(self.x);
        let max_y = (self.y + self.height - 1.0).max(self.y);
        Point::new(point.x.clamp(self.x, max_x), point.y.clamp(self.y, max_y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    Down,
    Up,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub action: KeyAction,
    /// Symbol produced by the active keymap (an XKB keysym value, 0 when unmapped).
    pub key_code: u32,
    /// Hardware scan code as reported by the device.
    pub scan_code: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerAction {
    Motion,
    ButtonDown,
    ButtonUp,
    Enter,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub action: PointerAction,
    pub buttons: PointerButtons,
    pub position: Point,
    pub relative: Point,
    /// Horizontal (x) and vertical (y) scroll displacement.
    pub scroll: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TouchAction {
    Down,
    Change,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ToolType {
    #[default]
    Unknown,
    Finger,
    Stylus,
    Mouse,
    Eraser,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub id: i32,
    pub action: TouchAction,
    pub tool: ToolType,
    pub position: Point,
    pub pressure: f32,
    pub touch_major: f32,
    pub touch_minor: f32,
    pub size: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TouchEvent {
    pub points: Vec<TouchPoint>,
}

impl TouchEvent {
    pub fn point(&self, id: i32) -> Option<&TouchPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    pub fn point_mut(&mut self, id: i32) -> Option<&mut TouchPoint> {
        self.points.iter_mut().find(|p| p.id == id)
    }

    /// Number of contacts going down or up in this event.
    pub fn transition_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.action != TouchAction::Change)
            .count()
    }

    /// Copy of this event with every contact marked as `Change`.
    pub fn all_changed(&self) -> TouchEvent {
        let mut copy = self.clone();
        for point in &mut copy.points {
            point.action = TouchAction::Change;
        }
        copy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLifecycleAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLifecycleEvent {
    pub action: DeviceLifecycleAction,
    pub device: DeviceId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Key(KeyEvent),
    Pointer(PointerEvent),
    Touch(TouchEvent),
    DeviceLifecycle(DeviceLifecycleEvent),
}

/// An input event after translation from the device's native representation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub device_id: DeviceId,
    pub timestamp: Timestamp,
    pub modifiers: Modifiers,
    pub kind: EventKind,
}

impl NormalizedEvent {
    pub fn new(timestamp: Timestamp, modifiers: Modifiers, kind: EventKind) -> Self {
        Self {
            device_id: DeviceId::UNASSIGNED,
            timestamp,
            modifiers,
            kind,
        }
    }

    pub fn key(timestamp: Timestamp, modifiers: Modifiers, key: KeyEvent) -> Self {
        Self::new(timestamp, modifiers, EventKind::Key(key))
    }

    pub fn pointer(timestamp: Timestamp, modifiers: Modifiers, pointer: PointerEvent) -> Self {
        Self::new(timestamp, modifiers, EventKind::Pointer(pointer))
    }

    pub fn touch(timestamp: Timestamp, modifiers: Modifiers, touch: TouchEvent) -> Self {
        Self::new(timestamp, modifiers, EventKind::Touch(touch))
    }

    pub fn lifecycle(action: DeviceLifecycleAction, device: DeviceId) -> Self {
        let mut event = Self::new(
            Timestamp::now(),
            Modifiers::empty(),
            EventKind::DeviceLifecycle(DeviceLifecycleEvent { action, device }),
        );
        event.device_id = device;
        event
    }

    /// Key, pointer and touch events; lifecycle events are not user input.
    pub fn is_input(&self) -> bool {
        !matches!(self.kind, EventKind::DeviceLifecycle(_))
    }

    pub fn as_key(&self) -> Option<&KeyEvent> {
        match &self.kind {
            EventKind::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&PointerEvent> {
        match &self.kind {
            EventKind::Pointer(pointer) => Some(pointer),
            _ => None,
        }
    }

    pub fn as_touch(&self) -> Option<&TouchEvent> {
        match &self.kind {
            EventKind::Touch(touch) => Some(touch),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Key(_) => "key",
            EventKind::Pointer(_) => "pointer",
            EventKind::Touch(_) => "touch",
            EventKind::DeviceLifecycle(_) => "device-lifecycle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(DeviceId: std::fmt::Debug, Clone, Copy, PartialEq, Eq, std::hash::Hash, Ord, Default, Send, Sync);
    assert_impl_all!(Timestamp: std::fmt::Debug, Clone, Copy, Ord, Default, Send, Sync);
    assert_impl_all!(NormalizedEvent: std::fmt::Debug, Clone, PartialEq, Send, Sync);
    assert_impl_all!(Rectangle: std::fmt::Debug, Clone, Copy, PartialEq, Default, Send, Sync);

    fn contact(id: i32, action: TouchAction) -> TouchPoint {
        TouchPoint {
            id,
            action,
            tool: ToolType::Finger,
            position: Point::new(10.0, 20.0),
            pressure: 0.5,
            touch_major: 1.0,
            touch_minor: 1.0,
            size: 1.0,
        }
    }

    #[test]
    fn test_transition_count_ignores_changes() {
        let touch = TouchEvent {
            points: vec![contact(1, TouchAction::Change), contact(2, TouchAction::Down)],
        };
        assert_eq!(touch.transition_count(), 1);
        assert_eq!(touch.all_changed().transition_count(), 0);
    }

    #[test]
    fn test_rectangle_contains_is_half_open() {
        let rect = Rectangle::new(10.0, 10.0, 100.0, 50.0);
        assert!(rect.contains(Point::new(10.0, 10.0)));
        assert!(!rect.contains(Point::new(110.0, 30.0)));
        assert_eq!(rect.clamp(Point::new(500.0, -4.0)), Point::new(109.0, 10.0));
    }

    #[test]
    fn test_lifecycle_event_is_not_input() {
        let event = NormalizedEvent::lifecycle(DeviceLifecycleAction::Added, DeviceId(4));
        assert!(!event.is_input());
        assert_eq!(event.device_id, DeviceId(4));
        assert_eq!(event.kind_name(), "device-lifecycle");
    }
}

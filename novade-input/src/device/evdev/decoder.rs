// src/device/evdev/decoder.rs
use byteorder::{ByteOrder, NativeEndian};
use tracing::{debug, trace};

use super::*;
use crate::events::{Timestamp, ToolType};
use crate::translator::{RawContact, RawContactState, RawInput, RawKeyAction, RawKeyEvent, RawPointerFrame, RawTouchFrame};

/// Size of `struct input_event` on 64-bit Linux.
pub const INPUT_EVENT_SIZE: usize = 24;

const MAX_SLOTS: usize = 64;

/// One `struct input_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEventRecord {
    pub timestamp: Timestamp,
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEventRecord {
    pub fn new(timestamp: Timestamp, kind: u16, code: u16, value: i32) -> Self {
        Self {
            timestamp,
            kind,
            code,
            value,
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < INPUT_EVENT_SIZE {
            return None;
        }
        Some(Self {
            timestamp: Timestamp::from_timeval(NativeEndian::read_i64(&bytes[0..8]), NativeEndian::read_i64(&bytes[8..16])),
            kind: NativeEndian::read_u16(&bytes[16..18]),
            code: NativeEndian::read_u16(&bytes[18..20]),
            value: NativeEndian::read_i32(&bytes[20..24]),
        })
    }

    pub fn to_bytes(&self) -> [u8; INPUT_EVENT_SIZE] {
        let mut bytes = [0u8; INPUT_EVENT_SIZE];
        NativeEndian::write_i64(&mut bytes[0..8], self.timestamp.0 / 1_000_000_000);
        NativeEndian::write_i64(&mut bytes[8..16], (self.timestamp.0 % 1_000_000_000) / 1_000);
        NativeEndian::write_u16(&mut bytes[16..18], self.kind);
        NativeEndian::write_u16(&mut bytes[18..20], self.code);
        NativeEndian::write_i32(&mut bytes[20..24], self.value);
        bytes
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    tracking_id: i32,
    x: i32,
    y: i32,
    pressure: i32,
    major: i32,
    minor: i32,
    began: bool,
    ended: Option<i32>,
    dirty: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            tracking_id: -1,
            x: 0,
            y: 0,
            pressure: 0,
            major: 0,
            minor: 0,
            began: false,
            ended: None,
            dirty: false,
        }
    }
}

impl Slot {
    fn contact(&self, id: i32, state: RawContactState, tool: ToolType) -> RawContact {
        RawContact {
            id,
            state,
            x: self.x,
            y: self.y,
            pressure: self.pressure,
            major: self.major,
            minor: self.minor,
            tool,
        }
    }
}

/// Reassembles `input_event` records into per-`SYN_REPORT` raw samples.
///
/// Handles multi-touch protocol B (slots and tracking ids) and single-touch
/// devices reporting `BTN_TOUCH` with `ABS_X`/`ABS_Y`.
pub struct FrameDecoder {
    multitouch: bool,
    current_slot: usize,
    slots: Vec<Slot>,
    tool: ToolType,
    keys: Vec<RawKeyEvent>,
    pointer: RawPointerFrame,
    pointer_dirty: bool,
    dropping: bool,
}

impl FrameDecoder {
    pub fn new(multitouch: bool) -> Self {
        Self {
            multitouch,
            current_slot: 0,
            slots: vec![Slot::default()],
            tool: ToolType::Finger,
            keys: Vec::new(),
            pointer: RawPointerFrame::default(),
            pointer_dirty: false,
            dropping: false,
        }
    }

    fn slot(&mut self) -> &mut Slot {
        let index = if self.multitouch { self.current_slot } else { 0 };
        &mut self.slots[index]
    }

    /// Feeds one record; returns the samples completed by a `SYN_REPORT`.
    pub fn feed(&mut self, record: &InputEventRecord) -> Vec<RawInput> {
        match record.kind {
            EV_SYN => return self.sync(record),
            EV_KEY => self.key(record),
            EV_REL => self.relative(record),
            EV_ABS => self.absolute(record),
            other => trace!("FrameDecoder: Ignoring event type {:#x}", other),
        }
        Vec::new()
    }

    fn key(&mut self, record: &InputEventRecord) {
        match record.code {
            code if (BTN_MOUSE..BTN_JOYSTICK).contains(&code) => {
                if record.value != 2 {
                    self.pointer.buttons.push((u32::from(code), record.value != 0));
                    self.pointer_dirty = true;
                }
            }
            BTN_TOUCH => {
                if !self.multitouch {
                    let slot = self.slot();
                    if record.value != 0 && slot.tracking_id < 0 {
                        slot.tracking_id = 0;
                        slot.began = true;
                    } else if record.value == 0 && slot.tracking_id >= 0 {
                        slot.ended = Some(slot.tracking_id);
                        slot.tracking_id = -1;
                    }
                    slot.dirty = true;
                }
            }
            BTN_TOOL_PEN if record.value != 0 => self.tool = ToolType::Stylus,
            BTN_TOOL_RUBBER if record.value != 0 => self.tool = ToolType::Eraser,
            BTN_TOOL_FINGER if record.value != 0 => self.tool = ToolType::Finger,
            code if (BTN_MISC..KEY_OK).contains(&code) => {
                trace!("FrameDecoder: Ignoring button {:#x}", code);
            }
            code => {
                let action = match record.value {
                    0 => RawKeyAction::Up,
                    1 => RawKeyAction::Down,
                    _ => RawKeyAction::Repeat,
                };
                self.keys.push(RawKeyEvent {
                    timestamp: record.timestamp,
                    action,
                    scan_code: u32::from(code),
                });
            }
        }
    }

    fn relative(&mut self, record: &InputEventRecord) {
        let value = record.value as f32;
        match record.code {
            REL_X => self.pointer.dx += value,
            REL_Y => self.pointer.dy += value,
            REL_HWHEEL => self.pointer.hscroll += value,
            REL_WHEEL => self.pointer.vscroll += value,
            _ => return,
        }
        self.pointer_dirty = true;
    }

    fn absolute(&mut self, record: &InputEventRecord) {
        let value = record.value;
        if self.multitouch {
            match record.code {
                ABS_MT_SLOT => {
                    let index = usize::try_from(value).unwrap_or(0).min(MAX_SLOTS - 1);
                    if index >= self.slots.len() {
                        self.slots.resize(index + 1, Slot::default());
                    }
                    self.current_slot = index;
                    return;
                }
                ABS_MT_TRACKING_ID => {
                    let slot = self.slot();
                    if value >= 0 {
                        if slot.tracking_id >= 0 {
                            slot.ended = Some(slot.tracking_id);
                        }
                        slot.tracking_id = value;
                        slot.began = true;
                    } else if slot.tracking_id >= 0 {
                        slot.ended = Some(slot.tracking_id);
                        slot.tracking_id = -1;
                    }
                }
                ABS_MT_POSITION_X => self.slot().x = value,
                ABS_MT_POSITION_Y => self.slot().y = value,
                ABS_MT_PRESSURE => self.slot().pressure = value,
                ABS_MT_TOUCH_MAJOR => self.slot().major = value,
                ABS_MT_TOUCH_MINOR => self.slot().minor = value,
                _ => return,
            }
        } else {
            match record.code {
                ABS_X => self.slot().x = value,
                ABS_Y => self.slot().y = value,
                ABS_PRESSURE => self.slot().pressure = value,
                _ => return,
            }
        }
        self.slot().dirty = true;
    }

    fn sync(&mut self, record: &InputEventRecord) -> Vec<RawInput> {
        match record.code {
            SYN_DROPPED => {
                debug!("FrameDecoder: Kernel buffer overrun, discarding until next report");
                self.dropping = true;
                Vec::new()
            }
            SYN_REPORT if self.dropping => {
                self.dropping = false;
                self.reset_frame();
                Vec::new()
            }
            SYN_REPORT => self.finish_frame(record.timestamp),
            _ => Vec::new(),
        }
    }

    fn reset_frame(&mut self) {
        self.keys.clear();
        self.pointer = RawPointerFrame::default();
        self.pointer_dirty = false;
        for slot in &mut self.slots {
            slot.began = false;
            slot.ended = None;
            slot.dirty = false;
        }
    }

    fn finish_frame(&mut self, timestamp: Timestamp) -> Vec<RawInput> {
        let mut out: Vec<RawInput> = self.keys.drain(..).map(RawInput::Key).collect();

        if self.pointer_dirty {
            let mut frame = std::mem::take(&mut self.pointer);
            frame.timestamp = timestamp;
            out.push(RawInput::Pointer(frame));
            self.pointer_dirty = false;
        }

        if self.slots.iter().any(|s| s.dirty || s.began || s.ended.is_some()) {
            let mut contacts = Vec::new();
            for slot in &self.slots {
                if let Some(ended) = slot.ended {
                    contacts.push(slot.contact(ended, RawContactState::Up, self.tool));
                }
                if slot.tracking_id >= 0 {
                    let state = if slot.began {
                        RawContactState::Down
                    } else {
                        RawContactState::Move
                    };
                    contacts.push(slot.contact(slot.tracking_id, state, self.tool));
                }
            }
            if !contacts.is_empty() {
                out.push(RawInput::Touch(RawTouchFrame { timestamp, contacts }));
            }
        }

        for slot in &mut self.slots {
            slot.began = false;
            slot.ended = None;
            slot.dirty = false;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rec(kind: u16, code: u16, value: i32) -> InputEventRecord {
        InputEventRecord::new(Timestamp::from_timeval(1, 500), kind, code, value)
    }

    fn feed_all(decoder: &mut FrameDecoder, records: &[InputEventRecord]) -> Vec<RawInput> {
        records.iter().flat_map(|r| decoder.feed(r)).collect()
    }

    fn touch_states(input: &RawInput) -> Vec<(i32, RawContactState)> {
        match input {
            RawInput::Touch(frame) => frame.contacts.iter().map(|c| (c.id, c.state)).collect(),
            other => panic!("expected touch frame, got {other:?}"),
        }
    }

    #[test]
    fn test_record_layout() {
        let record = InputEventRecord::new(Timestamp::from_timeval(3, 250), EV_KEY, 30, 1);
        let bytes = record.to_bytes();
        assert_eq!(InputEventRecord::parse(&bytes), Some(record));
        assert_eq!(InputEventRecord::parse(&bytes[..20]), None);
    }

    #[test]
    fn test_key_and_mouse_frame() {
        let mut decoder = FrameDecoder::new(false);
        let out = feed_all(
            &mut decoder,
            &[
                rec(EV_KEY, 30, 1),
                rec(EV_REL, REL_X, 5),
                rec(EV_REL, REL_Y, -3),
                rec(EV_KEY, 0x110, 1),
                rec(EV_SYN, SYN_REPORT, 0),
            ],
        );
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], RawInput::Key(k) if k.scan_code == 30 && k.action == RawKeyAction::Down));
        match &out[1] {
            RawInput::Pointer(frame) => {
                assert_eq!((frame.dx, frame.dy), (5.0, -3.0));
                assert_eq!(frame.buttons, vec![(0x110, true)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_multitouch_slots() {
        let mut decoder = FrameDecoder::new(true);
        let out = feed_all(
            &mut decoder,
            &[
                rec(EV_ABS, ABS_MT_SLOT, 0),
                rec(EV_ABS, ABS_MT_TRACKING_ID, 10),
                rec(EV_ABS, ABS_MT_POSITION_X, 100),
                rec(EV_ABS, ABS_MT_POSITION_Y, 200),
                rec(EV_SYN, SYN_REPORT, 0),
                rec(EV_ABS, ABS_MT_SLOT, 1),
                rec(EV_ABS, ABS_MT_TRACKING_ID, 11),
                rec(EV_ABS, ABS_MT_POSITION_X, 300),
                rec(EV_SYN, SYN_REPORT, 0),
                rec(EV_ABS, ABS_MT_SLOT, 0),
                rec(EV_ABS, ABS_MT_TRACKING_ID, -1),
                rec(EV_SYN, SYN_REPORT, 0),
            ],
        );
        assert_eq!(out.len(), 3);
        assert_eq!(touch_states(&out[0]), vec![(10, RawContactState::Down)]);
        assert_eq!(
            touch_states(&out[1]),
            vec![(10, RawContactState::Move), (11, RawContactState::Down)]
        );
        assert_eq!(
            touch_states(&out[2]),
            vec![(10, RawContactState::Up), (11, RawContactState::Move)]
        );
    }

    #[test]
    fn test_single_touch_uses_btn_touch() {
        let mut decoder = FrameDecoder::new(false);
        let out = feed_all(
            &mut decoder,
            &[
                rec(EV_KEY, BTN_TOUCH, 1),
                rec(EV_ABS, ABS_X, 50),
                rec(EV_ABS, ABS_Y, 60),
                rec(EV_SYN, SYN_REPORT, 0),
                rec(EV_KEY, BTN_TOUCH, 0),
                rec(EV_SYN, SYN_REPORT, 0),
            ],
        );
        assert_eq!(touch_states(&out[0]), vec![(0, RawContactState::Down)]);
        assert_eq!(touch_states(&out[1]), vec![(0, RawContactState::Up)]);
    }

    #[test]
    fn test_dropped_frame_is_discarded() {
        let mut decoder = FrameDecoder::new(false);
        let out = feed_all(
            &mut decoder,
            &[
                rec(EV_REL, REL_X, 5),
                rec(EV_SYN, SYN_DROPPED, 0),
                rec(EV_REL, REL_X, 7),
                rec(EV_SYN, SYN_REPORT, 0),
                rec(EV_REL, REL_Y, 1),
                rec(EV_SYN, SYN_REPORT, 0),
            ],
        );
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], RawInput::Pointer(f) if f.dx == 0.0 && f.dy == 1.0));
    }
}

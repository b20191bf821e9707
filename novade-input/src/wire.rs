//! Record codec for client channels.
//!
//! Every datagram on a channel carries exactly one message, little-endian:
//!
//! ```text
//! Event:    u8 = 1, u32 sequence_id, event
//! Finished: u8 = 2, u32 sequence_id, u8 consumed
//!
//! event:      u8 kind, i32 device_id, i64 timestamp_ns, u32 modifiers, body
//! key:        u8 action, u32 key_code, u32 scan_code
//! pointer:    u8 action, u32 buttons, f32 x, f32 y, f32 dx, f32 dy, f32 hscroll, f32 vscroll
//! touch:      u8 count, count * (i32 id, u8 action, u8 tool,
//!                                f32 x, f32 y, f32 pressure, f32 major, f32 minor, f32 size)
//! lifecycle:  u8 action, i32 device
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::error::{InputError, WireError};
use crate::events::{
    DeviceId, DeviceLifecycleAction, DeviceLifecycleEvent, EventKind, KeyAction, KeyEvent, Modifiers,
    NormalizedEvent, Point, PointerAction, PointerButtons, PointerEvent, Timestamp, ToolType, TouchAction,
    TouchEvent, TouchPoint, MAX_POINTER_COUNT,
};

const MESSAGE_EVENT: u8 = 1;
const MESSAGE_FINISHED: u8 = 2;

const KIND_KEY: u8 = 1;
const KIND_POINTER: u8 = 2;
const KIND_TOUCH: u8 = 3;
const KIND_LIFECYCLE: u8 = 4;

/// Upper bound of an encoded message; receive buffers use this size.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// A decoded channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Event { sequence_id: u32, event: NormalizedEvent },
    Finished { sequence_id: u32, consumed: bool },
}

pub fn encode_event(sequence_id: u32, event: &NormalizedEvent) -> Result<Vec<u8>, InputError> {
    let mut buf = Vec::with_capacity(64);
    write_event(&mut buf, sequence_id, event)?;
    Ok(buf)
}

pub fn encode_finished(sequence_id: u32, consumed: bool) -> Result<Vec<u8>, InputError> {
    let mut buf = Vec::with_capacity(6);
    buf.write_u8(MESSAGE_FINISHED)?;
    buf.write_u32::<LittleEndian>(sequence_id)?;
    buf.write_u8(u8::from(consumed))?;
    Ok(buf)
}

/// Writes an `Event` message.
///
/// Touch events with more than [`MAX_POINTER_COUNT`] contacts are rejected.
pub fn write_event<W: Write>(w: &mut W, sequence_id: u32, event: &NormalizedEvent) -> Result<(), InputError> {
    w.write_u8(MESSAGE_EVENT)?;
    w.write_u32::<LittleEndian>(sequence_id)?;

    let kind = match &event.kind {
        EventKind::Key(_) => KIND_KEY,
        EventKind::Pointer(_) => KIND_POINTER,
        EventKind::Touch(touch) => {
            if touch.points.len() > MAX_POINTER_COUNT {
                return Err(WireError::TooManyPointers(touch.points.len()).into());
            }
            KIND_TOUCH
        }
        EventKind::DeviceLifecycle(_) => KIND_LIFECYCLE,
    };
    w.write_u8(kind)?;
    w.write_i32::<LittleEndian>(event.device_id.0)?;
    w.write_i64::<LittleEndian>(event.timestamp.0)?;
    w.write_u32::<LittleEndian>(event.modifiers.bits())?;

    match &event.kind {
        EventKind::Key(key) => {
            w.write_u8(key_action_to_u8(key.action))?;
            w.write_u32::<LittleEndian>(key.key_code)?;
            w.write_u32::<LittleEndian>(key.scan_code)?;
        }
        EventKind::Pointer(pointer) => {
            w.write_u8(pointer_action_to_u8(pointer.action))?;
            w.write_u32::<LittleEndian>(pointer.buttons.bits())?;
            for value in [
                pointer.position.x,
                pointer.position.y,
                pointer.relative.x,
                pointer.relative.y,
                pointer.scroll.x,
                pointer.scroll.y,
            ] {
                w.write_f32::<LittleEndian>(value)?;
            }
        }
        EventKind::Touch(touch) => {
            // Length checked above.
            w.write_u8(touch.points.len() as u8)?;
            for point in &touch.points {
                w.write_i32::<LittleEndian>(point.id)?;
                w.write_u8(touch_action_to_u8(point.action))?;
                w.write_u8(tool_to_u8(point.tool))?;
                for value in [
                    point.position.x,
                    point.position.y,
                    point.pressure,
                    point.touch_major,
                    point.touch_minor,
                    point.size,
                ] {
                    w.write_f32::<LittleEndian>(value)?;
                }
            }
        }
        EventKind::DeviceLifecycle(lifecycle) => {
            w.write_u8(match lifecycle.action {
                DeviceLifecycleAction::Added => 0,
                DeviceLifecycleAction::Removed => 1,
            })?;
            w.write_i32::<LittleEndian>(lifecycle.device.0)?;
        }
    }
    Ok(())
}

/// Decodes one datagram.
pub fn decode_message(bytes: &[u8]) -> Result<Message, WireError> {
    let mut r = Cursor::new(bytes);
    let message = read_u8(&mut r)?;
    let sequence_id = r.read_u32::<LittleEndian>().map_err(|_| WireError::Truncated)?;
    match message {
        MESSAGE_EVENT => Ok(Message::Event {
            sequence_id,
            event: read_event(&mut r)?,
        }),
        MESSAGE_FINISHED => Ok(Message::Finished {
            sequence_id,
            consumed: read_u8(&mut r)? != 0,
        }),
        other => Err(WireError::UnknownMessage(other)),
    }
}

fn read_u8(r: &mut Cursor<&[u8]>) -> Result<u8, WireError> {
    r.read_u8().map_err(|_| WireError::Truncated)
}

fn read_i32(r: &mut Cursor<&[u8]>) -> Result<i32, WireError> {
    r.read_i32::<LittleEndian>().map_err(|_| WireError::Truncated)
}

fn read_u32(r: &mut Cursor<&[u8]>) -> Result<u32, WireError> {
    r.read_u32::<LittleEndian>().map_err(|_| WireError::Truncated)
}

fn read_f32(r: &mut Cursor<&[u8]>) -> Result<f32, WireError> {
    r.read_f32::<LittleEndian>().map_err(|_| WireError::Truncated)
}

fn read_point(r: &mut Cursor<&[u8]>) -> Result<Point, WireError> {
    Ok(Point::new(read_f32(r)?, read_f32(r)?))
}

fn read_event(r: &mut Cursor<&[u8]>) -> Result<NormalizedEvent, WireError> {
    let kind = read_u8(r)?;
    let device_id = DeviceId(read_i32(r)?);
    let timestamp = Timestamp(r.read_i64::<LittleEndian>().map_err(|_| WireError::Truncated)?);
    let modifiers = Modifiers::from_bits_truncate(read_u32(r)?);

    let kind = match kind {
        KIND_KEY => EventKind::Key(KeyEvent {
            action: key_action_from_u8(read_u8(r)?)?,
            key_code: read_u32(r)?,
            scan_code: read_u32(r)?,
        }),
        KIND_POINTER => EventKind::Pointer(PointerEvent {
            action: pointer_action_from_u8(read_u8(r)?)?,
            buttons: PointerButtons::from_bits_truncate(read_u32(r)?),
            position: read_point(r)?,
            relative: read_point(r)?,
            scroll: read_point(r)?,
        }),
        KIND_TOUCH => {
            let count = read_u8(r)? as usize;
            if count > MAX_POINTER_COUNT {
                return Err(WireError::TooManyPointers(count));
            }
            let mut points = Vec::with_capacity(count);
            for _ in 0..count {
                points.push(TouchPoint {
                    id: read_i32(r)?,
                    action: touch_action_from_u8(read_u8(r)?)?,
                    tool: tool_from_u8(read_u8(r)?),
                    position: read_point(r)?,
                    pressure: read_f32(r)?,
                    touch_major: read_f32(r)?,
                    touch_minor: read_f32(r)?,
                    size: read_f32(r)?,
                });
            }
            EventKind::Touch(TouchEvent { points })
        }
        KIND_LIFECYCLE => {
            let action = match read_u8(r)? {
                0 => DeviceLifecycleAction::Added,
                1 => DeviceLifecycleAction::Removed,
                other => return Err(WireError::InvalidAction(other)),
            };
            EventKind::DeviceLifecycle(DeviceLifecycleEvent {
                action,
                device: DeviceId(read_i32(r)?),
            })
        }
        other => return Err(WireError::UnknownEventKind(other)),
    };

    Ok(NormalizedEvent {
        device_id,
        timestamp,
        modifiers,
        kind,
    })
}

fn key_action_to_u8(action: KeyAction) -> u8 {
    match action {
        KeyAction::Down => 0,
        KeyAction::Up => 1,
        KeyAction::Repeat => 2,
    }
}

fn key_action_from_u8(value: u8) -> Result<KeyAction, WireError> {
    match value {
        0 => Ok(KeyAction::Down),
        1 => Ok(KeyAction::Up),
        2 => Ok(KeyAction::Repeat),
        other => Err(WireError::InvalidAction(other)),
    }
}

fn pointer_action_to_u8(action: PointerAction) -> u8 {
    match action {
        PointerAction::Motion => 0,
        PointerAction::ButtonDown => 1,
        PointerAction::ButtonUp => 2,
        PointerAction::Enter => 3,
        PointerAction::Leave => 4,
    }
}

fn pointer_action_from_u8(value: u8) -> Result<PointerAction, WireError> {
    match value {
        0 => Ok(PointerAction::Motion),
        1 => Ok(PointerAction::ButtonDown),
        2 => Ok(PointerAction::ButtonUp),
        3 => Ok(PointerAction::Enter),
        4 => Ok(PointerAction::Leave),
        other => Err(WireError::InvalidAction(other)),
    }
}

fn touch_action_to_u8(action: TouchAction) -> u8 {
    match action {
        TouchAction::Down => 0,
        TouchAction::Change => 1,
        TouchAction::Up => 2,
    }
}

fn touch_action_from_u8(value: u8) -> Result<TouchAction, WireError> {
    match value {
        0 => Ok(TouchAction::Down),
        1 => Ok(TouchAction::Change),
        2 => Ok(TouchAction::Up),
        other => Err(WireError::InvalidAction(other)),
    }
}

fn tool_to_u8(tool: ToolType) -> u8 {
    match tool {
        ToolType::Unknown => 0,
        ToolType::Finger => 1,
        ToolType::Stylus => 2,
        ToolType::Mouse => 3,
        ToolType::Eraser => 4,
    }
}

fn tool_from_u8(value: u8) -> ToolType {
    match value {
        1 => ToolType::Finger,
        2 => ToolType::Stylus,
        3 => ToolType::Mouse,
        4 => ToolType::Eraser,
        _ => ToolType::Unknown,
    }
}

//! Built-in US layout mapping evdev scan codes to XKB keysyms.

use crate::events::Modifiers;

pub const KEY_ESC: u32 = 1;
pub const KEY_LEFTCTRL: u32 = 29;
pub const KEY_LEFTSHIFT: u32 = 42;
pub const KEY_RIGHTSHIFT: u32 = 54;
pub const KEY_LEFTALT: u32 = 56;
pub const KEY_CAPSLOCK: u32 = 58;
pub const KEY_NUMLOCK: u32 = 69;
pub const KEY_SCROLLLOCK: u32 = 70;
pub const KEY_RIGHTCTRL: u32 = 97;
pub const KEY_RIGHTALT: u32 = 100;
pub const KEY_LEFTMETA: u32 = 125;
pub const KEY_RIGHTMETA: u32 = 126;

pub const NO_SYMBOL: u32 = 0;

/// Modifier held while `scan_code` is down, if it is a modifier key.
pub fn held_modifier(scan_code: u32) -> Option<Modifiers> {
    match scan_code {
        KEY_LEFTSHIFT => Some(Modifiers::SHIFT_LEFT),
        KEY_RIGHTSHIFT => Some(Modifiers::SHIFT_RIGHT),
        KEY_LEFTCTRL => Some(Modifiers::CTRL_LEFT),
        KEY_RIGHTCTRL => Some(Modifiers::CTRL_RIGHT),
        KEY_LEFTALT => Some(Modifiers::ALT_LEFT),
        KEY_RIGHTALT => Some(Modifiers::ALT_RIGHT),
        KEY_LEFTMETA => Some(Modifiers::META_LEFT),
        KEY_RIGHTMETA => Some(Modifiers::META_RIGHT),
        _ => None,
    }
}

/// Lock toggled by pressing `scan_code`, if it is a lock key.
pub fn lock_modifier(scan_code: u32) -> Option<Modifiers> {
    match scan_code {
        KEY_CAPSLOCK => Some(Modifiers::CAPS_LOCK),
        KEY_NUMLOCK => Some(Modifiers::NUM_LOCK),
        KEY_SCROLLLOCK => Some(Modifiers::SCROLL_LOCK),
        _ => None,
    }
}

/// Whether the key is a modifier or lock key.
pub fn is_modifier_key(scan_code: u32) -> bool {
    held_modifier(scan_code).is_some() || lock_modifier(scan_code).is_some()
}

const TOP_ROW: &[u8] = b"qwertyuiop";
const HOME_ROW: &[u8] = b"asdfghjkl";
const BOTTOM_ROW: &[u8] = b"zxcvbnm";

fn letter(scan_code: u32) -> Option<u8> {
    match scan_code {
        16..=25 => Some(TOP_ROW[(scan_code - 16) as usize]),
        30..=38 => Some(HOME_ROW[(scan_code - 30) as usize]),
        44..=50 => Some(BOTTOM_ROW[(scan_code - 44) as usize]),
        _ => None,
    }
}

/// Unshifted and shifted keysym for printable, non-letter keys.
fn symbol_pair(scan_code: u32) -> Option<(u8, u8)> {
    let pair = match scan_code {
        2 => (b'1', b'!'),
        3 => (b'2', b'@'),
        4 => (b'3', b'#'),
        5 => (b'4', b'$'),
        6 => (b'5', b'%'),
        7 => (b'6', b'^'),
        8 => (b'7', b'&'),
        9 => (b'8', b'*'),
        10 => (b'9', b'('),
        11 => (b'0', b')'),
        12 => (b'-', b'_'),
        13 => (b'=', b'+'),
        26 => (b'[', b'{'),
        27 => (b']', b'}'),
        39 => (b';', b':'),
        40 => (b'\'', b'"'),
        41 => (b'`', b'~'),
        43 => (b'\\', b'|'),
        51 => (b',', b'<'),
        52 => (b'.', b'>'),
        53 => (b'/', b'?'),
        57 => (b' ', b' '),
        _ => return None,
    };
    Some(pair)
}

/// Keypad keys: (keysym with Num Lock on, keysym with Num Lock off).
fn keypad(scan_code: u32) -> Option<(u32, u32)> {
    let pair = match scan_code {
        71 => (0xffb7, 0xff95), // KP_7 / KP_Home
        72 => (0xffb8, 0xff97), // KP_8 / KP_Up
        73 => (0xffb9, 0xff9a), // KP_9 / KP_Prior
        75 => (0xffb4, 0xff96), // KP_4 / KP_Left
        76 => (0xffb5, 0xff9d), // KP_5 / KP_Begin
        77 => (0xffb6, 0xff98), // KP_6 / KP_Right
        79 => (0xffb1, 0xff9c), // KP_1 / KP_End
        80 => (0xffb2, 0xff99), // KP_2 / KP_Down
        81 => (0xffb3, 0xff9b), // KP_3 / KP_Next
        82 => (0xffb0, 0xff9e), // KP_0 / KP_Insert
        83 => (0xffae, 0xff9f), // KP_Decimal / KP_Delete
        _ => return None,
    };
    Some(pair)
}

fn function_key(scan_code: u32) -> Option<u32> {
    let sym = match scan_code {
        KEY_ESC => 0xff1b,
        14 => 0xff08, // BackSpace
        15 => 0xff09, // Tab
        28 => 0xff0d, // Return
        KEY_LEFTCTRL => 0xffe3,
        KEY_LEFTSHIFT => 0xffe1,
        KEY_RIGHTSHIFT => 0xffe2,
        55 => 0xffaa, // KP_Multiply
        KEY_LEFTALT => 0xffe9,
        KEY_CAPSLOCK => 0xffe5,
        59..=68 => 0xffbe + (scan_code - 59), // F1..F10
        KEY_NUMLOCK => 0xff7f,
        KEY_SCROLLLOCK => 0xff14,
        74 => 0xffad, // KP_Subtract
        78 => 0xffab, // KP_Add
        87 => 0xffc8, // F11
        88 => 0xffc9, // F12
        96 => 0xff8d, // KP_Enter
        KEY_RIGHTCTRL => 0xffe4,
        98 => 0xffaf, // KP_Divide
        KEY_RIGHTALT => 0xffea,
        102 => 0xff50, // Home
        103 => 0xff52, // Up
        104 => 0xff55, // Prior
        105 => 0xff51, // Left
        106 => 0xff53, // Right
        107 => 0xff57, // End
        108 => 0xff54, // Down
        109 => 0xff56, // Next
        110 => 0xff63, // Insert
        111 => 0xffff, // Delete
        KEY_LEFTMETA => 0xffeb,
        KEY_RIGHTMETA => 0xffec,
        _ => return None,
    };
    Some(sym)
}

/// Keysym produced by `scan_code` under `modifiers`, or [`NO_SYMBOL`].
pub fn keysym(scan_code: u32, modifiers: Modifiers) -> u32 {
    let shift = modifiers.contains(Modifiers::SHIFT);
    if let Some(lower) = letter(scan_code) {
        let upper = shift != modifiers.contains(Modifiers::CAPS_LOCK);
        return u32::from(if upper { lower.to_ascii_uppercase() } else { lower });
    }
    if let Some((plain, shifted)) = symbol_pair(scan_code) {
        return u32::from(if shift { shifted } else { plain });
    }
    if let Some((numeric, navigation)) = keypad(scan_code) {
        return if modifiers.contains(Modifiers::NUM_LOCK) != shift {
            numeric
        } else {
            navigation
        };
    }
    function_key(scan_code).unwrap_or(NO_SYMBOL)
}

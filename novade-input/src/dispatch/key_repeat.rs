// src/dispatch/key_repeat.rs
use std::collections::HashMap;
use std::time::Duration;

use tracing::trace;

use crate::config::KeyboardConfig;
use crate::events::{DeviceId, EventKind, KeyAction, NormalizedEvent, Timestamp};
use crate::translator::keymap::is_modifier_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatDecision {
    Forward,
    Suppress,
}

/// Request to schedule the first synthesized repeat of a held key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatArm {
    pub device: DeviceId,
    pub scan_code: u32,
    pub generation: u64,
    pub delay: Duration,
}

struct HeldKey {
    down: NormalizedEvent,
    generation: u64,
}

/// Tracks held keys and produces software key repeat.
///
/// The repeater does not own timers. `observe` hands out a [`RepeatArm`] when a
/// repeatable key goes down and `tick` turns an expired timer into a repeat
/// event, provided the same press is still held.
pub struct KeyRepeater {
    synthesize: bool,
    delay: Duration,
    interval: Duration,
    held: HashMap<(DeviceId, u32), HeldKey>,
    next_generation: u64,
}

impl KeyRepeater {
    pub fn new(config: &KeyboardConfig) -> Self {
        Self {
            synthesize: config.synthesize_repeat,
            delay: config.repeat_delay(),
            interval: config.repeat_interval(),
            held: HashMap::new(),
            next_generation: 1,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Updates held-key state for `event` and decides whether it is forwarded.
    pub fn observe(&mut self, event: &NormalizedEvent) -> (RepeatDecision, Option<RepeatArm>) {
        let EventKind::Key(key) = &event.kind else {
            return (RepeatDecision::Forward, None);
        };
        let slot = (event.device_id, key.scan_code);
        match key.action {
            KeyAction::Down => {
                let generation = self.next_generation;
                self.next_generation += 1;
                self.held.insert(
                    slot,
                    HeldKey {
                        down: event.clone(),
                        generation,
                    },
                );
                let arm = (self.synthesize && !is_modifier_key(key.scan_code)).then_some(RepeatArm {
                    device: event.device_id,
                    scan_code: key.scan_code,
                    generation,
                    delay: self.delay,
                });
                (RepeatDecision::Forward, arm)
            }
            KeyAction::Up => {
                self.held.remove(&slot);
                (RepeatDecision::Forward, None)
            }
            KeyAction::Repeat => {
                if !self.held.contains_key(&slot) {
                    trace!(
                        "KeyRepeater: Dropping repeat of scan code {} on device {}, key is not down",
                        key.scan_code,
                        event.device_id
                    );
                    (RepeatDecision::Suppress, None)
                } else if self.synthesize {
                    (RepeatDecision::Suppress, None)
                } else {
                    (RepeatDecision::Forward, None)
                }
            }
        }
    }

    /// Records an event that never reached `observe` because a filter consumed it.
    /// A consumed release still ends the press, so its repeat timer stops.
    pub fn observe_consumed(&mut self, event: &NormalizedEvent) {
        if let EventKind::Key(key) = &event.kind {
            if key.action == KeyAction::Up && self.held.remove(&(event.device_id, key.scan_code)).is_some() {
                trace!(
                    "KeyRepeater: Consumed release ends press of scan code {} on device {}",
                    key.scan_code,
                    event.device_id
                );
            }
        }
    }

    /// Produces the repeat for an expired timer, or `None` when that press ended.
    pub fn tick(&mut self, device: DeviceId, scan_code: u32, generation: u64) -> Option<NormalizedEvent> {
        let held = self.held.get(&(device, scan_code))?;
        if held.generation != generation {
            return None;
        }
        let mut repeat = held.down.clone();
        repeat.timestamp = Timestamp::now();
        if let EventKind::Key(key) = &mut repeat.kind {
            key.action = KeyAction::Repeat;
        }
        Some(repeat)
    }

    pub fn forget_device(&mut self, device: DeviceId) {
        self.held.retain(|(owner, _), _| *owner != device);
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyEvent, Modifiers};
    use crate::translator::keymap::KEY_LEFTSHIFT;

    const KEY_A: u32 = 30;

    fn key(action: KeyAction, scan_code: u32) -> NormalizedEvent {
        let mut event = NormalizedEvent::key(
            Timestamp(1),
            Modifiers::empty(),
            KeyEvent {
                action,
                key_code: 0,
                scan_code,
            },
        );
        event.device_id = DeviceId(2);
        event
    }

    fn repeater(synthesize: bool) -> KeyRepeater {
        KeyRepeater::new(&KeyboardConfig {
            synthesize_repeat: synthesize,
            ..KeyboardConfig::default()
        })
    }

    #[test]
    fn test_down_arms_and_tick_repeats_until_release() {
        let mut repeater = repeater(true);
        let (decision, arm) = repeater.observe(&key(KeyAction::Down, KEY_A));
        assert_eq!(decision, RepeatDecision::Forward);
        let arm = arm.unwrap();
        assert_eq!(arm.delay, Duration::from_millis(600));

        let repeat = repeater.tick(arm.device, arm.scan_code, arm.generation).unwrap();
        assert_eq!(repeat.as_key().unwrap().action, KeyAction::Repeat);
        assert_eq!(repeat.device_id, DeviceId(2));

        repeater.observe(&key(KeyAction::Up, KEY_A));
        assert!(repeater.tick(arm.device, arm.scan_code, arm.generation).is_none());
    }

    #[test]
    fn test_stale_timer_does_not_repeat_a_new_press() {
        let mut repeater = repeater(true);
        let (_, first) = repeater.observe(&key(KeyAction::Down, KEY_A));
        repeater.observe(&key(KeyAction::Up, KEY_A));
        let (_, second) = repeater.observe(&key(KeyAction::Down, KEY_A));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(repeater.tick(first.device, first.scan_code, first.generation).is_none());
        assert!(repeater.tick(second.device, second.scan_code, second.generation).is_some());
    }

    #[test]
    fn test_consumed_release_ends_press() {
        let mut repeater = repeater(true);
        let (_, arm) = repeater.observe(&key(KeyAction::Down, KEY_A));
        let arm = arm.unwrap();

        repeater.observe_consumed(&key(KeyAction::Down, KEY_LEFTSHIFT));
        assert_eq!(repeater.held_count(), 1);
        repeater.observe_consumed(&key(KeyAction::Up, KEY_A));

        assert_eq!(repeater.held_count(), 0);
        assert!(repeater.tick(arm.device, arm.scan_code, arm.generation).is_none());
    }

    #[test]
    fn test_modifiers_never_arm() {
        let mut repeater = repeater(true);
        let (decision, arm) = repeater.observe(&key(KeyAction::Down, KEY_LEFTSHIFT));
        assert_eq!(decision, RepeatDecision::Forward);
        assert!(arm.is_none());
    }

    #[test]
    fn test_hardware_repeat_handling() {
        let mut synthesizing = repeater(true);
        assert_eq!(synthesizing.observe(&key(KeyAction::Repeat, KEY_A)).0, RepeatDecision::Suppress);
        synthesizing.observe(&key(KeyAction::Down, KEY_A));
        assert_eq!(synthesizing.observe(&key(KeyAction::Repeat, KEY_A)).0, RepeatDecision::Suppress);

        let mut passthrough = repeater(false);
        assert_eq!(passthrough.observe(&key(KeyAction::Repeat, KEY_A)).0, RepeatDecision::Suppress);
        let (_, arm) = passthrough.observe(&key(KeyAction::Down, KEY_A));
        assert!(arm.is_none());
        assert_eq!(passthrough.observe(&key(KeyAction::Repeat, KEY_A)).0, RepeatDecision::Forward);

        passthrough.forget_device(DeviceId(2));
        assert_eq!(passthrough.held_count(), 0);
    }
}

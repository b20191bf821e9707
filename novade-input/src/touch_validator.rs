//! Repairs per-device touch streams so every contact is seen as
//! `down`, zero or more `change`, then `up`.
//!
//! The validator remembers the last forwarded touch event per device. Each new
//! event is compared against it:
//!
//! 1. Contacts that were live but are missing from the new event get a
//!    synthesized `up`. A contact reported as `down` while already live is
//!    treated the same way, so it is released before it goes down again.
//! 2. Contacts in the new event that are not live and not going `down` get a
//!    synthesized `down`.
//! 3. The event itself is forwarded and becomes the new reference.
//!
//! Releases are synthesized before insertions, which keeps every synthesized
//! event within the contact limit of the original.
//!
//! A device without history is compared against an empty reference.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::TouchStreamError;
use crate::events::{
    DeviceId, DeviceLifecycleAction, EventKind, NormalizedEvent, TouchAction, TouchEvent, MAX_POINTER_COUNT,
};

#[derive(Debug, Default)]
pub struct TouchStreamValidator {
    last_delivered: HashMap<DeviceId, TouchEvent>,
}

fn check_batch(touch: &TouchEvent) -> Result<(), TouchStreamError> {
    if touch.points.len() > MAX_POINTER_COUNT {
        return Err(TouchStreamError::TooManyPoints(touch.points.len()));
    }
    let mut seen = HashSet::with_capacity(touch.points.len());
    for point in &touch.points {
        if !seen.insert(point.id) {
            return Err(TouchStreamError::DuplicateId(point.id));
        }
    }
    let transitions = touch.transition_count();
    if transitions > 1 {
        return Err(TouchStreamError::MultipleTransitions(transitions));
    }
    Ok(())
}

impl TouchStreamValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the events to forward for `event`, in order.
    ///
    /// Non-touch events pass through unchanged; a device removal also drops the
    /// device's history.
    ///
    /// # Errors
    ///
    /// Malformed touch batches are rejected and nothing is forwarded.
    pub fn validate(&mut self, event: NormalizedEvent) -> Result<Vec<NormalizedEvent>, TouchStreamError> {
        let touch = match &event.kind {
            EventKind::Touch(touch) => touch,
            EventKind::DeviceLifecycle(lifecycle) => {
                if lifecycle.action == DeviceLifecycleAction::Removed {
                    self.forget_device(lifecycle.device);
                }
                return Ok(vec![event]);
            }
            EventKind::Key(_) | EventKind::Pointer(_) => return Ok(vec![event]),
        };

        if let Err(e) = check_batch(touch) {
            warn!("TouchStreamValidator: Dropping touch event from device {}: {}", event.device_id, e);
            return Err(e);
        }

        let mut reference = self
            .last_delivered
            .get(&event.device_id)
            .cloned()
            .unwrap_or_default();
        // Contacts released in the reference are no longer live.
        reference.points.retain(|p| p.action != TouchAction::Up);
        let mut reference = reference.all_changed();

        let mut forwarded = Vec::new();

        let missing_up: Vec<i32> = reference
            .points
            .iter()
            .map(|p| p.id)
            .filter(|id| match touch.point(*id) {
                None => true,
                Some(point) => point.action == TouchAction::Down,
            })
            .collect();
        for id in missing_up {
            debug!("TouchStreamValidator: Inserting missing release of {} on device {}", id, event.device_id);
            let mut release = reference.clone();
            if let Some(point) = release.point_mut(id) {
                point.action = TouchAction::Up;
            }
            forwarded.push(self.synthesized(&event, release));
            reference.points.retain(|p| p.id != id);
        }

        for point in &touch.points {
            if point.action == TouchAction::Down || reference.point(point.id).is_some() {
                continue;
            }
            debug!(
                "TouchStreamValidator: Inserting missing down of {} on device {}",
                point.id, event.device_id
            );
            let mut press = reference.all_changed();
            let mut inserted = *point;
            inserted.action = TouchAction::Down;
            press.points.push(inserted);
            forwarded.push(self.synthesized(&event, press.clone()));
            reference = press.all_changed();
        }

        self.last_delivered.insert(event.device_id, touch.clone());
        forwarded.push(event);
        Ok(forwarded)
    }

    fn synthesized(&self, template: &NormalizedEvent, touch: TouchEvent) -> NormalizedEvent {
        let mut event = NormalizedEvent::touch(template.timestamp, template.modifiers, touch);
        event.device_id = template.device_id;
        event
    }

    pub fn forget_device(&mut self, device: DeviceId) {
        if self.last_delivered.remove(&device).is_some() {
            debug!("TouchStreamValidator: Forgot touch history of device {}", device);
        }
    }

    pub fn tracked_devices(&self) -> usize {
        self.last_delivered.len()
    }
}

//! Routing of normalized events to client channels.
//!
//! Each event passes, in order, the touch stream validator, the event filter
//! chain, key repeat tracking and the router before the sender writes it to the
//! target surface's channel. [`SurfaceInputDispatcher`] holds that pipeline and
//! runs on the dispatch thread ([`thread::DispatchThread`]); devices reach it
//! through the [`InputDispatcher`] implemented by [`thread::DispatchQueue`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::KeyboardConfig;
use crate::events::{DeviceId, DeviceLifecycleAction, EventKind, NormalizedEvent};
use crate::sender::{ChannelId, InputSender};
use crate::touch_validator::TouchStreamValidator;

pub mod filter;
pub mod key_repeat;
pub mod routing;
pub mod thread;

pub use filter::{CompositeEventFilter, EventFilter};
pub use key_repeat::{KeyRepeater, RepeatArm, RepeatDecision};
pub use routing::{EventRouter, InputScene, InputSurface, KeyboardFocus, Route};
pub use thread::{DispatchQueue, DispatchThread};

/// Entry point for device events.
pub trait InputDispatcher: Send + Sync {
    fn dispatch(&self, event: NormalizedEvent);
}

/// What happened to one event inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Malformed touch batch.
    Rejected,
    /// Consumed by an event filter.
    Filtered,
    /// A key repeat for a key that is not down, or a hardware repeat replaced by
    /// synthesized ones.
    Suppressed,
    /// No surface to deliver to.
    NoTarget,
    Delivered { channel: ChannelId, sequence_id: u32 },
    SendFailed,
}

pub struct SurfaceInputDispatcher {
    validator: TouchStreamValidator,
    filters: Arc<CompositeEventFilter>,
    repeater: KeyRepeater,
    router: EventRouter,
    sender: InputSender,
    repeat_requests: Vec<RepeatArm>,
}

impl SurfaceInputDispatcher {
    pub fn new(
        router: EventRouter,
        filters: Arc<CompositeEventFilter>,
        sender: InputSender,
        keyboard: &KeyboardConfig,
    ) -> Self {
        Self {
            validator: TouchStreamValidator::new(),
            filters,
            repeater: KeyRepeater::new(keyboard),
            router,
            sender,
            repeat_requests: Vec::new(),
        }
    }

    /// Runs `event` through the pipeline. Validation may expand it into several
    /// events, so one disposition is returned per delivery attempt.
    pub fn process(&mut self, event: NormalizedEvent) -> Vec<Disposition> {
        let validated = match self.validator.validate(event) {
            Ok(events) => events,
            Err(_) => return vec![Disposition::Rejected],
        };
        let mut dispositions = Vec::with_capacity(validated.len());
        for event in validated {
            dispositions.extend(self.process_valid(event));
        }
        dispositions
    }

    fn process_valid(&mut self, event: NormalizedEvent) -> Vec<Disposition> {
        if let EventKind::DeviceLifecycle(lifecycle) = &event.kind {
            if lifecycle.action == DeviceLifecycleAction::Removed {
                self.forget_device(lifecycle.device);
            }
        }
        if self.filters.handle(&event) {
            self.repeater.observe_consumed(&event);
            return vec![Disposition::Filtered];
        }
        let (decision, arm) = self.repeater.observe(&event);
        if decision == RepeatDecision::Suppress {
            return vec![Disposition::Suppressed];
        }
        self.repeat_requests.extend(arm);
        self.deliver(event)
    }

    /// Synthesizes the next repeat of a held key. `None` means the press ended and
    /// its timer should stop.
    pub fn repeat_key(&mut self, device: DeviceId, scan_code: u32, generation: u64) -> Option<Vec<Disposition>> {
        let repeat = self.repeater.tick(device, scan_code, generation)?;
        if self.filters.handle(&repeat) {
            return Some(vec![Disposition::Filtered]);
        }
        Some(self.deliver(repeat))
    }

    pub fn take_repeat_requests(&mut self) -> Vec<RepeatArm> {
        std::mem::take(&mut self.repeat_requests)
    }

    pub fn repeat_interval(&self) -> Duration {
        self.repeater.interval()
    }

    pub fn router_mut(&mut self) -> &mut EventRouter {
        &mut self.router
    }

    fn forget_device(&mut self, device: DeviceId) {
        debug!("SurfaceInputDispatcher: Dropping routing state of device {}", device);
        self.router.forget_device(device);
        self.repeater.forget_device(device);
    }

    fn deliver(&mut self, event: NormalizedEvent) -> Vec<Disposition> {
        let kind = event.kind_name();
        let routes = self.router.route(event);
        if routes.is_empty() {
            trace!("SurfaceInputDispatcher: No surface for {} event", kind);
            return vec![Disposition::NoTarget];
        }
        routes.into_iter().map(|route| self.send(route)).collect()
    }

    fn send(&self, route: Route) -> Disposition {
        let Some(channel) = route.surface.input_channel() else {
            warn!(
                "SurfaceInputDispatcher: Surface '{}' was destroyed, dropping {} event",
                route.surface.name(),
                route.event.kind_name()
            );
            return Disposition::NoTarget;
        };
        match self.sender.send_event(route.event, &channel) {
            Ok(entry) => Disposition::Delivered {
                channel: channel.id(),
                sequence_id: entry.sequence_id(),
            },
            Err(e) => {
                warn!(
                    "SurfaceInputDispatcher: Delivery to '{}' failed: {}",
                    route.surface.name(),
                    e
                );
                Disposition::SendFailed
            }
        }
    }
}

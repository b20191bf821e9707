// src/dispatch/routing.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, info, trace};

use crate::events::{
    DeviceId, EventKind, NormalizedEvent, Point, PointerAction, PointerButtons, PointerEvent, Rectangle,
    TouchAction,
};
use crate::sender::InputChannel;

/// A client surface that can receive input.
pub trait InputSurface: Send + Sync {
    fn name(&self) -> String;

    /// Input region in display coordinates.
    fn input_bounds(&self) -> Rectangle;

    fn input_area_contains(&self, point: Point) -> bool {
        self.input_bounds().contains(point)
    }

    /// `None` once the surface has been destroyed.
    fn input_channel(&self) -> Option<Arc<InputChannel>>;
}

/// Hit-testing over the current scene, topmost surface first.
pub trait InputScene: Send + Sync {
    fn surface_at(&self, point: Point) -> Option<Arc<dyn InputSurface>>;
}

fn same_surface(a: &Arc<dyn InputSurface>, b: &Arc<dyn InputSurface>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Surface receiving key events. Set by the shell, read by the dispatch thread.
#[derive(Default)]
pub struct KeyboardFocus {
    focused: Mutex<Option<Weak<dyn InputSurface>>>,
}

impl KeyboardFocus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_focus(&self, surface: Option<&Arc<dyn InputSurface>>) {
        if let Some(surface) = surface {
            info!("KeyboardFocus: Focus moved to '{}'", surface.name());
        } else {
            info!("KeyboardFocus: Focus cleared");
        }
        *self.focused.lock().unwrap_or_else(PoisonError::into_inner) = surface.map(|s| Arc::downgrade(s));
    }

    pub fn focused(&self) -> Option<Arc<dyn InputSurface>> {
        self.focused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

/// An event resolved to the surface that should receive it.
pub struct Route {
    pub surface: Arc<dyn InputSurface>,
    pub event: NormalizedEvent,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("surface", &self.surface.name())
            .field("event", &self.event)
            .finish()
    }
}

fn localize(point: Point, bounds: Rectangle) -> Point {
    Point::new(point.x - bounds.x, point.y - bounds.y)
}

/// Resolves target surfaces for pointer, touch and key events.
///
/// Pointer events follow the surface under the cursor until a button goes down;
/// from then on the pressed surface keeps them until every button is released.
/// A touch gesture belongs to the surface hit by its first contact until its last
/// contact lifts.
pub struct EventRouter {
    scene: Arc<dyn InputScene>,
    focus: Arc<KeyboardFocus>,
    hovered: Option<Weak<dyn InputSurface>>,
    pointer_grab: Option<Weak<dyn InputSurface>>,
    touch_owners: HashMap<DeviceId, Weak<dyn InputSurface>>,
}

impl EventRouter {
    pub fn new(scene: Arc<dyn InputScene>, focus: Arc<KeyboardFocus>) -> Self {
        Self {
            scene,
            focus,
            hovered: None,
            pointer_grab: None,
            touch_owners: HashMap::new(),
        }
    }

    pub fn keyboard_focus(&self) -> &Arc<KeyboardFocus> {
        &self.focus
    }

    /// Routes `event`. An empty result means no surface wants it.
    pub fn route(&mut self, event: NormalizedEvent) -> Vec<Route> {
        match &event.kind {
            EventKind::Key(_) | EventKind::DeviceLifecycle(_) => match self.focus.focused() {
                Some(surface) => vec![Route { surface, event }],
                None => Vec::new(),
            },
            EventKind::Pointer(pointer) => {
                let pointer = *pointer;
                self.route_pointer(event, pointer)
            }
            EventKind::Touch(_) => self.route_touch(event).into_iter().collect(),
        }
    }

    fn route_pointer(&mut self, event: NormalizedEvent, pointer: PointerEvent) -> Vec<Route> {
        let grab = self.pointer_grab.as_ref().and_then(Weak::upgrade);
        if self.pointer_grab.is_some() && grab.is_none() {
            debug!("EventRouter: Pointer grab owner is gone");
            self.pointer_grab = None;
        }

        let target = match (pointer.action, grab) {
            (_, Some(grab)) => Some(grab),
            (PointerAction::ButtonDown, None) => {
                let pressed = self.scene.surface_at(pointer.position);
                if let Some(surface) = &pressed {
                    trace!("EventRouter: Implicit pointer grab by '{}'", surface.name());
                    self.pointer_grab = Some(Arc::downgrade(surface));
                }
                pressed
            }
            (_, None) => self.scene.surface_at(pointer.position),
        };

        let mut routes = Vec::new();
        if self.pointer_grab.is_none() {
            self.update_hover(&event, pointer, target.as_ref(), &mut routes);
        }
        if pointer.action == PointerAction::ButtonUp && pointer.buttons.is_empty() {
            self.pointer_grab = None;
        }

        if let Some(surface) = target {
            let mut event = event;
            if let EventKind::Pointer(p) = &mut event.kind {
                p.position = localize(p.position, surface.input_bounds());
            }
            routes.push(Route { surface, event });
        }
        routes
    }

    fn update_hover(
        &mut self,
        template: &NormalizedEvent,
        pointer: PointerEvent,
        target: Option<&Arc<dyn InputSurface>>,
        routes: &mut Vec<Route>,
    ) {
        let hovered = self.hovered.as_ref().and_then(Weak::upgrade);
        let unchanged = match (&hovered, target) {
            (Some(a), Some(b)) => same_surface(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        let crossing = |action: PointerAction, surface: &Arc<dyn InputSurface>| {
            let mut event = template.clone();
            event.kind = EventKind::Pointer(PointerEvent {
                action,
                buttons: PointerButtons::empty(),
                position: localize(pointer.position, surface.input_bounds()),
                relative: Point::default(),
                scroll: Point::default(),
            });
            Route {
                surface: surface.clone(),
                event,
            }
        };
        if let Some(old) = &hovered {
            routes.push(crossing(PointerAction::Leave, old));
        }
        if let Some(new) = target {
            routes.push(crossing(PointerAction::Enter, new));
        }
        self.hovered = target.map(|s| Arc::downgrade(s));
    }

    fn route_touch(&mut self, mut event: NormalizedEvent) -> Option<Route> {
        let EventKind::Touch(touch) = &mut event.kind else {
            return None;
        };
        let device = event.device_id;
        let owner = self.touch_owners.get(&device).and_then(Weak::upgrade);
        let owner = match owner {
            Some(owner) => Some(owner),
            None => {
                let first_down = touch.points.iter().find(|p| p.action == TouchAction::Down);
                let hit = first_down.and_then(|p| self.scene.surface_at(p.position));
                match &hit {
                    Some(surface) => {
                        trace!("EventRouter: Touch gesture on device {} owned by '{}'", device, surface.name());
                        self.touch_owners.insert(device, Arc::downgrade(surface));
                    }
                    None => {
                        self.touch_owners.remove(&device);
                    }
                }
                hit
            }
        };

        let all_lifted = touch.points.iter().all(|p| p.action == TouchAction::Up);
        if all_lifted {
            self.touch_owners.remove(&device);
        }

        let surface = owner?;
        let bounds = surface.input_bounds();
        for point in &mut touch.points {
            point.position = localize(point.position, bounds);
        }
        Some(Route { surface, event })
    }

    /// Drops state tied to a removed device.
    pub fn forget_device(&mut self, device: DeviceId) {
        self.touch_owners.remove(&device);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{Modifiers, Timestamp, ToolType, TouchEvent, TouchPoint};
    use pretty_assertions::assert_eq;

    pub(crate) struct TestSurface {
        pub name: &'static str,
        pub bounds: Rectangle,
        pub channel: Option<Arc<InputChannel>>,
    }

    impl InputSurface for TestSurface {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn input_bounds(&self) -> Rectangle {
            self.bounds
        }

        fn input_channel(&self) -> Option<Arc<InputChannel>> {
            self.channel.clone()
        }
    }

    #[derive(Default)]
    pub(crate) struct TestScene {
        pub surfaces: Mutex<Vec<Arc<dyn InputSurface>>>,
    }

    impl InputScene for TestScene {
        fn surface_at(&self, point: Point) -> Option<Arc<dyn InputSurface>> {
            self.surfaces
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.input_area_contains(point))
                .cloned()
        }
    }

    fn surface(name: &'static str, x: f32) -> Arc<dyn InputSurface> {
        Arc::new(TestSurface {
            name,
            bounds: Rectangle::new(x, 0.0, 100.0, 100.0),
            channel: None,
        })
    }

    fn pointer(action: PointerAction, x: f32, buttons: PointerButtons) -> NormalizedEvent {
        NormalizedEvent::pointer(
            Timestamp(1),
            Modifiers::empty(),
            PointerEvent {
                action,
                buttons,
                position: Point::new(x, 10.0),
                relative: Point::default(),
                scroll: Point::default(),
            },
        )
    }

    fn summary(routes: &[Route]) -> Vec<(String, PointerAction, f32)> {
        routes
            .iter()
            .map(|r| {
                let p = r.event.as_pointer().unwrap();
                (r.surface.name(), p.action, p.position.x)
            })
            .collect()
    }

    fn router(surfaces: Vec<Arc<dyn InputSurface>>) -> EventRouter {
        let scene = Arc::new(TestScene {
            surfaces: Mutex::new(surfaces),
        });
        EventRouter::new(scene, Arc::new(KeyboardFocus::new()))
    }

    #[test]
    fn test_hover_change_synthesizes_leave_and_enter() {
        let mut router = router(vec![surface("left", 0.0), surface("right", 100.0)]);
        let first = router.route(pointer(PointerAction::Motion, 10.0, PointerButtons::empty()));
        assert_eq!(
            summary(&first),
            vec![
                ("left".to_string(), PointerAction::Enter, 10.0),
                ("left".to_string(), PointerAction::Motion, 10.0),
            ]
        );

        let second = router.route(pointer(PointerAction::Motion, 150.0, PointerButtons::empty()));
        assert_eq!(
            summary(&second),
            vec![
                ("left".to_string(), PointerAction::Leave, 150.0),
                ("right".to_string(), PointerAction::Enter, 50.0),
                ("right".to_string(), PointerAction::Motion, 50.0),
            ]
        );
    }

    #[test]
    fn test_button_grab_holds_until_release() {
        let mut router = router(vec![surface("left", 0.0), surface("right", 100.0)]);
        router.route(pointer(PointerAction::ButtonDown, 10.0, PointerButtons::PRIMARY));

        let dragged = router.route(pointer(PointerAction::Motion, 150.0, PointerButtons::PRIMARY));
        assert_eq!(summary(&dragged), vec![("left".to_string(), PointerAction::Motion, 150.0)]);

        let released = router.route(pointer(PointerAction::ButtonUp, 150.0, PointerButtons::empty()));
        assert_eq!(summary(&released), vec![("left".to_string(), PointerAction::ButtonUp, 150.0)]);

        let after = router.route(pointer(PointerAction::Motion, 150.0, PointerButtons::empty()));
        assert_eq!(after.last().unwrap().surface.name(), "right");
    }

    #[test]
    fn test_keys_follow_focus_and_drop_without_it() {
        let left = surface("left", 0.0);
        let mut router = router(vec![left.clone()]);
        let key = NormalizedEvent::key(
            Timestamp(1),
            Modifiers::empty(),
            crate::events::KeyEvent {
                action: crate::events::KeyAction::Down,
                key_code: 'a' as u32,
                scan_code: 30,
            },
        );
        assert!(router.route(key.clone()).is_empty());

        router.keyboard_focus().set_focus(Some(&left));
        assert_eq!(router.route(key.clone())[0].surface.name(), "left");

        drop(left);
        assert!(router.route(key).is_empty());
    }

    #[test]
    fn test_touch_gesture_stays_with_first_surface() {
        let mut router = router(vec![surface("left", 0.0), surface("right", 100.0)]);
        let touch = |action, x| {
            let mut event = NormalizedEvent::touch(
                Timestamp(1),
                Modifiers::empty(),
                TouchEvent {
                    points: vec![TouchPoint {
                        id: 0,
                        action,
                        tool: ToolType::Finger,
                        position: Point::new(x, 10.0),
                        pressure: 1.0,
                        touch_major: 1.0,
                        touch_minor: 1.0,
                        size: 1.0,
                    }],
                },
            );
            event.device_id = DeviceId(3);
            event
        };

        let down = router.route(touch(TouchAction::Down, 20.0));
        assert_eq!(down[0].surface.name(), "left");
        let moved = router.route(touch(TouchAction::Change, 170.0));
        assert_eq!(moved[0].surface.name(), "left");
        assert_eq!(moved[0].event.as_touch().unwrap().points[0].position.x, 170.0);
        router.route(touch(TouchAction::Up, 170.0));

        let next = router.route(touch(TouchAction::Down, 170.0));
        assert_eq!(next[0].surface.name(), "right");
    }
}

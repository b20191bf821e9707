// src/device/provider.rs
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use super::evdev::DeviceNode;
use super::hub::DefaultInputDeviceHub;
use super::InputDevice;
use crate::error::InputError;
use crate::events::DeviceId;

/// How well a provider supports a device node. Ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Unsupported,
    Supported,
    Best,
}

pub trait InputDeviceProvider: Send + Sync {
    fn name(&self) -> &str;
    fn probe(&self, node: &DeviceNode) -> Priority;
    fn create_device(&self, node: &DeviceNode) -> Result<Arc<dyn InputDevice>, InputError>;
}

/// Selects, for each node, the provider reporting the highest priority.
#[derive(Default)]
pub struct ProbingDeviceFactory {
    providers: Vec<Arc<dyn InputDeviceProvider>>,
}

impl ProbingDeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self, provider: Arc<dyn InputDeviceProvider>) {
        debug!("ProbingDeviceFactory: Registered provider '{}'", provider.name());
        self.providers.push(provider);
    }

    /// The provider that handles `node`; earlier registrations win ties.
    pub fn select_provider(&self, node: &DeviceNode) -> Option<&Arc<dyn InputDeviceProvider>> {
        let mut best: Option<(&Arc<dyn InputDeviceProvider>, Priority)> = None;
        for provider in &self.providers {
            let priority = provider.probe(node);
            if priority == Priority::Unsupported {
                continue;
            }
            if best.map_or(true, |(_, current)| priority > current) {
                best = Some((provider, priority));
            }
        }
        best.map(|(provider, _)| provider)
    }

    /// Creates a device for `node`, or `Ok(None)` when no provider supports it.
    pub fn create_device(&self, node: &DeviceNode) -> Result<Option<Arc<dyn InputDevice>>, InputError> {
        match self.select_provider(node) {
            Some(provider) => {
                debug!(
                    "ProbingDeviceFactory: '{}' selected for {}",
                    provider.name(),
                    node.path.display()
                );
                provider.create_device(node).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Hot-plug entry point: turns device node arrivals and departures into hub
/// registrations.
pub struct InputPlatform {
    factory: ProbingDeviceFactory,
    hub: Arc<DefaultInputDeviceHub>,
    devices: Mutex<HashMap<PathBuf, Arc<dyn InputDevice>>>,
}

impl InputPlatform {
    pub fn new(factory: ProbingDeviceFactory, hub: Arc<DefaultInputDeviceHub>) -> Self {
        Self {
            factory,
            hub,
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn device_node_added(&self, node: &DeviceNode) -> Result<Option<DeviceId>, InputError> {
        if self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&node.path)
        {
            warn!("InputPlatform: {} is already open, ignoring", node.path.display());
            return Ok(None);
        }
        let Some(device) = self.factory.create_device(node)? else {
            debug!("InputPlatform: No provider for {}", node.path.display());
            return Ok(None);
        };
        let id = self.hub.add_device(device.clone())?;
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.path.clone(), device);
        info!("InputPlatform: {} registered as device {}", node.path.display(), id);
        Ok(Some(id))
    }

    /// Unregisters the device opened for `path`. Returns whether one existed.
    pub fn device_node_removed(&self, path: &Path) -> Result<bool, InputError> {
        let removed = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        match removed {
            Some(device) => {
                self.hub.remove_device(&device)?;
                info!("InputPlatform: {} unregistered", path.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn open_device_count(&self) -> usize {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        name: &'static str,
        priority: Priority,
    }

    impl InputDeviceProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn probe(&self, _node: &DeviceNode) -> Priority {
            self.priority
        }

        fn create_device(&self, _node: &DeviceNode) -> Result<Arc<dyn InputDevice>, InputError> {
            Err(InputError::InvalidArgument(self.name.to_string()))
        }
    }

    fn factory(providers: &[(&'static str, Priority)]) -> ProbingDeviceFactory {
        let mut factory = ProbingDeviceFactory::new();
        for (name, priority) in providers {
            factory.add_provider(Arc::new(FixedProvider {
                name: *name,
                priority: *priority,
            }));
        }
        factory
    }

    fn selected(factory: &ProbingDeviceFactory) -> Option<String> {
        factory
            .select_provider(&DeviceNode::default())
            .map(|p| p.name().to_string())
    }

    #[test]
    fn test_highest_priority_wins() {
        let factory = factory(&[("a", Priority::Supported), ("b", Priority::Best), ("c", Priority::Supported)]);
        assert_eq!(selected(&factory).as_deref(), Some("b"));
    }

    #[test]
    fn test_first_registered_wins_ties() {
        let factory = factory(&[("a", Priority::Unsupported), ("b", Priority::Best), ("c", Priority::Best)]);
        assert_eq!(selected(&factory).as_deref(), Some("b"));
    }

    #[test]
    fn test_all_unsupported_creates_nothing() {
        let factory = factory(&[("a", Priority::Unsupported)]);
        assert!(factory.create_device(&DeviceNode::default()).unwrap().is_none());
    }

    #[test]
    fn test_creation_error_is_propagated() {
        let factory = factory(&[("broken", Priority::Supported)]);
        assert!(matches!(
            factory.create_device(&DeviceNode::default()),
            Err(InputError::InvalidArgument(name)) if name == "broken"
        ));
    }
}

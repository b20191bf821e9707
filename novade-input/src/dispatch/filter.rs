// src/dispatch/filter.rs
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use crate::events::NormalizedEvent;

/// Sees events before routing. Returning `true` consumes the event.
pub trait EventFilter: Send + Sync {
    fn handle(&self, event: &NormalizedEvent) -> bool;
}

/// Ordered chain of filters; the first one that consumes an event ends the chain.
#[derive(Default)]
pub struct CompositeEventFilter {
    filters: RwLock<Vec<Arc<dyn EventFilter>>>,
}

impl CompositeEventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, filter: Arc<dyn EventFilter>) {
        self.filters.write().unwrap_or_else(PoisonError::into_inner).push(filter);
    }

    pub fn prepend(&self, filter: Arc<dyn EventFilter>) {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, filter);
    }

    pub fn len(&self) -> usize {
        self.filters.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventFilter for CompositeEventFilter {
    fn handle(&self, event: &NormalizedEvent) -> bool {
        // Filters may add or remove filters while handling.
        let filters = self.filters.read().unwrap_or_else(PoisonError::into_inner).clone();
        for (index, filter) in filters.iter().enumerate() {
            if filter.handle(event) {
                trace!("CompositeEventFilter: {} event consumed by filter {}", event.kind_name(), index);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DeviceId, DeviceLifecycleAction};
    use std::sync::Mutex;

    struct Tagged {
        tag: &'static str,
        consume: bool,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl EventFilter for Tagged {
        fn handle(&self, _event: &NormalizedEvent) -> bool {
            self.seen.lock().unwrap().push(self.tag);
            self.consume
        }
    }

    #[test]
    fn test_prepended_filter_runs_first_and_consumption_stops_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let composite = CompositeEventFilter::new();
        let tagged = |tag, consume| -> Arc<dyn EventFilter> {
            Arc::new(Tagged {
                tag,
                consume,
                seen: seen.clone(),
            })
        };
        composite.append(tagged("second", true));
        composite.append(tagged("never", false));
        composite.prepend(tagged("first", false));
        assert_eq!(composite.len(), 3);

        let event = NormalizedEvent::lifecycle(DeviceLifecycleAction::Added, DeviceId(1));
        assert!(composite.handle(&event));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_empty_chain_consumes_nothing() {
        let composite = CompositeEventFilter::new();
        assert!(composite.is_empty());
        assert!(!composite.handle(&NormalizedEvent::lifecycle(DeviceLifecycleAction::Removed, DeviceId(1))));
    }
}

//! Typed, synchronous event dispatch.
//!
//! Unlike the [`MessageBus`](crate::MessageBus), events are delivered the
//! moment they are published and are routed by Rust type rather than topic.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::panic_message;

/// Handler ordering for a single event type. Critical handlers run first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

/// Opaque token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSubscriptionId(Uuid);

impl fmt::Display for EventSubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type ErasedHandler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

struct EventSubscription {
    id: EventSubscriptionId,
    priority: EventPriority,
    handler: ErasedHandler,
}

/// In-process bus for typed events.
///
/// ```
/// use airborne_plugin_api::{EventBus, EventPriority};
///
/// struct GearDown;
///
/// let bus = EventBus::new();
/// let id = bus.subscribe(|_: &GearDown| println!("three green"), EventPriority::Normal);
/// assert_eq!(bus.publish(&GearDown), 1);
/// assert!(bus.unsubscribe(id));
/// ```
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Vec<EventSubscription>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<E, F>(&self, handler: F, priority: EventPriority) -> EventSubscriptionId
    where
        E: Any,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = EventSubscriptionId(Uuid::new_v4());
        let erased: ErasedHandler = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });

        let mut handlers = self.handlers.write();
        let list = handlers.entry(TypeId::of::<E>()).or_default();
        // Stable insert keeps registration order within a priority.
        let at = list.partition_point(|s| s.priority <= priority);
        list.insert(
            at,
            EventSubscription {
                id,
                priority,
                handler: erased,
            },
        );

        tracing::debug!(
            "Event subscription {} for {} at {:?}",
            id,
            std::any::type_name::<E>(),
            priority
        );
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: EventSubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut found = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.id != id);
            found |= list.len() != before;
            !list.is_empty()
        });
        found
    }

    /// Calls every handler for `E` synchronously, in priority order.
    /// Returns how many handlers ran to completion.
    pub fn publish<E: Any>(&self, event: &E) -> usize {
        let targets: Vec<ErasedHandler> = self
            .handlers
            .read()
            .get(&TypeId::of::<E>())
            .map(|list| list.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default();

        let mut completed = 0;
        for handler in targets {
            match catch_unwind(AssertUnwindSafe(|| handler(event as &dyn Any))) {
                Ok(()) => completed += 1,
                Err(panic) => tracing::error!(
                    "Event handler for {} panicked: {}",
                    std::any::type_name::<E>(),
                    panic_message(panic.as_ref())
                ),
            }
        }
        completed
    }

    pub fn subscriber_count<E: Any>(&self) -> usize {
        self.handlers
            .read()
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

//! Priority message bus for inter-plugin communication.
//!
//! Publishing only enqueues. Handlers run inside [`MessageBus::process`], which
//! the simulation loop calls once per tick with a message budget. Messages
//! left over when the budget runs out stay queued for the next tick, so a
//! steady stream of high-priority traffic can starve low-priority messages.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::panic_message;
use crate::message::{Message, MessagePriority, Topic};
use crate::plugin::{Plugin, PluginHandle};

/// Default per-tick message budget.
pub const DEFAULT_MAX_MESSAGES_PER_TICK: usize = 100;

/// Receives messages for the topics it is subscribed to.
///
/// Implemented for closures, so most subscriptions look like:
///
/// ```
/// use airborne_plugin_api::{Message, MessageBus, MessageHandler, Topic};
/// use std::sync::Arc;
///
/// let bus = MessageBus::new();
/// let handler: Arc<dyn MessageHandler> = Arc::new(|msg: &Message| {
///     println!("rpm = {:?}", msg.get("rpm"));
///     Ok(())
/// });
/// bus.subscribe(Topic::EngineState, "fuel", handler.clone());
/// bus.unsubscribe(Topic::EngineState, &handler);
/// ```
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self(message)
    }
}

/// Forwards messages to a plugin's [`Plugin::handle_message`].
///
/// Holds a weak reference so an unloaded plugin is not kept alive by its
/// subscriptions; messages for a dropped plugin are ignored.
pub struct PluginMessageHandler {
    name: String,
    plugin: Weak<Mutex<Box<dyn Plugin>>>,
}

impl PluginMessageHandler {
    pub fn new(name: impl Into<String>, plugin: &PluginHandle) -> Self {
        Self {
            name: name.into(),
            plugin: Arc::downgrade(plugin),
        }
    }
}

impl MessageHandler for PluginMessageHandler {
    fn handle(&self, message: &Message) -> anyhow::Result<()> {
        let Some(plugin) = self.plugin.upgrade() else {
            tracing::debug!("Dropping {} for unloaded plugin {}", message.topic, self.name);
            return Ok(());
        };

        // Dispatch re-entering a plugin that is mid-update would deadlock.
        let Some(mut guard) = plugin.try_lock() else {
            anyhow::bail!("plugin {} is busy and cannot receive {}", self.name, message.topic);
        };
        guard.handle_message(message)
    }
}

struct Subscription {
    subscriber: String,
    handler: Arc<dyn MessageHandler>,
}

/// Per-tier FIFO queues, indexed by `MessagePriority as usize`.
#[derive(Default)]
struct PriorityQueue {
    tiers: [VecDeque<Message>; 4],
}

impl PriorityQueue {
    fn push(&mut self, message: Message) {
        self.tiers[message.priority as usize].push_back(message);
    }

    fn pop(&mut self) -> Option<Message> {
        MessagePriority::DRAIN_ORDER
            .iter()
            .find_map(|priority| self.tiers[*priority as usize].pop_front())
    }

    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn clear(&mut self) {
        self.tiers.iter_mut().for_each(VecDeque::clear);
    }
}

/// Counters describing bus activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub processed: u64,
    pub delivered: u64,
    pub handler_failures: u64,
}

/// Topic-addressed publish/subscribe channel with priority draining.
///
/// # Examples
///
/// ```
/// use airborne_plugin_api::{Message, MessageBus, MessagePriority, Topic};
/// use serde_json::json;
///
/// let bus = MessageBus::new();
/// bus.subscribe_fn(Topic::EngineState, "fuel", |msg| {
///     assert_eq!(msg.get_as::<u32>("rpm"), Some(2400));
///     Ok(())
/// });
///
/// bus.publish(Message::new("engine", Topic::EngineState, json!({"rpm": 2400})));
/// assert_eq!(bus.process(100), 1);
/// ```
#[derive(Default)]
pub struct MessageBus {
    queue: Mutex<PriorityQueue>,
    subscriptions: RwLock<HashMap<Topic, Vec<Subscription>>>,
    published: AtomicU64,
    processed: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message. Never dispatches.
    pub fn publish(&self, message: Message) {
        tracing::trace!(
            "Queued {} from {} to {} ({})",
            message.topic,
            message.sender,
            message.recipients,
            message.priority
        );
        self.queue.lock().push(message);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Registers `handler` for `topic` under the plugin identity `subscriber`.
    ///
    /// Targeted messages reach the handler only if `subscriber` is one of
    /// their recipients.
    pub fn subscribe(
        &self,
        topic: Topic,
        subscriber: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let subscriber = subscriber.into();
        tracing::debug!("{} subscribed to {}", subscriber, topic);
        self.subscriptions
            .write()
            .entry(topic)
            .or_default()
            .push(Subscription {
                subscriber,
                handler,
            });
    }

    /// Subscribes a closure and returns its handle for later unsubscription.
    pub fn subscribe_fn<F>(
        &self,
        topic: Topic,
        subscriber: impl Into<String>,
        handler: F,
    ) -> Arc<dyn MessageHandler>
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        self.subscribe(topic, subscriber, handler.clone());
        handler
    }

    /// Removes the exact `(topic, handler)` pair. No-op if absent.
    pub fn unsubscribe(&self, topic: Topic, handler: &Arc<dyn MessageHandler>) {
        let mut subscriptions = self.subscriptions.write();
        if let Some(list) = subscriptions.get_mut(&topic) {
            list.retain(|s| !same_handler(&s.handler, handler));
            if list.is_empty() {
                subscriptions.remove(&topic);
            }
        }
    }

    /// Removes every subscription registered under `subscriber`.
    /// Returns how many were removed.
    pub fn unsubscribe_subscriber(&self, subscriber: &str) -> usize {
        let mut removed = 0;
        let mut subscriptions = self.subscriptions.write();
        subscriptions.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.subscriber != subscriber);
            removed += before - list.len();
            !list.is_empty()
        });
        if removed > 0 {
            tracing::debug!("Removed {} subscriptions of {}", removed, subscriber);
        }
        removed
    }

    /// Dispatches up to `max_messages` queued messages, highest priority
    /// first and FIFO within a priority. Returns the number processed.
    ///
    /// Handler errors and panics are logged and never stop delivery.
    pub fn process(&self, max_messages: usize) -> usize {
        let mut processed = 0;

        while processed < max_messages {
            // The queue lock must be released before handlers run; they may publish.
            let next = self.queue.lock().pop();
            let Some(message) = next else {
                break;
            };
            self.dispatch(&message);
            processed += 1;
        }

        self.processed.fetch_add(processed as u64, Ordering::Relaxed);
        processed
    }

    fn dispatch(&self, message: &Message) {
        let targets: Vec<(String, Arc<dyn MessageHandler>)> = self
            .subscriptions
            .read()
            .get(&message.topic)
            .map(|list| {
                list.iter()
                    .filter(|s| message.recipients.includes(&s.subscriber))
                    .map(|s| (s.subscriber.clone(), s.handler.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if targets.is_empty() {
            tracing::trace!("No subscribers for {} from {}", message.topic, message.sender);
            return;
        }

        for (subscriber, handler) in targets {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
                Ok(Ok(())) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        "Handler of {} failed on {} from {}: {:#}",
                        subscriber,
                        message.topic,
                        message.sender,
                        e
                    );
                }
                Err(panic) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        "Handler of {} panicked on {} from {}: {}",
                        subscriber,
                        message.topic,
                        message.sender,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
    }

    /// Number of messages waiting to be processed.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Pending messages per priority, in drain order.
    pub fn pending_by_priority(&self) -> Vec<(MessagePriority, usize)> {
        let queue = self.queue.lock();
        MessagePriority::DRAIN_ORDER
            .iter()
            .map(|p| (*p, queue.tiers[*p as usize].len()))
            .collect()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscriptions
            .read()
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drops all pending messages and subscriptions.
    pub fn clear(&self) {
        self.queue.lock().clear();
        self.subscriptions.write().clear();
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

//! Built-in plugins that exercise the runtime end to end: an electrical bus,
//! an engine that needs it and an optional annunciator that calls out engine
//! state changes.

use airborne_plugin_api::{
    MessageBus, MessageHandler, Message, MessagePriority, Plugin, PluginCatalog, PluginContext,
    PluginMetadata, PluginType, Topic,
};
use anyhow::Context;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

pub const ELECTRICAL: &str = "simple_electrical";
pub const ENGINE: &str = "simple_engine";
pub const ANNUNCIATOR: &str = "annunciator";

const AUTHOR: &str = "AirBorne Team";
const ALTERNATOR_VOLTAGE: f64 = 14.0;
const MIN_STARTER_VOLTAGE: f64 = 10.5;
const IDLE_RPM: f64 = 700.0;
const RUNNING_RPM: f64 = 500.0;
const STATE_PUBLISH_INTERVAL: f64 = 0.5;

/// Catalog of every built-in plugin.
pub fn catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with(ELECTRICAL, || Box::new(SimpleElectrical::default()))
        .with(ENGINE, || Box::new(SimpleEngine::default()))
        .with(ANNUNCIATOR, || Box::new(Annunciator::default()))
}

/// Electrical bus state shared through the component registry.
#[derive(Debug)]
pub struct ElectricalBus {
    voltage: Mutex<f64>,
}

impl ElectricalBus {
    fn new(voltage: f64) -> Self {
        Self {
            voltage: Mutex::new(voltage),
        }
    }

    pub fn voltage(&self) -> f64 {
        *self.voltage.lock()
    }
}

#[derive(Default)]
struct SimpleElectrical {
    bus: Option<Arc<ElectricalBus>>,
    messages: Option<Arc<MessageBus>>,
    engine_handler: Option<Arc<dyn MessageHandler>>,
    alternator_online: Arc<Mutex<bool>>,
    battery_voltage: f64,
    since_publish: f64,
}

impl Plugin for SimpleElectrical {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::builder(ELECTRICAL, "1.0.0", AUTHOR, PluginType::AircraftSystem)
            .provides("electrical")
            .update_priority(10)
            .description("12V battery and alternator bus")
            .build()
    }

    fn initialize(&mut self, context: &PluginContext) -> anyhow::Result<()> {
        self.battery_voltage = context.config().get_or("electrical.battery_voltage", 12.6);

        let bus = Arc::new(ElectricalBus::new(self.battery_voltage));
        context
            .components()
            .register("electrical", bus.clone())
            .context("registering electrical bus")?;

        let alternator = self.alternator_online.clone();
        let handler = context
            .message_bus()
            .subscribe_fn(Topic::EngineState, ELECTRICAL, move |msg: &Message| {
                *alternator.lock() = msg.get_as::<bool>("running").unwrap_or(false);
                Ok(())
            });

        self.engine_handler = Some(handler);
        self.messages = Some(context.message_bus().clone());
        self.bus = Some(bus);
        info!("Electrical bus online at {:.1}V", self.battery_voltage);
        Ok(())
    }

    fn update(&mut self, dt: f64) -> anyhow::Result<()> {
        let (Some(bus), Some(messages)) = (&self.bus, &self.messages) else {
            return Ok(());
        };

        let alternator_online = *self.alternator_online.lock();
        let voltage = if alternator_online {
            ALTERNATOR_VOLTAGE
        } else {
            self.battery_voltage
        };
        *bus.voltage.lock() = voltage;

        self.since_publish += dt;
        if self.since_publish >= STATE_PUBLISH_INTERVAL {
            self.since_publish = 0.0;
            messages.publish(Message::new(
                ELECTRICAL,
                Topic::ElectricalState,
                json!({ "bus_voltage": voltage, "alternator_online": alternator_online }),
            ));
        }
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        if let (Some(messages), Some(handler)) = (&self.messages, self.engine_handler.take()) {
            messages.unsubscribe(Topic::EngineState, &handler);
        }
        self.bus = None;
        info!("Electrical bus offline");
        Ok(())
    }
}

#[derive(Default)]
struct SimpleEngine {
    electrical: Option<Arc<ElectricalBus>>,
    messages: Option<Arc<MessageBus>>,
    rpm: f64,
    spool_rate: f64,
    running: bool,
}

impl Plugin for SimpleEngine {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::builder(ENGINE, "1.0.0", AUTHOR, PluginType::AircraftSystem)
            .dependency(ELECTRICAL)
            .provides("engine")
            .update_priority(20)
            .description("Piston engine that cranks on bus voltage")
            .build()
    }

    fn initialize(&mut self, context: &PluginContext) -> anyhow::Result<()> {
        self.electrical = Some(
            context
                .components()
                .get::<ElectricalBus>("electrical")
                .context("engine needs an electrical bus")?,
        );
        self.spool_rate = context.config().get_or("engine.spool_rate_rpm_per_s", 400.0);
        self.messages = Some(context.message_bus().clone());
        Ok(())
    }

    fn update(&mut self, dt: f64) -> anyhow::Result<()> {
        let (Some(electrical), Some(messages)) = (&self.electrical, &self.messages) else {
            return Ok(());
        };

        if electrical.voltage() >= MIN_STARTER_VOLTAGE || self.running {
            self.rpm = (self.rpm + self.spool_rate * dt).min(IDLE_RPM);
        } else {
            self.rpm = (self.rpm - self.spool_rate * dt).max(0.0);
        }

        let running = self.rpm >= RUNNING_RPM;
        let priority = if running != self.running {
            debug!("Engine running: {} at {:.0} rpm", running, self.rpm);
            MessagePriority::High
        } else {
            MessagePriority::Normal
        };
        self.running = running;

        messages.publish(
            Message::new(
                ENGINE,
                Topic::EngineState,
                json!({ "rpm": self.rpm, "running": self.running }),
            )
            .with_priority(priority),
        );
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.electrical = None;
        self.rpm = 0.0;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CalloutState {
    engine_running: Option<bool>,
    callouts: u64,
}

#[derive(Default)]
struct Annunciator {
    messages: Option<Arc<MessageBus>>,
    handler: Option<Arc<dyn MessageHandler>>,
    state: Arc<Mutex<CalloutState>>,
}

impl Plugin for Annunciator {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::builder(ANNUNCIATOR, "1.0.0", AUTHOR, PluginType::Feature)
            .dependency(ENGINE)
            .optional(true)
            .requires_physics(false)
            .description("Speaks engine state changes")
            .build()
    }

    fn initialize(&mut self, context: &PluginContext) -> anyhow::Result<()> {
        let bus = Arc::downgrade(context.message_bus());
        let state = self.state.clone();

        let handler = context
            .message_bus()
            .subscribe_fn(Topic::EngineState, ANNUNCIATOR, move |msg: &Message| {
                let running = msg.get_as::<bool>("running").unwrap_or(false);
                let mut state = state.lock();
                let changed = state.engine_running.is_some_and(|was| was != running);
                state.engine_running = Some(running);
                if !changed {
                    return Ok(());
                }

                state.callouts += 1;
                let phrase = if running {
                    "MSG_ENGINE_RUNNING"
                } else {
                    "MSG_ENGINE_STOPPED"
                };
                if let Some(bus) = bus.upgrade() {
                    bus.publish(
                        Message::new(ANNUNCIATOR, Topic::TtsSpeak, json!({ "text": phrase }))
                            .with_priority(MessagePriority::High),
                    );
                }
                Ok(())
            });

        self.handler = Some(handler);
        self.messages = Some(context.message_bus().clone());
        Ok(())
    }

    fn update(&mut self, _dt: f64) -> anyhow::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        if let (Some(messages), Some(handler)) = (&self.messages, self.handler.take()) {
            messages.unsubscribe(Topic::EngineState, &handler);
        }
        info!("Annunciator made {} callouts", self.state.lock().callouts);
        Ok(())
    }
}

//! End-to-end tests of plugin loading and messaging through the public API.

mod common;

use airborne_core::{AppConfig, ConfigTree};
use airborne_plugin_api::{
    ComponentRegistry, EventBus, EventPriority, Message, MessageBus, MessagePriority,
    PluginContext, PluginError, PluginState, RegistryError, Topic,
};
use common::{discovered_loader, init_test_tracing, test_context, Journal, RecordingPlugin};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_chain_loads_bottom_up_and_shuts_down_top_down() {
    init_test_tracing();
    let journal = Journal::default();
    let mut loader = discovered_loader(vec![
        RecordingPlugin::new("c", &["b"], &journal),
        RecordingPlugin::new("b", &["a"], &journal),
        RecordingPlugin::new("a", &[], &journal),
    ]);
    let ctx = test_context();

    let report = loader.load_all(&["c"], &ctx).unwrap();
    assert_eq!(report.loaded, vec!["a", "b", "c"]);
    assert_eq!(journal.names("init"), vec!["a", "b", "c"]);

    loader.shutdown_all();
    assert_eq!(journal.names("shutdown"), vec!["c", "b", "a"]);
}

#[test]
fn test_load_twice_returns_same_instance() {
    let journal = Journal::default();
    let mut loader = discovered_loader(vec![RecordingPlugin::new("fuel", &[], &journal)]);
    let ctx = test_context();

    let first = loader.load("fuel", &ctx).unwrap();
    let second = loader.load("fuel", &ctx).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(journal.names("init"), vec!["fuel"]);
}

#[test]
fn test_cycle_is_reported_not_broken() {
    let journal = Journal::default();
    let mut loader = discovered_loader(vec![
        RecordingPlugin::new("autopilot", &["fmc"], &journal),
        RecordingPlugin::new("fmc", &["autopilot"], &journal),
    ]);

    let err = loader.resolve_dependencies(&["autopilot"]).unwrap_err();
    assert!(matches!(err, PluginError::CircularDependency { .. }));
    assert!(err.to_string().contains("autopilot"));
    assert!(err.to_string().contains("fmc"));

    let err = loader.load_all(&["autopilot"], &test_context()).unwrap_err();
    assert!(err.is_dependency_error());
    assert!(journal.events().is_empty());
}

#[test]
fn test_reload_produces_fresh_instance() {
    let journal = Journal::default();
    let mut loader = discovered_loader(vec![RecordingPlugin::new("tcas", &[], &journal)]);
    let ctx = test_context();

    let before = loader.load("tcas", &ctx).unwrap();
    loader.unload("tcas").unwrap();
    let after = loader.load("tcas", &ctx).unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(journal.names("init").len(), 2);
}

#[test]
fn test_unloading_a_dependency_only_warns() {
    let journal = Journal::default();
    let mut loader = discovered_loader(vec![
        RecordingPlugin::new("electrical", &[], &journal),
        RecordingPlugin::new("avionics", &["electrical"], &journal),
    ]);
    loader.load("avionics", &test_context()).unwrap();

    loader.unload("electrical").unwrap();
    assert!(loader.get_plugin("electrical").is_none());
    assert!(loader.get_plugin("avionics").is_some());
}

#[test]
fn test_failures_are_visible_but_not_loaded() {
    let journal = Journal::default();
    let mut loader = discovered_loader(vec![
        RecordingPlugin::new("broken", &[], &journal).failing_init(),
        RecordingPlugin::new("stubborn", &[], &journal).failing_shutdown(),
        RecordingPlugin::new("checklist", &["broken"], &journal).optional(),
    ]);
    let ctx = test_context();

    let report = loader.load_all(&["checklist", "stubborn"], &ctx);
    // A required dependency aborts the batch even when its dependent is optional.
    assert!(matches!(report, Err(PluginError::InitFailed { .. })));

    let info = loader.get_plugin_info("broken").unwrap();
    assert_eq!(info.state(), PluginState::Error);
    assert!(info.error().unwrap().contains("refused to initialize"));
    assert!(loader.list_loaded().iter().all(|i| i.name() != "broken"));

    loader.load("stubborn", &ctx).unwrap();
    let last = loader.unload("stubborn").unwrap();
    assert_eq!(last.state(), PluginState::Error);
    assert!(last.error().unwrap().contains("stubborn failed to shut down"));
    assert!(loader.get_plugin_info("stubborn").is_none());
}

#[test]
fn test_discovery_from_manifest_fixtures() {
    init_test_tracing();
    let journal = Journal::default();
    let catalog = common::catalog_of(vec![
        RecordingPlugin::new("electrical", &[], &journal),
        RecordingPlugin::new("engine", &["electrical"], &journal),
        RecordingPlugin::new("radio", &["electrical"], &journal),
    ]);
    let mut loader = airborne_plugin_api::PluginLoader::new(catalog);

    let discovered = loader.discover(&[common::plugins_fixtures_dir()]);
    let mut names: Vec<String> = discovered.into_iter().map(|m| m.name).collect();
    names.sort();
    assert_eq!(names, vec!["electrical", "engine"]);

    let order = loader.resolve_dependencies(&["engine"]).unwrap();
    assert_eq!(order, vec!["electrical", "engine"]);
}

#[test]
fn test_bus_priority_and_budget() {
    let bus = MessageBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe_fn(Topic::SystemStateChanged, "monitor", move |msg| {
        sink.lock().push(msg.priority);
        Ok(())
    });

    for priority in [
        MessagePriority::Normal,
        MessagePriority::Critical,
        MessagePriority::High,
        MessagePriority::Low,
        MessagePriority::Normal,
    ] {
        bus.publish(
            Message::new("test", Topic::SystemStateChanged, json!({})).with_priority(priority),
        );
    }

    assert_eq!(bus.process(2), 2);
    assert_eq!(bus.pending_count(), 3);
    assert_eq!(
        *seen.lock(),
        vec![MessagePriority::Critical, MessagePriority::High]
    );

    bus.process(100);
    assert_eq!(
        *seen.lock(),
        vec![
            MessagePriority::Critical,
            MessagePriority::High,
            MessagePriority::Normal,
            MessagePriority::Normal,
            MessagePriority::Low,
        ]
    );
}

#[test]
fn test_plugin_handlers_respect_recipients() {
    let journal = Journal::default();
    let mut loader = discovered_loader(vec![
        RecordingPlugin::new("engine", &[], &journal),
        RecordingPlugin::new("fuel", &[], &journal),
    ]);
    let ctx = test_context();
    loader.load_all(&["engine", "fuel"], &ctx).unwrap();

    let bus = ctx.message_bus().clone();
    loader.subscribe_plugin("engine", Topic::ControlInput, &bus).unwrap();
    loader.subscribe_plugin("fuel", Topic::ControlInput, &bus).unwrap();
    journal.clear();

    bus.publish(Message::new("panel", Topic::ControlInput, json!({"throttle": 0.8})));
    bus.publish(Message::to(
        "panel",
        ["fuel"],
        Topic::ControlInput,
        json!({"fuel_pump": true}),
    ));
    assert_eq!(bus.process(10), 2);

    let mut received = journal.names("message flight.control_input");
    received.sort();
    assert_eq!(received, vec!["engine", "fuel", "fuel"]);
}

#[test]
fn test_context_shares_registry_and_event_bus() {
    let registry = Arc::new(ComponentRegistry::new());
    let events = Arc::new(EventBus::new());
    let ctx = PluginContext::new(
        events.clone(),
        Arc::new(MessageBus::new()),
        Arc::new(ConfigTree::new()),
        registry.clone(),
    );

    ctx.components()
        .register("weight_balance_system", Arc::new(61_000.0f64))
        .unwrap();
    assert_eq!(*registry.get::<f64>("weight_balance_system").unwrap(), 61_000.0);
    assert!(matches!(
        registry.get::<u32>("weight_balance_system"),
        Err(RegistryError::TypeMismatch { .. })
    ));

    struct GearRetracted;
    let order = Arc::new(Mutex::new(Vec::new()));
    for (label, priority) in [("normal", EventPriority::Normal), ("critical", EventPriority::Critical)] {
        let order = order.clone();
        ctx.event_bus()
            .subscribe(move |_: &GearRetracted| order.lock().push(label), priority);
    }
    assert_eq!(events.publish(&GearRetracted), 2);
    assert_eq!(*order.lock(), vec!["critical", "normal"]);
}

#[test]
fn test_update_runs_in_priority_order() {
    let journal = Journal::default();
    let mut loader = discovered_loader(vec![
        RecordingPlugin::new("audio", &[], &journal).with_priority(900),
        RecordingPlugin::new("physics", &[], &journal).with_priority(0),
        RecordingPlugin::new("engine", &["physics"], &journal).with_priority(50),
    ]);
    loader
        .load_all(&["audio", "engine"], &test_context())
        .unwrap();
    journal.clear();

    loader.update_all(1.0 / 60.0);
    assert_eq!(journal.names("update"), vec!["physics", "engine", "audio"]);
}

#[test]
fn test_sample_configuration_parses() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join("airborne.yaml");
    let config = AppConfig::from_file(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.plugins.enabled, vec!["annunciator"]);
    assert_eq!(
        config.settings.get_as::<f64>("electrical.battery_voltage").unwrap(),
        12.6
    );
}

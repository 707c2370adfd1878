//! Messages exchanged between plugins through the [`MessageBus`](crate::MessageBus).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Wildcard recipient meaning "every subscriber".
pub const BROADCAST: &str = "*";

/// Priority levels for messages. Higher priorities drain first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// Processed last
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    /// Processed first
    Critical = 3,
}

impl MessagePriority {
    /// All tiers in drain order.
    pub const DRAIN_ORDER: [MessagePriority; 4] = [
        MessagePriority::Critical,
        MessagePriority::High,
        MessagePriority::Normal,
        MessagePriority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! topics {
    ($($(#[$doc:meta])* $variant:ident => $name:literal,)+) => {
        /// Well-known message topics.
        ///
        /// The string form is the dotted name used in logs and configuration,
        /// e.g. `system.engine.state`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Topic {
            $($(#[$doc])* #[serde(rename = $name)] $variant,)+
        }

        impl Topic {
            /// Every topic, in declaration order.
            pub const ALL: &'static [Topic] = &[$(Topic::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Topic::$variant => $name,)+
                }
            }
        }

        impl FromStr for Topic {
            type Err = UnknownTopic;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Topic::$variant),)+
                    other => Err(UnknownTopic(other.to_string())),
                }
            }
        }
    };
}

topics! {
    // Environmental
    TemperatureChanged => "env.temperature_changed",
    PressureChanged => "env.pressure_changed",
    AltitudeChanged => "env.altitude_changed",

    // Systems
    ElectricalState => "system.electrical.state",
    FuelState => "system.fuel.state",
    EngineState => "system.engine.state",
    HydraulicState => "system.hydraulic.state",
    SystemState => "system.state",
    SystemStateChanged => "system.state_changed",
    /// Caution annunciations
    Warning => "system.warning",
    /// Injected or detected system failures
    Failure => "system.failure",

    // Flight
    PositionUpdated => "flight.position_updated",
    FlightModeChanged => "flight.mode_changed",
    AutopilotEngaged => "flight.autopilot.engaged",
    GearPosition => "flight.gear.position",
    ControlInput => "flight.control_input",

    // Cabin
    DoorState => "cabin.door.state",
    BoardingProgress => "cabin.boarding.progress",
    PassengerEvent => "cabin.passenger.event",

    // Network and traffic
    TrafficUpdate => "network.traffic.update",
    AtcMessage => "network.atc.message",
    TcasAlert => "avionics.tcas.alert",

    // Audio
    /// Text to be spoken by the TTS provider
    TtsSpeak => "audio.tts.speak",
    /// Stop any utterance in progress
    TtsInterrupt => "audio.tts.interrupt",

    // Terrain and collision
    CollisionDetected => "physics.collision_detected",
    TerrainElevation => "terrain.elevation",
    TerrainUpdated => "terrain.updated",
    NearbyCities => "terrain.nearby_cities",
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a topic name that is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown message topic: {0}")]
pub struct UnknownTopic(pub String);

/// Who a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Recipients {
    /// Every handler subscribed to the topic
    #[default]
    All,
    /// Only handlers registered under one of these plugin names
    Only(BTreeSet<String>),
}

impl Recipients {
    /// Builds a recipient set. A set containing `"*"` means everyone.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.contains(BROADCAST) {
            Recipients::All
        } else {
            Recipients::Only(names)
        }
    }

    /// Whether a handler registered under `subscriber` should receive the message.
    pub fn includes(&self, subscriber: &str) -> bool {
        match self {
            Recipients::All => true,
            Recipients::Only(names) => names.contains(subscriber),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipients::All)
    }
}

impl fmt::Display for Recipients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipients::All => f.write_str(BROADCAST),
            Recipients::Only(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

/// Inter-plugin message.
///
/// Messages are value objects: built by the sender, queued by
/// [`MessageBus::publish`](crate::MessageBus::publish) and handed to handlers
/// by reference during [`MessageBus::process`](crate::MessageBus::process).
///
/// ```
/// use airborne_plugin_api::{Message, MessagePriority, Topic};
/// use serde_json::json;
///
/// let msg = Message::new("simple_engine", Topic::EngineState, json!({"rpm": 2400}))
///     .with_priority(MessagePriority::High);
/// assert_eq!(msg.get_as::<u32>("rpm"), Some(2400));
/// assert!(msg.recipients.is_broadcast());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: String,
    pub recipients: Recipients,
    pub topic: Topic,
    pub data: Map<String, Value>,
    pub priority: MessagePriority,
    pub timestamp: Instant,
}

impl Message {
    /// Creates a broadcast message with normal priority.
    ///
    /// An object payload becomes the message data; any other JSON value is
    /// stored under the `"value"` key.
    pub fn new(sender: impl Into<String>, topic: Topic, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Self {
            sender: sender.into(),
            recipients: Recipients::All,
            topic,
            data,
            priority: MessagePriority::Normal,
            timestamp: Instant::now(),
        }
    }

    /// Creates a message addressed to specific plugins.
    pub fn to<I, S>(sender: impl Into<String>, recipients: I, topic: Topic, data: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(sender, topic, data).with_recipients(Recipients::only(recipients))
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_recipients(mut self, recipients: Recipients) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserializes one payload field, returning `None` if missing or of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data.get(key).and_then(|v| T::deserialize(v).ok())
    }

    /// Time since the message was created.
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_order() {
        assert!(MessagePriority::Low < MessagePriority::Normal);
        assert!(MessagePriority::Normal < MessagePriority::High);
        assert!(MessagePriority::High < MessagePriority::Critical);
        assert_eq!(MessagePriority::default(), MessagePriority::Normal);
    }

    #[test]
    fn test_topic_round_trips_through_str() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>(), Ok(*topic));
        }
        assert_eq!(Topic::EngineState.to_string(), "system.engine.state");
        assert!("system.unknown".parse::<Topic>().is_err());
    }

    #[test]
    fn test_topic_serde_uses_dotted_name() {
        let json = serde_json::to_string(&Topic::TtsSpeak).unwrap();
        assert_eq!(json, "\"audio.tts.speak\"");
        let topic: Topic = serde_json::from_str("\"flight.position_updated\"").unwrap();
        assert_eq!(topic, Topic::PositionUpdated);
    }

    #[test]
    fn test_recipients() {
        let targeted = Recipients::only(["engine", "fuel"]);
        assert!(targeted.includes("engine"));
        assert!(!targeted.includes("radio"));
        assert_eq!(targeted.to_string(), "engine,fuel");

        assert!(Recipients::only(["*"]).is_broadcast());
        assert!(Recipients::All.includes("anyone"));
    }

    #[test]
    fn test_scalar_payload_is_wrapped() {
        let msg = Message::new("demo", Topic::TtsSpeak, json!("MSG_STARTUP"));
        assert_eq!(msg.get("value"), Some(&json!("MSG_STARTUP")));

        let msg = Message::new("demo", Topic::TtsInterrupt, Value::Null);
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_targeted_constructor() {
        let msg = Message::to("atc", ["radio"], Topic::AtcMessage, json!({"text": "cleared"}));
        assert_eq!(msg.recipients, Recipients::only(["radio"]));
        assert_eq!(msg.get_as::<String>("text").as_deref(), Some("cleared"));
        assert_eq!(msg.get_as::<u32>("text"), None);
    }
}

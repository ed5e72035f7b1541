use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Closed set of lifecycle facts recorded in the event log and published to
/// per-user topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCode {
    ContainerStarted,
    ContainerStopped,
    ContainerDestroyed,
    ContainerUpgrade,
    NotebookStarted,
    NotebookStopped,
    SimulationFileServerStarted,
    SimulationFileServerStopped,
}

impl EventCode {
    pub const ALL: [EventCode; 8] = [
        EventCode::ContainerStarted,
        EventCode::ContainerStopped,
        EventCode::ContainerDestroyed,
        EventCode::ContainerUpgrade,
        EventCode::NotebookStarted,
        EventCode::NotebookStopped,
        EventCode::SimulationFileServerStarted,
        EventCode::SimulationFileServerStopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCode::ContainerStarted => "CONTAINER_STARTED",
            EventCode::ContainerStopped => "CONTAINER_STOPPED",
            EventCode::ContainerDestroyed => "CONTAINER_DESTROYED",
            EventCode::ContainerUpgrade => "CONTAINER_UPGRADE",
            EventCode::NotebookStarted => "NOTEBOOK_STARTED",
            EventCode::NotebookStopped => "NOTEBOOK_STOPPED",
            EventCode::SimulationFileServerStarted => "SIMULATION_FILE_SERVER_STARTED",
            EventCode::SimulationFileServerStopped => "SIMULATION_FILE_SERVER_STOPPED",
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown event code: {}", s))
    }
}

/// One row of the append-only event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub code: EventCode,
    pub uid: String,
    pub created_at: DateTime<Utc>,
}

/// Pub/sub payload: `{"event": CODE, ...extra}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodEvent {
    pub event: EventCode,
    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

impl PodEvent {
    pub fn new(event: EventCode) -> Self {
        Self {
            event,
            extra: JsonMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prelude::TimedEvent;

/// Unshaped record as returned by the patient data API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub time: i64,
    #[serde(default)]
    pub payload: Value,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, time: i64, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            time,
            payload,
        }
    }
}

/// Event families plotted by the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Cbg,
    Smbg,
    Bolus,
    Basal,
    Meal,
    Message,
}

impl EventKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "cbg" => Some(EventKind::Cbg),
            "smbg" => Some(EventKind::Smbg),
            "bolus" => Some(EventKind::Bolus),
            "basal" => Some(EventKind::Basal),
            "food" | "meal" => Some(EventKind::Meal),
            "message" => Some(EventKind::Message),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, EventKind::Message)
    }
}

/// Typed event kept in the resident dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalEvent {
    pub id: String,
    pub time: i64,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TimedEvent for MedicalEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn epoch_ms(&self) -> i64 {
        self.time
    }
}

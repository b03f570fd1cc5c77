//! Message shapes exchanged over a viewer connection.
//!
//! Messages are JSON with a `type` tag and camelCase payloads. Empty add or
//! delete sets are never sent; the sender omits the message instead.

use crate::genome::FlowerGenome;
use serde::{Deserialize, Serialize};

/// A position on the 2D field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// One flower as stored and as sent to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowerPacket {
    pub id: String,
    pub location: Vec2,
    pub genome: FlowerGenome,
}

/// Viewer position report, carrying the viewer's own idea of which flowers it
/// currently has loaded. The diff is computed against this reported set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub position: Vec2,
    pub loaded_flower_ids: Vec<String>,
}

/// World parameters, sent to each viewer on connect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerParameters {
    /// Radius within which a viewer is told about flowers.
    pub flower_range: f64,
    /// Minimum separation between two flowers, enforced at insertion.
    pub flower_exclusion_range: f64,
    /// Growth tick interval in milliseconds.
    pub flower_spread_interval_ms: u64,
    /// Per-tick chance that any given flower is selected to spread.
    pub flower_spread_fraction: f64,
    /// Cap on flowers selected per growth tick.
    pub max_flower_updates: usize,
}

impl Default for ServerParameters {
    fn default() -> Self {
        Self {
            flower_range: 25.0,
            flower_exclusion_range: 0.5,
            flower_spread_interval_ms: 10_000,
            flower_spread_fraction: 0.1,
            max_flower_updates: 10,
        }
    }
}

/// Messages a viewer sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    PositionUpdate(PositionUpdate),
    /// Insert one viewer-authored flower; the id is pre-generated by the viewer.
    PlantFlower(FlowerPacket),
}

/// Messages the server sends to a viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    Config(ServerParameters),
    AddFlowers(Vec<FlowerPacket>),
    DeleteFlowers(Vec<String>),
}

/// Add/remove pair produced by every insertion path: full records for new
/// flowers, ids only for evicted ones. The two sets never share an id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDelta {
    pub added: Vec<FlowerPacket>,
    pub removed: Vec<String>,
}

impl FieldDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn merge(&mut self, other: FieldDelta) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
    }

    /// Drop added flowers that a later step of the same operation evicted
    /// again, so the delta reports only the net change.
    pub fn normalize(&mut self) {
        let removed: std::collections::HashSet<&str> =
            self.removed.iter().map(String::as_str).collect();
        self.added.retain(|p| !removed.contains(p.id.as_str()));
    }
}

//! Sibling rooms: discovery, scoring and HTTP delegation.
//!
//! A room is a sibling execution node (another server, a local process,
//! an iOS device) capable of running instruments. The registry tracks
//! liveness and capabilities; the client delegates sub-tasks over HTTP
//! and normalizes the remote response into an [`InstrumentResult`].

pub mod client;
pub mod privacy;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::RoomClient;
pub use privacy::{KeywordClassifier, PrivacyClassifier, PrivacyLevel};
pub use registry::RoomRegistry;

/// What kind of node a room is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Server,
    Ios,
    Local,
    /// Forward-compatible catch-all for room types this node does not
    /// know about.
    #[serde(other)]
    Unknown,
}

/// Liveness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Online,
    Offline,
    Degraded,
}

/// A registered room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub room_name: String,
    pub room_type: RoomType,
    pub url: String,
    pub capabilities: Vec<String>,
    pub status: RoomStatus,
    /// Reported load, 0.0 (idle) to 1.0 (saturated).
    #[serde(default)]
    pub load: f64,
    pub last_seen_at: DateTime<Utc>,
    /// True for the room this server registered for itself.
    #[serde(default)]
    pub is_local: bool,
}

impl Room {
    pub fn covers(&self, required_capabilities: &[String]) -> bool {
        required_capabilities
            .iter()
            .all(|cap| self.capabilities.contains(cap))
    }
}

/// Registration payload for `POST /rooms/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRegistration {
    pub room_id: String,
    pub room_name: String,
    pub room_type: RoomType,
    pub url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub load: f64,
}

/// Heartbeat payload for `POST /rooms/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomHeartbeat {
    pub room_id: String,
    #[serde(default)]
    pub load: Option<f64>,
    /// Knowledge version the room has synced up to; the response
    /// piggybacks the delta since then.
    #[serde(default)]
    pub last_knowledge_version: i64,
}

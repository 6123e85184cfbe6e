//! The room registry: liveness tracking and room scoring.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use super::{PrivacyLevel, Room, RoomHeartbeat, RoomRegistration, RoomStatus, RoomType};

/// Rooms not heard from within this window are marked offline.
const OFFLINE_AFTER: Duration = Duration::from_secs(120);

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a room.
    pub fn register(&self, registration: RoomRegistration) -> Room {
        let room = Room {
            room_id: registration.room_id.clone(),
            room_name: registration.room_name,
            room_type: registration.room_type,
            url: registration.url,
            capabilities: registration.capabilities,
            status: RoomStatus::Online,
            load: registration.load,
            last_seen_at: Utc::now(),
            is_local: false,
        };
        let mut rooms = self.rooms.write().expect("room registry lock poisoned");
        info!(room_id = %room.room_id, room_type = ?room.room_type, "room registered");
        rooms.insert(room.room_id.clone(), room.clone());
        room
    }

    /// Register this server's own room so local execution competes in
    /// scoring like any other room.
    pub fn register_local(&self, room_id: &str, room_name: &str, capabilities: Vec<String>) {
        let room = Room {
            room_id: room_id.to_string(),
            room_name: room_name.to_string(),
            room_type: RoomType::Server,
            url: String::new(),
            capabilities,
            status: RoomStatus::Online,
            load: 0.0,
            last_seen_at: Utc::now(),
            is_local: true,
        };
        let mut rooms = self.rooms.write().expect("room registry lock poisoned");
        rooms.insert(room.room_id.clone(), room);
    }

    /// Refresh liveness from a heartbeat. Returns whether the room was
    /// known.
    pub fn heartbeat(&self, beat: &RoomHeartbeat) -> bool {
        let mut rooms = self.rooms.write().expect("room registry lock poisoned");
        match rooms.get_mut(&beat.room_id) {
            Some(room) => {
                room.last_seen_at = Utc::now();
                room.status = RoomStatus::Online;
                if let Some(load) = beat.load {
                    room.load = load.clamp(0.0, 1.0);
                }
                true
            }
            None => false,
        }
    }

    pub fn deregister(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().expect("room registry lock poisoned");
        rooms.remove(room_id).is_some()
    }

    /// Mark rooms unseen for longer than the liveness window offline.
    /// The local room never expires.
    pub fn sweep_offline(&self) -> usize {
        let now = Utc::now();
        let mut rooms = self.rooms.write().expect("room registry lock poisoned");
        let mut marked = 0;
        for room in rooms.values_mut() {
            if room.is_local || room.status == RoomStatus::Offline {
                continue;
            }
            let age = (now - room.last_seen_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age > OFFLINE_AFTER {
                room.status = RoomStatus::Offline;
                marked += 1;
            }
        }
        marked
    }

    pub fn get(&self, room_id: &str) -> Option<Room> {
        self.sweep_offline();
        let rooms = self.rooms.read().expect("room registry lock poisoned");
        rooms.get(room_id).cloned()
    }

    pub fn list(&self) -> Vec<Room> {
        self.sweep_offline();
        let rooms = self.rooms.read().expect("room registry lock poisoned");
        let mut list: Vec<Room> = rooms.values().cloned().collect();
        list.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        list
    }

    /// Pick the best room for an instrument's required capabilities at
    /// the given privacy level.
    ///
    /// Candidates are online rooms whose capabilities superset the
    /// requirement. Sensitive work only considers local rooms, and
    /// personal work prefers them; beyond that it is lower reported
    /// load, then lexicographic room_id as the deterministic tie-break.
    pub fn best_room(
        &self,
        required_capabilities: &[String],
        privacy: PrivacyLevel,
    ) -> Option<Room> {
        self.sweep_offline();
        let rooms = self.rooms.read().expect("room registry lock poisoned");
        let mut candidates: Vec<&Room> = rooms
            .values()
            .filter(|r| r.status == RoomStatus::Online)
            .filter(|r| r.covers(required_capabilities))
            .filter(|r| privacy < PrivacyLevel::Sensitive || r.is_local)
            .collect();

        let locality_preferred = privacy >= PrivacyLevel::Personal;
        candidates.sort_by(|a, b| {
            let locality = if locality_preferred {
                b.is_local.cmp(&a.is_local)
            } else {
                std::cmp::Ordering::Equal
            };
            locality
                .then(
                    a.load
                        .partial_cmp(&b.load)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.room_id.cmp(&b.room_id))
        });

        candidates.first().map(|r| (*r).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(room_id: &str, load: f64, capabilities: Vec<&str>) -> RoomRegistration {
        RoomRegistration {
            room_id: room_id.to_string(),
            room_name: format!("room {room_id}"),
            room_type: RoomType::Server,
            url: format!("http://{room_id}.example.com"),
            capabilities: capabilities.into_iter().map(str::to_owned).collect(),
            load,
        }
    }

    fn caps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_heartbeat_deregister() {
        let registry = RoomRegistry::new();
        registry.register(registration("r1", 0.2, vec!["reasoning"]));

        assert!(registry.heartbeat(&RoomHeartbeat {
            room_id: "r1".to_string(),
            load: Some(0.5),
            last_knowledge_version: 0,
        }));
        assert_eq!(registry.get("r1").unwrap().load, 0.5);

        assert!(registry.deregister("r1"));
        assert!(registry.get("r1").is_none());
        assert!(!registry.heartbeat(&RoomHeartbeat {
            room_id: "r1".to_string(),
            load: None,
            last_knowledge_version: 0,
        }));
    }

    #[test]
    fn best_room_requires_capability_superset() {
        let registry = RoomRegistry::new();
        registry.register(registration("narrow", 0.0, vec!["reasoning"]));
        registry.register(registration("broad", 0.9, vec!["reasoning", "web_search"]));

        let best = registry
            .best_room(&caps(&["reasoning", "web_search"]), PrivacyLevel::Public)
            .unwrap();
        assert_eq!(best.room_id, "broad");
    }

    #[test]
    fn load_then_room_id_orders_public_work() {
        let registry = RoomRegistry::new();
        registry.register(registration("remote-b", 0.1, vec!["reasoning"]));
        registry.register(registration("remote-a", 0.1, vec!["reasoning"]));
        registry.register_local("local", "this server", caps(&["reasoning"]));

        // Public work: the idle local room wins on load alone.
        let best = registry
            .best_room(&caps(&["reasoning"]), PrivacyLevel::Public)
            .unwrap();
        assert!(best.is_local);

        registry.deregister("local");
        // Equal load: lexicographic room_id breaks the tie.
        let best = registry
            .best_room(&caps(&["reasoning"]), PrivacyLevel::Public)
            .unwrap();
        assert_eq!(best.room_id, "remote-a");
    }

    #[test]
    fn personal_work_prefers_the_local_room_despite_load() {
        let registry = RoomRegistry::new();
        registry.register(registration("remote", 0.0, vec!["reasoning"]));
        registry.register_local("local", "this server", caps(&["reasoning"]));
        {
            let mut rooms = registry.rooms.write().unwrap();
            rooms.get_mut("local").unwrap().load = 0.9;
        }

        let best = registry
            .best_room(&caps(&["reasoning"]), PrivacyLevel::Personal)
            .unwrap();
        assert!(best.is_local);

        // For public work the idle remote wins instead.
        let best = registry
            .best_room(&caps(&["reasoning"]), PrivacyLevel::Public)
            .unwrap();
        assert_eq!(best.room_id, "remote");
    }

    #[test]
    fn sensitive_work_only_runs_locally() {
        let registry = RoomRegistry::new();
        registry.register(registration("remote", 0.0, vec!["reasoning"]));

        assert!(
            registry
                .best_room(&caps(&["reasoning"]), PrivacyLevel::Sensitive)
                .is_none()
        );

        registry.register_local("local", "this server", caps(&["reasoning"]));
        let best = registry
            .best_room(&caps(&["reasoning"]), PrivacyLevel::Sensitive)
            .unwrap();
        assert!(best.is_local);
    }

    #[test]
    fn stale_rooms_are_swept_offline() {
        let registry = RoomRegistry::new();
        registry.register(registration("stale", 0.0, vec!["reasoning"]));
        {
            let mut rooms = registry.rooms.write().unwrap();
            rooms.get_mut("stale").unwrap().last_seen_at =
                Utc::now() - chrono::Duration::seconds(300);
        }

        assert_eq!(registry.sweep_offline(), 1);
        assert_eq!(registry.get("stale").unwrap().status, RoomStatus::Offline);
        assert!(
            registry
                .best_room(&caps(&["reasoning"]), PrivacyLevel::Public)
                .is_none()
        );
    }
}

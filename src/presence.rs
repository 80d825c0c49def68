use std::ops::Sub;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, WorldErrorKind};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Position and orientation of one agent at a point in time.
///
/// Records are replaced, never edited: every update produces a new value with a
/// fresh `last_updated`, so a reader holding a clone always sees a consistent snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub agent_id: String,
    pub position: Vector3,
    pub orientation: Vector3,
    pub last_updated: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn new(agent_id: impl Into<String>) -> Result<Self, Error> {
        let agent_id = agent_id.into();
        if agent_id.is_empty() {
            return Err(Error::new_world(
                "agent id must not be empty".to_string(),
                WorldErrorKind::InvalidAgentIdError,
            ));
        }
        Ok(Self {
            agent_id,
            position: Vector3::default(),
            orientation: Vector3::default(),
            last_updated: Utc::now(),
        })
    }

    /// Returns a replacement record. Fields passed as `None` are carried over.
    pub fn updated(&self, position: Option<Vector3>, orientation: Option<Vector3>) -> Self {
        Self {
            agent_id: self.agent_id.clone(),
            position: position.unwrap_or(self.position),
            orientation: orientation.unwrap_or(self.orientation),
            last_updated: Utc::now(),
        }
    }

    pub fn is_newer_than(&self, other: &PresenceRecord) -> bool {
        self.last_updated >= other.last_updated
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_empty_agent_id_is_rejected() {
        assert!(PresenceRecord::new("").is_err());
    }

    #[test]
    fn test_updated_replaces_only_given_fields() {
        let record = PresenceRecord::new("a").expect("record");
        let moved = record.updated(Some(Vector3::new(1.0, 2.0, 3.0)), None);
        assert_eq!(moved.agent_id, "a");
        assert_eq!(moved.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(moved.orientation, record.orientation);
        assert!(moved.last_updated >= record.last_updated);
        assert_eq!(record.position, Vector3::default());
    }

    #[test]
    fn test_is_newer_than() {
        let older = PresenceRecord::new("a").expect("record");
        let mut newer = older.clone();
        newer.last_updated = older.last_updated + Duration::seconds(1);
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
    }

    #[test]
    fn test_serializes_camel_case() {
        let record = PresenceRecord::new("a").expect("record");
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["agentId"], "a");
        assert!(json.get("lastUpdated").is_some());
        let back: PresenceRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn test_vector_sub_and_length() {
        let delta = Vector3::new(3.0, 4.0, 0.0) - Vector3::default();
        assert_eq!(delta, Vector3::new(3.0, 4.0, 0.0));
        assert_eq!(delta.length(), 5.0);
    }
}

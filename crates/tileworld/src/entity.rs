use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::math::{Bounds2D, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityUid(pub u64);

impl fmt::Display for EntityUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of the entity asset (prefab) an entity was spawned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityAssetId(pub u32);

/// Area that must be inside loaded chunks for the entity to stay active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadBox {
    pub offset: Vec2,
    pub size: Vec2,
}

impl Default for LoadBox {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            size: Vec2::ONE,
        }
    }
}

/// Gameplay-owned state. The core stores it without interpreting it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl EntityPayload {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityData {
    pub uid: EntityUid,
    pub asset: EntityAssetId,
    pub position: Vec2,
    pub load_box: LoadBox,
    pub payload: EntityPayload,
    /// Session time of the last save, in seconds. Never persisted.
    pub last_autosave: f64,
}

impl EntityData {
    pub fn new(uid: EntityUid, asset: EntityAssetId, position: Vec2) -> Self {
        Self {
            uid,
            asset,
            position,
            load_box: LoadBox::default(),
            payload: EntityPayload::default(),
            last_autosave: 0.0,
        }
    }

    pub fn load_bounds(&self) -> Bounds2D {
        Bounds2D::from_center_size(self.position + self.load_box.offset, self.load_box.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_bounds_are_centered_on_offset_position() {
        let mut entity = EntityData::new(EntityUid(1), EntityAssetId(2), Vec2::new(10.0, 4.0));
        entity.load_box = LoadBox {
            offset: Vec2::new(0.0, 1.0),
            size: Vec2::new(2.0, 4.0),
        };
        let bounds = entity.load_bounds();
        assert_eq!(bounds.min, Vec2::new(9.0, 3.0));
        assert_eq!(bounds.max, Vec2::new(11.0, 7.0));
    }

    #[test]
    fn payload_serializes_type_tag() {
        let payload = EntityPayload::new("chest").with_field("slots", 12);
        let json = serde_json::to_value(&payload).expect("json");
        assert_eq!(json["type"], "chest");
        assert_eq!(json["fields"]["slots"], 12);
    }
}

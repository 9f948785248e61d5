use std::fmt;

use serde::{Deserialize, Serialize};

/// Tile layers stacked in every chunk. On disk a layer is identified by its
/// name, so renaming a variant is a format break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerrainLayer {
    Ground,
    Background,
    Decoration,
    CollisionOnly,
}

impl TerrainLayer {
    pub const ALL: [TerrainLayer; 4] = [
        TerrainLayer::Ground,
        TerrainLayer::Background,
        TerrainLayer::Decoration,
        TerrainLayer::CollisionOnly,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        match self {
            TerrainLayer::Ground => 0,
            TerrainLayer::Background => 1,
            TerrainLayer::Decoration => 2,
            TerrainLayer::CollisionOnly => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TerrainLayer::Ground => "Ground",
            TerrainLayer::Background => "Background",
            TerrainLayer::Decoration => "Decoration",
            TerrainLayer::CollisionOnly => "CollisionOnly",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|layer| layer.name() == name)
    }

    /// Layers whose tiles block rigid bodies.
    pub fn is_collidable(self) -> bool {
        matches!(self, TerrainLayer::Ground | TerrainLayer::CollisionOnly)
    }
}

impl fmt::Display for TerrainLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip_and_indices_are_dense() {
        for (expected_index, layer) in TerrainLayer::ALL.into_iter().enumerate() {
            assert_eq!(TerrainLayer::from_name(layer.name()), Some(layer));
            assert_eq!(layer.index(), expected_index);
        }
        assert_eq!(TerrainLayer::from_name("ground"), None);
    }

    #[test]
    fn only_ground_and_collision_only_collide() {
        let colliding: Vec<_> = TerrainLayer::ALL
            .into_iter()
            .filter(|layer| layer.is_collidable())
            .collect();
        assert_eq!(
            colliding,
            vec![TerrainLayer::Ground, TerrainLayer::CollisionOnly]
        );
    }
}

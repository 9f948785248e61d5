use crate::coords::TileCoord;
use crate::math::{Bounds2D, Vec2};
use crate::physics::CollisionQuery;

use super::layer::TerrainLayer;
use super::manager::TerrainManager;

impl CollisionQuery for TerrainManager {
    /// Walks the static grid only; mobile chunks are bodies, not terrain.
    /// Tiles in unloaded chunks contribute nothing.
    fn sample_collisions(
        &self,
        min: TileCoord,
        max: TileCoord,
        body: &Bounds2D,
        out: &mut Vec<Bounds2D>,
    ) -> f32 {
        let registry = self.registry();
        let mut fluid_overlap = 0.0;
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                let tile = TileCoord::new(x, y);
                let origin = Vec2::new(x as f32, y as f32);
                let mut in_fluid = false;
                for layer in TerrainLayer::ALL {
                    let Some((id, bitmask)) = self.global_id_and_bitmask(tile, layer) else {
                        continue;
                    };
                    let Some(behavior) = registry.behavior(id) else {
                        continue;
                    };
                    in_fluid |= behavior.is_fluid();
                    if layer.is_collidable() {
                        out.extend(
                            behavior
                                .collision_boxes(bitmask)
                                .iter()
                                .map(|b| b.translated(origin)),
                        );
                    }
                }
                if in_fluid {
                    let cell = Bounds2D::new(origin, origin + Vec2::ONE);
                    fluid_overlap += cell.intersection_area(body);
                }
            }
        }
        fluid_overlap
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::coords::{ChunkCoord, GridLayout};
    use crate::physics::Axis;
    use crate::tiles::{FluidTile, SolidTile, TileRegistry};

    fn terrain() -> TerrainManager {
        let mut builder = TileRegistry::builder();
        builder
            .register_named("core:stone", SolidTile::full())
            .expect("stone");
        builder
            .register_named("core:water", FluidTile)
            .expect("water");
        let mut terrain = TerrainManager::new(GridLayout::new(16, 4), Arc::new(builder.build()), 3);
        terrain
            .get_new_data_chunk(ChunkCoord::new(0, 0))
            .expect("chunk");
        terrain.activate_chunk(ChunkCoord::new(0, 0));
        terrain
    }

    #[test]
    fn solid_tiles_produce_world_space_boxes() {
        let mut terrain = terrain();
        let stone = terrain
            .registry()
            .global_id_by_name("core:stone")
            .expect("stone");
        terrain
            .set_global_id(TileCoord::new(3, 2), TerrainLayer::Ground, stone)
            .expect("set");

        let boxes = terrain.boxes_in(&Bounds2D::new(Vec2::new(2.5, 1.5), Vec2::new(4.5, 3.5)));
        assert_eq!(
            boxes,
            vec![Bounds2D::new(Vec2::new(3.0, 2.0), Vec2::new(4.0, 3.0))]
        );
        assert!(terrain.is_point_solid(Vec2::new(3.5, 2.5)));
        assert_eq!(
            terrain.axis_aligned_raycast(Vec2::new(3.5, 6.0), Axis::Down, 5.0),
            Some(Vec2::new(3.5, 3.0))
        );
    }

    #[test]
    fn background_layer_does_not_collide() {
        let mut terrain = terrain();
        let stone = terrain
            .registry()
            .global_id_by_name("core:stone")
            .expect("stone");
        terrain
            .set_global_id(TileCoord::new(1, 1), TerrainLayer::Background, stone)
            .expect("set");
        assert!(!terrain.is_point_solid(Vec2::new(1.5, 1.5)));
    }

    #[test]
    fn fluid_overlap_is_measured_against_the_body() {
        let mut terrain = terrain();
        let water = terrain
            .registry()
            .global_id_by_name("core:water")
            .expect("water");
        terrain
            .set_global_id(TileCoord::new(5, 5), TerrainLayer::Ground, water)
            .expect("set");

        let body = Bounds2D::new(Vec2::new(5.5, 5.0), Vec2::new(6.5, 6.0));
        let mut out = Vec::new();
        let overlap =
            terrain.sample_collisions(TileCoord::new(5, 5), TileCoord::new(6, 5), &body, &mut out);
        assert!(out.is_empty());
        assert!((overlap - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unloaded_chunks_are_empty() {
        let terrain = terrain();
        assert!(!terrain.is_point_solid(Vec2::new(-3.5, -3.5)));
        assert!(terrain
            .boxes_in(&Bounds2D::new(Vec2::new(-40.0, -40.0), Vec2::new(-20.0, -20.0)))
            .is_empty());
    }
}

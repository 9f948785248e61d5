use crate::coords::TileCoord;
use crate::math::{Bounds2D, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Up,
    Down,
    Left,
    Right,
}

impl Axis {
    pub fn direction(self) -> Vec2 {
        match self {
            Axis::Up => Vec2::UP,
            Axis::Down => Vec2::DOWN,
            Axis::Left => Vec2::LEFT,
            Axis::Right => Vec2::RIGHT,
        }
    }
}

fn tile_range(area: &Bounds2D) -> (TileCoord, TileCoord) {
    let (min_x, min_y) = area.min.floor_to_i32();
    let (max_x, max_y) = area.max.floor_to_i32();
    (TileCoord::new(min_x, min_y), TileCoord::new(max_x, max_y))
}

fn contains_half_open(bounds: &Bounds2D, point: Vec2) -> bool {
    point.x >= bounds.min.x && point.x < bounds.max.x && point.y >= bounds.min.y && point.y < bounds.max.y
}

/// Read-only view of static collision geometry used during a physics step.
///
/// Implementors only provide [`CollisionQuery::sample_collisions`]; the
/// helper queries are built on top of it.
pub trait CollisionQuery: Sync {
    /// Appends the world-space collision boxes of every tile in the inclusive
    /// range `min..=max` and returns how much of `body`'s area is covered by
    /// fluid tiles in that range.
    fn sample_collisions(
        &self,
        min: TileCoord,
        max: TileCoord,
        body: &Bounds2D,
        out: &mut Vec<Bounds2D>,
    ) -> f32;

    fn boxes_in(&self, area: &Bounds2D) -> Vec<Bounds2D> {
        let (min, max) = tile_range(area);
        let mut out = Vec::new();
        self.sample_collisions(min, max, area, &mut out);
        out
    }

    /// True when any collision box strictly overlaps `bounds`.
    fn bounds_cast(&self, bounds: &Bounds2D) -> bool {
        self.boxes_in(bounds).iter().any(|b| b.overlaps(bounds))
    }

    fn is_point_solid(&self, point: Vec2) -> bool {
        self.boxes_in(&Bounds2D::new(point, point))
            .iter()
            .any(|b| contains_half_open(b, point))
    }

    /// First solid surface met walking from `origin` along `axis` for at most
    /// `distance`. Starting inside a box hits at `origin`.
    fn axis_aligned_raycast(&self, origin: Vec2, axis: Axis, distance: f32) -> Option<Vec2> {
        let end = origin + axis.direction() * distance;
        let mut best: Option<(f32, Vec2)> = None;
        for b in self.boxes_in(&Bounds2D::new(origin, end)) {
            if contains_half_open(&b, origin) {
                return Some(origin);
            }
            let hit = match axis {
                Axis::Down if b.min.x <= origin.x && origin.x < b.max.x && b.max.y <= origin.y => {
                    Some((origin.y - b.max.y, Vec2::new(origin.x, b.max.y)))
                }
                Axis::Up if b.min.x <= origin.x && origin.x < b.max.x && b.min.y >= origin.y => {
                    Some((b.min.y - origin.y, Vec2::new(origin.x, b.min.y)))
                }
                Axis::Left if b.min.y <= origin.y && origin.y < b.max.y && b.max.x <= origin.x => {
                    Some((origin.x - b.max.x, Vec2::new(b.max.x, origin.y)))
                }
                Axis::Right if b.min.y <= origin.y && origin.y < b.max.y && b.min.x >= origin.x => {
                    Some((b.min.x - origin.x, Vec2::new(b.min.x, origin.y)))
                }
                _ => None,
            };
            if let Some((travel, point)) = hit {
                if travel <= distance && best.map_or(true, |(closest, _)| travel < closest) {
                    best = Some((travel, point));
                }
            }
        }
        best.map(|(_, point)| point)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fixed set of world boxes for physics tests.
    pub(crate) struct BoxWorld {
        pub boxes: Vec<Bounds2D>,
        pub fluid: Vec<Bounds2D>,
    }

    impl BoxWorld {
        pub fn new(boxes: Vec<Bounds2D>) -> Self {
            Self {
                boxes,
                fluid: Vec::new(),
            }
        }

        /// Solid floor whose top surface is at `y`, spanning x in `-50..50`.
        pub fn floor(y: f32) -> Self {
            Self::new(vec![Bounds2D::new(
                Vec2::new(-50.0, y - 1.0),
                Vec2::new(50.0, y),
            )])
        }
    }

    impl CollisionQuery for BoxWorld {
        fn sample_collisions(
            &self,
            min: TileCoord,
            max: TileCoord,
            body: &Bounds2D,
            out: &mut Vec<Bounds2D>,
        ) -> f32 {
            let area = Bounds2D::new(
                Vec2::new(min.x as f32, min.y as f32),
                Vec2::new(max.x as f32 + 1.0, max.y as f32 + 1.0),
            );
            out.extend(
                self.boxes
                    .iter()
                    .filter(|b| b.intersection_area(&area) > 0.0 || b.overlaps(&area))
                    .copied(),
            );
            self.fluid
                .iter()
                .filter(|f| f.overlaps(&area))
                .map(|f| f.intersection_area(body))
                .sum()
        }
    }

    #[test]
    fn point_and_bounds_queries() {
        let world = BoxWorld::floor(0.0);
        assert!(world.is_point_solid(Vec2::new(0.5, -0.5)));
        assert!(!world.is_point_solid(Vec2::new(0.5, 0.0)));
        assert!(world.bounds_cast(&Bounds2D::new(Vec2::new(0.0, -0.1), Vec2::new(1.0, 1.0))));
        assert!(!world.bounds_cast(&Bounds2D::new(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0))));
    }

    #[test]
    fn raycast_finds_nearest_surface_within_distance() {
        let world = BoxWorld::new(vec![
            Bounds2D::new(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0)),
            Bounds2D::new(Vec2::new(0.0, -3.0), Vec2::new(1.0, -2.0)),
        ]);
        assert_eq!(
            world.axis_aligned_raycast(Vec2::new(0.5, 1.25), Axis::Down, 0.5),
            Some(Vec2::new(0.5, 1.0))
        );
        assert_eq!(
            world.axis_aligned_raycast(Vec2::new(0.5, 1.75), Axis::Down, 0.5),
            None
        );
        assert_eq!(
            world.axis_aligned_raycast(Vec2::new(-0.5, 0.5), Axis::Right, 1.0),
            Some(Vec2::new(0.0, 0.5))
        );
    }
}

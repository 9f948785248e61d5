use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };
    pub const ONE: Self = Self { x: 1.0, y: 1.0 };
    pub const UP: Self = Self { x: 0.0, y: 1.0 };
    pub const DOWN: Self = Self { x: 0.0, y: -1.0 };
    pub const LEFT: Self = Self { x: -1.0, y: 0.0 };
    pub const RIGHT: Self = Self { x: 1.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn floor_to_i32(self) -> (i32, i32) {
        (self.x.floor() as i32, self.y.floor() as i32)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl MulAssign<f32> for Vec2 {
    fn mul_assign(&mut self, rhs: f32) {
        self.x *= rhs;
        self.y *= rhs;
    }
}

impl Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned box in world units. `min` is always component-wise <= `max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds2D {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds2D {
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self {
            min: Vec2::new(a.x.min(b.x), a.y.min(b.y)),
            max: Vec2::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn from_center_size(center: Vec2, size: Vec2) -> Self {
        let half = size * 0.5;
        Self::new(center - half, center + half)
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn area(&self) -> f32 {
        let size = self.size();
        size.x * size.y
    }

    pub fn translated(&self, offset: Vec2) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Grows the box so it covers every position swept by moving it by `delta`.
    pub fn swept(&self, delta: Vec2) -> Self {
        Self {
            min: Vec2::new(self.min.x + delta.x.min(0.0), self.min.y + delta.y.min(0.0)),
            max: Vec2::new(self.max.x + delta.x.max(0.0), self.max.y + delta.y.max(0.0)),
        }
    }

    pub fn inflated(&self, margin: Vec2) -> Self {
        Self {
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    /// Strict overlap: touching edges do not count.
    pub fn overlaps(&self, other: &Bounds2D) -> bool {
        ranges_overlap(self.min.x, self.max.x, other.min.x, other.max.x)
            && ranges_overlap(self.min.y, self.max.y, other.min.y, other.max.y)
    }

    pub fn contains_point(&self, point: Vec2) -> bool {
        point.x > self.min.x && point.x < self.max.x && point.y > self.min.y && point.y < self.max.y
    }

    pub fn intersection_area(&self, other: &Bounds2D) -> f32 {
        let width = self.max.x.min(other.max.x) - self.min.x.max(other.min.x);
        let height = self.max.y.min(other.max.y) - self.min.y.max(other.min.y);
        if width <= 0.0 || height <= 0.0 {
            return 0.0;
        }
        width * height
    }
}

pub(crate) fn ranges_overlap(min1: f32, max1: f32, min2: f32, max2: f32) -> bool {
    !(max1 <= min2 || min1 >= max2)
}

/// Float comparison tolerant to accumulated rounding in per-step deltas.
pub(crate) fn approximately(a: f32, b: f32) -> bool {
    (b - a).abs() < (1e-6 * a.abs().max(b.abs())).max(f32::EPSILON * 8.0)
}

pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_new_orders_corners() {
        let bounds = Bounds2D::new(Vec2::new(2.0, -1.0), Vec2::new(0.0, 3.0));
        assert_eq!(bounds.min, Vec2::new(0.0, -1.0));
        assert_eq!(bounds.max, Vec2::new(2.0, 3.0));
    }

    #[test]
    fn touching_boxes_do_not_overlap() {
        let a = Bounds2D::new(Vec2::ZERO, Vec2::ONE);
        let b = a.translated(Vec2::new(1.0, 0.0));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a.translated(Vec2::new(0.5, 0.5))));
    }

    #[test]
    fn swept_covers_negative_motion() {
        let swept = Bounds2D::new(Vec2::ZERO, Vec2::ONE).swept(Vec2::new(-2.0, 0.5));
        assert_eq!(swept.min, Vec2::new(-2.0, 0.0));
        assert_eq!(swept.max, Vec2::new(1.0, 1.5));
    }

    #[test]
    fn intersection_area_of_disjoint_boxes_is_zero() {
        let a = Bounds2D::new(Vec2::ZERO, Vec2::ONE);
        assert_eq!(a.intersection_area(&a.translated(Vec2::new(3.0, 0.0))), 0.0);
        assert!((a.intersection_area(&a.translated(Vec2::new(0.5, 0.0))) - 0.5).abs() < 1e-6);
    }
}

use glam::{Affine2, Vec2};

pub const EQUALITY_TOLERANCE: f32 = 0.001;

/// Axis-aligned rectangle in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub min: Vec2,
    pub max: Vec2,
}

impl Quad {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center(center: Vec2, size: Vec2) -> Self {
        let half = size.abs() * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// `[min_x, min_y, max_x, max_y]`, the layout used on the wire.
    pub fn from_array(values: [f32; 4]) -> Self {
        Self::new(
            Vec2::new(values[0], values[1]),
            Vec2::new(values[2], values[3]),
        )
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.min.x, self.min.y, self.max.x, self.max.y]
    }

    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            min: self.min - Vec2::splat(margin),
            max: self.max + Vec2::splat(margin),
        }
    }

    pub fn overlaps(&self, other: &Quad) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// Splits a 2D world transform into translation and rotation in radians.
pub fn decompose(transform: &Affine2) -> (Vec2, f32) {
    let x_axis = transform.matrix2.x_axis;
    (transform.translation, x_axis.y.atan2(x_axis.x))
}

pub fn compose(position: Vec2, rotation: f32) -> Affine2 {
    Affine2::from_angle_translation(rotation, position)
}

pub fn pretty_much_equals(a: f32, b: f32) -> bool {
    (a - b).abs() <= EQUALITY_TOLERANCE
}

pub fn pretty_much_equals_vec(a: Vec2, b: Vec2) -> bool {
    pretty_much_equals(a.x, b.x) && pretty_much_equals(a.y, b.y)
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn quad_overlap_and_margin() {
        let viewport = Quad::new(Vec2::ZERO, Vec2::new(10.0, 10.0));
        let outside = Quad::from_center(Vec2::new(14.0, 5.0), Vec2::splat(2.0));

        assert!(!viewport.overlaps(&outside));
        assert!(viewport.expanded(5.0).overlaps(&outside));
    }

    #[test]
    fn quad_normalises_corners() {
        let quad = Quad::from_array([4.0, 3.0, -1.0, -2.0]);
        assert_eq!(quad.min, Vec2::new(-1.0, -2.0));
        assert_eq!(quad.max, Vec2::new(4.0, 3.0));
        assert!(quad.contains(Vec2::ZERO));
    }

    #[test]
    fn decompose_recovers_compose() {
        let transform = compose(Vec2::new(3.0, -7.0), FRAC_PI_2);
        let (position, rotation) = decompose(&transform);

        assert!(pretty_much_equals_vec(position, Vec2::new(3.0, -7.0)));
        assert!(pretty_much_equals(rotation, FRAC_PI_2));
    }

    #[test]
    fn tolerance_is_inclusive() {
        assert!(pretty_much_equals(1.0, 1.0005));
        assert!(!pretty_much_equals(1.0, 1.01));
    }
}

//! Body-aligned coordinate axes.

use nalgebra::{Point3, Vector3};

/// Vectors shorter than this are treated as degenerate.
pub const DEGENERATE_EPSILON: f32 = 1e-6;

/// Normalizes `v`, or returns `fallback` if `v` is too short or not finite.
pub fn normalize_or(v: Vector3<f32>, fallback: Vector3<f32>) -> Vector3<f32> {
    let norm = v.norm();
    if norm.is_finite() && norm > DEGENERATE_EPSILON {
        v / norm
    } else {
        fallback
    }
}

/// Orthogonal-ish axes derived from the torso.
///
/// `right` runs from the left to the right shoulder, `up` from the hip center to the neck, and
/// `forward` is `up × right`. Neither `right` nor `up` is re-orthogonalized against the other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyBasis {
    pub right: Vector3<f32>,
    pub up: Vector3<f32>,
    pub forward: Vector3<f32>,
}

impl BodyBasis {
    pub const DEFAULT_RIGHT: Vector3<f32> = Vector3::new(1.0, 0.0, 0.0);
    pub const DEFAULT_UP: Vector3<f32> = Vector3::new(0.0, 1.0, 0.0);
    pub const DEFAULT_FORWARD: Vector3<f32> = Vector3::new(0.0, 0.0, -1.0);

    pub fn derive(
        left_shoulder: Point3<f32>,
        right_shoulder: Point3<f32>,
        hip_center: Point3<f32>,
        neck: Point3<f32>,
    ) -> Self {
        let right = normalize_or(right_shoulder - left_shoulder, Self::DEFAULT_RIGHT);
        let up = normalize_or(neck - hip_center, Self::DEFAULT_UP);
        let forward = normalize_or(up.cross(&right), Self::DEFAULT_FORWARD);
        Self { right, up, forward }
    }

    pub fn is_finite(&self) -> bool {
        self.right.iter().chain(&self.up).chain(&self.forward).all(|c| c.is_finite())
    }
}

impl Default for BodyBasis {
    fn default() -> Self {
        Self {
            right: Self::DEFAULT_RIGHT,
            up: Self::DEFAULT_UP,
            forward: Self::DEFAULT_FORWARD,
        }
    }
}

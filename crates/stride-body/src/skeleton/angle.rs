//! Joint angles and their arc visualizations.

use nalgebra::{Point3, Unit, UnitQuaternion, Vector3};

use crate::landmark::LandmarkIdx;

use super::basis::DEGENERATE_EPSILON;

/// A joint described by its vertex landmark and the two landmarks it connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joint {
    pub name: &'static str,
    pub vertex: LandmarkIdx,
    pub a: LandmarkIdx,
    pub b: LandmarkIdx,
}

/// Joints whose angles are measured.
pub const JOINTS: &[Joint] = {
    use LandmarkIdx::*;
    &[
        Joint { name: "left elbow", vertex: LeftElbow, a: LeftShoulder, b: LeftWrist },
        Joint { name: "right elbow", vertex: RightElbow, a: RightShoulder, b: RightWrist },
        Joint { name: "left shoulder", vertex: LeftShoulder, a: LeftElbow, b: LeftHip },
        Joint { name: "right shoulder", vertex: RightShoulder, a: RightElbow, b: RightHip },
        Joint { name: "left hip", vertex: LeftHip, a: LeftShoulder, b: LeftKnee },
        Joint { name: "right hip", vertex: RightHip, a: RightShoulder, b: RightKnee },
        Joint { name: "left knee", vertex: LeftKnee, a: LeftHip, b: LeftAnkle },
        Joint { name: "right knee", vertex: RightKnee, a: RightHip, b: RightAnkle },
    ]
};

/// Computes the angle at `vertex` between the rays towards `a` and `b`, in radians.
///
/// Returns [`None`] if either ray has (near) zero length.
pub fn joint_angle(vertex: Point3<f32>, a: Point3<f32>, b: Point3<f32>) -> Option<f32> {
    let (da, db) = (a - vertex, b - vertex);
    let (na, nb) = (da.norm(), db.norm());
    if !(na > DEGENERATE_EPSILON && nb > DEGENERATE_EPSILON) {
        return None;
    }
    let cos = (da / na).dot(&(db / nb)).clamp(-1.0, 1.0);
    Some(cos.acos())
}

/// An arc visualizing a joint angle.
///
/// The arc starts at `vertex + from * radius` and sweeps `angle` radians about `axis`.
#[derive(Debug, Clone, PartialEq)]
pub struct JointArc {
    pub joint: Joint,
    pub vertex: Point3<f32>,
    pub from: Unit<Vector3<f32>>,
    pub axis: Unit<Vector3<f32>>,
    pub angle: f32,
    pub radius: f32,
}

impl JointArc {
    /// Creates the arc for `joint`.
    ///
    /// Returns [`None`] when the two rays are degenerate or parallel, since the sweep axis is
    /// undefined in that case.
    pub fn new(
        joint: Joint,
        vertex: Point3<f32>,
        a: Point3<f32>,
        b: Point3<f32>,
        radius: f32,
    ) -> Option<Self> {
        let angle = joint_angle(vertex, a, b)?;
        let (da, db) = (a - vertex, b - vertex);
        let axis = da.normalize().cross(&db.normalize());
        if axis.norm() <= DEGENERATE_EPSILON {
            return None;
        }
        Some(Self {
            joint,
            vertex,
            from: Unit::new_normalize(da),
            axis: Unit::new_normalize(axis),
            angle,
            radius,
        })
    }

    /// Samples `segments + 1` points along the arc.
    pub fn points(&self, segments: usize) -> Vec<Point3<f32>> {
        let segments = segments.max(1);
        (0..=segments)
            .map(|i| {
                let t = i as f32 / segments as f32;
                let rot = UnitQuaternion::from_axis_angle(&self.axis, self.angle * t);
                self.vertex + rot * self.from.into_inner() * self.radius
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn opposite_rays_are_straight() {
        let v = Point3::new(1.0, 1.0, 1.0);
        let angle = joint_angle(v, Point3::new(2.0, 1.0, 1.0), Point3::new(-3.0, 1.0, 1.0));
        assert_relative_eq!(angle.unwrap(), PI);
    }

    #[test]
    fn identical_rays_are_zero() {
        let v = Point3::origin();
        let angle = joint_angle(v, Point3::new(0.0, 2.0, 0.0), Point3::new(0.0, 5.0, 0.0));
        assert_relative_eq!(angle.unwrap(), 0.0);
    }

    #[test]
    fn right_angle() {
        let v = Point3::origin();
        let angle = joint_angle(v, Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 0.0, 3.0));
        assert_relative_eq!(angle.unwrap(), FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn zero_length_ray() {
        let v = Point3::new(0.5, 0.5, 0.5);
        assert_eq!(joint_angle(v, v, Point3::origin()), None);
    }

    #[test]
    fn parallel_rays_have_no_arc() {
        let joint = JOINTS[0];
        let v = Point3::origin();
        let a = Point3::new(1.0, 0.0, 0.0);
        assert!(JointArc::new(joint, v, a, Point3::new(-1.0, 0.0, 0.0), 0.1).is_none());
        assert!(JointArc::new(joint, v, a, Point3::new(2.0, 0.0, 0.0), 0.1).is_none());
    }

    #[test]
    fn arc_sweeps_from_a_to_b() {
        let joint = JOINTS[0];
        let v = Point3::origin();
        let arc = JointArc::new(
            joint,
            v,
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            0.5,
        )
        .unwrap();
        assert_relative_eq!(arc.angle, FRAC_PI_2, epsilon = 1e-6);

        let points = arc.points(8);
        assert_eq!(points.len(), 9);
        assert_relative_eq!(points[0], Point3::new(0.5, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(points[8], Point3::new(0.0, 0.5, 0.0), epsilon = 1e-6);
        for p in &points {
            assert_relative_eq!((p - v).norm(), 0.5, epsilon = 1e-5);
        }
    }
}

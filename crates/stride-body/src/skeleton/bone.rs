//! Bone segments and the spine curve, as renderer-agnostic geometry descriptors.

use std::f32::consts::PI;

use nalgebra::Point3;

use crate::landmark::{connection_side, LandmarkIdx, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoneKind {
    /// Shoulder and hip lines.
    Girdle,
    Limb,
    /// Rays from the wrist to the finger landmarks.
    Hand,
    /// Edges of the ankle/heel/toe triangle.
    Foot,
}

impl BoneKind {
    /// Peak radius as a fraction of the bone's length.
    fn thickness(self) -> f32 {
        match self {
            BoneKind::Girdle => 0.06,
            BoneKind::Limb => 0.12,
            BoneKind::Hand => 0.08,
            BoneKind::Foot => 0.10,
        }
    }
}

/// The fixed anatomical adjacency list used for 3D reconstruction.
pub const BONES: &[(LandmarkIdx, LandmarkIdx, BoneKind)] = {
    use BoneKind::*;
    use LandmarkIdx::*;
    &[
        (LeftShoulder, RightShoulder, Girdle),
        (LeftHip, RightHip, Girdle),
        (LeftShoulder, LeftElbow, Limb),
        (RightShoulder, RightElbow, Limb),
        (LeftElbow, LeftWrist, Limb),
        (RightElbow, RightWrist, Limb),
        (LeftWrist, LeftPinky, Hand),
        (LeftWrist, LeftIndex, Hand),
        (LeftWrist, LeftThumb, Hand),
        (RightWrist, RightPinky, Hand),
        (RightWrist, RightIndex, Hand),
        (RightWrist, RightThumb, Hand),
        (LeftHip, LeftKnee, Limb),
        (RightHip, RightKnee, Limb),
        (LeftKnee, LeftAnkle, Limb),
        (RightKnee, RightAnkle, Limb),
        (LeftAnkle, LeftHeel, Foot),
        (LeftHeel, LeftFootIndex, Foot),
        (LeftFootIndex, LeftAnkle, Foot),
        (RightAnkle, RightHeel, Foot),
        (RightHeel, RightFootIndex, Foot),
        (RightFootIndex, RightAnkle, Foot),
    ]
};

const MIN_PEAK_RADIUS: f32 = 0.004;
const MAX_PEAK_RADIUS: f32 = 0.06;
/// Endpoint radius relative to the peak radius.
const END_RATIO: f32 = 0.35;

/// Radius of a bone solid along its length.
///
/// The radius is smallest at both endpoints and peaks at the midpoint, following a half sine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusProfile {
    pub end_radius: f32,
    pub peak_radius: f32,
}

impl RadiusProfile {
    pub fn for_bone(kind: BoneKind, length: f32) -> Self {
        let peak_radius = (length * kind.thickness()).clamp(MIN_PEAK_RADIUS, MAX_PEAK_RADIUS);
        Self {
            end_radius: peak_radius * END_RATIO,
            peak_radius,
        }
    }

    /// Returns the radius at `t`, where `t = 0` is the start and `t = 1` the end of the bone.
    pub fn radius_at(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        self.end_radius + (self.peak_radius - self.end_radius) * (PI * t).sin()
    }

    /// Samples `(t, radius)` pairs at `segments + 1` evenly spaced positions.
    pub fn samples(&self, segments: usize) -> impl Iterator<Item = (f32, f32)> + '_ {
        let segments = segments.max(1);
        (0..=segments).map(move |i| {
            let t = i as f32 / segments as f32;
            (t, self.radius_at(t))
        })
    }
}

/// A single bone segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub from: LandmarkIdx,
    pub to: LandmarkIdx,
    pub kind: BoneKind,
    pub side: Side,
    pub start: Point3<f32>,
    pub end: Point3<f32>,
    pub profile: RadiusProfile,
}

impl Bone {
    pub fn new(
        from: LandmarkIdx,
        to: LandmarkIdx,
        kind: BoneKind,
        start: Point3<f32>,
        end: Point3<f32>,
    ) -> Self {
        Self {
            from,
            to,
            kind,
            side: connection_side(from, to),
            start,
            end,
            profile: RadiusProfile::for_bone(kind, (end - start).norm()),
        }
    }

    #[inline]
    pub fn length(&self) -> f32 {
        (self.end - self.start).norm()
    }

    #[inline]
    pub fn midpoint(&self) -> Point3<f32> {
        nalgebra::center(&self.start, &self.end)
    }
}

/// The trunk, as a smooth curve through five control points from hip center to head.
#[derive(Debug, Clone, PartialEq)]
pub struct Spine {
    pub control_points: [Point3<f32>; 5],
}

impl Spine {
    /// Builds the spine between `hip_center`, `neck` and `head`.
    ///
    /// The two control points between hip center and neck are pushed along `forward` by
    /// `forward_bias`, giving the trunk a slight natural curvature.
    pub fn new(
        hip_center: Point3<f32>,
        neck: Point3<f32>,
        head: Point3<f32>,
        forward: nalgebra::Vector3<f32>,
        forward_bias: f32,
    ) -> Self {
        let lower = hip_center.coords.lerp(&neck.coords, 1.0 / 3.0) + forward * forward_bias;
        let upper = hip_center.coords.lerp(&neck.coords, 2.0 / 3.0) + forward * forward_bias;
        Self {
            control_points: [hip_center, lower.into(), upper.into(), neck, head],
        }
    }

    /// Samples the curve with a uniform Catmull-Rom spline.
    ///
    /// Returns `segments_per_span * 4 + 1` points; the curve passes through every control point.
    pub fn sample(&self, segments_per_span: usize) -> Vec<Point3<f32>> {
        let n = segments_per_span.max(1);
        let cp = &self.control_points;
        let get = |i: isize| cp[i.clamp(0, cp.len() as isize - 1) as usize].coords;

        let mut out = Vec::with_capacity(n * (cp.len() - 1) + 1);
        for span in 0..cp.len() as isize - 1 {
            let (p0, p1, p2, p3) = (get(span - 1), get(span), get(span + 1), get(span + 2));
            for i in 0..n {
                let t = i as f32 / n as f32;
                let (t2, t3) = (t * t, t * t * t);
                let p = (p1 * 2.0
                    + (p2 - p0) * t
                    + (p0 * 2.0 - p1 * 5.0 + p2 * 4.0 - p3) * t2
                    + (p1 * 3.0 - p0 - p2 * 3.0 + p3) * t3)
                    * 0.5;
                out.push(p.into());
            }
        }
        out.push(cp[cp.len() - 1]);
        out
    }
}

//! Per-frame 3D skeleton reconstruction.
//!
//! A [`Skeleton`] is derived fresh for every displayed [`Frame`] and never stored. All geometry is
//! expressed in display coordinates: X points right, Y points up, Z points towards the camera,
//! and the body's bounding box center is the origin.
//!
//! Input landmarks are expected in the pose network's world space (Y pointing down, Z pointing
//! away from the camera); Y and Z are flipped during reconstruction.

mod angle;
mod basis;
mod bone;
mod trail;

use std::{error::Error, fmt};

use nalgebra::{Point3, Vector3};

use crate::landmark::{
    Frame, Landmark, LandmarkIdx, FIRST_BODY_LANDMARK, NUM_BODY_LANDMARKS, NUM_LANDMARKS,
};

pub use angle::{joint_angle, Joint, JointArc, JOINTS};
pub use basis::{normalize_or, BodyBasis, DEGENERATE_EPSILON};
pub use bone::{Bone, BoneKind, RadiusProfile, Spine, BONES};
pub use trail::Trail;

/// Minimum number of landmarks a frame needs to be reconstructed.
pub const MIN_LANDMARKS: usize = NUM_BODY_LANDMARKS;

/// Error returned when a frame cannot be turned into a skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructError {
    TooFewLandmarks { found: usize },
}

impl fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewLandmarks { found } => write!(
                f,
                "frame has {found} landmarks, at least {MIN_LANDMARKS} are required"
            ),
        }
    }
}

impl Error for ReconstructError {}

/// Read access to the body landmarks of a frame, in display coordinates.
///
/// Frames with a full set of landmarks are indexed canonically. Frames with fewer (but at least
/// [`MIN_LANDMARKS`]) landmarks are treated as body-only: their first entry is the left shoulder.
/// Facial landmarks are unavailable in that case.
#[derive(Clone, Copy)]
pub struct BodyView<'a> {
    landmarks: &'a [Landmark],
    offset: usize,
}

impl<'a> BodyView<'a> {
    pub fn new(landmarks: &'a [Landmark]) -> Result<Self, ReconstructError> {
        let offset = match landmarks.len() {
            n if n >= NUM_LANDMARKS => 0,
            n if n >= MIN_LANDMARKS => FIRST_BODY_LANDMARK,
            found => {
                log::trace!("rejecting frame with {found} landmarks");
                return Err(ReconstructError::TooFewLandmarks { found });
            }
        };
        Ok(Self { landmarks, offset })
    }

    #[inline]
    pub fn has_face(&self) -> bool {
        self.offset == 0
    }

    pub fn get(&self, idx: LandmarkIdx) -> Option<Point3<f32>> {
        let i = idx.index().checked_sub(self.offset)?;
        let lm = self.landmarks.get(i)?;
        Some(Point3::new(lm.x, -lm.y, -lm.z))
    }

    /// Returns a body landmark. Body landmarks are always present.
    fn body(&self, idx: LandmarkIdx) -> Point3<f32> {
        debug_assert!(!idx.is_facial());
        self.get(idx).unwrap_or_else(Point3::origin)
    }

    /// Returns the center of the bounding box of all body landmarks.
    pub fn bbox_center(&self) -> Vector3<f32> {
        let mut min = Vector3::repeat(f32::INFINITY);
        let mut max = Vector3::repeat(f32::NEG_INFINITY);
        for idx in &LandmarkIdx::ALL[FIRST_BODY_LANDMARK..] {
            let p = self.body(*idx).coords;
            min = min.inf(&p);
            max = max.sup(&p);
        }
        (min + max) * 0.5
    }
}

/// Parameters for [`Reconstructor`].
#[derive(Debug, Clone)]
pub struct SkeletonOptions {
    trail_capacity: usize,
    tracked: Vec<LandmarkIdx>,
    ground_clearance: f32,
    com_ratio: f32,
    spine_forward_bias: f32,
    arc_radius: f32,
}

impl Default for SkeletonOptions {
    fn default() -> Self {
        Self {
            trail_capacity: 40,
            tracked: vec![LandmarkIdx::LeftAnkle, LandmarkIdx::RightAnkle],
            ground_clearance: 0.02,
            com_ratio: 0.15,
            spine_forward_bias: 0.02,
            arc_radius: 0.06,
        }
    }
}

impl SkeletonOptions {
    /// Sets the number of past frames a trajectory trail looks back over.
    pub fn trail_capacity(self, trail_capacity: usize) -> Self {
        Self {
            trail_capacity,
            ..self
        }
    }

    /// Sets the landmarks that get a trajectory trail. Defaults to both ankles.
    pub fn tracked<I: IntoIterator<Item = LandmarkIdx>>(self, tracked: I) -> Self {
        Self {
            tracked: tracked.into_iter().collect(),
            ..self
        }
    }

    /// Sets the distance between the lowest ankle and the ground plane, in meters.
    pub fn ground_clearance(self, ground_clearance: f32) -> Self {
        Self {
            ground_clearance,
            ..self
        }
    }

    /// Sets how far the center of mass sits from the hip center towards the neck.
    ///
    /// The default of 0.15 is a rough heuristic, not a measured mass distribution.
    pub fn com_ratio(self, com_ratio: f32) -> Self {
        Self { com_ratio, ..self }
    }

    pub fn spine_forward_bias(self, spine_forward_bias: f32) -> Self {
        Self {
            spine_forward_bias,
            ..self
        }
    }

    pub fn arc_radius(self, arc_radius: f32) -> Self {
        Self { arc_radius, ..self }
    }

    /// Number of past frames needed to build full trails.
    #[inline]
    pub fn history_len(&self) -> usize {
        self.trail_capacity
    }
}

/// A measured joint angle. `angle` is [`None`] if one of the joint's rays is degenerate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointAngle {
    pub joint: Joint,
    pub angle: Option<f32>,
}

/// Reconstructed 3D skeleton of a single frame.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub time: f64,
    /// Bounding box center that was subtracted from every point, in display coordinates.
    pub center: Vector3<f32>,
    pub basis: BodyBasis,
    /// Re-centered positions of all body landmarks.
    pub joints: Vec<(LandmarkIdx, Point3<f32>)>,
    pub bones: Vec<Bone>,
    pub spine: Spine,
    pub angles: Vec<JointAngle>,
    pub arcs: Vec<JointArc>,
    pub trails: Vec<Trail>,
    pub center_of_mass: Point3<f32>,
    /// Height of the ground plane.
    pub ground_y: f32,
}

impl Skeleton {
    pub fn joint(&self, idx: LandmarkIdx) -> Option<Point3<f32>> {
        self.joints.iter().find(|(i, _)| *i == idx).map(|(_, p)| *p)
    }

    pub fn angle(&self, name: &str) -> Option<f32> {
        self.angles
            .iter()
            .find(|a| a.joint.name == name)
            .and_then(|a| a.angle)
    }

    /// Projection of the center of mass onto the ground plane.
    pub fn com_ground_projection(&self) -> Point3<f32> {
        Point3::new(self.center_of_mass.x, self.ground_y, self.center_of_mass.z)
    }

    /// Vertical reference line from the ground projection up to the center of mass.
    pub fn com_reference_line(&self) -> (Point3<f32>, Point3<f32>) {
        (self.com_ground_projection(), self.center_of_mass)
    }

    /// Checks that every coordinate in the skeleton is finite.
    pub fn is_finite(&self) -> bool {
        let finite = |p: &Point3<f32>| p.iter().all(|c| c.is_finite());
        self.basis.is_finite()
            && self.joints.iter().all(|(_, p)| finite(p))
            && self.bones.iter().all(|b| finite(&b.start) && finite(&b.end))
            && self.spine.control_points.iter().all(finite)
            && self.trails.iter().all(|t| t.points.iter().all(finite))
            && finite(&self.center_of_mass)
            && self.ground_y.is_finite()
    }
}

/// Turns landmark frames into [`Skeleton`]s.
#[derive(Debug, Clone, Default)]
pub struct Reconstructor {
    options: SkeletonOptions,
}

impl Reconstructor {
    pub fn new(options: SkeletonOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SkeletonOptions {
        &self.options
    }

    /// Reconstructs the skeleton of `frame`.
    ///
    /// `history` is the look-back window used for trajectory trails, oldest first. It should end
    /// with `frame` itself. Frames with fewer than [`MIN_LANDMARKS`] landmarks are rejected.
    pub fn reconstruct(
        &self,
        frame: &Frame,
        history: &[Frame],
    ) -> Result<Skeleton, ReconstructError> {
        let view = BodyView::new(frame.landmarks_3d())?;
        let center = view.bbox_center();
        let at = |idx: LandmarkIdx| Point3::from(view.body(idx).coords - center);

        let joints = LandmarkIdx::ALL[FIRST_BODY_LANDMARK..]
            .iter()
            .map(|&idx| (idx, at(idx)))
            .collect::<Vec<_>>();

        let left_shoulder = at(LandmarkIdx::LeftShoulder);
        let right_shoulder = at(LandmarkIdx::RightShoulder);
        let neck = nalgebra::center(&left_shoulder, &right_shoulder);
        let hip_center = nalgebra::center(&at(LandmarkIdx::LeftHip), &at(LandmarkIdx::RightHip));
        let basis = BodyBasis::derive(left_shoulder, right_shoulder, hip_center, neck);

        let head = match view.get(LandmarkIdx::Nose) {
            Some(nose) => Point3::from(nose.coords - center),
            // Without a face, extend the spine past the neck.
            None => neck + (neck - hip_center) * 0.35,
        };
        let spine = Spine::new(
            hip_center,
            neck,
            head,
            basis.forward,
            self.options.spine_forward_bias,
        );

        let bones = BONES
            .iter()
            .map(|&(from, to, kind)| Bone::new(from, to, kind, at(from), at(to)))
            .collect();

        let mut angles = Vec::with_capacity(JOINTS.len());
        let mut arcs = Vec::new();
        for joint in JOINTS {
            let (v, a, b) = (at(joint.vertex), at(joint.a), at(joint.b));
            angles.push(JointAngle {
                joint: *joint,
                angle: joint_angle(v, a, b),
            });
            arcs.extend(JointArc::new(*joint, v, a, b, self.options.arc_radius));
        }

        let center_of_mass = hip_center + (neck - hip_center) * self.options.com_ratio;

        let ankle_y = at(LandmarkIdx::LeftAnkle).y.min(at(LandmarkIdx::RightAnkle).y);
        let ground_y = ankle_y - self.options.ground_clearance;

        let trails = self
            .options
            .tracked
            .iter()
            .map(|&idx| Trail::build(idx, history, center, self.options.trail_capacity))
            .collect();

        Ok(Skeleton {
            time: frame.time,
            center,
            basis,
            joints,
            bones,
            spine,
            angles,
            arcs,
            trails,
            center_of_mass,
            ground_y,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    /// A person standing upright in world space (Y down), arms slightly bent.
    pub(crate) fn standing_pose() -> Vec<Landmark> {
        use LandmarkIdx::*;
        let mut lms = vec![Landmark::default(); NUM_LANDMARKS];
        let mut set = |idx: LandmarkIdx, x: f32, y: f32, z: f32| {
            lms[idx.index()] = Landmark::new([x, y, z]).with_visibility(0.99);
        };
        set(Nose, 0.0, -0.65, -0.05);
        for (i, idx) in [1usize, 2, 3, 4, 5, 6, 7, 8, 9, 10].into_iter().enumerate() {
            let idx = LandmarkIdx::from_index(idx).unwrap();
            set(idx, (i as f32 - 4.5) * 0.01, -0.62, -0.04);
        }
        set(LeftShoulder, 0.18, -0.5, 0.0);
        set(RightShoulder, -0.18, -0.5, 0.0);
        set(LeftElbow, 0.22, -0.25, 0.02);
        set(RightElbow, -0.22, -0.25, 0.02);
        set(LeftWrist, 0.24, -0.02, -0.05);
        set(RightWrist, -0.24, -0.02, -0.05);
        set(LeftPinky, 0.25, 0.05, -0.05);
        set(RightPinky, -0.25, 0.05, -0.05);
        set(LeftIndex, 0.24, 0.06, -0.06);
        set(RightIndex, -0.24, 0.06, -0.06);
        set(LeftThumb, 0.23, 0.03, -0.07);
        set(RightThumb, -0.23, 0.03, -0.07);
        set(LeftHip, 0.1, 0.0, 0.0);
        set(RightHip, -0.1, 0.0, 0.0);
        set(LeftKnee, 0.11, 0.42, -0.03);
        set(RightKnee, -0.11, 0.42, -0.03);
        set(LeftAnkle, 0.11, 0.82, 0.02);
        set(RightAnkle, -0.11, 0.84, 0.02);
        set(LeftHeel, 0.11, 0.86, 0.06);
        set(RightHeel, -0.11, 0.88, 0.06);
        set(LeftFootIndex, 0.12, 0.88, -0.1);
        set(RightFootIndex, -0.12, 0.9, -0.1);
        lms
    }

    fn frame(landmarks: Vec<Landmark>) -> Frame {
        Frame::new(1.0, Vec::new()).with_world_landmarks(landmarks)
    }

    #[test]
    fn rejects_short_frames() {
        let rec = Reconstructor::default();
        let f = frame(vec![Landmark::default(); MIN_LANDMARKS - 1]);
        assert_eq!(
            rec.reconstruct(&f, &[]).unwrap_err(),
            ReconstructError::TooFewLandmarks { found: 21 }
        );
    }

    #[test]
    fn every_bone_is_present() {
        let rec = Reconstructor::default();
        let f = frame(standing_pose());
        let skel = rec.reconstruct(&f, std::slice::from_ref(&f)).unwrap();
        assert_eq!(skel.bones.len(), BONES.len());
        for ((from, to, _), bone) in BONES.iter().zip(&skel.bones) {
            assert_eq!((bone.from, bone.to), (*from, *to));
        }
        assert_eq!(skel.joints.len(), NUM_BODY_LANDMARKS);
        assert!(skel.is_finite());
    }

    #[test]
    fn body_only_frames() {
        let rec = Reconstructor::default();
        let body = standing_pose()[FIRST_BODY_LANDMARK..].to_vec();
        assert_eq!(body.len(), MIN_LANDMARKS);
        let skel = rec.reconstruct(&frame(body), &[]).unwrap();
        assert_eq!(skel.bones.len(), BONES.len());
        assert!(skel.is_finite());

        let full = rec.reconstruct(&frame(standing_pose()), &[]).unwrap();
        assert_relative_eq!(
            skel.joint(LandmarkIdx::LeftKnee).unwrap(),
            full.joint(LandmarkIdx::LeftKnee).unwrap()
        );
        // Head is extrapolated above the neck instead of using the nose.
        assert!(skel.spine.control_points[4].y > skel.spine.control_points[3].y);
    }

    #[test]
    fn recentered_on_bounding_box() {
        let rec = Reconstructor::default();
        let mut shifted = standing_pose();
        for lm in &mut shifted {
            lm.x += 5.0;
            lm.z += 2.0;
        }
        let a = rec.reconstruct(&frame(standing_pose()), &[]).unwrap();
        let b = rec.reconstruct(&frame(shifted), &[]).unwrap();
        for ((_, pa), (_, pb)) in a.joints.iter().zip(&b.joints) {
            assert_relative_eq!(*pa, *pb, epsilon = 1e-5);
        }

        let (min_x, max_x) = a
            .joints
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), (_, p)| (lo.min(p.x), hi.max(p.x)));
        assert_relative_eq!(min_x, -max_x, epsilon = 1e-6);
    }

    #[test]
    fn standing_geometry() {
        let rec = Reconstructor::default();
        let skel = rec.reconstruct(&frame(standing_pose()), &[]).unwrap();

        assert_relative_eq!(skel.basis.up, Vector3::y(), epsilon = 1e-5);
        // Subject's right shoulder is at -X in camera space.
        assert_relative_eq!(skel.basis.right, -Vector3::x(), epsilon = 1e-5);
        assert_relative_eq!(skel.basis.forward, Vector3::z(), epsilon = 1e-5);

        let knee = skel.angle("left knee").unwrap();
        assert!(knee > 2.8, "standing knee should be nearly straight: {knee}");

        let hip = nalgebra::center(
            &skel.joint(LandmarkIdx::LeftHip).unwrap(),
            &skel.joint(LandmarkIdx::RightHip).unwrap(),
        );
        let neck = nalgebra::center(
            &skel.joint(LandmarkIdx::LeftShoulder).unwrap(),
            &skel.joint(LandmarkIdx::RightShoulder).unwrap(),
        );
        assert_relative_eq!(
            skel.center_of_mass,
            hip + (neck - hip) * 0.15,
            epsilon = 1e-6
        );

        let lowest_ankle = skel.joint(LandmarkIdx::RightAnkle).unwrap().y;
        assert_relative_eq!(skel.ground_y, lowest_ankle - 0.02);
        assert_relative_eq!(skel.com_ground_projection().y, skel.ground_y);
        assert_eq!(skel.trails.len(), 2);
    }

    #[test]
    fn coincident_shoulders_stay_finite() {
        let rec = Reconstructor::default();
        let mut lms = standing_pose();
        lms[LandmarkIdx::RightShoulder.index()] = lms[LandmarkIdx::LeftShoulder.index()];
        let skel = rec.reconstruct(&frame(lms), &[]).unwrap();
        assert_eq!(skel.basis.right, BodyBasis::DEFAULT_RIGHT);
        assert!(skel.is_finite());
    }

    #[test]
    fn collapsed_pose_stays_finite() {
        let rec = Reconstructor::default();
        let skel = rec
            .reconstruct(&frame(vec![Landmark::default(); NUM_LANDMARKS]), &[])
            .unwrap();
        assert!(skel.is_finite());
        assert_eq!(skel.basis, BodyBasis::default());
        assert!(skel.arcs.is_empty());
        assert!(skel.angles.iter().all(|a| a.angle.is_none()));
        assert_eq!(skel.bones.len(), BONES.len());
    }
}

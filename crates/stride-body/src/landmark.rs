//! Body landmarks and timestamped landmark frames.
//!
//! Landmark indices follow the 33-point BlazePose topology. Indices `0..=10` describe the face and
//! are never used for reconstruction; `11..=32` describe the body.

use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Number of landmarks in a complete pose estimate.
pub const NUM_LANDMARKS: usize = 33;

/// Number of body (non-facial) landmarks.
pub const NUM_BODY_LANDMARKS: usize = NUM_LANDMARKS - FIRST_BODY_LANDMARK;

/// Index of the first non-facial landmark.
pub const FIRST_BODY_LANDMARK: usize = LandmarkIdx::LeftShoulder as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LandmarkIdx {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkIdx {
    pub const ALL: [Self; NUM_LANDMARKS] = {
        use LandmarkIdx::*;
        [
            Nose,
            LeftEyeInner,
            LeftEye,
            LeftEyeOuter,
            RightEyeInner,
            RightEye,
            RightEyeOuter,
            LeftEar,
            RightEar,
            MouthLeft,
            MouthRight,
            LeftShoulder,
            RightShoulder,
            LeftElbow,
            RightElbow,
            LeftWrist,
            RightWrist,
            LeftPinky,
            RightPinky,
            LeftIndex,
            RightIndex,
            LeftThumb,
            RightThumb,
            LeftHip,
            RightHip,
            LeftKnee,
            RightKnee,
            LeftAnkle,
            RightAnkle,
            LeftHeel,
            RightHeel,
            LeftFootIndex,
            RightFootIndex,
        ]
    };

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn is_facial(self) -> bool {
        self.index() < FIRST_BODY_LANDMARK
    }

    /// Returns which side of the body this landmark is on.
    ///
    /// The nose is the only landmark on the midline. All other landmarks alternate between the
    /// left and right side, with the body landmarks starting on the left.
    pub fn side(self) -> Side {
        match self.index() {
            0 => Side::Center,
            i if i < FIRST_BODY_LANDMARK => {
                if (1..=3).contains(&i) || i == 7 || i == 9 {
                    Side::Left
                } else {
                    Side::Right
                }
            }
            i if i % 2 == 1 => Side::Left,
            _ => Side::Right,
        }
    }
}

/// Side of the body a landmark or bone belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
    Center,
}

/// Pairs of body landmarks that are connected by a bone in 2D visualizations.
///
/// Facial landmarks are not included.
pub const BODY_CONNECTIONS: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        (LeftShoulder, RightShoulder),
        (LeftShoulder, LeftElbow),
        (LeftElbow, LeftWrist),
        (LeftWrist, LeftPinky),
        (LeftWrist, LeftIndex),
        (LeftWrist, LeftThumb),
        (LeftPinky, LeftIndex),
        (RightShoulder, RightElbow),
        (RightElbow, RightWrist),
        (RightWrist, RightPinky),
        (RightWrist, RightIndex),
        (RightWrist, RightThumb),
        (RightPinky, RightIndex),
        (LeftShoulder, LeftHip),
        (RightShoulder, RightHip),
        (LeftHip, RightHip),
        (LeftHip, LeftKnee),
        (LeftKnee, LeftAnkle),
        (LeftAnkle, LeftHeel),
        (LeftHeel, LeftFootIndex),
        (LeftAnkle, LeftFootIndex),
        (RightHip, RightKnee),
        (RightKnee, RightAnkle),
        (RightAnkle, RightHeel),
        (RightHeel, RightFootIndex),
        (RightAnkle, RightFootIndex),
    ]
};

/// Returns the side a connection between `a` and `b` is drawn on.
///
/// Connections that cross the body (shoulder line, hip line) are on the midline.
pub fn connection_side(a: LandmarkIdx, b: LandmarkIdx) -> Side {
    match (a.side(), b.side()) {
        (Side::Left, Side::Left) => Side::Left,
        (Side::Right, Side::Right) => Side::Right,
        _ => Side::Center,
    }
}

/// A landmark position with an optional visibility score.
///
/// Depending on where the landmark came from, the position is either normalized to the input
/// image (X and Y in range 0.0 to 1.0, Y pointing down) or a world-space position in meters
/// relative to the hip center.
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new([x, y, z]: [f32; 3]) -> Self {
        Self {
            x,
            y,
            z,
            visibility: None,
        }
    }

    pub fn with_visibility(self, visibility: f32) -> Self {
        Self {
            visibility: Some(visibility),
            ..self
        }
    }

    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Returns the visibility score, treating a missing score as fully visible.
    #[inline]
    pub fn visibility_or_one(&self) -> f32 {
        self.visibility.unwrap_or(1.0)
    }
}

/// A timestamped landmark snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    /// Time in seconds. Non-decreasing within a sequence.
    pub time: f64,
    /// Landmarks normalized to the input image.
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    /// World-space landmarks in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_landmarks: Option<Vec<Landmark>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

impl Frame {
    pub fn new(time: f64, landmarks: Vec<Landmark>) -> Self {
        Self {
            time,
            landmarks,
            world_landmarks: None,
            phase: None,
        }
    }

    pub fn with_world_landmarks(self, world: Vec<Landmark>) -> Self {
        Self {
            world_landmarks: Some(world),
            ..self
        }
    }

    pub fn with_phase(self, phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..self
        }
    }

    /// Returns the landmarks to use for 3D reconstruction.
    ///
    /// World landmarks are preferred. Frames without them fall back to the normalized set.
    pub fn landmarks_3d(&self) -> &[Landmark] {
        self.world_landmarks.as_deref().unwrap_or(&self.landmarks)
    }
}

/// Checks that frame times are non-decreasing.
pub fn is_time_ordered(frames: &[Frame]) -> bool {
    frames.windows(2).all(|w| w[0].time <= w[1].time)
}

//! Trajectory trails of tracked landmarks.

use nalgebra::{Point3, Vector3};

use crate::landmark::{Frame, LandmarkIdx};

use super::BodyView;

/// Past positions of one landmark, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Trail {
    pub landmark: LandmarkIdx,
    pub points: Vec<Point3<f32>>,
}

impl Trail {
    /// Builds the trail of `landmark` over the last `capacity` frames of `history`.
    ///
    /// Every historical position is expressed relative to `center`, the bounding box center of
    /// the frame currently being displayed, so the trail does not jump around with the per-frame
    /// re-centering of the skeleton. Once the look-back window is full, only every other sample is
    /// kept; the newest sample is always included.
    ///
    /// Frames that cannot be reconstructed are skipped.
    pub fn build(
        landmark: LandmarkIdx,
        history: &[Frame],
        center: Vector3<f32>,
        capacity: usize,
    ) -> Self {
        let window = &history[history.len().saturating_sub(capacity)..];
        let step = if capacity > 1 && window.len() >= capacity {
            2
        } else {
            1
        };

        let mut points = window
            .iter()
            .rev()
            .step_by(step)
            .filter_map(|frame| {
                let view = BodyView::new(frame.landmarks_3d()).ok()?;
                let pos = view.get(landmark)?;
                Some(Point3::from(pos.coords - center))
            })
            .collect::<Vec<_>>();
        points.reverse();

        Self { landmark, points }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

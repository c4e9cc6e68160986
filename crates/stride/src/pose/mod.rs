//! Pose landmark inference.
//!
//! The network is a MediaPipe-style pose landmarker operating on a single, already cropped
//! subject. It produces 39 screen-space landmarks (33 pose landmarks followed by 6 auxiliary
//! ones), a pose presence flag, and 39 world-space landmarks in meters.

mod engine;
mod model;

use stride_body::{Frame, Landmark, NUM_LANDMARKS};

use crate::{
    image::{Color, Image},
    nn::Tensor,
};

pub use engine::{EngineOptions, EngineState, InferenceEngine};
pub use model::ModelSource;

/// Number of landmarks the network outputs, including auxiliary ones.
const NETWORK_LANDMARKS: usize = NUM_LANDMARKS + 6;

/// Outputs requested from the network: screen landmarks, pose flag, world landmarks.
pub(crate) const OUTPUT_SELECTION: [usize; 3] = [0, 1, 4];

/// Landmarks of the single tracked subject in one video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseResult {
    presence: f32,
    landmarks: Vec<Landmark>,
    world_landmarks: Vec<Landmark>,
}

impl PoseResult {
    /// Probability that a subject is in view.
    #[inline]
    pub fn presence(&self) -> f32 {
        self.presence
    }

    /// The 33 canonical landmarks in normalized image coordinates.
    ///
    /// X and Y are in range 0..1 relative to the image size, with Y pointing down. Z uses roughly
    /// the same scale as X.
    #[inline]
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    /// The 33 canonical landmarks in meters, relative to the hip center.
    #[inline]
    pub fn world_landmarks(&self) -> &[Landmark] {
        &self.world_landmarks
    }

    /// Converts the result into a timestamped [`Frame`].
    pub fn to_frame(&self, time: f64) -> Frame {
        Frame::new(time, self.landmarks.clone()).with_world_landmarks(self.world_landmarks.clone())
    }
}

/// Layout of the network's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputLayout {
    /// `[1, 3, H, W]`
    Nchw { width: usize, height: usize },
    /// `[1, H, W, 3]`
    Nhwc { width: usize, height: usize },
}

impl InputLayout {
    fn from_shape(shape: &[usize]) -> anyhow::Result<Self> {
        match *shape {
            [1, 3, height, width] => Ok(Self::Nchw { width, height }),
            [1, height, width, 3] => Ok(Self::Nhwc { width, height }),
            _ => anyhow::bail!("unsupported pose network input shape {:?}", shape),
        }
    }

    fn size(self) -> (usize, usize) {
        match self {
            Self::Nchw { width, height } | Self::Nhwc { width, height } => (width, height),
        }
    }
}

fn channel(color: Color, c: usize) -> f32 {
    color[c] as f32 / 255.0
}

/// Samples `image` into the network's input tensor, mapping colors to 0..1.
///
/// If the image's aspect ratio does not match the network's, the image is stretched.
pub(crate) fn preprocess(image: &Image, input_shape: &[usize]) -> anyhow::Result<Tensor> {
    if image.is_empty() {
        anyhow::bail!("cannot run pose model on an empty {} image", image.resolution());
    }
    let layout = InputLayout::from_shape(input_shape)?;
    let (w, h) = layout.size();
    let sample = |x: usize, y: usize| image.sample(x as f32 / w as f32, y as f32 / h as f32);

    Ok(match layout {
        InputLayout::Nchw { .. } => {
            Tensor::from_shape_fn([1, 3, h, w], |[_, c, y, x]| channel(sample(x, y), c))
        }
        InputLayout::Nhwc { .. } => {
            Tensor::from_shape_fn([1, h, w, 3], |[_, y, x, c]| channel(sample(x, y), c))
        }
    })
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decodes the selected network outputs into a [`PoseResult`].
pub(crate) fn decode(outputs: &[Tensor], input_shape: &[usize]) -> anyhow::Result<PoseResult> {
    let [screen, flag, world] = outputs else {
        anyhow::bail!("expected 3 pose network outputs, got {}", outputs.len());
    };
    if screen.as_slice().len() != NETWORK_LANDMARKS * 5 {
        anyhow::bail!("unexpected screen landmark output shape {:?}", screen.shape());
    }
    if world.as_slice().len() != NETWORK_LANDMARKS * 3 {
        anyhow::bail!("unexpected world landmark output shape {:?}", world.shape());
    }
    let Some(&presence) = flag.as_slice().first() else {
        anyhow::bail!("empty pose flag output");
    };

    let (w, h) = InputLayout::from_shape(input_shape)?.size();
    let (w, h) = (w as f32, h as f32);

    let landmarks = screen
        .as_slice()
        .chunks_exact(5)
        .take(NUM_LANDMARKS)
        .map(|c| Landmark::new([c[0] / w, c[1] / h, c[2] / w]).with_visibility(sigmoid(c[3])))
        .collect();
    let world_landmarks = world
        .as_slice()
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|c| Landmark::new([c[0], c[1], c[2]]))
        .collect();

    Ok(PoseResult {
        presence,
        landmarks,
        world_landmarks,
    })
}

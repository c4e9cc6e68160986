//! Real-time pose capture and phase streaming for timed mobility assessments.
//!
//! The pipeline runs camera frames through the [`pose`] inference engine, draws a 2D [`overlay`]
//! onto the source image, forwards landmarks to a remote phase-segmentation service via the
//! [`stream`] client, and feeds the [`playback`] controller, which reconstructs a 3D skeleton with
//! [`stride_body`]. [`session`] ties these together for one bounded test run.
//!
//! # 3D Coordinates
//!
//! Reconstructed skeletons use X pointing right, Y pointing up and Z pointing towards the viewer.
//! Pose networks output world landmarks with Y pointing *down*; those are flipped during
//! reconstruction.
//!
//! # Environment Variables
//!
//! * `STRIDE_BACKEND`: Forces the initial inference backend. Allowed values are `accelerated`
//!   (GPU, via [wonnx]) and `scalar` (CPU, via [tract]). If unset, the accelerated backend is
//!   tried first, falling back to the scalar one.
//! * `STRIDE_MODEL_URL`: Overrides the location pose model weights are fetched from.
//!
//! [wonnx]: https://github.com/webonnx/wonnx
//! [tract]: https://github.com/sonos/tract

use log::LevelFilter;

pub mod image;
pub mod nn;
pub mod overlay;
pub mod playback;
pub mod pose;
pub mod session;
pub mod stream;
pub mod timer;

pub use stride_body as body;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("stride_body"), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and stride log at *debug* level, `wgpu` always logs at *warn* level. Both
/// can be overridden with `RUST_LOG`.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}

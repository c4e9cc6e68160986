//! Body model for pose-based mobility assessments.
//!
//! This crate is deliberately free of any inference, networking or rendering dependency. It
//! provides:
//!
//! - [`landmark`]: the canonical 33-point body landmark topology and timestamped [`Frame`]s.
//! - [`phase`]: the assessment [`Phase`]s and [`PhaseTransition`]s.
//! - [`skeleton`]: per-frame 3D skeleton reconstruction (bones, joint angles, trails, center of
//!   mass, ground plane) as plain geometry.
//!
//! [`Frame`]: landmark::Frame
//! [`Phase`]: phase::Phase
//! [`PhaseTransition`]: phase::PhaseTransition

pub mod landmark;
pub mod phase;
pub mod skeleton;

pub use landmark::{Frame, Landmark, LandmarkIdx, NUM_LANDMARKS};
pub use phase::{Phase, PhaseTransition};
pub use skeleton::{Reconstructor, Skeleton, SkeletonOptions};

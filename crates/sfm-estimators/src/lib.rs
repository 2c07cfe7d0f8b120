#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Absolute camera pose solvers from 2D-3D correspondences.
pub mod absolute_pose;

/// Manhattan-world coordinate frame estimation from vanishing points.
pub mod coordinate_frame;

/// The contract shared by all minimal solvers and the consensus engine.
pub mod estimator;

/// Per-thread pseudo-random state with explicit reseeding.
pub mod random;

/// The generic sample-consensus engine.
pub mod ransac;

/// Relative pose (essential matrix) solvers from 2D-2D correspondences.
pub mod relative_pose;

pub use estimator::Estimator;
pub use random::set_prng_seed;
pub use ransac::{LoRansac, Ransac, RansacOptions, RansacReport, Support};

#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Null-space extraction for homogeneous linear systems.
pub mod nullspace;

/// Real-root extraction for univariate polynomials.
pub mod roots;

/// Rigid (orthogonal Procrustes) alignment of 3D point sets.
pub mod rigid;

//! Geometry backends for planar tracking.
//!
//! - [`RansacHomography`]: seeded, adaptive RANSAC over 4-point samples with a
//!   least-squares refit on the consensus set.
//! - [`PlanarPoseSolver`]: camera pose of a planar target from its image
//!   projections and calibrated intrinsics.
//!
//! Both sit behind small traits ([`HomographyEstimator`], [`PoseSolver`]) so
//! the tracker can swap implementations.

mod pose;
mod ransac;

pub use pose::{PlanarPoseSolver, Pose, PoseError, PoseSolver};
pub use ransac::{HomographyEstimator, RansacHomography, RansacParams, RobustFit};

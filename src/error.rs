//! Error types for neighbor finding and histogram accumulation.

use thiserror::Error;

/// Errors raised by box construction, neighbor queries and histograms.
///
/// Every error is returned from the constructor or compute call that
/// detected it; nothing is retried internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The lattice vectors do not span a box with non-zero volume (or area in 2D).
    #[error("Box lattice is degenerate: {0}")]
    InvalidBox(String),

    /// The cutoff is at least half the distance between two lattice planes
    /// along a periodic axis, so one search could see two images of a point.
    #[error(
        "Cutoff {cutoff} is too large for this box: axis {axis} has nearest plane distance \
         {plane_distance}, cutoff must be less than half of it"
    )]
    CutoffTooLarge {
        cutoff: f64,
        plane_distance: f64,
        axis: usize,
    },

    /// The cutoff is not a positive, finite number.
    #[error("Cutoff must be positive and finite, got {0}")]
    InvalidCutoff(f64),

    /// A constructor or compute argument is outside its valid range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A histogram axis could not be built from the given parameters.
    #[error("Invalid axis: {0}")]
    InvalidAxis(String),

    /// The number of values passed to a histogram does not match its dimensionality.
    #[error("This histogram is {expected}-dimensional, but {actual} values were provided")]
    DimensionMismatch { expected: usize, actual: usize },

    /// At least one point is required.
    #[error("At least one point is required")]
    EmptyPoints,

    /// Two arrays that must be the same length are not.
    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

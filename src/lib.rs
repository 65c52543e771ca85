//! # simlocality
//!
//! `simlocality` finds neighbors of particles in periodic simulation boxes and
//! accumulates histograms over them in parallel. It is meant as the locality
//! layer of particle-simulation analysis codes.
//!
//! ## Features
//!
//! - **Periodic boxes**: Triclinic 2D and 3D boxes with per-axis periodicity, minimum-image wrapping and fractional coordinates.
//! - **AABB Tree**: A flat, stackless bounding-volume hierarchy queried once per periodic image.
//! - **Neighbor Queries**: Resumable fixed-radius and k-nearest cursors per point, plus a parallel builder for whole neighbor lists.
//! - **Histograms**: N-dimensional histograms with regular or irregular axes and per-thread accumulation merged in parallel.
//! - **Density**: Radial distribution function and local density built on the above.
//!
//! ## Main Interface
//!
//! Most users start with [`compute_neighbor_list`] or build an [`AabbQuery`]
//! and call [`AabbQuery::query_ball`] / [`AabbQuery::query`] for single points.
//! Parallelism uses the global rayon pool; run inside `ThreadPool::install`
//! to control the thread count.

mod aabb_tree;
mod bounds;
pub mod config;
mod density;
mod error;
mod histogram;
mod images;
mod neighbor_compute;
mod neighbor_list;
mod query;
mod simbox;

pub use aabb_tree::AabbTree;
pub use bounds::Aabb;
pub use bounds::AabbSphere;
pub use density::LocalDensity;
pub use density::Rdf;
pub use error::Error;
pub use error::Result;
pub use histogram::Axis;
pub use histogram::Histogram;
pub use histogram::IrregularAxis;
pub use histogram::RegularAxis;
pub use histogram::ThreadLocalHistogram;
pub use images::get_images;
pub use images::validate_cutoff;
pub use images::ImageCache;
pub use images::ImageList;
pub use neighbor_compute::loop_over_neighbors;
pub use neighbor_compute::loop_over_neighbors_per_point;
pub use neighbor_list::NeighborBond;
pub use neighbor_list::NeighborList;
pub use neighbor_list::NeighborPoint;
pub use query::compute_neighbor_list;
pub use query::AabbQuery;
pub use query::BallIterator;
pub use query::KnnIterator;
pub use query::PerPointIterator;
pub use query::QueryArgs;
pub use query::QueryMode;
pub use simbox::SimBox;

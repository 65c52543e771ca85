//! Density analyses built on the neighbor loops: the radial distribution
//! function and the local density around each reference point.

use crate::error::{Error, Result};
use crate::histogram::{Axis, Histogram, RegularAxis, ThreadLocalHistogram};
use crate::neighbor_compute::loop_over_neighbors_per_point;
use crate::neighbor_list::NeighborList;
use crate::query::{AabbQuery, QueryArgs};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info_span};

/// Radial distribution function g(r), accumulated over any number of frames.
///
/// Every bond with `r_min < d < r_max` is binned into a thread-local
/// histogram. The per-frame counts are normalized by the ideal-gas count in
/// each spherical (or, in 2D, annular) shell the first time a result is
/// requested after an accumulation.
#[derive(Debug)]
pub struct Rdf {
    r_min: f64,
    r_max: f64,
    histogram: Histogram,
    locals: ThreadLocalHistogram,
    shell_volumes_2d: Vec<f64>,
    shell_volumes_3d: Vec<f64>,
    frame_counter: usize,
    n_points: usize,
    n_ref_points: usize,
    box_volume: f64,
    is_2d: bool,
    needs_reduce: bool,
    rdf: Vec<f64>,
    n_r: Vec<f64>,
}

impl Rdf {
    pub fn new(bins: usize, r_max: f64, r_min: f64) -> Result<Self> {
        if bins == 0 {
            return Err(Error::InvalidArgument("RDF requires a positive number of bins".into()));
        }
        if !(r_max > 0.0) {
            return Err(Error::InvalidArgument("RDF requires r_max to be positive".into()));
        }
        if !(r_min >= 0.0) || r_max <= r_min {
            return Err(Error::InvalidArgument(format!(
                "RDF requires 0 <= r_min < r_max, got r_min = {r_min}, r_max = {r_max}"
            )));
        }

        let axis = RegularAxis::new(bins, r_min, r_max)?;
        let edges = axis.bin_boundaries();
        let shell_volumes_2d = edges.windows(2).map(|w| PI * (w[1] * w[1] - w[0] * w[0])).collect();
        let shell_volumes_3d = edges
            .windows(2)
            .map(|w| 4.0 / 3.0 * PI * (w[1].powi(3) - w[0].powi(3)))
            .collect();

        let histogram = Histogram::new(vec![Arc::new(axis) as Arc<dyn Axis>])?;
        let locals = ThreadLocalHistogram::new(&histogram);
        Ok(Self {
            r_min,
            r_max,
            histogram,
            locals,
            shell_volumes_2d,
            shell_volumes_3d,
            frame_counter: 0,
            n_points: 0,
            n_ref_points: 0,
            box_volume: 0.0,
            is_2d: false,
            needs_reduce: true,
            rdf: vec![0.0; bins],
            n_r: vec![0.0; bins],
        })
    }

    /// Add one frame: bonds between `ref_points` and the points of `query`.
    ///
    /// On error the accumulated state is unspecified; call [`reset`](Self::reset)
    /// before reusing the object.
    pub fn accumulate(
        &mut self,
        query: &AabbQuery,
        ref_points: &[[f64; 3]],
        args: &QueryArgs,
        nlist: Option<&NeighborList>,
    ) -> Result<()> {
        let _span = info_span!("Rdf::accumulate", frame = self.frame_counter, n_ref = ref_points.len()).entered();
        if ref_points.is_empty() {
            return Err(Error::EmptyPoints);
        }

        let (r_min, r_max) = (self.r_min, self.r_max);
        let axis = Arc::clone(&self.histogram.axes()[0]);
        let locals = &self.locals;
        loop_over_neighbors_per_point(query, ref_points, args, nlist, |_, bonds| {
            let mut local = locals.local();
            for bond in bonds {
                if bond.distance < r_max && bond.distance > r_min {
                    local.increment(axis.bin(bond.distance));
                }
            }
        })?;

        self.frame_counter += 1;
        self.n_points = query.num_points();
        self.n_ref_points = ref_points.len();
        self.box_volume = query.sim_box().volume();
        self.is_2d = query.sim_box().is_2d();
        self.needs_reduce = true;
        Ok(())
    }

    fn reduce(&mut self) -> Result<()> {
        if !self.needs_reduce {
            return Ok(());
        }
        self.histogram.reset();
        if self.frame_counter == 0 {
            self.rdf.fill(0.0);
            self.n_r.fill(0.0);
            self.needs_reduce = false;
            return Ok(());
        }

        let np = self.n_points as f64;
        let frames = self.frame_counter as f64;
        let ref_density = self.n_ref_points as f64 / self.box_volume;
        let prefactor = 1.0 / (np * ref_density * frames);
        let volumes = if self.is_2d { &self.shell_volumes_2d } else { &self.shell_volumes_3d };

        self.rdf = self
            .histogram
            .reduce_over_threads_per_bin(&mut self.locals, |i, count| count as f64 * prefactor / volumes[i])?;

        // Cumulative count is sequential, so it runs after the parallel reduction
        let prefactor = 1.0 / (np * frames);
        let mut total = 0.0;
        for (n_r, &count) in self.n_r.iter_mut().zip(self.histogram.bin_counts()) {
            total += count as f64 * prefactor;
            *n_r = total;
        }
        debug!(frames = self.frame_counter, "reduced RDF");
        self.needs_reduce = false;
        Ok(())
    }

    /// g(r) for every bin.
    pub fn rdf(&mut self) -> Result<&[f64]> {
        self.reduce()?;
        Ok(&self.rdf)
    }

    /// Cumulative neighbor count N(r): the average number of points closer
    /// than the upper edge of each bin.
    pub fn n_r(&mut self) -> Result<&[f64]> {
        self.reduce()?;
        Ok(&self.n_r)
    }

    /// Raw bond counts of every bin.
    pub fn bin_counts(&mut self) -> Result<&[u64]> {
        self.reduce()?;
        Ok(self.histogram.bin_counts())
    }

    pub fn bin_centers(&self) -> Vec<f64> {
        self.histogram.axes()[0].bin_centers()
    }

    pub fn bin_edges(&self) -> &[f64] {
        self.histogram.axes()[0].bin_boundaries()
    }

    pub fn frame_count(&self) -> usize {
        self.frame_counter
    }

    /// Clear all accumulated frames.
    pub fn reset(&mut self) {
        self.locals.reset();
        self.histogram.reset();
        self.frame_counter = 0;
        self.needs_reduce = true;
    }
}

/// Number of neighbors and density of the surrounding particles within
/// `r_max` of each reference point.
///
/// Particles are treated as spheres of the given `diameter` and `volume`.
/// A neighbor whose center lies within `diameter / 2` of the sampling sphere
/// surface only counts partially, which smooths the distributions when many
/// points are averaged.
#[derive(Clone, Debug)]
pub struct LocalDensity {
    r_max: f64,
    volume: f64,
    diameter: f64,
    density: Vec<f64>,
    num_neighbors: Vec<f64>,
}

impl LocalDensity {
    pub fn new(r_max: f64, volume: f64, diameter: f64) -> Result<Self> {
        if !(r_max > 0.0) || !r_max.is_finite() {
            return Err(Error::InvalidArgument(format!("r_max must be positive, got {r_max}")));
        }
        if !(diameter > 0.0) || !(volume >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "particle diameter must be positive and volume non-negative, got {diameter} and {volume}"
            )));
        }
        Ok(Self {
            r_max,
            volume,
            diameter,
            density: Vec::new(),
            num_neighbors: Vec::new(),
        })
    }

    /// Weight of one neighbor at distance `d`.
    fn neighbor_weight(&self, d: f64) -> f64 {
        let radius = self.diameter / 2.0;
        if d < self.r_max - radius {
            1.0
        } else {
            1.0 + (self.r_max - (d + radius)) / self.diameter
        }
    }

    pub fn compute(
        &mut self,
        query: &AabbQuery,
        ref_points: &[[f64; 3]],
        args: &QueryArgs,
        nlist: Option<&NeighborList>,
    ) -> Result<()> {
        let _span = info_span!("LocalDensity::compute", n_ref = ref_points.len()).entered();
        let sampling_volume = if query.sim_box().is_2d() {
            PI * self.r_max * self.r_max
        } else {
            4.0 / 3.0 * PI * self.r_max.powi(3)
        };

        let n = ref_points.len();
        // Each slot is written by exactly one task, as f64 bits
        let counts: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();
        loop_over_neighbors_per_point(query, ref_points, args, nlist, |i, bonds| {
            let count: f64 = bonds.iter().map(|b| self.neighbor_weight(b.distance)).sum();
            counts[i].store(count.to_bits(), Ordering::Relaxed);
        })?;

        self.num_neighbors = counts.into_iter().map(|c| f64::from_bits(c.into_inner())).collect();
        self.density = self
            .num_neighbors
            .iter()
            .map(|&count| self.volume * count / sampling_volume)
            .collect();
        Ok(())
    }

    /// Density around each reference point of the last compute.
    pub fn density(&self) -> &[f64] {
        &self.density
    }

    /// Fractional neighbor count of each reference point of the last compute.
    pub fn num_neighbors(&self) -> &[f64] {
        &self.num_neighbors
    }

    pub fn r_max(&self) -> f64 {
        self.r_max
    }
}

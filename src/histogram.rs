//! N-dimensional histograms with pluggable axis binning and a thread-local
//! accumulation protocol for rayon workers.
//!
//! The usual pattern inside a parallel compute is:
//!
//! 1. build a [`Histogram`] with the required axes,
//! 2. wrap it in a [`ThreadLocalHistogram`] and call
//!    [`accumulate`](ThreadLocalHistogram::accumulate) from any worker,
//! 3. after the parallel loop, merge with
//!    [`Histogram::reduce_over_threads`] or
//!    [`Histogram::reduce_over_threads_per_bin`].

use crate::error::{Error, Result};
use rayon::prelude::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info_span;

/// One dimension of a histogram: maps a value to a bin index.
pub trait Axis: Send + Sync + std::fmt::Debug {
    /// Number of bins.
    fn size(&self) -> usize;

    /// Bin containing `value`. Always in `[0, size())`: values at or above
    /// the last boundary fall in the last bin, values below the first (and
    /// NaN) fall in bin 0.
    fn bin(&self, value: f64) -> usize;

    /// The `size() + 1` bin edges.
    fn bin_boundaries(&self) -> &[f64];

    /// Midpoints between consecutive edges.
    fn bin_centers(&self) -> Vec<f64> {
        self.bin_boundaries().windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
    }
}

/// Linearly spaced bins between `min` and `max`, binned in constant time.
#[derive(Clone, Debug)]
pub struct RegularAxis {
    nbins: usize,
    min: f64,
    max: f64,
    dr_inv: f64,
    boundaries: Vec<f64>,
}

impl RegularAxis {
    pub fn new(nbins: usize, min: f64, max: f64) -> Result<Self> {
        if nbins == 0 {
            return Err(Error::InvalidAxis("number of bins must be greater than zero".into()));
        }
        if !min.is_finite() || !max.is_finite() {
            return Err(Error::InvalidAxis("min and max must be finite".into()));
        }
        if max <= min {
            return Err(Error::InvalidAxis(format!("max ({max}) must be greater than min ({min})")));
        }
        let dr = (max - min) / nbins as f64;
        let mut boundaries: Vec<f64> = (0..=nbins).map(|i| min + i as f64 * dr).collect();
        // Avoid accumulated rounding on the last edge
        boundaries[nbins] = max;
        Ok(Self {
            nbins,
            min,
            max,
            dr_inv: 1.0 / dr,
            boundaries,
        })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl Axis for RegularAxis {
    fn size(&self) -> usize {
        self.nbins
    }

    #[inline]
    fn bin(&self, value: f64) -> usize {
        let val = (value - self.min) * self.dr_inv;
        if !(val > 0.0) {
            return 0;
        }
        // Truncating cast saturates for huge values; values just below max can
        // also round up to nbins.
        (val as usize).min(self.nbins - 1)
    }

    fn bin_boundaries(&self) -> &[f64] {
        &self.boundaries
    }
}

/// Bins with arbitrary, strictly increasing edges, binned by binary search.
#[derive(Clone, Debug)]
pub struct IrregularAxis {
    boundaries: Vec<f64>,
}

impl IrregularAxis {
    pub fn new(boundaries: Vec<f64>) -> Result<Self> {
        if boundaries.len() < 2 {
            return Err(Error::InvalidAxis("a minimum of two bin edges is required".into()));
        }
        if boundaries.iter().any(|e| !e.is_finite()) {
            return Err(Error::InvalidAxis("bin edges must be finite".into()));
        }
        if boundaries.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::InvalidAxis("bin edges must be strictly increasing".into()));
        }
        Ok(Self { boundaries })
    }
}

impl Axis for IrregularAxis {
    fn size(&self) -> usize {
        self.boundaries.len() - 1
    }

    fn bin(&self, value: f64) -> usize {
        // Number of edges at or below the value; NaN compares false everywhere
        let above = self.boundaries.partition_point(|&e| e <= value);
        above.saturating_sub(1).min(self.size() - 1)
    }

    fn bin_boundaries(&self) -> &[f64] {
        &self.boundaries
    }
}

/// Counts over the product of a list of axes, stored row-major (last axis fastest).
#[derive(Clone, Debug)]
pub struct Histogram {
    axes: Vec<Arc<dyn Axis>>,
    shape: Vec<usize>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn new(axes: Vec<Arc<dyn Axis>>) -> Result<Self> {
        if axes.is_empty() {
            return Err(Error::InvalidArgument("a histogram needs at least one axis".into()));
        }
        let shape: Vec<usize> = axes.iter().map(|a| a.size()).collect();
        let total = shape.iter().product();
        Ok(Self {
            axes,
            shape,
            counts: vec![0; total],
        })
    }

    /// A zeroed histogram sharing this one's axes.
    pub fn empty_like(&self) -> Self {
        Self {
            axes: self.axes.clone(),
            shape: self.shape.clone(),
            counts: vec![0; self.counts.len()],
        }
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn axes(&self) -> &[Arc<dyn Axis>] {
        &self.axes
    }

    /// Total number of bins, the product of all axis sizes.
    pub fn num_bins(&self) -> usize {
        self.counts.len()
    }

    /// Flat index of the bin containing `values`, one value per axis.
    pub fn bin(&self, values: &[f64]) -> Result<usize> {
        if values.len() != self.axes.len() {
            return Err(Error::DimensionMismatch {
                expected: self.axes.len(),
                actual: values.len(),
            });
        }
        let mut index = 0;
        for ((axis, &size), &value) in self.axes.iter().zip(&self.shape).zip(values) {
            index = index * size + axis.bin(value);
        }
        Ok(index)
    }

    /// Bin `values` and increment that bin.
    pub fn accumulate(&mut self, values: &[f64]) -> Result<()> {
        let index = self.bin(values)?;
        self.counts[index] += 1;
        Ok(())
    }

    /// Increment the bin at flat `index`, as returned by [`bin`](Self::bin)
    /// or, for a single axis, by [`Axis::bin`].
    ///
    /// # Panics
    /// If `index` is not below [`num_bins`](Self::num_bins).
    pub fn increment(&mut self, index: usize) {
        self.counts[index] += 1;
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
    }

    pub fn bin_counts(&self) -> &[u64] {
        &self.counts
    }

    /// Bin edges of every axis.
    pub fn bin_boundaries(&self) -> Vec<Vec<f64>> {
        self.axes.iter().map(|a| a.bin_boundaries().to_vec()).collect()
    }

    /// Bin centers of every axis.
    pub fn bin_centers(&self) -> Vec<Vec<f64>> {
        self.axes.iter().map(|a| a.bin_centers()).collect()
    }

    /// Add the counts of every thread-local copy into this histogram.
    pub fn reduce_over_threads(&mut self, locals: &mut ThreadLocalHistogram) -> Result<()> {
        self.reduce_over_threads_per_bin(locals, |_, _| ()).map(|_| ())
    }

    /// Add the counts of every thread-local copy into this histogram, then
    /// call `f(bin, count)` on each bin once its total is final.
    ///
    /// The merge runs in parallel over bin index, so each bin is written by
    /// exactly one task. Returns the per-bin results of `f` in bin order.
    pub fn reduce_over_threads_per_bin<T, F>(&mut self, locals: &mut ThreadLocalHistogram, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize, u64) -> T + Sync,
    {
        let _span = info_span!(
            "Histogram::reduce_over_threads",
            n_bins = self.counts.len(),
            n_locals = locals.num_slots()
        )
        .entered();

        let locals: Vec<&Histogram> = locals.histograms_mut().map(|h| &*h).collect();
        if let Some(bad) = locals.iter().find(|h| h.shape != self.shape) {
            return Err(Error::LengthMismatch {
                expected: self.counts.len(),
                actual: bad.counts.len(),
            });
        }

        Ok(self
            .counts
            .par_iter_mut()
            .enumerate()
            .map(|(i, count)| {
                for local in &locals {
                    *count += local.counts[i];
                }
                f(i, *count)
            })
            .collect())
    }
}

impl std::ops::Index<usize> for Histogram {
    type Output = u64;

    fn index(&self, i: usize) -> &u64 {
        &self.counts[i]
    }
}

/// One private [`Histogram`] per rayon worker, all sharing the same axes.
///
/// `accumulate` routes to the calling worker's copy, so no two workers ever
/// touch the same counts. Each slot sits behind a `Mutex` that only its owner
/// locks during the parallel phase; the reduction takes `&mut self` and reads
/// the copies without locking.
///
/// Every `accumulate` call takes the slot's lock once. The lock is
/// uncontended, but hot loops should hold [`local`](Self::local) across a
/// batch of values instead of locking per value.
#[derive(Debug)]
pub struct ThreadLocalHistogram {
    locals: Vec<Mutex<Histogram>>,
}

impl ThreadLocalHistogram {
    /// One slot per thread of the current rayon pool, plus one for callers
    /// outside any pool.
    pub fn new(template: &Histogram) -> Self {
        let slots = rayon::current_num_threads() + 1;
        Self {
            locals: (0..slots).map(|_| Mutex::new(template.empty_like())).collect(),
        }
    }

    pub fn num_slots(&self) -> usize {
        self.locals.len()
    }

    fn slot(&self) -> usize {
        let outside = self.locals.len() - 1;
        match rayon::current_thread_index() {
            // Threads of a larger foreign pool share slots; the mutex keeps that safe
            Some(i) => i % outside.max(1),
            None => outside,
        }
    }

    /// The calling worker's histogram.
    pub fn local(&self) -> MutexGuard<'_, Histogram> {
        self.locals[self.slot()].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bin `values` into the calling worker's histogram.
    pub fn accumulate(&self, values: &[f64]) -> Result<()> {
        self.local().accumulate(values)
    }

    /// Zero every copy.
    pub fn reset(&mut self) {
        for h in self.histograms_mut() {
            h.reset();
        }
    }

    /// Direct access to every copy, for reductions and inspection.
    pub fn histograms_mut(&mut self) -> impl Iterator<Item = &mut Histogram> + '_ {
        self.locals
            .iter_mut()
            .map(|m| m.get_mut().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn regular(nbins: usize, min: f64, max: f64) -> Arc<dyn Axis> {
        Arc::new(RegularAxis::new(nbins, min, max).unwrap())
    }

    #[test]
    fn test_regular_axis_edges() {
        let axis = RegularAxis::new(5, 0.0, 5.0).unwrap();
        assert_eq!(axis.bin(0.0), 0);
        assert_eq!(axis.bin(4.999), 4);
        assert_eq!(axis.bin(5.0), 4);
        assert_eq!(axis.bin(1e300), 4);
        assert_eq!(axis.bin(-1.0), 0);
        assert_eq!(axis.bin(f64::NAN), 0);
        assert_eq!(axis.bin_boundaries(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let centers = axis.bin_centers();
        assert_relative_eq!(centers[0], 0.5);
        assert_relative_eq!(centers[4], 4.5);
    }

    #[test]
    fn test_regular_axis_monotonic() {
        let axis = RegularAxis::new(17, -2.0, 3.0).unwrap();
        let mut last = 0;
        for n in 0..1000 {
            let v = -3.0 + n as f64 * 0.007;
            let b = axis.bin(v);
            assert!(b >= last);
            assert!(b < 17);
            last = b;
        }
    }

    #[test]
    fn test_invalid_axes() {
        assert!(matches!(RegularAxis::new(0, 0.0, 1.0), Err(Error::InvalidAxis(_))));
        assert!(matches!(RegularAxis::new(3, 1.0, 1.0), Err(Error::InvalidAxis(_))));
        assert!(matches!(RegularAxis::new(3, 0.0, f64::INFINITY), Err(Error::InvalidAxis(_))));
        assert!(IrregularAxis::new(vec![1.0]).is_err());
        assert!(IrregularAxis::new(vec![0.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn test_irregular_axis() {
        let axis = IrregularAxis::new(vec![0.0, 1.0, 10.0, 100.0]).unwrap();
        assert_eq!(axis.size(), 3);
        assert_eq!(axis.bin(-5.0), 0);
        assert_eq!(axis.bin(0.0), 0);
        assert_eq!(axis.bin(1.0), 1);
        assert_eq!(axis.bin(9.9), 1);
        assert_eq!(axis.bin(10.0), 2);
        assert_eq!(axis.bin(100.0), 2);
        assert_eq!(axis.bin(f64::NAN), 0);
        assert_eq!(axis.bin_centers(), vec![0.5, 5.5, 55.0]);
    }

    #[test]
    fn test_histogram_flat_index() {
        let h = Histogram::new(vec![regular(3, 0.0, 3.0), regular(4, 0.0, 4.0)]).unwrap();
        assert_eq!(h.shape(), &[3, 4]);
        assert_eq!(h.num_bins(), 12);
        assert_eq!(h.bin(&[0.5, 0.5]).unwrap(), 0);
        assert_eq!(h.bin(&[0.5, 3.5]).unwrap(), 3);
        assert_eq!(h.bin(&[2.5, 1.5]).unwrap(), 9);
        assert!(matches!(
            h.bin(&[1.0]),
            Err(Error::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_accumulate_and_reset() {
        let mut h = Histogram::new(vec![regular(5, 0.0, 5.0)]).unwrap();
        for v in [0.1, 0.2, 3.3, 5.0, 7.0] {
            h.accumulate(&[v]).unwrap();
        }
        assert_eq!(h.bin_counts(), &[2, 0, 0, 1, 2]);
        assert!(h.accumulate(&[1.0, 2.0]).is_err());
        assert_eq!(h[4], 2);
        h.reset();
        assert!(h.bin_counts().iter().all(|&c| c == 0));
        assert_eq!(h.bin_boundaries().len(), 1);
        assert_eq!(h.bin_centers()[0].len(), 5);
    }

    #[test]
    fn test_reduce_equals_serial_accumulation() {
        let template = Histogram::new(vec![regular(4, 0.0, 4.0), regular(2, 0.0, 2.0)]).unwrap();
        let mut locals = ThreadLocalHistogram::new(&template);
        let n_copies = locals.num_slots();
        for h in locals.histograms_mut() {
            for x in 0..4 {
                for y in 0..2 {
                    h.accumulate(&[x as f64 + 0.5, y as f64 + 0.5]).unwrap();
                }
            }
        }
        let mut merged = template.empty_like();
        merged.reduce_over_threads(&mut locals).unwrap();

        let mut serial = template.empty_like();
        for _ in 0..n_copies {
            for x in 0..4 {
                for y in 0..2 {
                    serial.accumulate(&[x as f64 + 0.5, y as f64 + 0.5]).unwrap();
                }
            }
        }
        assert_eq!(merged.bin_counts(), serial.bin_counts());
        assert!(merged.bin_counts().iter().all(|&c| c == n_copies as u64));
    }

    #[test]
    fn test_parallel_accumulate_and_per_bin_finish() {
        let template = Histogram::new(vec![regular(10, 0.0, 10.0)]).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let mut locals = pool.install(|| ThreadLocalHistogram::new(&template));
        assert_eq!(locals.num_slots(), 5);

        pool.install(|| {
            (0..10_000).into_par_iter().for_each(|n| {
                locals.accumulate(&[(n % 10) as f64 + 0.5]).unwrap();
            });
        });

        let mut merged = template.empty_like();
        let halves = merged
            .reduce_over_threads_per_bin(&mut locals, |i, count| (i, count as f64 / 2.0))
            .unwrap();
        assert!(merged.bin_counts().iter().all(|&c| c == 1000));
        for (n, (i, half)) in halves.into_iter().enumerate() {
            assert_eq!(n, i);
            assert_relative_eq!(half, 500.0);
        }

        locals.reset();
        let mut again = template.empty_like();
        again.reduce_over_threads(&mut locals).unwrap();
        assert!(again.bin_counts().iter().all(|&c| c == 0));
    }

    #[test]
    fn test_reduce_rejects_other_shape() {
        let a = Histogram::new(vec![regular(3, 0.0, 1.0)]).unwrap();
        let b = Histogram::new(vec![regular(4, 0.0, 1.0)]).unwrap();
        let mut locals = ThreadLocalHistogram::new(&b);
        let mut merged = a.empty_like();
        assert!(merged.reduce_over_threads(&mut locals).is_err());
    }
}

//! Neighbor relationships produced by queries and the sorted list that stores them.

use crate::error::{Error, Result};

/// One result of a per-point query: index into the queried point set and its distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NeighborPoint {
    pub index: usize,
    pub distance: f64,
}

impl NeighborPoint {
    pub fn new(index: usize, distance: f64) -> Self {
        Self { index, distance }
    }
}

/// A neighbor relationship between reference point `ref_idx` (the point
/// whose neighbors were searched) and point `point_idx`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NeighborBond {
    pub ref_idx: usize,
    pub point_idx: usize,
    pub distance: f64,
    pub weight: f64,
}

impl NeighborBond {
    /// Bond with the default weight of 1.
    pub fn new(ref_idx: usize, point_idx: usize, distance: f64) -> Self {
        Self { ref_idx, point_idx, distance, weight: 1.0 }
    }
}

/// Bonds sorted by reference index, stored as parallel arrays.
///
/// All bonds of one reference point are contiguous, and
/// [`find_first_index`](Self::find_first_index) locates the start of that
/// range in constant time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborList {
    ref_indices: Vec<usize>,
    point_indices: Vec<usize>,
    distances: Vec<f64>,
    weights: Vec<f64>,
    /// `segments[i]..segments[i + 1]` are the bonds of reference point `i`.
    segments: Vec<usize>,
    num_ref_points: usize,
    num_points: usize,
}

impl NeighborList {
    /// An empty list for the given point-set sizes.
    pub fn empty(num_ref_points: usize, num_points: usize) -> Self {
        Self {
            segments: vec![0; num_ref_points + 1],
            num_ref_points,
            num_points,
            ..Self::default()
        }
    }

    /// Build a list from bonds already sorted by `ref_idx`.
    ///
    /// Fails if a bond references an index outside the point sets or the
    /// bonds are not sorted.
    pub fn from_sorted_bonds(
        bonds: &[NeighborBond],
        num_ref_points: usize,
        num_points: usize,
    ) -> Result<Self> {
        let mut prev = 0;
        for b in bonds {
            if b.ref_idx >= num_ref_points || b.point_idx >= num_points {
                return Err(Error::InvalidArgument(format!(
                    "bond ({}, {}) is outside point sets of size ({num_ref_points}, {num_points})",
                    b.ref_idx, b.point_idx
                )));
            }
            if b.ref_idx < prev {
                return Err(Error::InvalidArgument("bonds must be sorted by reference index".into()));
            }
            prev = b.ref_idx;
        }

        Ok(Self::from_sorted_parts(
            bonds.iter().map(|b| b.ref_idx).collect(),
            bonds.iter().map(|b| b.point_idx).collect(),
            bonds.iter().map(|b| b.distance).collect(),
            bonds.iter().map(|b| b.weight).collect(),
            num_ref_points,
            num_points,
        ))
    }

    /// Assemble a list from parallel arrays that are already sorted and in range.
    pub(crate) fn from_sorted_parts(
        ref_indices: Vec<usize>,
        point_indices: Vec<usize>,
        distances: Vec<f64>,
        weights: Vec<f64>,
        num_ref_points: usize,
        num_points: usize,
    ) -> Self {
        let segments = compute_segments(&ref_indices, num_ref_points);
        Self {
            ref_indices,
            point_indices,
            distances,
            weights,
            segments,
            num_ref_points,
            num_points,
        }
    }

    pub fn len(&self) -> usize {
        self.ref_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ref_indices.is_empty()
    }

    pub fn num_ref_points(&self) -> usize {
        self.num_ref_points
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn ref_indices(&self) -> &[usize] {
        &self.ref_indices
    }

    pub fn point_indices(&self) -> &[usize] {
        &self.point_indices
    }

    pub fn distances(&self) -> &[f64] {
        &self.distances
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Offsets of the first bond of every reference point, plus the total bond count.
    pub fn segments(&self) -> &[usize] {
        &self.segments
    }

    /// Index of the first bond whose reference index is `i` or greater.
    ///
    /// `i == num_ref_points()` returns `len()`.
    pub fn find_first_index(&self, i: usize) -> usize {
        self.segments[i.min(self.num_ref_points)]
    }

    /// Range of bond indices belonging to reference point `i`.
    pub fn bond_range(&self, i: usize) -> std::ops::Range<usize> {
        self.segments[i]..self.segments[i + 1]
    }

    /// Number of bonds of every reference point.
    pub fn neighbor_counts(&self) -> Vec<usize> {
        self.segments.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn bond(&self, n: usize) -> NeighborBond {
        NeighborBond {
            ref_idx: self.ref_indices[n],
            point_idx: self.point_indices[n],
            distance: self.distances[n],
            weight: self.weights[n],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = NeighborBond> + '_ {
        (0..self.len()).map(move |n| self.bond(n))
    }

    /// Bonds of reference point `i`, in discovery order.
    pub fn neighbors_of(&self, i: usize) -> impl Iterator<Item = NeighborBond> + '_ {
        self.bond_range(i).map(move |n| self.bond(n))
    }

    /// Keep only the bonds for which `mask` is true.
    pub fn filter(&mut self, mask: &[bool]) -> Result<()> {
        if mask.len() != self.len() {
            return Err(Error::LengthMismatch { expected: self.len(), actual: mask.len() });
        }
        let keep: Vec<usize> = (0..self.len()).filter(|&n| mask[n]).collect();
        let pick = |v: &[usize]| keep.iter().map(|&n| v[n]).collect::<Vec<_>>();
        let pick_f = |v: &[f64]| keep.iter().map(|&n| v[n]).collect::<Vec<_>>();

        self.ref_indices = pick(&self.ref_indices);
        self.point_indices = pick(&self.point_indices);
        self.distances = pick_f(&self.distances);
        self.weights = pick_f(&self.weights);
        self.segments = compute_segments(&self.ref_indices, self.num_ref_points);
        Ok(())
    }

    /// Keep only bonds with `r_min <= distance < r_max`.
    pub fn filter_r(&mut self, r_max: f64, r_min: f64) -> Result<()> {
        if !(r_max > 0.0) || r_min < 0.0 || r_max <= r_min {
            return Err(Error::InvalidArgument(format!(
                "filter_r requires 0 <= r_min < r_max, got r_min = {r_min}, r_max = {r_max}"
            )));
        }
        let mask: Vec<bool> = self.distances.iter().map(|&d| d >= r_min && d < r_max).collect();
        self.filter(&mask)
    }
}

/// Prefix offsets of a sorted index array: `segments[i]` is the first position
/// whose index is at least `i`.
fn compute_segments(sorted: &[usize], num_ref_points: usize) -> Vec<usize> {
    let mut segments = vec![0; num_ref_points + 1];
    for &i in sorted {
        segments[i + 1] += 1;
    }
    for i in 0..num_ref_points {
        segments[i + 1] += segments[i];
    }
    segments
}

//! Neighbor queries on an [`AabbTree`]: fixed-radius and k-nearest cursors,
//! and the parallel builder that turns whole point sets into a [`NeighborList`].

use crate::aabb_tree::AabbTree;
use crate::bounds::{overlap, AabbSphere};
use crate::config;
use crate::error::{Error, Result};
use crate::images::{validate_cutoff, ImageCache};
use crate::neighbor_list::{NeighborList, NeighborPoint};
use crate::simbox::SimBox;
use rayon::prelude::*;
use tracing::{debug, info_span, trace};

#[inline]
fn add(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
fn dist_sq(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// How neighbors of a point are selected.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QueryMode {
    /// Every point closer than `r_max`.
    Ball { r_max: f64 },
    /// The `num_neighbors` closest points, searching outward from `r_guess`
    /// and growing the radius by `scale` each round.
    Nearest { num_neighbors: usize, r_guess: f64, scale: f64 },
}

/// Query mode plus whether a reference point may be its own neighbor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueryArgs {
    pub mode: QueryMode,
    pub exclude_ii: bool,
}

impl QueryArgs {
    pub fn ball(r_max: f64) -> Self {
        Self { mode: QueryMode::Ball { r_max }, exclude_ii: false }
    }

    pub fn nearest(num_neighbors: usize, r_guess: f64, scale: f64) -> Self {
        Self {
            mode: QueryMode::Nearest { num_neighbors, r_guess, scale },
            exclude_ii: false,
        }
    }

    pub fn exclude_ii(mut self, exclude_ii: bool) -> Self {
        self.exclude_ii = exclude_ii;
        self
    }
}

/// A point set in a box, indexed by an AABB tree for neighbor queries.
///
/// Points are wrapped into the box (and flattened in 2D) on construction, so
/// queries only ever need the nearest periodic images. The image list is
/// enumerated once here and shared by every query on this point set.
#[derive(Clone, Debug)]
pub struct AabbQuery {
    sim_box: SimBox,
    points: Vec<[f64; 3]>,
    tree: AabbTree,
    images: ImageCache,
}

impl AabbQuery {
    pub fn new(sim_box: SimBox, points: &[[f64; 3]]) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::EmptyPoints);
        }
        let points: Vec<[f64; 3]> = points.iter().map(|p| sim_box.wrap_position(p)).collect();
        let tree = AabbTree::build(&points);
        let images = ImageCache::new(&sim_box);
        Ok(Self { sim_box, points, tree, images })
    }

    pub fn sim_box(&self) -> &SimBox {
        &self.sim_box
    }

    /// Positions as stored in the tree, wrapped into the box.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn tree(&self) -> &AabbTree {
        &self.tree
    }

    /// Periodic image translations visited by every query.
    pub fn images(&self) -> &[[f64; 3]] {
        self.images.images()
    }

    /// Cursor over every point strictly closer than `r` to `point`.
    pub fn query_ball(&self, point: [f64; 3], r: f64) -> Result<BallIterator<'_>> {
        let images = self.images.images_for(r)?;
        Ok(BallIterator::new(self, point, r, images))
    }

    /// Cursor over the points nearest to `point`, closest first.
    ///
    /// The search starts at radius `r_guess` and multiplies it by `scale`
    /// until at least `k` points are found or the radius reaches half the
    /// smallest plane distance of the box. Every point inside the last
    /// searched ball is yielded, so the count may exceed `k`; fewer than `k`
    /// are yielded only when the radius limit was hit.
    pub fn query(&self, point: [f64; 3], k: usize, r_guess: f64, scale: f64) -> Result<KnnIterator<'_>> {
        validate_cutoff(&self.sim_box, r_guess)?;
        if !(scale > 1.0) || !scale.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "nearest neighbor scale must be greater than 1, got {scale}"
            )));
        }
        Ok(KnnIterator {
            query: self,
            point,
            k,
            r: r_guess,
            scale,
            r_limit: self.sim_box.min_plane_distance() / 2.0,
            buffer: Vec::new(),
            searched: false,
        })
    }

    /// Per-point cursor selected by `args.mode`. Self matches are not
    /// filtered here; see [`query_all`](Self::query_all).
    pub fn query_with(&self, point: [f64; 3], args: &QueryArgs) -> Result<PerPointIterator<'_>> {
        match args.mode {
            QueryMode::Ball { r_max } => Ok(PerPointIterator::Ball(self.query_ball(point, r_max)?)),
            QueryMode::Nearest { num_neighbors, r_guess, scale } => {
                Ok(PerPointIterator::Knn(self.query(point, num_neighbors, r_guess, scale)?))
            }
        }
    }

    /// All bonds between `reference_points` and this point set closer than `cutoff`.
    ///
    /// Work is split over reference points; each rayon task fills a private
    /// buffer and the buffers are merged and sorted by reference index once
    /// every task has finished.
    pub fn neighbor_list(
        &self,
        reference_points: &[[f64; 3]],
        cutoff: f64,
        exclude_self: bool,
    ) -> Result<NeighborList> {
        let _span = info_span!(
            "AabbQuery::neighbor_list",
            n_ref = reference_points.len(),
            n_points = self.points.len(),
            cutoff
        )
        .entered();
        let images = self.images.images_for(cutoff)?;
        let r_cutsq = cutoff * cutoff;

        let buffers: Vec<Vec<(usize, usize, f64)>> = (0..reference_points.len())
            .into_par_iter()
            .with_min_len(config::min_parallel_len())
            .fold(Vec::new, |mut bonds, i| {
                let pos_i = self.sim_box.wrap_position(&reference_points[i]);
                for image in images {
                    let pos_i_image = add(&pos_i, image);
                    let sphere = AabbSphere::new(pos_i_image, cutoff);
                    self.tree.for_each_in_sphere(&sphere, |j| {
                        if exclude_self && i == j {
                            return;
                        }
                        let dr_sq = dist_sq(&self.points[j], &pos_i_image);
                        if dr_sq < r_cutsq {
                            bonds.push((i, j, dr_sq.sqrt()));
                        }
                    });
                }
                bonds
            })
            .collect();

        let nlist = merge_bond_buffers(buffers, reference_points.len(), self.points.len());
        debug!(n_bonds = nlist.len(), "built neighbor list");
        Ok(nlist)
    }

    /// Neighbors of reference point `i` located at `point`.
    ///
    /// With `args.exclude_ii`, point `i` of this set is skipped. In nearest
    /// mode the result is cut to the `num_neighbors` closest points (after
    /// dropping `i`), so lists built from it hold exactly k bonds per point
    /// wherever k are reachable.
    pub fn query_excluding(
        &self,
        i: usize,
        point: [f64; 3],
        args: &QueryArgs,
    ) -> Result<impl Iterator<Item = NeighborPoint> + '_> {
        let mut args = *args;
        let mut limit = usize::MAX;
        if let QueryMode::Nearest { num_neighbors, .. } = &mut args.mode {
            limit = *num_neighbors;
            if args.exclude_ii {
                *num_neighbors += 1;
            }
        }
        let exclude_ii = args.exclude_ii;
        Ok(self
            .query_with(point, &args)?
            .filter(move |np| !(exclude_ii && np.index == i))
            .take(limit))
    }

    /// Neighbor list built from one per-point query for every reference point.
    pub fn query_all(&self, reference_points: &[[f64; 3]], args: &QueryArgs) -> Result<NeighborList> {
        let _span = info_span!("AabbQuery::query_all", n_ref = reference_points.len()).entered();
        let buffers: Vec<Vec<(usize, usize, f64)>> = (0..reference_points.len())
            .into_par_iter()
            .with_min_len(config::min_parallel_len())
            .map(|i| -> Result<Vec<(usize, usize, f64)>> {
                Ok(self
                    .query_excluding(i, reference_points[i], args)?
                    .map(|np| (i, np.index, np.distance))
                    .collect())
            })
            .collect::<Result<_>>()?;

        Ok(merge_bond_buffers(buffers, reference_points.len(), self.points.len()))
    }
}

/// Build the full neighbor list between two point sets in one call.
///
/// The tree is built over `query_points` and walked once per reference point
/// and periodic image. Bonds are sorted by reference index; when
/// `exclude_self` is set, pairs with equal indices are skipped. The cutoff is
/// validated against the box before any other work.
pub fn compute_neighbor_list(
    sim_box: &SimBox,
    cutoff: f64,
    reference_points: &[[f64; 3]],
    query_points: &[[f64; 3]],
    exclude_self: bool,
) -> Result<NeighborList> {
    validate_cutoff(sim_box, cutoff)?;
    let query = AabbQuery::new(*sim_box, query_points)?;
    query.neighbor_list(reference_points, cutoff, exclude_self)
}

/// Concatenate per-task buffers, stable-sort by reference index and lay the
/// bonds out as a list with unit weights.
fn merge_bond_buffers(buffers: Vec<Vec<(usize, usize, f64)>>, num_ref: usize, num_points: usize) -> NeighborList {
    let mut bonds: Vec<(usize, usize, f64)> = buffers.into_iter().flatten().collect();
    bonds.par_sort_by_key(|b| b.0);

    let n = bonds.len();
    let mut ref_indices = Vec::with_capacity(n);
    let mut point_indices = Vec::with_capacity(n);
    let mut distances = Vec::with_capacity(n);
    for (i, j, d) in bonds {
        ref_indices.push(i);
        point_indices.push(j);
        distances.push(d);
    }
    NeighborList::from_sorted_parts(ref_indices, point_indices, distances, vec![1.0; n], num_ref, num_points)
}

/// Resumable stackless walk over the tree for every periodic image of a
/// query point, yielding points with squared distance below `r^2`.
///
/// The cursor is the triple (image, node, position within leaf); each call
/// to `next` continues where the previous one returned.
pub struct BallIterator<'a> {
    query: &'a AabbQuery,
    images: &'a [[f64; 3]],
    pos: [f64; 3],
    r: f64,
    r_sq: f64,
    cur_image: usize,
    cur_node: usize,
    cur_p: usize,
}

impl<'a> BallIterator<'a> {
    fn new(query: &'a AabbQuery, point: [f64; 3], r: f64, images: &'a [[f64; 3]]) -> Self {
        Self {
            pos: query.sim_box.wrap_position(&point),
            query,
            images,
            r,
            r_sq: r * r,
            cur_image: 0,
            cur_node: 0,
            cur_p: 0,
        }
    }
}

impl Iterator for BallIterator<'_> {
    type Item = NeighborPoint;

    fn next(&mut self) -> Option<NeighborPoint> {
        let tree = &self.query.tree;
        let n_nodes = tree.num_nodes();

        while self.cur_image < self.images.len() {
            let pos_image = add(&self.pos, &self.images[self.cur_image]);
            let sphere = AabbSphere::new(pos_image, self.r);

            while self.cur_node < n_nodes {
                if overlap(tree.node_bounds(self.cur_node), &sphere) {
                    if tree.is_leaf(self.cur_node) {
                        let leaf = tree.leaf_points(self.cur_node);
                        while self.cur_p < leaf.len() {
                            let j = leaf[self.cur_p];
                            self.cur_p += 1;
                            let dr_sq = dist_sq(&self.query.points[j], &pos_image);
                            if dr_sq < self.r_sq {
                                return Some(NeighborPoint::new(j, dr_sq.sqrt()));
                            }
                        }
                    }
                } else {
                    self.cur_node += tree.node_skip(self.cur_node);
                }
                self.cur_node += 1;
                self.cur_p = 0;
            }
            self.cur_image += 1;
            self.cur_node = 0;
        }
        None
    }
}

impl std::iter::FusedIterator for BallIterator<'_> {}

/// k-nearest cursor. The search runs on the first call to `next`; later
/// calls drain the sorted contents of the last searched ball.
pub struct KnnIterator<'a> {
    query: &'a AabbQuery,
    point: [f64; 3],
    k: usize,
    r: f64,
    scale: f64,
    r_limit: f64,
    /// Sorted farthest first so `pop` yields the nearest remaining point.
    buffer: Vec<NeighborPoint>,
    searched: bool,
}

impl<'a> KnnIterator<'a> {
    fn search(&mut self) {
        self.searched = true;
        if self.k == 0 {
            return;
        }

        let mut found: Vec<NeighborPoint>;
        loop {
            let query: &'a AabbQuery = self.query;
            found = BallIterator::new(query, self.point, self.r, query.images.images()).collect();
            if found.len() >= self.k {
                break;
            }
            let next_r = self.r * self.scale;
            trace!(r = self.r, next_r, found = found.len(), k = self.k, "growing nearest neighbor search");
            if next_r >= self.r_limit {
                break;
            }
            self.r = next_r;
        }

        found.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        found.reverse();
        self.buffer = found;
    }

    /// Radius of the last ball search.
    pub fn radius(&self) -> f64 {
        self.r
    }
}

impl Iterator for KnnIterator<'_> {
    type Item = NeighborPoint;

    fn next(&mut self) -> Option<NeighborPoint> {
        if !self.searched {
            self.search();
        }
        self.buffer.pop()
    }
}

impl std::iter::FusedIterator for KnnIterator<'_> {}

/// Either kind of per-point cursor.
pub enum PerPointIterator<'a> {
    Ball(BallIterator<'a>),
    Knn(KnnIterator<'a>),
}

impl Iterator for PerPointIterator<'_> {
    type Item = NeighborPoint;

    fn next(&mut self) -> Option<NeighborPoint> {
        match self {
            PerPointIterator::Ball(it) => it.next(),
            PerPointIterator::Knn(it) => it.next(),
        }
    }
}

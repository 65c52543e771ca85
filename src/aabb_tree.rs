use crate::bounds::{overlap, Aabb, AabbSphere};
use crate::config;
use tracing::info_span;

#[derive(Clone, Copy, Debug)]
struct AabbNode {
    bounds: Aabb,
    /// Number of nodes in this node's subtree, excluding itself.
    skip: u32,
    // Leaf data: indices[start..end], empty range for internal nodes
    start: u32,
    end: u32,
    leaf: bool,
}

/// Bounding-volume hierarchy over a fixed point set.
///
/// Nodes are stored in depth-first pre-order, so the left child of node `i`
/// is `i + 1` and the first node after its subtree is `i + skip + 1`. This
/// lets every query walk the tree with a single cursor and no stack.
#[derive(Clone, Debug, Default)]
pub struct AabbTree {
    nodes: Vec<AabbNode>,
    indices: Vec<usize>,
}

impl AabbTree {
    /// Build a tree over `points`. Positions are used as given; callers wrap
    /// them into the box and flatten z for 2D data beforehand.
    pub fn build(points: &[[f64; 3]]) -> Self {
        let _span = info_span!("AabbTree::build", n_points = points.len()).entered();
        let count = points.len();
        let mut tree = AabbTree {
            nodes: Vec::new(),
            indices: (0..count).collect(),
        };
        if count == 0 {
            return tree;
        }

        let capacity = config::leaf_capacity();
        // A balanced tree has about 2 * N / capacity nodes
        tree.nodes.reserve(2 * count / capacity + 1);
        tree.build_recursive(0, count, points, capacity);
        tree
    }

    fn build_recursive(&mut self, start: usize, end: usize, points: &[[f64; 3]], capacity: usize) {
        let count = end - start;

        let mut bounds = Aabb::empty();
        for &idx in &self.indices[start..end] {
            bounds.grow(&points[idx]);
        }

        let node_idx = self.nodes.len();
        if count <= capacity {
            self.nodes.push(AabbNode {
                bounds,
                skip: 0,
                start: start as u32,
                end: end as u32,
                leaf: true,
            });
            return;
        }

        // Reserve the slot so the node precedes its children
        self.nodes.push(AabbNode {
            bounds,
            skip: 0,
            start: 0,
            end: 0,
            leaf: false,
        });

        // Median split along the longest extent
        let axis = bounds.longest_axis();
        let half = count / 2;
        self.indices[start..end].select_nth_unstable_by(half, |&a, &b| {
            points[a][axis]
                .partial_cmp(&points[b][axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        self.build_recursive(start, start + half, points, capacity);
        self.build_recursive(start + half, end, points, capacity);

        self.nodes[node_idx].skip = (self.nodes.len() - node_idx - 1) as u32;
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_points(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn node_bounds(&self, node: usize) -> &Aabb {
        &self.nodes[node].bounds
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        self.nodes[node].leaf
    }

    /// Nodes to jump over when `node` is rejected.
    pub fn node_skip(&self, node: usize) -> usize {
        self.nodes[node].skip as usize
    }

    /// Point indices held by a leaf. Empty for internal nodes.
    pub fn leaf_points(&self, node: usize) -> &[usize] {
        let n = &self.nodes[node];
        &self.indices[n.start as usize..n.end as usize]
    }

    /// Stackless walk: calls `visitor` with the point index of every point in
    /// a leaf whose bounds overlap `sphere`. The exact distance test is left
    /// to the visitor.
    pub fn for_each_in_sphere<F>(&self, sphere: &AabbSphere, mut visitor: F)
    where
        F: FnMut(usize),
    {
        let n_nodes = self.nodes.len();
        let mut cur = 0;
        while cur < n_nodes {
            let node = &self.nodes[cur];
            if overlap(&node.bounds, sphere) {
                if node.leaf {
                    for &j in &self.indices[node.start as usize..node.end as usize] {
                        visitor(j);
                    }
                }
            } else {
                cur += node.skip as usize;
            }
            cur += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_cloud(n: usize, seed: u64) -> Vec<[f64; 3]> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| [rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)])
            .collect()
    }

    #[test]
    fn test_every_point_in_exactly_one_leaf() {
        let points = random_cloud(257, 1);
        let tree = AabbTree::build(&points);
        let mut seen = vec![0; points.len()];
        for node in 0..tree.num_nodes() {
            if tree.is_leaf(node) {
                assert!(tree.leaf_points(node).len() <= 4);
                for &j in tree.leaf_points(node) {
                    seen[j] += 1;
                }
            } else {
                assert!(tree.leaf_points(node).is_empty());
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_skip_counts_cover_subtree() {
        let points = random_cloud(100, 2);
        let tree = AabbTree::build(&points);
        assert_eq!(tree.node_skip(0), tree.num_nodes() - 1);
        for node in 0..tree.num_nodes() {
            let end = node + tree.node_skip(node);
            assert!(end < tree.num_nodes());
            if tree.is_leaf(node) {
                assert_eq!(tree.node_skip(node), 0);
            }
            // Every point in the subtree lies inside the node bounds
            let b = *tree.node_bounds(node);
            for sub in node..=end {
                for &j in tree.leaf_points(sub) {
                    assert!(b.dist_sq_to_point(&points[j]) == 0.0);
                }
            }
        }
    }

    #[test]
    fn test_sphere_walk_finds_candidates() {
        let points = random_cloud(500, 3);
        let tree = AabbTree::build(&points);
        let center = [5.0, 5.0, 5.0];
        let r = 1.5;
        let mut candidates = Vec::new();
        tree.for_each_in_sphere(&AabbSphere::new(center, r), |j| candidates.push(j));

        for (j, p) in points.iter().enumerate() {
            let d2: f64 = (0..3).map(|k| (p[k] - center[k]).powi(2)).sum();
            if d2 < r * r {
                assert!(candidates.contains(&j), "missed point {}", j);
            }
        }
        // Pruning actually happened
        assert!(candidates.len() < points.len());
    }

    #[test]
    fn test_empty_and_single() {
        let tree = AabbTree::build(&[]);
        assert!(tree.is_empty());
        assert_eq!(tree.num_nodes(), 0);
        let mut hits = 0;
        tree.for_each_in_sphere(&AabbSphere::new([0.0; 3], 1.0), |_| hits += 1);
        assert_eq!(hits, 0);

        let tree = AabbTree::build(&[[1.0, 2.0, 3.0]]);
        assert_eq!(tree.num_nodes(), 1);
        assert!(tree.is_leaf(0));
        assert_eq!(tree.leaf_points(0), &[0]);
    }
}

//! Parallel loops over the bonds between a set of reference points and an
//! [`AabbQuery`], shared by every per-bond analysis in the crate.

use crate::config;
use crate::error::{Error, Result};
use crate::neighbor_list::{NeighborBond, NeighborList};
use crate::query::{AabbQuery, QueryArgs};
use rayon::prelude::*;
use tracing::info_span;

fn check_nlist(nlist: &NeighborList, query: &AabbQuery, n_ref: usize) -> Result<()> {
    if nlist.num_ref_points() != n_ref {
        return Err(Error::LengthMismatch {
            expected: n_ref,
            actual: nlist.num_ref_points(),
        });
    }
    if nlist.num_points() != query.num_points() {
        return Err(Error::LengthMismatch {
            expected: query.num_points(),
            actual: nlist.num_points(),
        });
    }
    Ok(())
}

/// Call `f` once for every bond of every reference point, in parallel over
/// reference points.
///
/// With a precomputed `nlist` its bonds are visited as stored and `args` is
/// ignored. Otherwise one per-point query is run for every reference point.
/// The order in which `f` sees bonds is unspecified.
pub fn loop_over_neighbors<F>(
    query: &AabbQuery,
    ref_points: &[[f64; 3]],
    args: &QueryArgs,
    nlist: Option<&NeighborList>,
    f: F,
) -> Result<()>
where
    F: Fn(NeighborBond) + Sync + Send,
{
    let _span = info_span!("loop_over_neighbors", n_ref = ref_points.len(), precomputed = nlist.is_some()).entered();
    let range = (0..ref_points.len()).into_par_iter().with_min_len(config::min_parallel_len());

    match nlist {
        Some(nlist) => {
            check_nlist(nlist, query, ref_points.len())?;
            range.for_each(|i| nlist.neighbors_of(i).for_each(&f));
            Ok(())
        }
        None => range.try_for_each(|i| -> Result<()> {
            for np in query.query_excluding(i, ref_points[i], args)? {
                f(NeighborBond::new(i, np.index, np.distance));
            }
            Ok(())
        }),
    }
}

/// Call `f(i, bonds)` once per reference point `i` with all of its bonds,
/// in parallel over reference points. Points without neighbors get an empty slice.
pub fn loop_over_neighbors_per_point<F>(
    query: &AabbQuery,
    ref_points: &[[f64; 3]],
    args: &QueryArgs,
    nlist: Option<&NeighborList>,
    f: F,
) -> Result<()>
where
    F: Fn(usize, &[NeighborBond]) + Sync + Send,
{
    let _span = info_span!("loop_over_neighbors_per_point", n_ref = ref_points.len()).entered();
    if let Some(nlist) = nlist {
        check_nlist(nlist, query, ref_points.len())?;
    }

    (0..ref_points.len())
        .into_par_iter()
        .with_min_len(config::min_parallel_len())
        .try_for_each_init(Vec::new, |bonds, i| -> Result<()> {
            bonds.clear();
            match nlist {
                Some(nlist) => bonds.extend(nlist.neighbors_of(i)),
                None => bonds.extend(
                    query
                        .query_excluding(i, ref_points[i], args)?
                        .map(|np| NeighborBond::new(i, np.index, np.distance)),
                ),
            }
            f(i, bonds);
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simbox::SimBox;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn line(n: usize) -> Vec<[f64; 3]> {
        (0..n).map(|i| [i as f64 - n as f64 / 2.0, 0.0, 0.0]).collect()
    }

    #[test]
    fn test_loop_matches_query_all() {
        let sim_box = SimBox::cube(20.0).unwrap();
        let points = line(10);
        let query = AabbQuery::new(sim_box, &points).unwrap();
        let args = QueryArgs::ball(1.5).exclude_ii(true);

        let seen = Mutex::new(Vec::new());
        loop_over_neighbors(&query, &points, &args, None, |b| {
            seen.lock().unwrap().push((b.ref_idx, b.point_idx));
        })
        .unwrap();
        let mut seen = seen.into_inner().unwrap();
        seen.sort();

        let nlist = query.query_all(&points, &args).unwrap();
        let mut expected: Vec<(usize, usize)> = nlist.iter().map(|b| (b.ref_idx, b.point_idx)).collect();
        expected.sort();
        assert_eq!(seen, expected);
        // Chain of 10 points with unit spacing: 2 * 9 bonds
        assert_eq!(seen.len(), 18);
    }

    #[test]
    fn test_loop_uses_precomputed_list() {
        let sim_box = SimBox::cube(20.0).unwrap();
        let points = line(4);
        let query = AabbQuery::new(sim_box, &points).unwrap();
        let bonds = [NeighborBond::new(0, 3, 3.0), NeighborBond::new(2, 1, 1.0)];
        let nlist = NeighborList::from_sorted_bonds(&bonds, 4, 4).unwrap();

        let count = AtomicUsize::new(0);
        // A ball radius that would otherwise find nothing
        loop_over_neighbors(&query, &points, &QueryArgs::ball(0.1), Some(&nlist), |b| {
            assert!(b.ref_idx == 0 || b.ref_idx == 2);
            count.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(count.into_inner(), 2);

        let wrong = NeighborList::empty(3, 4);
        let err = loop_over_neighbors(&query, &points, &QueryArgs::ball(1.0), Some(&wrong), |_| {});
        assert!(matches!(err, Err(Error::LengthMismatch { expected: 4, actual: 3 })));
    }

    #[test]
    fn test_per_point_nearest() {
        let sim_box = SimBox::cube(20.0).unwrap();
        let points = line(8);
        let query = AabbQuery::new(sim_box, &points).unwrap();
        let args = QueryArgs::nearest(2, 0.5, 2.0).exclude_ii(true);

        let counts = Mutex::new(vec![0; points.len()]);
        loop_over_neighbors_per_point(&query, &points, &args, None, |i, bonds| {
            assert!(bonds.iter().all(|b| b.ref_idx == i && b.point_idx != i));
            assert!(bonds.windows(2).all(|w| w[0].distance <= w[1].distance));
            counts.lock().unwrap()[i] = bonds.len();
        })
        .unwrap();
        assert!(counts.into_inner().unwrap().iter().all(|&c| c == 2));
    }

    #[test]
    fn test_invalid_args_propagate() {
        let sim_box = SimBox::cube(4.0).unwrap();
        let points = line(3);
        let query = AabbQuery::new(sim_box, &points).unwrap();
        let err = loop_over_neighbors(&query, &points, &QueryArgs::ball(3.0), None, |_| {});
        assert!(matches!(err, Err(Error::CutoffTooLarge { .. })));
    }
}

//! Enumeration of the periodic images that a cutoff search must visit.

use crate::error::{Error, Result};
use crate::simbox::SimBox;
use tracing::debug;

/// Lattice translations to apply to a query point. The first entry is always the zero vector.
pub type ImageList = Vec<[f64; 3]>;

/// Check that a search of radius `cutoff` cannot see two images of the same point.
pub fn validate_cutoff(sim_box: &SimBox, cutoff: f64) -> Result<()> {
    if !(cutoff > 0.0) || !cutoff.is_finite() {
        return Err(Error::InvalidCutoff(cutoff));
    }
    let plane_distance = sim_box.nearest_plane_distance();
    let periodic = sim_box.periodic();
    for axis in 0..3 {
        if periodic[axis] && plane_distance[axis] <= cutoff * 2.0 {
            return Err(Error::CutoffTooLarge {
                cutoff,
                plane_distance: plane_distance[axis],
                axis,
            });
        }
    }
    Ok(())
}

/// All combinations of -1/0/+1 lattice steps along the periodic axes.
///
/// The list has `3^p` entries for `p` periodic axes, zero vector first.
pub fn get_images(sim_box: &SimBox, cutoff: f64) -> Result<ImageList> {
    validate_cutoff(sim_box, cutoff)?;
    let images = enumerate_images(sim_box);
    debug!(n_images = images.len(), cutoff, "enumerated periodic images");
    Ok(images)
}

/// Image translations without any cutoff check. Callers are responsible for
/// keeping their search radius valid for the box.
fn enumerate_images(sim_box: &SimBox) -> ImageList {
    let periodic = sim_box.periodic();
    let a = sim_box.lattice_vector(0);
    let b = sim_box.lattice_vector(1);
    let c = sim_box.lattice_vector(2);

    let n_images = 3usize.pow(sim_box.num_periodic() as u32);
    let mut images = Vec::with_capacity(n_images);
    images.push([0.0; 3]);

    for i in -1i32..=1 {
        if i != 0 && !periodic[0] { continue; }
        for j in -1i32..=1 {
            if j != 0 && !periodic[1] { continue; }
            for k in -1i32..=1 {
                if k != 0 && !periodic[2] { continue; }
                if i == 0 && j == 0 && k == 0 { continue; }
                let (fi, fj, fk) = (i as f64, j as f64, k as f64);
                images.push([
                    fi * a[0] + fj * b[0] + fk * c[0],
                    fi * a[1] + fj * b[1] + fk * c[1],
                    fi * a[2] + fj * b[2] + fk * c[2],
                ]);
            }
        }
    }
    debug_assert_eq!(images.len(), n_images);
    images
}

/// Image list of one box, enumerated once and handed out for any valid cutoff.
///
/// The translations depend only on the box, so a cutoff change costs a
/// validation and a box change costs a re-enumeration.
#[derive(Clone, Debug)]
pub struct ImageCache {
    sim_box: SimBox,
    images: ImageList,
}

impl ImageCache {
    pub fn new(sim_box: &SimBox) -> Self {
        let images = enumerate_images(sim_box);
        debug!(n_images = images.len(), "cached periodic images");
        Self { sim_box: *sim_box, images }
    }

    /// Images for a search of radius `cutoff` in the cached box.
    pub fn images_for(&self, cutoff: f64) -> Result<&[[f64; 3]]> {
        validate_cutoff(&self.sim_box, cutoff)?;
        Ok(&self.images)
    }

    /// Images for `(sim_box, cutoff)`, re-enumerating only when the box differs
    /// from the cached one. A validation failure leaves the cache untouched.
    pub fn get(&mut self, sim_box: &SimBox, cutoff: f64) -> Result<&[[f64; 3]]> {
        validate_cutoff(sim_box, cutoff)?;
        if !self.is_cached(sim_box) {
            *self = Self::new(sim_box);
        }
        Ok(&self.images)
    }

    /// True if `get` with this box will reuse the cached list.
    pub fn is_cached(&self, sim_box: &SimBox) -> bool {
        self.sim_box == *sim_box
    }

    pub fn sim_box(&self) -> &SimBox {
        &self.sim_box
    }

    /// The cached translations, without any cutoff check.
    pub fn images(&self) -> &[[f64; 3]] {
        &self.images
    }
}

//! Periodic simulation cell geometry.
//!
//! A [`SimBox`] is spanned by three lattice vectors and is centered on the
//! origin: fractional coordinates run from 0 to 1 along each lattice vector and
//! map to Cartesian positions through `x = H (f - 0.5)`, so a cube of side `L`
//! covers `[-L/2, L/2)` on every axis.

use crate::error::{Error, Result};
use rand::Rng;

const Z_HAT: [f64; 3] = [0.0, 0.0, 1.0];

#[inline]
pub(crate) fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn norm(a: &[f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

/// Simulation box: lattice vectors, per-axis periodicity and dimensionality.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimBox {
    lattice: [[f64; 3]; 3],
    /// Rows of the inverse lattice matrix, `inverse[k] . x` is the k-th fractional coordinate.
    inverse: [[f64; 3]; 3],
    periodic: [bool; 3],
    is_2d: bool,
}

impl SimBox {
    /// Triclinic box in tilt-factor form: `a = (lx, 0, 0)`, `b = (xy*ly, ly, 0)`,
    /// `c = (xz*lz, yz*lz, lz)`. In 2D `lz`, `xz` and `yz` are ignored.
    ///
    /// All axes start out periodic.
    pub fn new(lx: f64, ly: f64, lz: f64, xy: f64, xz: f64, yz: f64, is_2d: bool) -> Result<Self> {
        if !(lx > 0.0 && ly > 0.0) || (!is_2d && !(lz > 0.0)) {
            return Err(Error::InvalidBox(format!(
                "box lengths must be positive, got ({lx}, {ly}, {lz})"
            )));
        }
        let a = [lx, 0.0, 0.0];
        let b = [xy * ly, ly, 0.0];
        let c = [xz * lz, yz * lz, lz];
        Self::from_lattice_vectors(a, b, c, is_2d)
    }

    /// Periodic cube of side `l`.
    pub fn cube(l: f64) -> Result<Self> {
        Self::new(l, l, l, 0.0, 0.0, 0.0, false)
    }

    /// Periodic 2D square of side `l`.
    pub fn square(l: f64) -> Result<Self> {
        Self::new(l, l, 0.0, 0.0, 0.0, 0.0, true)
    }

    /// Box spanned by arbitrary lattice vectors.
    ///
    /// In 2D the z components of `a` and `b` are dropped and `c` is ignored.
    pub fn from_lattice_vectors(a: [f64; 3], b: [f64; 3], c: [f64; 3], is_2d: bool) -> Result<Self> {
        let (a, b, c) = if is_2d {
            ([a[0], a[1], 0.0], [b[0], b[1], 0.0], [0.0; 3])
        } else {
            (a, b, c)
        };
        // In 2D the third column of the matrix is the unit normal so the
        // inverse stays well defined.
        let c_eff = if is_2d { Z_HAT } else { c };

        let bc = cross(&b, &c_eff);
        let ca = cross(&c_eff, &a);
        let ab = cross(&a, &b);
        let det = dot(&a, &bc);
        if !det.is_finite() || det.abs() < f64::EPSILON {
            return Err(Error::InvalidBox(format!(
                "lattice vectors span zero volume (determinant {det})"
            )));
        }
        let inv_det = 1.0 / det;
        let scale = |v: [f64; 3]| [v[0] * inv_det, v[1] * inv_det, v[2] * inv_det];

        Ok(Self {
            lattice: [a, b, c],
            inverse: [scale(bc), scale(ca), scale(ab)],
            periodic: [true, true, !is_2d],
            is_2d,
        })
    }

    /// Replace the periodicity flags. The z flag is always false in 2D.
    pub fn with_periodic(mut self, periodic: [bool; 3]) -> Self {
        self.periodic = [periodic[0], periodic[1], periodic[2] && !self.is_2d];
        self
    }

    pub fn is_2d(&self) -> bool {
        self.is_2d
    }

    pub fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    /// Number of periodic axes (z never counts in 2D).
    pub fn num_periodic(&self) -> usize {
        self.periodic.iter().filter(|&&p| p).count()
    }

    /// The `i`-th lattice vector. The third vector is zero in 2D.
    pub fn lattice_vector(&self, i: usize) -> [f64; 3] {
        self.lattice[i]
    }

    /// Volume of the box, or its area in 2D.
    pub fn volume(&self) -> f64 {
        let [a, b, c] = &self.lattice;
        if self.is_2d {
            cross(a, b)[2].abs()
        } else {
            dot(a, &cross(b, c)).abs()
        }
    }

    /// Distance between opposite faces of the box along each lattice direction.
    ///
    /// The z entry is infinite in 2D.
    pub fn nearest_plane_distance(&self) -> [f64; 3] {
        let mut out = [0.0; 3];
        for k in 0..3 {
            out[k] = 1.0 / norm(&self.inverse[k]);
        }
        if self.is_2d {
            out[2] = f64::INFINITY;
        }
        out
    }

    /// Smallest entry of [`nearest_plane_distance`](Self::nearest_plane_distance).
    pub fn min_plane_distance(&self) -> f64 {
        let d = self.nearest_plane_distance();
        d[0].min(d[1]).min(d[2])
    }

    /// Fractional coordinates of `x`, in `[0, 1)` for points inside the box.
    pub fn make_fractional(&self, x: &[f64; 3]) -> [f64; 3] {
        let mut f = [
            dot(&self.inverse[0], x) + 0.5,
            dot(&self.inverse[1], x) + 0.5,
            dot(&self.inverse[2], x) + 0.5,
        ];
        if self.is_2d {
            f[2] = 0.0;
        }
        f
    }

    /// Cartesian position of fractional coordinates `f`.
    pub fn make_absolute(&self, f: &[f64; 3]) -> [f64; 3] {
        let fz = if self.is_2d { 0.5 } else { f[2] };
        let s = [f[0] - 0.5, f[1] - 0.5, fz - 0.5];
        let mut x = [0.0; 3];
        for (k, latt) in self.lattice.iter().enumerate() {
            for d in 0..3 {
                x[d] += s[k] * latt[d];
            }
        }
        x
    }

    /// Minimum-image form of a displacement vector.
    ///
    /// Only periodic axes are corrected; the z component is zeroed in 2D.
    pub fn wrap(&self, displacement: &[f64; 3]) -> [f64; 3] {
        let mut d = *displacement;
        if self.is_2d {
            d[2] = 0.0;
        }
        for k in 0..3 {
            if !self.periodic[k] {
                continue;
            }
            let shift = dot(&self.inverse[k], &d).round();
            if shift != 0.0 {
                for c in 0..3 {
                    d[c] -= shift * self.lattice[k][c];
                }
            }
        }
        d
    }

    /// Map a position into the box along periodic axes. Non-periodic
    /// coordinates are left alone; z is zeroed in 2D.
    pub fn wrap_position(&self, position: &[f64; 3]) -> [f64; 3] {
        let mut x = *position;
        if self.is_2d {
            x[2] = 0.0;
        }
        for k in 0..3 {
            if !self.periodic[k] {
                continue;
            }
            let shift = (dot(&self.inverse[k], &x) + 0.5).floor();
            if shift != 0.0 {
                for c in 0..3 {
                    x[c] -= shift * self.lattice[k][c];
                }
            }
        }
        x
    }

    /// Generate `count` points uniformly distributed inside the box.
    pub fn random_points<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<[f64; 3]> {
        (0..count)
            .map(|_| {
                let f = [rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)];
                self.make_absolute(&f)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cube_geometry() {
        let b = SimBox::cube(10.0).unwrap();
        assert_relative_eq!(b.volume(), 1000.0);
        let d = b.nearest_plane_distance();
        assert_relative_eq!(d[0], 10.0);
        assert_relative_eq!(d[1], 10.0);
        assert_relative_eq!(d[2], 10.0);
        assert_eq!(b.num_periodic(), 3);
    }

    #[test]
    fn test_fractional_round_trip_triclinic() {
        let b = SimBox::new(10.0, 8.0, 6.0, 0.2, 0.1, 0.3, false).unwrap();
        let x = [1.5, -2.0, 0.75];
        let f = b.make_fractional(&x);
        let back = b.make_absolute(&f);
        for k in 0..3 {
            assert_relative_eq!(back[k], x[k], epsilon = 1e-12);
        }
        // The origin sits in the middle of the box
        let c = b.make_fractional(&[0.0, 0.0, 0.0]);
        assert_relative_eq!(c[0], 0.5);
        assert_relative_eq!(c[1], 0.5);
        assert_relative_eq!(c[2], 0.5);
    }

    #[test]
    fn test_triclinic_plane_distance() {
        // b is tilted, so the x planes are closer than lx
        let b = SimBox::new(10.0, 10.0, 10.0, 1.0, 0.0, 0.0, false).unwrap();
        let d = b.nearest_plane_distance();
        assert_relative_eq!(d[0], 10.0 / 2.0f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(d[1], 10.0, epsilon = 1e-12);
        assert_relative_eq!(b.volume(), 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_wrap_minimum_image() {
        let b = SimBox::cube(10.0).unwrap();
        let w = b.wrap(&[9.5, -6.0, 4.0]);
        assert_relative_eq!(w[0], -0.5);
        assert_relative_eq!(w[1], 4.0);
        assert_relative_eq!(w[2], 4.0);
    }

    #[test]
    fn test_wrap_respects_periodicity() {
        let b = SimBox::cube(10.0).unwrap().with_periodic([true, false, false]);
        let w = b.wrap(&[9.5, 9.5, 9.5]);
        assert_relative_eq!(w[0], -0.5);
        assert_relative_eq!(w[1], 9.5);
        assert_relative_eq!(w[2], 9.5);
        assert_eq!(b.num_periodic(), 1);
    }

    #[test]
    fn test_wrap_position() {
        let b = SimBox::cube(10.0).unwrap();
        let w = b.wrap_position(&[9.5, -5.5, 4.9]);
        assert_relative_eq!(w[0], -0.5);
        assert_relative_eq!(w[1], 4.5);
        assert_relative_eq!(w[2], 4.9);
    }

    #[test]
    fn test_2d_box_ignores_z() {
        let b = SimBox::square(4.0).unwrap().with_periodic([true, true, true]);
        assert!(b.is_2d());
        assert_eq!(b.periodic(), [true, true, false]);
        assert_eq!(b.num_periodic(), 2);
        assert_relative_eq!(b.volume(), 16.0);
        assert!(b.nearest_plane_distance()[2].is_infinite());
        assert_relative_eq!(b.min_plane_distance(), 4.0);
        assert_eq!(b.wrap(&[1.0, 1.0, 7.0])[2], 0.0);
        assert_eq!(b.lattice_vector(2), [0.0; 3]);
    }

    #[test]
    fn test_degenerate_box_rejected() {
        assert!(matches!(SimBox::cube(0.0), Err(Error::InvalidBox(_))));
        let r = SimBox::from_lattice_vectors([1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0], false);
        assert!(matches!(r, Err(Error::InvalidBox(_))));
    }

    #[test]
    fn test_random_points_inside() {
        use rand::SeedableRng;
        let b = SimBox::cube(3.0).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for p in b.random_points(200, &mut rng) {
            for k in 0..3 {
                assert!(p[k] >= -1.5 && p[k] < 1.5);
            }
        }
    }
}

//! # Index maps
//!
//! Bijections between the points of a Monkhorst-Pack grid and flat indices `0..N`. Electron
//! wavevectors and phonon wavevectors live on separate grids, distinguished at the type level so
//! a q-index can never be passed where a k-index is expected.

use crate::error::IndexError;
use dmd_lattice::{
    create_gamma_centred_grid, create_monkhorst_pack_grid, GridPoint, MonkhorstPackGrid,
    GRID_TOLERANCE,
};
use nalgebra::Vector3;
use std::marker::PhantomData;

/// Marker for the electron wavevector grid
#[derive(Clone, Copy, Debug)]
pub struct KSpace;
/// Marker for the phonon wavevector grid
#[derive(Clone, Copy, Debug)]
pub struct QSpace;

pub type KIndexMap = IndexMap<KSpace>;
pub type QIndexMap = IndexMap<QSpace>;

/// An ordered reciprocal-space grid with constant-time lookup from coordinate to index
///
/// Points are ordered as `i = (i1 * n2 + i2) * n3 + i3`. Coordinates differing by a reciprocal
/// lattice vector resolve to the same index.
#[derive(Clone, Debug)]
pub struct IndexMap<Space> {
    grid: MonkhorstPackGrid,
    marker: PhantomData<Space>,
}

impl<Space> IndexMap<Space> {
    /// Builds the map over an `n1 x n2 x n3` grid offset by `shift` (in units of the grid spacing)
    pub fn build(divisions: [usize; 3], shift: Vector3<f64>) -> Self {
        Self::from_grid(create_monkhorst_pack_grid(divisions, &shift))
    }

    /// An unshifted grid containing Γ
    pub fn gamma_centred(divisions: [usize; 3]) -> Self {
        Self::from_grid(create_gamma_centred_grid(divisions))
    }

    pub fn from_grid(grid: MonkhorstPackGrid) -> Self {
        Self {
            grid,
            marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn divisions(&self) -> [usize; 3] {
        self.grid.divisions()
    }

    pub fn grid(&self) -> &MonkhorstPackGrid {
        &self.grid
    }

    /// The grid point at `index`
    ///
    /// # Panics
    /// If `index >= self.len()`
    pub fn point(&self, index: usize) -> &GridPoint {
        &self.grid.points()[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &GridPoint> {
        self.grid.points().iter()
    }

    /// The flat index of an integer triplet, wrapped onto the grid
    pub fn index_of_triplet(&self, triplet: [i64; 3]) -> usize {
        let [n1, n2, n3] = self.divisions();
        let wrap = |i: i64, n: usize| i.rem_euclid(n as i64) as usize;
        (wrap(triplet[0], n1) * n2 + wrap(triplet[1], n2)) * n3 + wrap(triplet[2], n3)
    }

    /// The flat index of a fractional coordinate
    pub fn index_of(&self, point: &Vector3<f64>) -> Result<usize, IndexError> {
        if self.is_empty() {
            return Err(IndexError::NotOnGrid {
                point: (*point).into(),
            });
        }
        let coordinate = self.grid.grid_coordinate(point);
        let divisions = self.divisions();
        let mut triplet = [0_i64; 3];
        for axis in 0..3 {
            let nearest = coordinate[axis].round();
            // Tolerance is applied in fractional units, not grid units
            if (coordinate[axis] - nearest).abs() / divisions[axis] as f64 > GRID_TOLERANCE {
                return Err(IndexError::NotOnGrid {
                    point: (*point).into(),
                });
            }
            triplet[axis] = nearest as i64;
        }
        Ok(self.index_of_triplet(triplet))
    }

    /// The index of `-p` for the point at `index`
    pub fn negate(&self, index: usize) -> Result<usize, IndexError> {
        self.index_of(&(-self.point(index).fractional()))
    }
}

impl IndexMap<KSpace> {
    fn combine(
        &self,
        k: usize,
        q: usize,
        q_map: &IndexMap<QSpace>,
        sign: f64,
    ) -> Result<usize, IndexError> {
        let k_point = self.point(k).fractional();
        let q_point = q_map.point(q).fractional();
        let result = k_point + q_point * sign;
        self.index_of(&result).map_err(|_| IndexError::OffGrid {
            k: (*k_point).into(),
            q: (*q_point).into(),
            result: result.into(),
        })
    }

    /// The index of `k - q`, modulo a reciprocal lattice vector
    pub fn difference(
        &self,
        k: usize,
        q: usize,
        q_map: &IndexMap<QSpace>,
    ) -> Result<usize, IndexError> {
        self.combine(k, q, q_map, -1_f64)
    }

    /// The index of `k + q`, modulo a reciprocal lattice vector
    pub fn sum(&self, k: usize, q: usize, q_map: &IndexMap<QSpace>) -> Result<usize, IndexError> {
        self.combine(k, q, q_map, 1_f64)
    }
}

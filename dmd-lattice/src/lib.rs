//! Lattice geometry for the density-matrix dynamics engine.
//!
//! Supplies the crystal lattice, its reciprocal vectors and valley positions, and the uniform
//! Monkhorst-Pack grids on which electron and phonon momenta are sampled. All wavevectors are
//! handled in fractional (reduced) coordinates of the reciprocal lattice unless stated otherwise.

mod generate;
mod grid;
mod lattice;
mod primitives;

pub use generate::*;
pub use grid::*;
pub use lattice::*;
pub use primitives::*;

/// Tolerance, in fractional units, under which two grid coordinates are considered equal
pub const GRID_TOLERANCE: f64 = 1e-8;

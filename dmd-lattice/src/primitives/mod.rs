use crate::GRID_TOLERANCE;
use nalgebra::Vector3;

/// Wraps each fractional component into the half-open unit interval `[0, 1)`
pub fn wrap_fractional(point: &Vector3<f64>) -> Vector3<f64> {
    point.map(|x| {
        let wrapped = x - x.floor();
        // Values within tolerance of the upper edge belong to the periodic image at zero
        if (1_f64 - wrapped).abs() < GRID_TOLERANCE {
            0_f64
        } else {
            wrapped
        }
    })
}

/// A single sample point of a uniform reciprocal-space grid
///
/// The point is stored both as its integer triplet on the grid and as the fractional coordinate
/// it represents. Grid points are immutable once generated.
#[derive(Clone, Debug)]
pub struct GridPoint {
    triplet: [usize; 3],
    fractional: Vector3<f64>,
}

impl GridPoint {
    pub fn new(triplet: [usize; 3], fractional: Vector3<f64>) -> Self {
        Self {
            triplet,
            fractional,
        }
    }

    pub fn triplet(&self) -> [usize; 3] {
        self.triplet
    }

    pub fn fractional(&self) -> &Vector3<f64> {
        &self.fractional
    }

    /// Whether `other` describes the same point modulo a reciprocal lattice vector
    pub fn coincides_with(&self, other: &Vector3<f64>) -> bool {
        let delta = self.fractional - other;
        delta
            .iter()
            .all(|x| (x - x.round()).abs() < GRID_TOLERANCE)
    }
}

impl PartialEq for GridPoint {
    fn eq(&self, other: &Self) -> bool {
        self.coincides_with(&other.fractional)
    }
}

use crate::primitives::GridPoint;
use nalgebra::Vector3;

/// A uniform grid in the first reciprocal cell
#[derive(Clone, Debug)]
pub struct MonkhorstPackGrid {
    divisions: [usize; 3],
    shift: Vector3<f64>,
    points: Vec<GridPoint>,
}

impl MonkhorstPackGrid {
    pub fn from_divisions_and_points(
        divisions: [usize; 3],
        shift: Vector3<f64>,
        points: Vec<GridPoint>,
    ) -> Self {
        Self {
            divisions,
            shift,
            points,
        }
    }

    pub fn divisions(&self) -> [usize; 3] {
        self.divisions
    }

    pub fn shift(&self) -> &Vector3<f64> {
        &self.shift
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Converts a fractional coordinate to the (possibly non-integral) grid coordinate
    /// `k * n - shift` along each axis
    pub fn grid_coordinate(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        Vector3::from_fn(|axis, _| {
            fractional[axis] * self.divisions[axis] as f64 - self.shift[axis]
        })
    }
}

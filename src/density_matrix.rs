//! # Density matrix
//!
//! The reduced single-particle density matrix: one Hermitian band x band matrix per evolved
//! k-point. Diagonal elements are band occupations, off-diagonal elements interband coherences.

use crate::error::PropagationError;
use crate::utilities::matrices::{hermitise, is_hermitian};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

/// Tolerance of the hermiticity check applied to user supplied density matrices
pub(crate) const HERMITICITY_TOLERANCE: f64 = 1e-10;

/// How far an occupation may stray outside `[0, 1]`
const OCCUPATION_TOLERANCE: f64 = 1e-10;

fn check_occupations(
    index: usize,
    occupations: impl IntoIterator<Item = f64>,
) -> Result<(), PropagationError> {
    match occupations.into_iter().find(|occupation| {
        !(-OCCUPATION_TOLERANCE..=1. + OCCUPATION_TOLERANCE).contains(occupation)
    }) {
        Some(occupation) => Err(PropagationError::Occupation { index, occupation }),
        None => Ok(()),
    }
}

/// Which k-points carry a density matrix
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind")]
pub enum DensityMatrixModel {
    /// Every k-point of the grid is evolved, coupled by the collision term
    FullGrid,
    /// A single k-point is evolved under its coherent Hamiltonian and phenomenological dephasing
    SingleK { k_index: usize },
}

impl Default for DensityMatrixModel {
    fn default() -> Self {
        DensityMatrixModel::FullGrid
    }
}

impl DensityMatrixModel {
    /// The grid indices of the evolved k-points
    pub fn k_indices(&self, number_of_k_points: usize) -> Vec<usize> {
        match self {
            DensityMatrixModel::FullGrid => (0..number_of_k_points).collect(),
            DensityMatrixModel::SingleK { k_index } => vec![*k_index],
        }
    }
}

/// The state a propagator is initialised from
#[derive(Clone, Debug)]
pub enum InitialState {
    /// Diagonal occupations, one row per evolved k-point and one column per band
    Occupations(DMatrix<f64>),
    /// Full density matrices, one per evolved k-point
    DensityMatrices(Vec<DMatrix<Complex<f64>>>),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DensityMatrix {
    matrices: Vec<DMatrix<Complex<f64>>>,
}

impl DensityMatrix {
    /// A diagonal density matrix with the given occupations, one row per k-point
    ///
    /// Every occupation must lie in `[0, 1]`.
    pub fn from_occupations(occupations: &DMatrix<f64>) -> Result<Self, PropagationError> {
        for (index, row) in occupations.row_iter().enumerate() {
            check_occupations(index, row.iter().copied())?;
        }
        let matrices = occupations
            .row_iter()
            .map(|row| DMatrix::from_diagonal(&row.transpose().map(Complex::from)))
            .collect();
        Ok(Self { matrices })
    }

    /// Wraps a set of matrices, checking they are square, equally sized and Hermitian, with
    /// eigenvalues in `[0, 1]`
    pub fn from_matrices(matrices: Vec<DMatrix<Complex<f64>>>) -> Result<Self, PropagationError> {
        let number_of_bands = matrices.first().map_or(0, |matrix| matrix.nrows());
        for (index, matrix) in matrices.iter().enumerate() {
            if matrix.shape() != (number_of_bands, number_of_bands) {
                return Err(PropagationError::Shape(format!(
                    "density matrix {index} has shape {:?}, expected {number_of_bands} x {number_of_bands}",
                    matrix.shape()
                )));
            }
            if !is_hermitian(matrix, HERMITICITY_TOLERANCE) {
                return Err(PropagationError::Shape(format!(
                    "density matrix {index} is not Hermitian"
                )));
            }
            check_occupations(index, matrix.symmetric_eigenvalues().iter().copied())?;
        }
        Ok(Self { matrices })
    }

    /// Wraps matrices produced by the propagator, which keeps them Hermitian itself
    pub(crate) fn from_raw(matrices: Vec<DMatrix<Complex<f64>>>) -> Self {
        Self { matrices }
    }

    pub fn from_initial_state(initial: &InitialState) -> Result<Self, PropagationError> {
        match initial {
            InitialState::Occupations(occupations) => Self::from_occupations(occupations),
            InitialState::DensityMatrices(matrices) => Self::from_matrices(matrices.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn number_of_bands(&self) -> usize {
        self.matrices.first().map_or(0, |matrix| matrix.nrows())
    }

    pub fn matrices(&self) -> &[DMatrix<Complex<f64>>] {
        &self.matrices
    }

    pub fn iter(&self) -> impl Iterator<Item = &DMatrix<Complex<f64>>> {
        self.matrices.iter()
    }

    /// `Σ_k Tr ρ_k`
    pub fn particle_number(&self) -> f64 {
        self.matrices.iter().map(|matrix| matrix.trace().re).sum()
    }

    /// Band occupations `ρ_k,nn`, one row per k-point
    pub fn diagonal_occupations(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.len(), self.number_of_bands(), |k, n| {
            self.matrices[k][(n, n)].re
        })
    }

    /// Occupation of each band summed over k-points
    pub fn band_populations(&self) -> DVector<f64> {
        self.matrices
            .iter()
            .fold(DVector::zeros(self.number_of_bands()), |total, matrix| {
                total + matrix.diagonal().map(|element| element.re)
            })
    }

    /// `Σ_k Re Tr(H_k ρ_k)`
    pub fn energy(&self, hamiltonians: &[DMatrix<Complex<f64>>]) -> f64 {
        self.matrices
            .iter()
            .zip(hamiltonians.iter())
            .map(|(rho, hamiltonian)| (hamiltonian * rho).trace().re)
            .sum()
    }

    pub fn is_hermitian(&self, tolerance: f64) -> bool {
        self.matrices
            .iter()
            .all(|matrix| is_hermitian(matrix, tolerance))
    }

    pub fn is_finite(&self) -> bool {
        self.matrices.iter().all(|matrix| {
            matrix
                .iter()
                .all(|element| element.re.is_finite() && element.im.is_finite())
        })
    }

    /// Projects every matrix onto its Hermitian part
    pub fn hermitise(&mut self) {
        self.matrices.iter_mut().for_each(hermitise);
    }
}

#[cfg(test)]
mod test {
    use super::{DensityMatrix, DensityMatrixModel, InitialState};
    use crate::error::PropagationError;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use num_complex::Complex;

    #[test]
    fn occupations_build_diagonal_matrices() {
        let occupations = DMatrix::from_row_slice(2, 2, &[1., 0.25, 0.5, 0.]);
        let rho = DensityMatrix::from_occupations(&occupations).unwrap();
        assert_eq!(rho.len(), 2);
        assert_eq!(rho.number_of_bands(), 2);
        assert_relative_eq!(rho.particle_number(), 1.75);
        assert_eq!(rho.matrices()[0][(0, 1)], Complex::new(0., 0.));
        assert_relative_eq!(rho.band_populations()[0], 1.5);
        assert_eq!(rho.diagonal_occupations(), occupations);
    }

    #[test]
    fn non_hermitian_matrices_are_rejected() {
        let matrix = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex::new(1., 0.),
                Complex::new(0., 0.3),
                Complex::new(0., 0.3),
                Complex::new(0., 0.),
            ],
        );
        assert!(matches!(
            DensityMatrix::from_initial_state(&InitialState::DensityMatrices(vec![matrix])),
            Err(PropagationError::Shape(_))
        ));
    }

    #[test]
    fn occupations_outside_the_unit_interval_are_rejected() {
        let overfilled = DMatrix::from_element(3, 2, 3.);
        assert!(matches!(
            DensityMatrix::from_initial_state(&InitialState::Occupations(overfilled)),
            Err(PropagationError::Occupation { index: 0, .. })
        ));
        let negative = DMatrix::from_row_slice(2, 2, &[1., 0., 0.5, -0.1]);
        assert!(matches!(
            DensityMatrix::from_occupations(&negative),
            Err(PropagationError::Occupation { index: 1, .. })
        ));
    }

    #[test]
    fn matrices_with_eigenvalues_outside_the_unit_interval_are_rejected() {
        // Diagonal elements in [0, 1] but eigenvalues 1.4 and -0.4
        let matrix = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex::new(0.5, 0.),
                Complex::new(0.9, 0.),
                Complex::new(0.9, 0.),
                Complex::new(0.5, 0.),
            ],
        );
        assert!(matches!(
            DensityMatrix::from_matrices(vec![matrix]),
            Err(PropagationError::Occupation { index: 0, .. })
        ));

        let pure = DMatrix::from_element(2, 2, Complex::new(0.5, 0.));
        let random = ::utilities::random_density_matrix(2);
        assert!(DensityMatrix::from_matrices(vec![pure, random]).is_ok());
    }

    #[test]
    fn energy_is_trace_of_hamiltonian_times_density() {
        let rho =
            DensityMatrix::from_occupations(&DMatrix::from_row_slice(1, 2, &[1., 0.5])).unwrap();
        let hamiltonian = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex::new(-1., 0.),
                Complex::new(0.2, 0.),
                Complex::new(0.2, 0.),
                Complex::new(2., 0.),
            ],
        );
        assert_relative_eq!(rho.energy(&[hamiltonian]), -1. + 1.);
    }

    #[test]
    fn single_k_model_evolves_one_point() {
        assert_eq!(DensityMatrixModel::SingleK { k_index: 3 }.k_indices(8), vec![3]);
        assert_eq!(DensityMatrixModel::FullGrid.k_indices(3), vec![0, 1, 2]);
    }
}

use crate::density_matrix::HERMITICITY_TOLERANCE;
use crate::error::PropagationError;
use crate::utilities::matrices::is_hermitian;
use nalgebra::DMatrix;
use num_complex::Complex;

/// A static perturbation added to the band Hamiltonian
#[derive(Clone, Debug)]
pub enum ExternalField {
    /// The same band x band matrix at every k-point
    Uniform(DMatrix<Complex<f64>>),
    /// One matrix per k-point of the full grid
    PerK(Vec<DMatrix<Complex<f64>>>),
}

impl ExternalField {
    pub(crate) fn at(&self, k: usize) -> &DMatrix<Complex<f64>> {
        match self {
            ExternalField::Uniform(matrix) => matrix,
            ExternalField::PerK(matrices) => &matrices[k],
        }
    }

    pub(crate) fn validate(
        &self,
        number_of_bands: usize,
        k_indices: &[usize],
    ) -> Result<(), PropagationError> {
        if let ExternalField::PerK(matrices) = self {
            if let Some(&k) = k_indices.iter().find(|&&k| k >= matrices.len()) {
                return Err(PropagationError::Shape(format!(
                    "the external field has {} k-points, but k-point {k} is evolved",
                    matrices.len()
                )));
            }
        }
        for &k in k_indices {
            let matrix = self.at(k);
            if matrix.shape() != (number_of_bands, number_of_bands) {
                return Err(PropagationError::Shape(format!(
                    "the external field at k-point {k} has shape {:?}, expected {number_of_bands} x {number_of_bands}",
                    matrix.shape()
                )));
            }
            if !is_hermitian(matrix, HERMITICITY_TOLERANCE) {
                return Err(PropagationError::Shape(format!(
                    "the external field at k-point {k} is not Hermitian"
                )));
            }
        }
        Ok(())
    }
}

pub mod structures;

use nalgebra::DMatrix;
use num_complex::Complex;
use rand::{thread_rng, Rng};

/// A random Hermitian matrix with entries drawn from `[-1, 1)`
pub fn random_hermitian_matrix(dimension: usize) -> DMatrix<Complex<f64>> {
    let mut rng = thread_rng();
    let matrix = DMatrix::from_fn(dimension, dimension, |_, _| {
        Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
    });
    (&matrix + matrix.adjoint()) * Complex::from(0.5)
}

/// A random single-particle density matrix, Hermitian with eigenvalues in `[0, 1]`
pub fn random_density_matrix(dimension: usize) -> DMatrix<Complex<f64>> {
    let mut rng = thread_rng();
    let eigenvectors = random_hermitian_matrix(dimension).symmetric_eigen().eigenvectors;
    let occupations = DMatrix::from_diagonal(&nalgebra::DVector::from_fn(dimension, |_, _| {
        Complex::from(rng.gen_range(0.0..=1.0))
    }));
    &eigenvectors * occupations * eigenvectors.adjoint()
}

use nalgebra::DMatrix;
use num_complex::Complex;

/// Scale used to make the hermiticity tests relative, never smaller than one
fn scale(matrix: &DMatrix<Complex<f64>>) -> f64 {
    matrix
        .iter()
        .map(|element| element.norm())
        .fold(1_f64, f64::max)
}

/// Tests for hermiticity of a matrix
pub(crate) fn is_hermitian(matrix: &DMatrix<Complex<f64>>, tolerance: f64) -> bool {
    if !matrix.is_square() {
        return false;
    }
    let scale = scale(matrix);
    let adjoint = matrix.adjoint();
    matrix
        .iter()
        .zip(adjoint.iter())
        .all(|(element, adjoint_element)| (element - adjoint_element).norm() <= tolerance * scale)
}

/// Tests for anti-hermiticity of a matrix
pub(crate) fn is_anti_hermitian(matrix: &DMatrix<Complex<f64>>, tolerance: f64) -> bool {
    if !matrix.is_square() {
        return false;
    }
    let scale = scale(matrix);
    let adjoint = matrix.adjoint();
    matrix
        .iter()
        .zip(adjoint.iter())
        .all(|(element, adjoint_element)| (element + adjoint_element).norm() <= tolerance * scale)
}

/// Replaces `matrix` by its Hermitian part `(A + A†) / 2`
pub(crate) fn hermitise(matrix: &mut DMatrix<Complex<f64>>) {
    let adjoint = matrix.adjoint();
    *matrix += adjoint;
    *matrix *= Complex::from(0.5);
}

/// The anticommutator `AB + BA`
pub(crate) fn anticommutator(
    a: &DMatrix<Complex<f64>>,
    b: &DMatrix<Complex<f64>>,
) -> DMatrix<Complex<f64>> {
    a * b + b * a
}

#[cfg(test)]
mod test {
    use super::{anticommutator, hermitise, is_anti_hermitian, is_hermitian};
    use nalgebra::DMatrix;
    use num_complex::Complex;

    #[test]
    fn real_non_hermitian_matrix_returns_false() {
        let matrix = DMatrix::from_row_slice(3, 3, &[1., 2., 3., 4., 5., 6., 7., 8., 9.])
            .map(Complex::from);
        assert!(!is_hermitian(&matrix, 1e-12));
    }

    #[test]
    fn real_hermitian_matrix_returns_true() {
        let matrix = DMatrix::from_row_slice(3, 3, &[1., 2., 3., 2., 5., 6., 3., 6., 9.])
            .map(Complex::from);
        assert!(is_hermitian(&matrix, 1e-12));
    }

    #[test]
    fn complex_hermitian_matrices_return_true() {
        let matrix = DMatrix::from_row_slice(
            3,
            3,
            &[
                Complex::new(1., 0.),
                Complex::new(1., -2.),
                Complex::new(0., 0.),
                Complex::new(1., 2.),
                Complex::new(0., 0.),
                Complex::new(0., -1.),
                Complex::new(0., 0.),
                Complex::new(0., 1.),
                Complex::new(1., 0.),
            ],
        );
        assert!(is_hermitian(&matrix, 1e-12));
        assert!(!is_anti_hermitian(&matrix, 1e-12));
    }

    #[test]
    fn anti_hermitian_matrix_returns_true() {
        let matrix = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex::new(0., -1.),
                Complex::new(2., 1.),
                Complex::new(-2., 1.),
                Complex::new(0., 0.),
            ],
        );
        assert!(is_anti_hermitian(&matrix, 1e-12));
        assert!(!is_hermitian(&matrix, 1e-12));
    }

    #[test]
    fn hermitised_matrices_are_hermitian() {
        let mut matrix = DMatrix::from_fn(4, 4, |i, j| Complex::new(i as f64, (j * j) as f64));
        hermitise(&mut matrix);
        assert!(is_hermitian(&matrix, 1e-14));
    }

    #[test]
    fn anticommutators_of_hermitian_matrices_are_hermitian() {
        for dimension in 1..6 {
            let a = ::utilities::random_hermitian_matrix(dimension);
            let b = ::utilities::random_density_matrix(dimension);
            assert!(is_hermitian(&a, 1e-14));
            assert!(is_hermitian(&b, 1e-12));
            assert!(is_hermitian(&anticommutator(&a, &b), 1e-12));
            let commutator = &a * &b - &b * &a;
            assert!(is_anti_hermitian(&commutator, 1e-12));
        }
    }
}

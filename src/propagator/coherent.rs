use super::field::ExternalField;
use crate::bands::BandStructure;
use crate::error::PropagationError;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

/// The coherent Hamiltonian of each evolved k-point with its eigendecomposition
#[derive(Clone, Debug)]
pub(crate) struct CoherentCache {
    hamiltonians: Vec<DMatrix<Complex<f64>>>,
    eigenvalues: Vec<DVector<f64>>,
    eigenvectors: Vec<DMatrix<Complex<f64>>>,
    /// Half-step propagators `exp(-iH dt/2)` and the `dt` they were built for
    half_step: Option<(f64, Vec<DMatrix<Complex<f64>>>)>,
}

impl CoherentCache {
    /// `H_k = diag(E(k)) + field`, for each k in `k_indices`
    pub(crate) fn build(
        bands: &BandStructure,
        k_indices: &[usize],
        field: Option<&ExternalField>,
    ) -> Result<Self, PropagationError> {
        let number_of_bands = bands.number_of_bands();
        if let Some(field) = field {
            field.validate(number_of_bands, k_indices)?;
        }
        let hamiltonians = k_indices
            .iter()
            .map(|&k| {
                let mut hamiltonian =
                    DMatrix::from_diagonal(&bands.energies_at(k).map(Complex::from));
                if let Some(field) = field {
                    hamiltonian += field.at(k);
                }
                hamiltonian
            })
            .collect::<Vec<_>>();
        let (eigenvalues, eigenvectors) = hamiltonians
            .iter()
            .map(|hamiltonian| {
                let decomposition = hamiltonian.clone().symmetric_eigen();
                (decomposition.eigenvalues, decomposition.eigenvectors)
            })
            .unzip();
        Ok(Self {
            hamiltonians,
            eigenvalues,
            eigenvectors,
            half_step: None,
        })
    }

    pub(crate) fn hamiltonians(&self) -> &[DMatrix<Complex<f64>>] {
        &self.hamiltonians
    }

    /// The lowest eigenvalue over all evolved k-points
    pub(crate) fn minimum_energy(&self) -> f64 {
        self.eigenvalues
            .iter()
            .map(|values| values.min())
            .fold(f64::INFINITY, f64::min)
    }

    pub(crate) fn maximum_energy(&self) -> f64 {
        self.eigenvalues
            .iter()
            .map(|values| values.max())
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// `V exp(-iE t) V†` for the evolved k-point at position `index`
    fn unitary(&self, index: usize, time: f64) -> DMatrix<Complex<f64>> {
        let phases = self.eigenvalues[index].map(|energy| Complex::new(0., -energy * time).exp());
        let eigenvectors = &self.eigenvectors[index];
        eigenvectors * DMatrix::from_diagonal(&phases) * eigenvectors.adjoint()
    }

    /// Makes the half-step propagators for `dt` available
    pub(crate) fn prepare(&mut self, dt: f64) {
        if matches!(&self.half_step, Some((cached, _)) if *cached == dt) {
            return;
        }
        let unitaries = (0..self.hamiltonians.len())
            .map(|index| self.unitary(index, dt / 2.))
            .collect();
        self.half_step = Some((dt, unitaries));
    }

    /// Applies `ρ → U ρ U†` with the half-step propagators last passed to `prepare`
    pub(crate) fn evolve_half_step(
        &self,
        rho: &[DMatrix<Complex<f64>>],
    ) -> Vec<DMatrix<Complex<f64>>> {
        match &self.half_step {
            Some((_, unitaries)) => rho
                .iter()
                .zip(unitaries.iter())
                .map(|(matrix, unitary)| unitary * matrix * unitary.adjoint())
                .collect(),
            None => rho.to_vec(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::CoherentCache;
    use crate::bands::BandStructure;
    use crate::propagator::ExternalField;
    use crate::utilities::matrices::is_anti_hermitian;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use num_complex::Complex;

    #[test]
    fn half_steps_compose_to_the_exact_unitary() {
        let bands = BandStructure::flat(1, &[0., 0.3]).unwrap();
        let coupling = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex::new(0., 0.),
                Complex::new(0.1, 0.),
                Complex::new(0.1, 0.),
                Complex::new(0., 0.),
            ],
        );
        let field = ExternalField::Uniform(coupling);
        let mut cache = CoherentCache::build(&bands, &[0], Some(&field)).unwrap();
        cache.prepare(0.5);
        let rho = vec![DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
            Complex::new(1., 0.),
            Complex::new(0., 0.),
        ]))];
        let evolved = cache.evolve_half_step(&cache.evolve_half_step(&rho));
        let unitary = cache.unitary(0, 0.5);
        let expected = &unitary * &rho[0] * unitary.adjoint();
        assert_relative_eq!(evolved[0], expected, epsilon = 1e-13);
        let hamiltonian = &cache.hamiltonians()[0];
        let commutator = hamiltonian * &evolved[0] - &evolved[0] * hamiltonian;
        assert!(is_anti_hermitian(&commutator, 1e-12));
    }

    #[test]
    fn energy_bounds_follow_the_eigenvalues() {
        let bands = BandStructure::flat(3, &[-0.1, 0.4]).unwrap();
        let cache = CoherentCache::build(&bands, &[0, 1, 2], None).unwrap();
        assert_relative_eq!(cache.minimum_energy(), -0.1);
        assert_relative_eq!(cache.maximum_energy(), 0.4);
    }
}

//! # Band structure
//!
//! Band energies sampled on the k-grid together with the equilibrium occupation functions used to
//! seed the density matrix and the screening.

use crate::error::BuildError;
use crate::index_map::KIndexMap;
use dmd_lattice::Lattice;
use nalgebra::{DMatrix, DVector};

/// Electronic band energies, one row per k-point and one column per band, in Hartree
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BandStructure {
    energies: DMatrix<f64>,
}

/// The Fermi-Dirac occupation of a state at `energy`
pub fn fermi_dirac(energy: f64, chemical_potential: f64, temperature: f64) -> f64 {
    if temperature <= 0. {
        return if energy < chemical_potential {
            1.
        } else if energy > chemical_potential {
            0.
        } else {
            0.5
        };
    }
    let exponent = (energy - chemical_potential) / temperature;
    // Written in terms of exp(-|x|) so neither tail overflows
    if exponent > 0. {
        let decay = (-exponent).exp();
        decay / (1. + decay)
    } else {
        1. / (1. + exponent.exp())
    }
}

impl BandStructure {
    pub fn from_energies(energies: DMatrix<f64>) -> Result<Self, BuildError> {
        if energies.iter().any(|energy| !energy.is_finite()) {
            return Err(BuildError::Configuration(
                "band energies must be finite".into(),
            ));
        }
        Ok(Self { energies })
    }

    /// Dispersionless bands, identical at every k-point
    pub fn flat(number_of_k_points: usize, energies: &[f64]) -> Result<Self, BuildError> {
        Self::from_energies(DMatrix::from_fn(
            number_of_k_points,
            energies.len(),
            |_, band| energies[band],
        ))
    }

    /// Parabolic bands `E_n(k) = offset_n + |k - K_v|^2 / 2 m_n`
    ///
    /// Wavevectors are measured from the nearest valley centre when the lattice defines valleys and
    /// `k` falls inside one of them, and from the zone centre otherwise.
    pub fn parabolic(
        k_map: &KIndexMap,
        lattice: &Lattice,
        offsets: &[f64],
        effective_masses: &[f64],
    ) -> Result<Self, BuildError> {
        if offsets.len() != effective_masses.len() {
            return Err(BuildError::Shape(format!(
                "{} band offsets were given for {} effective masses",
                offsets.len(),
                effective_masses.len()
            )));
        }
        if effective_masses.iter().any(|&mass| mass <= 0.) {
            return Err(BuildError::Configuration(
                "effective masses must be positive".into(),
            ));
        }
        let squared_wavevectors = k_map
            .iter()
            .map(|point| {
                let k = point.fractional();
                match lattice.valley_of(k) {
                    Some(valley) => {
                        let centre = lattice.valleys()[valley];
                        lattice.cartesian_norm(&(k - centre)).powi(2)
                    }
                    None => lattice.cartesian_norm(k).powi(2),
                }
            })
            .collect::<Vec<_>>();
        Self::from_energies(DMatrix::from_fn(
            k_map.len(),
            offsets.len(),
            |k, band| offsets[band] + squared_wavevectors[k] / (2. * effective_masses[band]),
        ))
    }

    pub fn number_of_bands(&self) -> usize {
        self.energies.ncols()
    }

    pub fn number_of_k_points(&self) -> usize {
        self.energies.nrows()
    }

    pub fn energy(&self, k: usize, band: usize) -> f64 {
        self.energies[(k, band)]
    }

    /// Band energies at the k-point `k`
    pub fn energies_at(&self, k: usize) -> DVector<f64> {
        self.energies.row(k).transpose()
    }

    pub fn energies(&self) -> &DMatrix<f64> {
        &self.energies
    }

    pub fn minimum(&self) -> f64 {
        self.energies.min()
    }

    pub fn maximum(&self) -> f64 {
        self.energies.max()
    }

    /// Fermi-Dirac occupations of every state
    pub fn occupations(&self, chemical_potential: f64, temperature: f64) -> DMatrix<f64> {
        self.energies
            .map(|energy| fermi_dirac(energy, chemical_potential, temperature))
    }

    /// Finds the chemical potential placing `electrons_per_k_point` electrons in each k-point on
    /// average, by bisection
    pub fn chemical_potential(
        &self,
        electrons_per_k_point: f64,
        temperature: f64,
    ) -> Result<f64, BuildError> {
        let number_of_k_points = self.number_of_k_points() as f64;
        if electrons_per_k_point <= 0. || electrons_per_k_point >= self.number_of_bands() as f64 {
            return Err(BuildError::Configuration(format!(
                "{electrons_per_k_point} electrons cannot be placed in {} bands",
                self.number_of_bands()
            )));
        }
        let count = |mu: f64| self.occupations(mu, temperature).sum() / number_of_k_points;
        let margin = 50. * temperature.max(1e-3);
        let (mut lower, mut upper) = (self.minimum() - margin, self.maximum() + margin);
        for _ in 0..200 {
            let middle = 0.5 * (lower + upper);
            if count(middle) < electrons_per_k_point {
                lower = middle;
            } else {
                upper = middle;
            }
            if upper - lower < 1e-14 * (1. + middle.abs()) {
                break;
            }
        }
        Ok(0.5 * (lower + upper))
    }
}

#[cfg(test)]
mod test {
    use super::{fermi_dirac, BandStructure};
    use crate::index_map::KIndexMap;
    use approx::assert_relative_eq;
    use dmd_lattice::Lattice;
    use nalgebra::Vector3;

    #[test]
    fn fermi_dirac_is_half_at_the_chemical_potential_and_does_not_overflow() {
        assert_relative_eq!(fermi_dirac(0.3, 0.3, 0.01), 0.5);
        assert_relative_eq!(fermi_dirac(1e3, 0., 1e-3), 0.);
        assert_relative_eq!(fermi_dirac(-1e3, 0., 1e-3), 1.);
        assert_relative_eq!(fermi_dirac(-1., 0., 0.), 1.);
    }

    #[test]
    fn chemical_potential_of_half_filled_symmetric_bands_is_midgap() {
        let bands = BandStructure::flat(4, &[-0.2, 0.2]).unwrap();
        let mu = bands.chemical_potential(1., 0.01).unwrap();
        assert_relative_eq!(mu, 0., epsilon = 1e-10);
    }

    #[test]
    fn impossible_fillings_are_rejected() {
        let bands = BandStructure::flat(4, &[-0.2, 0.2]).unwrap();
        assert!(bands.chemical_potential(2.5, 0.01).is_err());
    }

    #[test]
    fn parabolic_bands_have_minimum_at_gamma() {
        let k_map = KIndexMap::build([4, 4, 1], Vector3::zeros());
        let lattice = Lattice::cubic(6.).unwrap();
        let bands = BandStructure::parabolic(&k_map, &lattice, &[0.1], &[0.5]).unwrap();
        assert_relative_eq!(bands.energy(0, 0), 0.1);
        assert_relative_eq!(bands.minimum(), 0.1);
        // Points related by inversion have the same energy
        let k = k_map.index_of(&Vector3::new(0.25, 0., 0.)).unwrap();
        let minus_k = k_map.index_of(&Vector3::new(-0.25, 0., 0.)).unwrap();
        assert_relative_eq!(bands.energy(k, 0), bands.energy(minus_k, 0));
    }
}

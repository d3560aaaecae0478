//! # Phonons
//!
//! Phonon frequencies and occupations per (q, mode). Occupations start at their Bose-Einstein
//! equilibrium values and, when hot phonons are enabled, are evolved by the propagator.

use crate::constants::FREQUENCY_FLOOR;
use crate::error::BuildError;
use crate::index_map::QIndexMap;
use dmd_lattice::Lattice;
use nalgebra::DMatrix;

/// The dispersion of a single phonon branch
#[derive(Clone, Copy, Debug, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind")]
pub enum PhononDispersion {
    /// A dispersionless optical branch
    Einstein { energy: f64 },
    /// A linear acoustic branch `ω = v|q|`, capped at the Debye energy
    Acoustic {
        sound_velocity: f64,
        debye_energy: f64,
    },
}

impl PhononDispersion {
    fn frequency(&self, q_norm: f64) -> f64 {
        match self {
            PhononDispersion::Einstein { energy } => *energy,
            PhononDispersion::Acoustic {
                sound_velocity,
                debye_energy,
            } => (sound_velocity * q_norm).min(*debye_energy),
        }
    }
}

/// The Bose-Einstein occupation at frequency `frequency` and temperature `temperature`
///
/// The frequency is floored so soft modes at the zone centre give a large but finite occupation.
pub fn bose_einstein(frequency: f64, temperature: f64) -> f64 {
    if temperature <= 0. {
        return 0.;
    }
    1. / (frequency.max(FREQUENCY_FLOOR) / temperature).exp_m1()
}

#[derive(Clone, Debug)]
pub struct PhononModel {
    /// Frequencies, one row per q-point and one column per mode
    frequencies: DMatrix<f64>,
    occupations: DMatrix<f64>,
    equilibrium: DMatrix<f64>,
    temperature: f64,
}

impl PhononModel {
    /// A phonon bath in thermal equilibrium at `temperature`
    pub fn equilibrium(frequencies: DMatrix<f64>, temperature: f64) -> Result<Self, BuildError> {
        if frequencies.iter().any(|&frequency| frequency < 0. || !frequency.is_finite()) {
            return Err(BuildError::Configuration(
                "phonon frequencies must be finite and non-negative".into(),
            ));
        }
        let equilibrium = frequencies.map(|frequency| bose_einstein(frequency, temperature));
        Ok(Self {
            frequencies,
            occupations: equilibrium.clone(),
            equilibrium,
            temperature,
        })
    }

    /// Evaluates each branch dispersion at the Cartesian length of every q-point
    pub fn from_dispersions(
        q_map: &QIndexMap,
        lattice: &Lattice,
        branches: &[PhononDispersion],
        temperature: f64,
    ) -> Result<Self, BuildError> {
        let q_norms = q_map
            .iter()
            .map(|point| lattice.cartesian_norm(point.fractional()))
            .collect::<Vec<_>>();
        let frequencies = DMatrix::from_fn(q_map.len(), branches.len(), |q, mode| {
            branches[mode].frequency(q_norms[q])
        });
        Self::equilibrium(frequencies, temperature)
    }

    pub fn number_of_modes(&self) -> usize {
        self.frequencies.ncols()
    }

    pub fn number_of_q_points(&self) -> usize {
        self.frequencies.nrows()
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn frequency(&self, q: usize, mode: usize) -> f64 {
        self.frequencies[(q, mode)]
    }

    pub fn frequencies(&self) -> &DMatrix<f64> {
        &self.frequencies
    }

    pub fn occupation(&self, q: usize, mode: usize) -> f64 {
        self.occupations[(q, mode)]
    }

    pub fn equilibrium_occupation(&self, q: usize, mode: usize) -> f64 {
        self.equilibrium[(q, mode)]
    }

    pub fn occupations(&self) -> &DMatrix<f64> {
        &self.occupations
    }

    /// Replaces the occupations, used when restoring a checkpoint
    pub fn set_occupations(&mut self, occupations: DMatrix<f64>) -> Result<(), BuildError> {
        if occupations.shape() != self.frequencies.shape() {
            return Err(BuildError::Shape(format!(
                "phonon occupations of shape {:?} do not match the {:?} phonon grid",
                occupations.shape(),
                self.frequencies.shape()
            )));
        }
        self.occupations = occupations;
        Ok(())
    }

    /// Mean phonon energy per q-point, `Σ ω n / N_q`
    pub fn energy(&self) -> f64 {
        if self.number_of_q_points() == 0 {
            return 0.;
        }
        self.frequencies.component_mul(&self.occupations).sum() / self.number_of_q_points() as f64
    }

    /// Adds `delta` to one occupation, which is clamped at zero
    pub fn add_occupation(&mut self, q: usize, mode: usize, delta: f64) {
        let occupation = &mut self.occupations[(q, mode)];
        *occupation = (*occupation + delta).max(0.);
    }

    /// Relaxes every occupation towards equilibrium over a step `dt` with lifetime `relaxation_time`
    pub fn relax_towards_equilibrium(&mut self, dt: f64, relaxation_time: f64) {
        let decay = (-dt / relaxation_time).exp();
        for (occupation, equilibrium) in self.occupations.iter_mut().zip(self.equilibrium.iter()) {
            *occupation = (equilibrium + (*occupation - equilibrium) * decay).max(0.);
        }
    }
}

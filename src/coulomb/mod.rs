//! # Coulomb interaction
//!
//! The bare Coulomb kernel on the q-grid, its screening by the random phase approximation and
//! the resulting screened interaction `W(q, ω) = V(q) / ε(q, ω)`.
//!
//! The bare kernel already carries the Brillouin-zone normalisation `1 / (Ω N_k)`, so the
//! independent-particle response is a plain sum over the k-grid:
//!
//! `χ₀(q, ω) = g_s Σ_k Σ_nm F_nm (f_n(k) - f_m(k+q)) / (E_n(k) - E_m(k+q) + ω + iη)`
//!
//! Band states carry no wavefunctions, so the overlaps are modelled: `F_nn = 1` and every
//! interband pair shares the configured `interband_overlap`. Zero restricts the sum to intraband
//! transitions.
//!
//! Equal weights on a periodic grid are the trapezium rule, which converges exponentially for the
//! smooth periodic integrand; the resolvent broadening `η` regularises resonant denominators.

mod screening;

pub use screening::ScreeningMatrix;

use crate::bands::BandStructure;
use crate::error::{BuildError, ScreeningError};
use crate::heg::HomogeneousElectronGas;
use crate::index_map::{KIndexMap, QIndexMap};
use dmd_lattice::{Lattice, GRID_TOLERANCE};
use nalgebra::DMatrix;
use num_complex::Complex;
use rayon::prelude::*;
use std::f64::consts::PI;

/// How the bare interaction is screened
#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind")]
pub enum ScreeningKind {
    /// Band-resolved Lindhard sum over the k-grid
    Rpa,
    /// Static finite-temperature Lindhard response of a parabolic electron gas
    HomogeneousGas(HomogeneousElectronGas),
    /// No screening, `ε = 1`
    Unscreened,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CoulombSettings {
    /// Relative permittivity of the background
    pub background_permittivity: f64,
    /// Wavevector `λ` added in quadrature to `|q|` in the bare kernel, in bohr⁻¹
    pub regularization: Option<f64>,
    /// Resolvent broadening `η` of the Lindhard sum, in Hartree
    pub broadening: f64,
    pub spin_degeneracy: f64,
    /// Overlap factor `F_nm` of the interband terms of the Lindhard sum
    pub interband_overlap: f64,
    pub kind: ScreeningKind,
}

/// The Drude dielectric function `1 - ω_p² / (ω (ω + iτ⁻¹))`
///
/// The frequency is floored at `1e-6` so the static limit stays finite.
pub fn drude_dielectric(
    frequency: f64,
    inverse_lifetime: f64,
    plasma_frequency_squared: f64,
) -> Complex<f64> {
    let frequency = frequency.max(1e-6);
    Complex::from(1.)
        - plasma_frequency_squared / (frequency * Complex::new(frequency, inverse_lifetime))
}

#[derive(Clone, Debug)]
pub struct CoulombModel {
    settings: CoulombSettings,
    /// Cartesian length of the minimal image of each q-point
    q_norms: Vec<f64>,
    unit_cell_volume: f64,
    number_of_k_points: usize,
    energies: DMatrix<f64>,
    occupations: DMatrix<f64>,
    /// `k_plus_q[q][k]` is the index of `k + q`
    k_plus_q: Vec<Vec<usize>>,
    /// Reduced chemical potential of the homogeneous gas, when that screening is used
    gas_alpha: Option<f64>,
    screening: Option<ScreeningMatrix>,
}

/// Builder for a `CoulombModel`
pub struct CoulombModelBuilder<RefLattice, RefK, RefQ, RefBands> {
    lattice: RefLattice,
    k_map: RefK,
    q_map: RefQ,
    bands: RefBands,
    settings: Option<CoulombSettings>,
    occupations: Option<DMatrix<f64>>,
}

impl CoulombModelBuilder<(), (), (), ()> {
    pub fn new() -> Self {
        Self {
            lattice: (),
            k_map: (),
            q_map: (),
            bands: (),
            settings: None,
            occupations: None,
        }
    }
}

impl Default for CoulombModelBuilder<(), (), (), ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<RefLattice, RefK, RefQ, RefBands> CoulombModelBuilder<RefLattice, RefK, RefQ, RefBands> {
    pub fn with_lattice(
        self,
        lattice: &Lattice,
    ) -> CoulombModelBuilder<&Lattice, RefK, RefQ, RefBands> {
        CoulombModelBuilder {
            lattice,
            k_map: self.k_map,
            q_map: self.q_map,
            bands: self.bands,
            settings: self.settings,
            occupations: self.occupations,
        }
    }

    pub fn with_k_map(
        self,
        k_map: &KIndexMap,
    ) -> CoulombModelBuilder<RefLattice, &KIndexMap, RefQ, RefBands> {
        CoulombModelBuilder {
            lattice: self.lattice,
            k_map,
            q_map: self.q_map,
            bands: self.bands,
            settings: self.settings,
            occupations: self.occupations,
        }
    }

    pub fn with_q_map(
        self,
        q_map: &QIndexMap,
    ) -> CoulombModelBuilder<RefLattice, RefK, &QIndexMap, RefBands> {
        CoulombModelBuilder {
            lattice: self.lattice,
            k_map: self.k_map,
            q_map,
            bands: self.bands,
            settings: self.settings,
            occupations: self.occupations,
        }
    }

    pub fn with_band_structure(
        self,
        bands: &BandStructure,
    ) -> CoulombModelBuilder<RefLattice, RefK, RefQ, &BandStructure> {
        CoulombModelBuilder {
            lattice: self.lattice,
            k_map: self.k_map,
            q_map: self.q_map,
            bands,
            settings: self.settings,
            occupations: self.occupations,
        }
    }

    pub fn with_settings(self, settings: CoulombSettings) -> Self {
        Self {
            settings: Some(settings),
            ..self
        }
    }

    /// Occupations `f_n(k)` entering the Lindhard sum, one row per k-point
    pub fn with_occupations(self, occupations: DMatrix<f64>) -> Self {
        Self {
            occupations: Some(occupations),
            ..self
        }
    }
}

impl<'a> CoulombModelBuilder<&'a Lattice, &'a KIndexMap, &'a QIndexMap, &'a BandStructure> {
    #[tracing::instrument(name = "Coulomb model builder", level = "info", skip(self))]
    pub fn build(self) -> Result<CoulombModel, BuildError> {
        let settings = self.settings.ok_or_else(|| {
            BuildError::Configuration("the Coulomb model needs its settings".into())
        })?;
        if settings.background_permittivity <= 0. {
            return Err(BuildError::Configuration(
                "the background permittivity must be positive".into(),
            ));
        }
        let energies = self.bands.energies().clone();
        let occupations = self
            .occupations
            .unwrap_or_else(|| DMatrix::zeros(energies.nrows(), energies.ncols()));
        if occupations.shape() != energies.shape() || energies.nrows() != self.k_map.len() {
            return Err(BuildError::Shape(format!(
                "occupations {:?} and band energies {:?} must both cover the {} k-points",
                occupations.shape(),
                energies.shape(),
                self.k_map.len()
            )));
        }

        let q_norms = self
            .q_map
            .iter()
            .map(|point| self.lattice.cartesian_norm(point.fractional()))
            .collect();

        let k_plus_q = match settings.kind {
            ScreeningKind::Rpa => (0..self.q_map.len())
                .map(|q| {
                    (0..self.k_map.len())
                        .map(|k| self.k_map.sum(k, q, self.q_map))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        let gas_alpha = match settings.kind {
            ScreeningKind::HomogeneousGas(gas) => {
                let alpha = gas.solve_alpha()?;
                tracing::info!("Electron gas reduced chemical potential {alpha}");
                Some(alpha)
            }
            _ => None,
        };

        Ok(CoulombModel {
            settings,
            q_norms,
            unit_cell_volume: self.lattice.unit_cell_volume(),
            number_of_k_points: self.k_map.len(),
            energies,
            occupations,
            k_plus_q,
            gas_alpha,
            screening: None,
        })
    }
}

impl CoulombModel {
    pub fn settings(&self) -> &CoulombSettings {
        &self.settings
    }

    pub fn number_of_q_points(&self) -> usize {
        self.q_norms.len()
    }

    /// The bare kernel `V(q) = 4π / (ε_bg Ω N_k (|q|² + λ²))`
    pub fn bare_coulomb(&self, q: usize) -> Result<Complex<f64>, ScreeningError> {
        let q_norm = self.q_norms[q];
        let regularization = self.settings.regularization.unwrap_or(0.);
        if self.settings.regularization.is_none() && q_norm < GRID_TOLERANCE {
            return Err(ScreeningError::Divergent { q, frequency: 0. });
        }
        let value = 4. * PI
            / (self.settings.background_permittivity
                * self.unit_cell_volume
                * self.number_of_k_points as f64
                * (q_norm * q_norm + regularization * regularization));
        if value.is_finite() {
            Ok(Complex::from(value))
        } else {
            Err(ScreeningError::Divergent { q, frequency: 0. })
        }
    }

    /// The independent-particle response `χ₀(q, ω)` summed over the k-grid and band pairs
    fn lindhard_sum(&self, q: usize, frequency: f64) -> Complex<f64> {
        let resolvent_shift = Complex::new(frequency, self.settings.broadening);
        let number_of_bands = self.energies.ncols();
        let sum = self.k_plus_q[q]
            .iter()
            .enumerate()
            .map(|(k, &k_plus_q)| {
                (0..number_of_bands)
                    .flat_map(|n| (0..number_of_bands).map(move |m| (n, m)))
                    .map(|(n, m)| {
                        let overlap = if n == m {
                            1.
                        } else {
                            self.settings.interband_overlap
                        };
                        let weight = self.occupations[(k, n)] - self.occupations[(k_plus_q, m)];
                        if overlap == 0. || weight == 0. {
                            return Complex::from(0.);
                        }
                        let denominator = self.energies[(k, n)] - self.energies[(k_plus_q, m)]
                            + resolvent_shift;
                        overlap * weight / denominator
                    })
                    .sum::<Complex<f64>>()
            })
            .sum::<Complex<f64>>();
        sum * self.settings.spin_degeneracy
    }

    /// The RPA dielectric function `ε(q, ω) = 1 - V(q) χ₀(q, ω)`
    pub fn rpa_dielectric(&self, q: usize, frequency: f64) -> Result<Complex<f64>, ScreeningError> {
        let bare = self.bare_coulomb(q)?;
        let dielectric = match self.settings.kind {
            ScreeningKind::Unscreened => Complex::from(1.),
            ScreeningKind::Rpa => Complex::from(1.) - bare * self.lindhard_sum(q, frequency),
            ScreeningKind::HomogeneousGas(gas) => {
                let alpha = self
                    .gas_alpha
                    .ok_or(ScreeningError::Divergent { q, frequency })?;
                let polarizability = gas
                    .static_polarizability_at(self.q_norms[q], alpha)
                    .map_err(|_| ScreeningError::Divergent { q, frequency })?;
                // Undo the grid normalisation carried by the bare kernel
                Complex::from(1.)
                    + bare
                        * self.unit_cell_volume
                        * self.number_of_k_points as f64
                        * polarizability
            }
        };
        if dielectric.re.is_finite() && dielectric.im.is_finite() && dielectric.norm() > 0. {
            Ok(dielectric)
        } else {
            Err(ScreeningError::Divergent { q, frequency })
        }
    }

    /// The screened interaction `W(q, ω) = V(q) / ε(q, ω)`
    pub fn screened_interaction(
        &self,
        q: usize,
        frequency: f64,
    ) -> Result<Complex<f64>, ScreeningError> {
        let screened = self.bare_coulomb(q)? / self.rpa_dielectric(q, frequency)?;
        if screened.re.is_finite() && screened.im.is_finite() {
            Ok(screened)
        } else {
            Err(ScreeningError::Divergent { q, frequency })
        }
    }

    /// Evaluates the dielectric function for every q-point at each of `frequencies`, in parallel
    /// over q
    #[tracing::instrument(name = "Screening matrix", level = "info", skip(self, frequencies))]
    pub fn build_screening_matrix(
        &self,
        frequencies: &[f64],
    ) -> Result<ScreeningMatrix, ScreeningError> {
        let rows = (0..self.number_of_q_points())
            .into_par_iter()
            .map(|q| {
                frequencies
                    .iter()
                    .map(|&frequency| self.rpa_dielectric(q, frequency))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScreeningMatrix::from_rows(frequencies.to_vec(), rows))
    }

    /// The cached screening matrix, rebuilt if missing or held at different frequencies
    pub fn screening_matrix(
        &mut self,
        frequencies: &[f64],
    ) -> Result<&ScreeningMatrix, ScreeningError> {
        let matrix = match self.screening.take() {
            Some(matrix) if matrix.frequencies() == frequencies => matrix,
            _ => self.build_screening_matrix(frequencies)?,
        };
        Ok(&*self.screening.insert(matrix))
    }

    pub fn cached_screening(&self) -> Option<&ScreeningMatrix> {
        self.screening.as_ref()
    }

    /// Installs a screening matrix read from disk
    pub fn set_screening(&mut self, screening: ScreeningMatrix) -> Result<(), BuildError> {
        if screening.number_of_q_points() != self.number_of_q_points() {
            return Err(BuildError::Shape(format!(
                "screening matrix covers {} q-points, the model has {}",
                screening.number_of_q_points(),
                self.number_of_q_points()
            )));
        }
        self.screening = Some(screening);
        Ok(())
    }

    /// Replaces the occupations entering the Lindhard sum and drops the cached screening
    pub fn refresh(&mut self, occupations: &DMatrix<f64>) -> Result<(), BuildError> {
        if occupations.shape() != self.energies.shape() {
            return Err(BuildError::Shape(format!(
                "occupations {:?} do not match the band structure {:?}",
                occupations.shape(),
                self.energies.shape()
            )));
        }
        self.occupations.copy_from(occupations);
        self.screening = None;
        Ok(())
    }
}

//! # Propagator
//!
//! Advances the density matrix in time. Each step is Strang split: half a step of exact unitary
//! evolution under the coherent Hamiltonian, a fourth-order Runge-Kutta step of the collision term
//! and dephasing, then the second unitary half step. The result is projected back onto Hermitian
//! matrices and checked for conservation before it is committed, so a failed step leaves the
//! propagator untouched.
//!
//! The propagator moves through `Uninitialized -> Initialized -> Evolving -> Finalized`, and each
//! operation checks the state it is called in.

mod checkpoint;
mod coherent;
mod collision;
mod field;

pub use checkpoint::Checkpoint;
pub use collision::Broadening;
pub use field::ExternalField;

use crate::bands::BandStructure;
use crate::coulomb::CoulombModel;
use crate::coupling::CouplingTable;
use crate::density_matrix::{DensityMatrix, DensityMatrixModel, InitialState};
use crate::error::{BuildError, PropagationError};
use crate::index_map::{KIndexMap, QIndexMap};
use crate::observables::Observables;
use crate::phonon::PhononModel;
use coherent::CoherentCache;
use collision::{ScatteringCache, ScatteringInputs};
use nalgebra::DMatrix;
use num_complex::Complex;
use std::fmt;

/// Relative slack on the band-energy bounds the energy per particle must stay within
const ENERGY_BOUND_SLACK: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropagatorState {
    Uninitialized,
    Initialized,
    Evolving,
    Finalized,
}

impl fmt::Display for PropagatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            PropagatorState::Uninitialized => "uninitialized",
            PropagatorState::Initialized => "initialized",
            PropagatorState::Evolving => "evolving",
            PropagatorState::Finalized => "finalized",
        };
        write!(f, "{state}")
    }
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PropagatorSettings {
    pub broadening: Broadening,
    /// Largest relative change of the particle number a step may make
    pub trace_tolerance: f64,
    /// Largest change of the electronic energy per k-point a step may make
    pub energy_tolerance: Option<f64>,
    /// Lifetime of interband coherences
    pub dephasing_time: Option<f64>,
    /// Relaxation time of the phonon occupations back to equilibrium. Phonons are held at
    /// equilibrium when absent.
    pub hot_phonon_relaxation_time: Option<f64>,
    /// Strength of the screened electron-electron channel. Disabled when absent.
    pub electron_electron_scale: Option<f64>,
    pub model: DensityMatrixModel,
}

impl Default for PropagatorSettings {
    fn default() -> Self {
        Self {
            broadening: Broadening::default(),
            trace_tolerance: 1e-8,
            energy_tolerance: None,
            dephasing_time: None,
            hot_phonon_relaxation_time: None,
            electron_electron_scale: None,
            model: DensityMatrixModel::FullGrid,
        }
    }
}

/// Builder for a propagator
pub struct PropagatorBuilder<RefTable, RefK, RefQ, RefBands, RefPhonons> {
    table: RefTable,
    k_map: RefK,
    q_map: RefQ,
    bands: RefBands,
    phonons: RefPhonons,
    settings: PropagatorSettings,
    coulomb: Option<CoulombModel>,
}

impl PropagatorBuilder<(), (), (), (), ()> {
    pub fn new() -> Self {
        Self {
            table: (),
            k_map: (),
            q_map: (),
            bands: (),
            phonons: (),
            settings: PropagatorSettings::default(),
            coulomb: None,
        }
    }
}

impl Default for PropagatorBuilder<(), (), (), (), ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<RefTable, RefK, RefQ, RefBands, RefPhonons>
    PropagatorBuilder<RefTable, RefK, RefQ, RefBands, RefPhonons>
{
    pub fn with_coupling_table(
        self,
        table: &CouplingTable,
    ) -> PropagatorBuilder<&CouplingTable, RefK, RefQ, RefBands, RefPhonons> {
        PropagatorBuilder {
            table,
            k_map: self.k_map,
            q_map: self.q_map,
            bands: self.bands,
            phonons: self.phonons,
            settings: self.settings,
            coulomb: self.coulomb,
        }
    }

    pub fn with_k_map(
        self,
        k_map: &KIndexMap,
    ) -> PropagatorBuilder<RefTable, &KIndexMap, RefQ, RefBands, RefPhonons> {
        PropagatorBuilder {
            table: self.table,
            k_map,
            q_map: self.q_map,
            bands: self.bands,
            phonons: self.phonons,
            settings: self.settings,
            coulomb: self.coulomb,
        }
    }

    pub fn with_q_map(
        self,
        q_map: &QIndexMap,
    ) -> PropagatorBuilder<RefTable, RefK, &QIndexMap, RefBands, RefPhonons> {
        PropagatorBuilder {
            table: self.table,
            k_map: self.k_map,
            q_map,
            bands: self.bands,
            phonons: self.phonons,
            settings: self.settings,
            coulomb: self.coulomb,
        }
    }

    pub fn with_band_structure(
        self,
        bands: &BandStructure,
    ) -> PropagatorBuilder<RefTable, RefK, RefQ, &BandStructure, RefPhonons> {
        PropagatorBuilder {
            table: self.table,
            k_map: self.k_map,
            q_map: self.q_map,
            bands,
            phonons: self.phonons,
            settings: self.settings,
            coulomb: self.coulomb,
        }
    }

    pub fn with_phonons(
        self,
        phonons: &PhononModel,
    ) -> PropagatorBuilder<RefTable, RefK, RefQ, RefBands, &PhononModel> {
        PropagatorBuilder {
            table: self.table,
            k_map: self.k_map,
            q_map: self.q_map,
            bands: self.bands,
            phonons,
            settings: self.settings,
            coulomb: self.coulomb,
        }
    }

    pub fn with_settings(self, settings: PropagatorSettings) -> Self {
        Self { settings, ..self }
    }

    /// The Coulomb model screening the electron-electron channel. The propagator keeps its own
    /// copy, refreshed with the evolving occupations.
    pub fn with_coulomb(self, coulomb: &CoulombModel) -> Self {
        Self {
            coulomb: Some(coulomb.clone()),
            ..self
        }
    }
}

impl<'a>
    PropagatorBuilder<
        &'a CouplingTable,
        &'a KIndexMap,
        &'a QIndexMap,
        &'a BandStructure,
        &'a PhononModel,
    >
{
    pub fn build(self) -> Result<Propagator<'a>, BuildError> {
        let metadata = self.table.metadata();
        let number_of_k_points = self.k_map.len();
        let number_of_q_points = self.q_map.len();
        if self.bands.number_of_k_points() != number_of_k_points
            || metadata.number_of_k_points != number_of_k_points
            || metadata.number_of_q_points != number_of_q_points
            || self.phonons.number_of_q_points() != number_of_q_points
        {
            return Err(BuildError::Shape(format!(
                "grids disagree: {} k-points and {} q-points, band structure with {} k-points, \
                 phonons with {} q-points, coupling table for {} k-points and {} q-points",
                number_of_k_points,
                number_of_q_points,
                self.bands.number_of_k_points(),
                self.phonons.number_of_q_points(),
                metadata.number_of_k_points,
                metadata.number_of_q_points
            )));
        }
        if metadata.number_of_bands != self.bands.number_of_bands()
            || metadata.number_of_modes != self.phonons.number_of_modes()
        {
            return Err(BuildError::Shape(format!(
                "coupling table built for {} bands and {} modes, the model has {} and {}",
                metadata.number_of_bands,
                metadata.number_of_modes,
                self.bands.number_of_bands(),
                self.phonons.number_of_modes()
            )));
        }
        if let DensityMatrixModel::SingleK { k_index } = self.settings.model {
            if k_index >= number_of_k_points {
                return Err(BuildError::Configuration(format!(
                    "k-point {k_index} is not on the {number_of_k_points} point grid"
                )));
            }
        }
        let width = self.settings.broadening.width();
        if !(width.is_finite() && width > 0.) {
            return Err(BuildError::Configuration(format!(
                "the broadening width must be positive, not {width}"
            )));
        }
        if !(self.settings.trace_tolerance >= 0.) {
            return Err(BuildError::Configuration(
                "the trace tolerance cannot be negative".into(),
            ));
        }
        for (name, time) in [
            ("dephasing time", self.settings.dephasing_time),
            ("hot phonon relaxation time", self.settings.hot_phonon_relaxation_time),
        ] {
            if matches!(time, Some(time) if !(time > 0.)) {
                return Err(BuildError::Configuration(format!("the {name} must be positive")));
            }
        }
        if self.settings.electron_electron_scale.is_some() && self.coulomb.is_none() {
            return Err(BuildError::Configuration(
                "electron-electron scattering needs a Coulomb model".into(),
            ));
        }
        if self.settings.electron_electron_scale.is_some()
            && self.settings.model != DensityMatrixModel::FullGrid
        {
            tracing::warn!("Electron-electron scattering is only evaluated on the full grid");
        }

        Ok(Propagator {
            table: self.table,
            k_map: self.k_map,
            q_map: self.q_map,
            bands: self.bands,
            phonons: self.phonons.clone(),
            coulomb: self.coulomb,
            k_indices: self.settings.model.k_indices(number_of_k_points),
            settings: self.settings,
            state: PropagatorState::Uninitialized,
            time: 0.,
            steps: 0,
            rho: None,
            coherent: None,
            scattering: None,
            reference_particle_number: 0.,
            last_energy: 0.,
        })
    }
}

pub struct Propagator<'a> {
    table: &'a CouplingTable,
    k_map: &'a KIndexMap,
    q_map: &'a QIndexMap,
    bands: &'a BandStructure,
    /// Owned, as hot phonons evolve with the carriers
    phonons: PhononModel,
    coulomb: Option<CoulombModel>,
    settings: PropagatorSettings,
    k_indices: Vec<usize>,
    state: PropagatorState,
    time: f64,
    steps: usize,
    rho: Option<DensityMatrix>,
    coherent: Option<CoherentCache>,
    scattering: Option<ScatteringCache>,
    reference_particle_number: f64,
    /// `Σ_k Tr(H_k ρ_k)` after the last committed step
    last_energy: f64,
}

impl<'a> Propagator<'a> {
    pub fn state(&self) -> PropagatorState {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn settings(&self) -> &PropagatorSettings {
        &self.settings
    }

    /// Grid indices of the evolved k-points
    pub fn k_indices(&self) -> &[usize] {
        &self.k_indices
    }

    pub fn phonons(&self) -> &PhononModel {
        &self.phonons
    }

    fn invalid(&self, operation: &'static str) -> PropagationError {
        PropagationError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn check_shape(&self, rho: &DensityMatrix) -> Result<(), PropagationError> {
        if rho.len() != self.k_indices.len()
            || rho.number_of_bands() != self.bands.number_of_bands()
        {
            return Err(PropagationError::Shape(format!(
                "density matrix covers {} k-points and {} bands, the propagator evolves {} k-points and {} bands",
                rho.len(),
                rho.number_of_bands(),
                self.k_indices.len(),
                self.bands.number_of_bands()
            )));
        }
        Ok(())
    }

    fn build_scattering(&mut self) -> Result<ScatteringCache, PropagationError> {
        if self.settings.model != DensityMatrixModel::FullGrid {
            return Ok(ScatteringCache::default());
        }
        let inputs = ScatteringInputs {
            table: self.table,
            k_map: self.k_map,
            q_map: self.q_map,
            bands: self.bands,
            phonons: &self.phonons,
            broadening: self.settings.broadening,
        };
        let coulomb = match (self.settings.electron_electron_scale, self.coulomb.as_mut()) {
            (Some(scale), Some(coulomb)) => Some((coulomb, scale)),
            _ => None,
        };
        ScatteringCache::build(&inputs, coulomb)
    }

    /// Builds the coherent Hamiltonian `diag(E(k)) + field` and its eigendecomposition.
    ///
    /// May be called repeatedly to swap the field. The density matrix is left untouched.
    #[tracing::instrument(name = "Coherent Hamiltonian", level = "info", skip(self, field))]
    pub fn init_coherent_hamiltonian(
        &mut self,
        field: Option<&ExternalField>,
    ) -> Result<(), PropagationError> {
        if self.state == PropagatorState::Finalized {
            return Err(self.invalid("init_coherent_hamiltonian"));
        }
        let coherent = CoherentCache::build(self.bands, &self.k_indices, field)?;
        if let Some(rho) = &self.rho {
            self.last_energy = rho.energy(coherent.hamiltonians());
        }
        self.coherent = Some(coherent);
        Ok(())
    }

    /// Sets the initial density matrix and prepares the caches the step needs
    #[tracing::instrument(name = "Propagator initialisation", level = "info", skip(self, initial))]
    pub fn init(&mut self, initial: &InitialState) -> Result<(), PropagationError> {
        if !matches!(
            self.state,
            PropagatorState::Uninitialized | PropagatorState::Initialized
        ) {
            return Err(self.invalid("init"));
        }
        let rho = DensityMatrix::from_initial_state(initial)?;
        self.check_shape(&rho)?;
        if self.coherent.is_none() {
            self.coherent = Some(CoherentCache::build(self.bands, &self.k_indices, None)?);
        }
        if self.scattering.is_none() {
            let scattering = self.build_scattering()?;
            self.scattering = Some(scattering);
        }

        self.reference_particle_number = rho.particle_number();
        self.last_energy = self
            .coherent
            .as_ref()
            .map_or(0., |coherent| rho.energy(coherent.hamiltonians()));
        tracing::info!(
            "Initialised {} k-points with {} electrons",
            rho.len(),
            self.reference_particle_number
        );
        self.rho = Some(rho);
        self.time = 0.;
        self.steps = 0;
        self.state = PropagatorState::Initialized;
        Ok(())
    }

    /// The time derivative from the collision term and dephasing
    fn dissipator(
        &self,
        scattering: &ScatteringCache,
        rho: &[DMatrix<Complex<f64>>],
    ) -> Vec<DMatrix<Complex<f64>>> {
        let mut derivative = scattering.collision(rho, &self.phonons);
        if let Some(dephasing_time) = self.settings.dephasing_time {
            let rate = Complex::from(1. / dephasing_time);
            for (slope, matrix) in derivative.iter_mut().zip(rho.iter()) {
                let mut coherences = matrix.clone();
                coherences.fill_diagonal(Complex::from(0.));
                *slope -= coherences * rate;
            }
        }
        derivative
    }

    /// One fourth-order Runge-Kutta step of the dissipative dynamics
    fn dissipate(
        &self,
        scattering: &ScatteringCache,
        rho: &[DMatrix<Complex<f64>>],
        dt: f64,
    ) -> Vec<DMatrix<Complex<f64>>> {
        if scattering.is_empty() && self.settings.dephasing_time.is_none() {
            return rho.to_vec();
        }
        let advance = |slope: &[DMatrix<Complex<f64>>], fraction: f64| {
            rho.iter()
                .zip(slope.iter())
                .map(|(matrix, slope)| matrix + slope * Complex::from(fraction * dt))
                .collect::<Vec<_>>()
        };
        let k1 = self.dissipator(scattering, rho);
        let k2 = self.dissipator(scattering, &advance(&k1, 0.5));
        let k3 = self.dissipator(scattering, &advance(&k2, 0.5));
        let k4 = self.dissipator(scattering, &advance(&k3, 1.));
        rho.iter()
            .enumerate()
            .map(|(k, matrix)| {
                matrix
                    + (&k1[k] + (&k2[k] + &k3[k]) * Complex::from(2.) + &k4[k])
                        * Complex::from(dt / 6.)
            })
            .collect()
    }

    /// Phonon occupations after a forward Euler step driven by the carriers in `rho`
    fn advance_phonons(
        &self,
        scattering: &ScatteringCache,
        rho: &DensityMatrix,
        dt: f64,
    ) -> Option<PhononModel> {
        let relaxation_time = self.settings.hot_phonon_relaxation_time?;
        let generation = scattering.phonon_generation(rho.matrices(), &self.phonons);
        let mut phonons = self.phonons.clone();
        for q in 0..generation.nrows() {
            for mode in 0..generation.ncols() {
                phonons.add_occupation(q, mode, generation[(q, mode)] * dt);
            }
        }
        phonons.relax_towards_equilibrium(dt, relaxation_time);
        Some(phonons)
    }

    fn validate(
        &self,
        candidate: &DensityMatrix,
        energy: f64,
        coherent: &CoherentCache,
        dt: f64,
    ) -> Result<(), PropagationError> {
        let particle_number = candidate.particle_number();
        let reference = self.reference_particle_number;
        let trace_drift = if reference.abs() > f64::EPSILON {
            ((particle_number - reference) / reference).abs()
        } else {
            (particle_number - reference).abs()
        };
        let unstable = || PropagationError::Unstable {
            time: self.time + dt,
            trace_drift,
            energy,
        };

        if !candidate.is_finite() || !energy.is_finite() || !(trace_drift <= self.settings.trace_tolerance)
        {
            return Err(unstable());
        }
        if particle_number > f64::EPSILON {
            let (minimum, maximum) = (coherent.minimum_energy(), coherent.maximum_energy());
            let slack = ENERGY_BOUND_SLACK * (1. + (maximum - minimum).abs());
            let per_particle = energy / particle_number;
            if per_particle < minimum - slack || per_particle > maximum + slack {
                return Err(unstable());
            }
        }
        if let Some(tolerance) = self.settings.energy_tolerance {
            let change = (energy - self.last_energy) / candidate.len().max(1) as f64;
            if change.abs() > tolerance {
                return Err(unstable());
            }
        }
        Ok(())
    }

    /// Advances the density matrix by `dt`. An unstable step returns an error and leaves the
    /// propagator as it was.
    #[tracing::instrument(name = "Propagator step", level = "debug", skip(self))]
    pub fn step(&mut self, dt: f64) -> Result<(), PropagationError> {
        if !matches!(
            self.state,
            PropagatorState::Initialized | PropagatorState::Evolving
        ) {
            return Err(self.invalid("step"));
        }
        if !(dt.is_finite() && dt > 0.) {
            return Err(PropagationError::Shape(format!(
                "time step {dt} must be positive and finite"
            )));
        }
        let state = self.state;
        let invalid = || PropagationError::InvalidState {
            operation: "step",
            state,
        };
        self.coherent.as_mut().ok_or_else(invalid)?.prepare(dt);

        let coherent = self.coherent.as_ref().ok_or_else(invalid)?;
        let scattering = self.scattering.as_ref().ok_or_else(invalid)?;
        let rho = self.rho.as_ref().ok_or_else(invalid)?;

        let half_step = coherent.evolve_half_step(rho.matrices());
        let relaxed = self.dissipate(scattering, &half_step, dt);
        let mut candidate = DensityMatrix::from_raw(coherent.evolve_half_step(&relaxed));
        candidate.hermitise();
        let energy = candidate.energy(coherent.hamiltonians());
        self.validate(&candidate, energy, coherent, dt)?;
        let phonons = self.advance_phonons(scattering, rho, dt);

        self.rho = Some(candidate);
        if let Some(phonons) = phonons {
            self.phonons = phonons;
        }
        self.time += dt;
        self.steps += 1;
        self.last_energy = energy;
        self.state = PropagatorState::Evolving;
        Ok(())
    }

    /// Releases the caches. Observables and the density matrix stay readable.
    #[tracing::instrument(name = "Propagator finalisation", level = "info", skip(self))]
    pub fn finalize(&mut self) -> Result<(), PropagationError> {
        if !matches!(
            self.state,
            PropagatorState::Initialized | PropagatorState::Evolving
        ) {
            return Err(self.invalid("finalize"));
        }
        self.coherent = None;
        self.scattering = None;
        self.state = PropagatorState::Finalized;
        Ok(())
    }

    pub fn observables(&self) -> Result<Observables, PropagationError> {
        let rho = self.rho.as_ref().ok_or_else(|| self.invalid("observables"))?;
        let energy = self
            .coherent
            .as_ref()
            .map_or(self.last_energy, |coherent| rho.energy(coherent.hamiltonians()));
        Ok(Observables::measure(self.time, rho, energy, &self.phonons))
    }

    pub fn density_matrices(&self) -> Result<&DensityMatrix, PropagationError> {
        self.rho
            .as_ref()
            .ok_or_else(|| self.invalid("density_matrices"))
    }

    /// The coherent Hamiltonians of the evolved k-points, once built
    pub fn hamiltonians(&self) -> Option<&[DMatrix<Complex<f64>>]> {
        self.coherent.as_ref().map(|coherent| coherent.hamiltonians())
    }

    /// The collision term evaluated at the current density matrix
    pub fn collision_term(&self) -> Result<Vec<DMatrix<Complex<f64>>>, PropagationError> {
        match (&self.rho, &self.scattering) {
            (Some(rho), Some(scattering)) => Ok(scattering.collision(rho.matrices(), &self.phonons)),
            _ => Err(self.invalid("collision_term")),
        }
    }

    pub fn checkpoint(&self) -> Result<Checkpoint, PropagationError> {
        let rho = self.rho.as_ref().ok_or_else(|| self.invalid("checkpoint"))?;
        Ok(Checkpoint {
            time: self.time,
            steps: self.steps,
            k_indices: self.k_indices.clone(),
            density_matrix: rho.clone(),
            phonon_occupations: self.phonons.occupations().clone(),
            reference_particle_number: self.reference_particle_number,
            written: chrono::Utc::now(),
        })
    }

    /// Returns the propagator to the state recorded in `checkpoint`
    #[tracing::instrument(name = "Propagator restore", level = "info", skip(self, checkpoint))]
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<(), PropagationError> {
        if self.state == PropagatorState::Finalized {
            return Err(self.invalid("restore"));
        }
        if checkpoint.k_indices != self.k_indices {
            return Err(PropagationError::Shape(
                "checkpoint was written for different k-points".into(),
            ));
        }
        self.check_shape(&checkpoint.density_matrix)?;
        self.phonons
            .set_occupations(checkpoint.phonon_occupations.clone())
            .map_err(|error| PropagationError::Shape(error.to_string()))?;
        if self.coherent.is_none() {
            self.coherent = Some(CoherentCache::build(self.bands, &self.k_indices, None)?);
        }
        if self.scattering.is_none() {
            let scattering = self.build_scattering()?;
            self.scattering = Some(scattering);
        }

        let rho = checkpoint.density_matrix.clone();
        self.last_energy = self
            .coherent
            .as_ref()
            .map_or(0., |coherent| rho.energy(coherent.hamiltonians()));
        self.rho = Some(rho);
        self.time = checkpoint.time;
        self.steps = checkpoint.steps;
        self.reference_particle_number = checkpoint.reference_particle_number;
        self.state = if checkpoint.steps == 0 {
            PropagatorState::Initialized
        } else {
            PropagatorState::Evolving
        };
        Ok(())
    }

    /// Recomputes the screening from the current occupations and rebuilds the
    /// electron-electron channels
    #[tracing::instrument(name = "Screening refresh", level = "debug", skip(self))]
    pub fn refresh_screening(&mut self) -> Result<(), PropagationError> {
        if !matches!(
            self.state,
            PropagatorState::Initialized | PropagatorState::Evolving
        ) {
            return Err(self.invalid("refresh_screening"));
        }
        if self.settings.electron_electron_scale.is_none()
            || self.settings.model != DensityMatrixModel::FullGrid
        {
            return Ok(());
        }
        let occupations = self.density_matrices()?.diagonal_occupations();
        if let Some(coulomb) = self.coulomb.as_mut() {
            coulomb
                .refresh(&occupations)
                .map_err(|error| PropagationError::Shape(error.to_string()))?;
        }
        let scattering = self.build_scattering()?;
        tracing::debug!("Rebuilt {} scattering channels", scattering.len());
        self.scattering = Some(scattering);
        Ok(())
    }
}

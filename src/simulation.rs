//! # Simulation
//!
//! Assembles a model from the typed configuration and drives the propagator through time.
//!
//! `propagate` returns a lazy iterator of snapshots, one every `checkpoint_interval` steps. A step
//! that fails its conservation checks is retried from the last good state with the time step
//! split into `2^r` sub-steps, for `r` up to the configured number of retries.

use crate::app::configuration::{
    BandConfiguration, Configuration, CoulombConfiguration, InitialConfiguration,
    PhononModeConfiguration, PropagationConfiguration, ScreeningConfiguration,
};
use crate::bands::BandStructure;
use crate::constants::{
    ANGSTROM, CUBIC_CENTIMETRE, ELECTRON_VOLT, FEMTOSECOND, KELVIN, SPIN_DEGENERACY,
};
use crate::coulomb::{
    CoulombModel, CoulombModelBuilder, CoulombSettings, ScreeningKind, ScreeningMatrix,
};
use crate::coupling::{
    CouplingMetadata, CouplingTable, CouplingTableBuilder, DeformationPotential,
    ValleyClassifier,
};
use crate::density_matrix::{DensityMatrixModel, InitialState};
use crate::error::{BuildError, DmdError, PropagationError};
use crate::heg::HomogeneousElectronGas;
use crate::index_map::{KIndexMap, QIndexMap};
use crate::io;
use crate::observables::Observables;
use crate::phonon::{PhononDispersion, PhononModel};
use crate::propagator::{
    Broadening, Checkpoint, ExternalField, Propagator, PropagatorBuilder, PropagatorSettings,
};
use dmd_lattice::Lattice;
use nalgebra::{DMatrix, Matrix3, Vector3};
use std::path::PathBuf;

/// The electron-electron channel is evaluated in the static limit
const STATIC: &[f64] = &[0.];

/// The last retry of a step splits it into `2^MAXIMUM_RETRIES` sub-steps
const MAXIMUM_RETRIES: usize = 32;

/// How a propagation recovers from unstable steps and where it records its progress
#[derive(Clone, Debug, Default)]
pub struct PropagationControl {
    pub maximum_retries: usize,
    /// Steps between refreshes of the screened interaction
    pub screening_update_interval: Option<usize>,
    /// Checkpoints are written here at every snapshot when set
    pub checkpoint_directory: Option<PathBuf>,
}

/// Everything the propagator needs, in atomic units
pub struct AssembledModel {
    pub lattice: Lattice,
    pub k_map: KIndexMap,
    pub q_map: QIndexMap,
    pub bands: BandStructure,
    pub phonons: PhononModel,
    pub coupling: CouplingTable,
    pub coulomb: Option<CoulombModel>,
    pub field: Option<ExternalField>,
    pub initial: InitialState,
    pub settings: PropagatorSettings,
    pub control: PropagationControl,
}

fn build_lattice(configuration: &Configuration) -> Result<Lattice, BuildError> {
    let lattice = &configuration.lattice;
    let columns = lattice
        .vectors
        .iter()
        .map(|vector| Vector3::from(*vector) * ANGSTROM)
        .collect::<Vec<_>>();
    let direct = Matrix3::from_columns(&columns);
    let valleys = lattice.valleys.iter().map(|valley| Vector3::from(*valley)).collect();
    Lattice::new(direct)
        .map(|built| built.with_valleys(valleys, lattice.valley_radius / ANGSTROM))
        .ok_or_else(|| BuildError::Configuration("the lattice vectors are linearly dependent".into()))
}

fn to_hartree(energies: &[f64]) -> Vec<f64> {
    energies.iter().map(|energy| energy * ELECTRON_VOLT).collect()
}

fn build_bands(
    configuration: &BandConfiguration,
    k_map: &KIndexMap,
    lattice: &Lattice,
) -> Result<BandStructure, BuildError> {
    match configuration {
        BandConfiguration::Flat { energies } => BandStructure::flat(k_map.len(), &to_hartree(energies)),
        BandConfiguration::Parabolic {
            offsets,
            effective_masses,
        } => BandStructure::parabolic(k_map, lattice, &to_hartree(offsets), effective_masses),
    }
}

fn dispersion(mode: &PhononModeConfiguration) -> PhononDispersion {
    match *mode {
        PhononModeConfiguration::Einstein { energy } => PhononDispersion::Einstein {
            energy: energy * ELECTRON_VOLT,
        },
        PhononModeConfiguration::Acoustic {
            sound_velocity,
            debye_energy,
        } => PhononDispersion::Acoustic {
            sound_velocity: sound_velocity * ANGSTROM / FEMTOSECOND,
            debye_energy: debye_energy * ELECTRON_VOLT,
        },
    }
}

/// The coupling table, read from the cache when it was built for the same model
fn coupling_table(
    configuration: &Configuration,
    lattice: &Lattice,
    k_map: &KIndexMap,
    q_map: &QIndexMap,
    bands: &BandStructure,
    phonons: &PhononModel,
) -> Result<CouplingTable, DmdError> {
    let coupling = &configuration.coupling;
    let classifier = ValleyClassifier::new(lattice, k_map);
    let elements = DeformationPotential::new(
        &classifier,
        k_map.len(),
        coupling.intravalley * ELECTRON_VOLT,
        coupling.intervalley * ELECTRON_VOLT,
        coupling.interband_only,
    );
    let expected = CouplingMetadata::describe(
        k_map,
        q_map,
        bands,
        phonons,
        &elements,
        coupling.energy_cutoff * ELECTRON_VOLT,
        coupling.scale,
    );
    let cache = configuration.output.coupling_cache();
    if coupling.cache && cache.exists() {
        match io::load::<CouplingTable>(&cache) {
            Ok(table) if table.metadata() == &expected => {
                tracing::info!(
                    "Loaded {} coupling entries from {}",
                    table.len(),
                    cache.display()
                );
                return Ok(table);
            }
            Ok(_) => tracing::warn!(
                "Coupling cache {} was built for a different model, rebuilding",
                cache.display()
            ),
            Err(error) => tracing::warn!(
                "Coupling cache {} is unreadable ({error}), rebuilding",
                cache.display()
            ),
        }
    }

    let table = CouplingTableBuilder::new()
        .with_k_map(k_map)
        .with_q_map(q_map)
        .with_band_structure(bands)
        .with_phonons(phonons)
        .with_matrix_elements(&elements)
        .with_energy_cutoff(expected.energy_cutoff)
        .with_scale(expected.scale)
        .build()?;
    if coupling.cache {
        io::store(&cache, &table)?;
    }
    Ok(table)
}

/// Occupations on the full grid, one row per k-point
fn initial_occupations(
    configuration: &InitialConfiguration,
    bands: &BandStructure,
) -> Result<DMatrix<f64>, BuildError> {
    match *configuration {
        InitialConfiguration::Thermal {
            electrons_per_k_point,
            temperature,
        } => {
            let temperature = temperature * KELVIN;
            let chemical_potential = bands.chemical_potential(electrons_per_k_point, temperature)?;
            tracing::info!("Initial chemical potential {chemical_potential} Ha");
            Ok(bands.occupations(chemical_potential, temperature))
        }
        InitialConfiguration::Filled { filled_bands } => {
            if filled_bands > bands.number_of_bands() {
                return Err(BuildError::Configuration(format!(
                    "cannot fill {filled_bands} of {} bands",
                    bands.number_of_bands()
                )));
            }
            Ok(DMatrix::from_fn(
                bands.number_of_k_points(),
                bands.number_of_bands(),
                |_, n| if n < filled_bands { 1. } else { 0. },
            ))
        }
    }
}

/// Static screening stored alongside the inputs it was computed from
#[derive(serde::Serialize, serde::Deserialize)]
struct ScreeningRecord {
    settings: CoulombSettings,
    occupations: DMatrix<f64>,
    screening: ScreeningMatrix,
}

fn coulomb_model(
    configuration: &Configuration,
    lattice: &Lattice,
    k_map: &KIndexMap,
    q_map: &QIndexMap,
    bands: &BandStructure,
    occupations: &DMatrix<f64>,
    temperature: f64,
) -> Result<Option<CoulombModel>, DmdError> {
    let coulomb = &configuration.coulomb;
    if !coulomb.enabled {
        return Ok(None);
    }
    let kind = match coulomb.screening {
        ScreeningConfiguration::Rpa => ScreeningKind::Rpa,
        ScreeningConfiguration::HomogeneousGas {
            density,
            effective_mass,
        } => ScreeningKind::HomogeneousGas(HomogeneousElectronGas {
            density: density / CUBIC_CENTIMETRE,
            temperature,
            effective_mass,
            spin_degeneracy: SPIN_DEGENERACY,
        }),
        ScreeningConfiguration::Unscreened => ScreeningKind::Unscreened,
    };
    let settings = CoulombSettings {
        background_permittivity: coulomb.background_permittivity,
        regularization: coulomb.regularization.map(|wavevector| wavevector / ANGSTROM),
        broadening: coulomb.broadening * ELECTRON_VOLT,
        spin_degeneracy: SPIN_DEGENERACY,
        interband_overlap: coulomb.interband_overlap,
        kind,
    };
    let mut model = CoulombModelBuilder::new()
        .with_lattice(lattice)
        .with_k_map(k_map)
        .with_q_map(q_map)
        .with_band_structure(bands)
        .with_settings(settings)
        .with_occupations(occupations.clone())
        .build()?;

    if !coulomb.cache_screening {
        return Ok(Some(model));
    }
    let cache = configuration.output.screening_cache();
    if cache.exists() {
        match io::load::<ScreeningRecord>(&cache) {
            Ok(record)
                if record.settings == settings
                    && &record.occupations == occupations
                    && record.screening.frequencies() == STATIC =>
            {
                model.set_screening(record.screening)?;
                tracing::info!("Loaded static screening from {}", cache.display());
                return Ok(Some(model));
            }
            Ok(_) => tracing::warn!(
                "Screening cache {} was built for a different model, rebuilding",
                cache.display()
            ),
            Err(error) => tracing::warn!(
                "Screening cache {} is unreadable ({error}), rebuilding",
                cache.display()
            ),
        }
    }
    let screening = model.screening_matrix(STATIC)?.clone();
    io::store(
        &cache,
        &ScreeningRecord {
            settings,
            occupations: occupations.clone(),
            screening,
        },
    )?;
    Ok(Some(model))
}

fn propagator_settings(
    propagation: &PropagationConfiguration,
    coulomb: &CoulombConfiguration,
) -> PropagatorSettings {
    let broadening = match propagation.broadening {
        Broadening::Gaussian { width } => Broadening::Gaussian {
            width: width * ELECTRON_VOLT,
        },
        Broadening::Lorentzian { width } => Broadening::Lorentzian {
            width: width * ELECTRON_VOLT,
        },
    };
    PropagatorSettings {
        broadening,
        trace_tolerance: propagation.trace_tolerance,
        energy_tolerance: propagation.energy_tolerance.map(|energy| energy * ELECTRON_VOLT),
        dephasing_time: propagation.dephasing_time.map(|time| time * FEMTOSECOND),
        hot_phonon_relaxation_time: propagation
            .hot_phonon_relaxation_time
            .map(|time| time * FEMTOSECOND),
        electron_electron_scale: coulomb.enabled.then(|| coulomb.electron_electron_scale),
        model: propagation.model,
    }
}

/// Builds every component of the model described by `configuration`
#[tracing::instrument(name = "Model assembly", level = "info", skip(configuration))]
pub fn assemble(configuration: &Configuration) -> Result<AssembledModel, DmdError> {
    let lattice = build_lattice(configuration)?;
    let grid = &configuration.grid;
    let k_map = KIndexMap::build(grid.k_divisions, Vector3::from(grid.k_shift));
    let q_map = QIndexMap::gamma_centred(grid.q_divisions);
    tracing::info!("{} k-points and {} q-points", k_map.len(), q_map.len());

    let bands = build_bands(&configuration.bands, &k_map, &lattice)?;
    let temperature = configuration.phonons.temperature * KELVIN;
    let dispersions = configuration
        .phonons
        .modes
        .iter()
        .map(dispersion)
        .collect::<Vec<_>>();
    let phonons = PhononModel::from_dispersions(&q_map, &lattice, &dispersions, temperature)?;
    let coupling = coupling_table(configuration, &lattice, &k_map, &q_map, &bands, &phonons)?;

    let occupations = initial_occupations(&configuration.initial, &bands)?;
    let coulomb = coulomb_model(
        configuration,
        &lattice,
        &k_map,
        &q_map,
        &bands,
        &occupations,
        temperature,
    )?;

    let settings = propagator_settings(&configuration.propagation, &configuration.coulomb);
    let initial = match settings.model {
        DensityMatrixModel::FullGrid => InitialState::Occupations(occupations),
        DensityMatrixModel::SingleK { k_index } => {
            if k_index >= k_map.len() {
                return Err(BuildError::Configuration(format!(
                    "k-point {k_index} is not on the {} point grid",
                    k_map.len()
                ))
                .into());
            }
            InitialState::Occupations(occupations.rows(k_index, 1).into_owned())
        }
    };

    let control = PropagationControl {
        maximum_retries: configuration.propagation.maximum_retries,
        screening_update_interval: configuration
            .coulomb
            .enabled
            .then(|| configuration.coulomb.screening_update_interval)
            .flatten(),
        checkpoint_directory: configuration
            .output
            .write_checkpoints
            .then(|| configuration.output.checkpoint_directory()),
    };

    Ok(AssembledModel {
        lattice,
        k_map,
        q_map,
        bands,
        phonons,
        coupling,
        coulomb,
        field: None,
        initial,
        settings,
        control,
    })
}

/// The observables after `step` steps
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub step: usize,
    pub observables: Observables,
}

pub struct Propagation<'a> {
    propagator: Propagator<'a>,
    control: &'a PropagationControl,
    dt: f64,
    step: usize,
    total_steps: usize,
    checkpoint_interval: usize,
    emit_current: bool,
    finished: bool,
}

fn build_propagator(model: &AssembledModel) -> Result<Propagator<'_>, DmdError> {
    let mut builder = PropagatorBuilder::new()
        .with_coupling_table(&model.coupling)
        .with_k_map(&model.k_map)
        .with_q_map(&model.q_map)
        .with_band_structure(&model.bands)
        .with_phonons(&model.phonons)
        .with_settings(model.settings.clone());
    if let Some(coulomb) = &model.coulomb {
        builder = builder.with_coulomb(coulomb);
    }
    let mut propagator = builder.build()?;
    propagator.init_coherent_hamiltonian(model.field.as_ref())?;
    Ok(propagator)
}

fn check_timing(total_time: f64, dt: f64, checkpoint_interval: usize) -> Result<usize, BuildError> {
    if !(dt.is_finite() && dt > 0.) || !(total_time.is_finite() && total_time >= 0.) {
        return Err(BuildError::Configuration(format!(
            "cannot propagate for {total_time} in steps of {dt}"
        )));
    }
    if checkpoint_interval == 0 {
        return Err(BuildError::Configuration(
            "the checkpoint interval must be at least one step".into(),
        ));
    }
    Ok((total_time / dt).round() as usize)
}

fn check_control(control: &PropagationControl) -> Result<(), BuildError> {
    if control.maximum_retries > MAXIMUM_RETRIES {
        return Err(BuildError::Configuration(format!(
            "at most {MAXIMUM_RETRIES} retries are supported, {} were requested",
            control.maximum_retries
        )));
    }
    Ok(())
}

/// Propagates the initial state of `model` for `total_time` in steps of `dt`
pub fn propagate(
    model: &AssembledModel,
    total_time: f64,
    dt: f64,
    checkpoint_interval: usize,
) -> Result<Propagation<'_>, DmdError> {
    let total_steps = check_timing(total_time, dt, checkpoint_interval)?;
    check_control(&model.control)?;
    let mut propagator = build_propagator(model)?;
    propagator.init(&model.initial)?;
    tracing::info!("Propagating {total_steps} steps of {dt}");
    Ok(Propagation {
        propagator,
        control: &model.control,
        dt,
        step: 0,
        total_steps,
        checkpoint_interval,
        emit_current: true,
        finished: false,
    })
}

impl<'a> Propagation<'a> {
    /// Continues the propagation recorded in `checkpoint` up to `total_time`
    pub fn resume(
        model: &'a AssembledModel,
        checkpoint: &Checkpoint,
        total_time: f64,
        dt: f64,
        checkpoint_interval: usize,
    ) -> Result<Self, DmdError> {
        let total_steps = check_timing(total_time, dt, checkpoint_interval)?;
        check_control(&model.control)?;
        let mut propagator = build_propagator(model)?;
        propagator.restore(checkpoint)?;
        let step = (checkpoint.time / dt).round() as usize;
        tracing::info!("Resuming at t = {} from step {step}", checkpoint.time);
        Ok(Self {
            propagator,
            control: &model.control,
            dt,
            step,
            total_steps,
            checkpoint_interval,
            emit_current: false,
            finished: false,
        })
    }

    pub fn propagator(&self) -> &Propagator<'a> {
        &self.propagator
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn checkpoint(&self) -> Result<Checkpoint, DmdError> {
        Ok(self.propagator.checkpoint()?)
    }

    /// Takes one step of `dt`, halving the sub-step after each unstable attempt
    fn advance(&mut self) -> Result<(), DmdError> {
        if let Some(interval) = self.control.screening_update_interval {
            if self.step > 0 && interval > 0 && self.step % interval == 0 {
                self.propagator.refresh_screening()?;
            }
        }
        let checkpoint = self.propagator.checkpoint()?;
        for retry in 0..=self.control.maximum_retries {
            let substeps = 1_usize << retry;
            let substep = self.dt / substeps as f64;
            let propagator = &mut self.propagator;
            match (0..substeps).try_for_each(|_| propagator.step(substep)) {
                Ok(()) => {
                    self.step += 1;
                    return Ok(());
                }
                Err(error @ PropagationError::Unstable { .. }) => {
                    tracing::warn!("{error}, retrying with {} sub-steps", 2 * substeps);
                    self.propagator.restore(&checkpoint)?;
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(PropagationError::RetriesExhausted {
            time: checkpoint.time + self.dt,
            retries: self.control.maximum_retries,
        }
        .into())
    }

    fn snapshot(&self) -> Result<Snapshot, DmdError> {
        Ok(Snapshot {
            step: self.step,
            observables: self.propagator.observables()?,
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Err(error) = self.propagator.finalize() {
            tracing::warn!("{error}");
        }
    }

    fn advance_to_next_snapshot(&mut self) -> Result<Snapshot, DmdError> {
        let target = (self.step + self.checkpoint_interval).min(self.total_steps);
        while self.step < target {
            self.advance()?;
        }
        if let Some(directory) = &self.control.checkpoint_directory {
            io::store_checkpoint(directory, &self.propagator.checkpoint()?)?;
        }
        self.snapshot()
    }
}

impl<'a> Iterator for Propagation<'a> {
    type Item = Result<Snapshot, DmdError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.emit_current {
            self.emit_current = false;
            return Some(self.snapshot());
        }
        if self.step >= self.total_steps {
            self.finish();
            return None;
        }
        let snapshot = self.advance_to_next_snapshot();
        if snapshot.is_err() {
            self.finished = true;
        }
        Some(snapshot)
    }
}

#[cfg(test)]
mod test {
    use super::{assemble, propagate, AssembledModel, Propagation, PropagationControl};
    use crate::app::configuration::Configuration;
    use crate::bands::BandStructure;
    use crate::coupling::{CouplingTableBuilder, DeformationPotential};
    use crate::density_matrix::InitialState;
    use crate::error::{BuildError, DmdError, PropagationError};
    use crate::index_map::{KIndexMap, QIndexMap};
    use crate::phonon::PhononModel;
    use crate::propagator::{Broadening, PropagatorSettings};
    use approx::assert_relative_eq;
    use dmd_lattice::Lattice;
    use nalgebra::{DMatrix, Vector3};

    /// Two flat bands split by the phonon energy, lower band full
    fn resonant_model(maximum_retries: usize) -> AssembledModel {
        let k_map = KIndexMap::build([4, 1, 1], Vector3::zeros());
        let q_map = QIndexMap::build([4, 1, 1], Vector3::zeros());
        let bands = BandStructure::flat(4, &[0., 0.1]).unwrap();
        let phonons =
            PhononModel::equilibrium(DMatrix::from_element(4, 1, 0.1), 0.1 / 2_f64.ln()).unwrap();
        let coupling = CouplingTableBuilder::new()
            .with_k_map(&k_map)
            .with_q_map(&q_map)
            .with_band_structure(&bands)
            .with_phonons(&phonons)
            .with_matrix_elements(&DeformationPotential::uniform(0.4, true))
            .build()
            .unwrap();
        AssembledModel {
            lattice: Lattice::cubic(1.).unwrap(),
            k_map,
            q_map,
            bands,
            phonons,
            coupling,
            coulomb: None,
            field: None,
            initial: InitialState::Occupations(DMatrix::from_fn(4, 2, |_, n| {
                if n == 0 {
                    1.
                } else {
                    0.
                }
            })),
            settings: PropagatorSettings {
                broadening: Broadening::Gaussian { width: 0.01 },
                ..PropagatorSettings::default()
            },
            control: PropagationControl {
                maximum_retries,
                ..PropagationControl::default()
            },
        }
    }

    #[test]
    fn snapshots_are_taken_at_the_checkpoint_interval() {
        let model = resonant_model(0);
        let snapshots = propagate(&model, 0.1, 0.01, 4)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let steps = snapshots.iter().map(|s| s.step).collect::<Vec<_>>();
        assert_eq!(steps, vec![0, 4, 8, 10]);
        assert_relative_eq!(snapshots[3].observables.time, 0.1, epsilon = 1e-12);
        for snapshot in &snapshots {
            assert_relative_eq!(snapshot.observables.particle_number, 1., epsilon = 1e-10);
        }
    }

    #[test]
    fn resuming_from_a_checkpoint_reproduces_the_run() {
        let model = resonant_model(0);
        let reference = propagate(&model, 0.08, 0.01, 2)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let mut first = propagate(&model, 0.08, 0.01, 2).unwrap();
        for _ in 0..3 {
            first.next().unwrap().unwrap();
        }
        assert_eq!(first.step(), 4);
        let checkpoint = first.checkpoint().unwrap();
        let resumed = Propagation::resume(&model, &checkpoint, 0.08, 0.01, 2)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(resumed.len(), 2);
        for (resumed, expected) in resumed.iter().zip(&reference[3..]) {
            assert_eq!(resumed.step, expected.step);
            for (band, population) in resumed.observables.band_populations.iter().enumerate() {
                assert_relative_eq!(
                    *population,
                    expected.observables.band_populations[band],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn unstable_steps_are_retried_with_smaller_sub_steps() {
        let model = resonant_model(6);
        let snapshots = propagate(&model, 1., 1., 1)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].step, 1);
        assert_relative_eq!(snapshots[1].observables.time, 1., epsilon = 1e-12);
        assert_relative_eq!(snapshots[1].observables.particle_number, 1., epsilon = 1e-8);
        assert!(snapshots[1].observables.band_populations[1] > 0.);
    }

    #[test]
    fn retries_are_bounded() {
        let model = resonant_model(0);
        let mut propagation = propagate(&model, 1., 1., 1).unwrap();
        assert!(propagation.next().unwrap().is_ok());
        assert!(matches!(
            propagation.next(),
            Some(Err(DmdError::Propagation(
                PropagationError::RetriesExhausted { retries: 0, .. }
            )))
        ));
        assert!(propagation.next().is_none());
    }

    #[test]
    fn retry_counts_beyond_the_sub_step_limit_are_rejected() {
        let model = resonant_model(64);
        assert!(matches!(
            propagate(&model, 1., 1., 1),
            Err(DmdError::Build(BuildError::Configuration(_)))
        ));
        assert!(propagate(&resonant_model(32), 1., 1., 1).is_ok());
    }

    #[test]
    fn the_default_configuration_assembles_and_runs() {
        let directory = std::env::temp_dir().join(format!("carrier-dmd-simulation-{}", std::process::id()));
        let configuration = Configuration::from_toml(&format!(
            r#"
            [grid]
            k_divisions = [6, 1, 1]
            q_divisions = [6, 1, 1]
            k_shift = [0.0, 0.0, 0.0]

            [output]
            directory = "{}"
            integration_rule = "Trapezium"
            write_checkpoints = true
            "#,
            directory.display()
        ))
        .unwrap();
        let model = assemble(&configuration).unwrap();
        assert_eq!(model.k_map.len(), 6);
        assert!(configuration.output.coupling_cache().exists());

        let dt = configuration.propagation.time_step * crate::constants::FEMTOSECOND;
        let snapshots = propagate(&model, 4. * dt, dt, 2)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_relative_eq!(
            snapshots[2].observables.particle_number,
            snapshots[0].observables.particle_number,
            max_relative = 1e-8
        );
        let latest = crate::io::latest_checkpoint(&configuration.output.checkpoint_directory())
            .unwrap()
            .unwrap();
        assert_eq!(crate::io::load_checkpoint(&latest).unwrap().steps, 4);

        // A second assembly reads the cached table
        let cached = assemble(&configuration).unwrap();
        assert_eq!(cached.coupling.len(), model.coupling.len());
        std::fs::remove_dir_all(&directory).unwrap();
    }

    #[test]
    fn cached_coupling_tables_are_rebuilt_when_the_model_changes() {
        let directory =
            std::env::temp_dir().join(format!("carrier-dmd-coupling-cache-{}", std::process::id()));
        let configuration = |intravalley: f64, offset: f64| {
            Configuration::from_toml(&format!(
                r#"
                [grid]
                k_divisions = [6, 1, 1]
                q_divisions = [6, 1, 1]
                k_shift = [0.0, 0.0, 0.0]

                [bands]
                kind = "Parabolic"
                offsets = [0.0, {offset}]
                effective_masses = [0.26, 0.5]

                [coupling]
                intravalley = {intravalley}
                intervalley = {intravalley}
                cache = true

                [output]
                directory = "{}"
                integration_rule = "Trapezium"
                write_checkpoints = false
                "#,
                directory.display()
            ))
            .unwrap()
        };

        let original = assemble(&configuration(0.004, 0.08)).unwrap();
        let stronger_configuration = configuration(0.04, 0.08);
        let stronger = assemble(&stronger_configuration).unwrap();
        assert!(!stronger.coupling.is_empty());
        assert_ne!(stronger.coupling.metadata(), original.coupling.metadata());
        let strength = 0.04 * crate::constants::ELECTRON_VOLT;
        for entry in stronger.coupling.iter() {
            assert_relative_eq!(entry.amplitude.re, strength, max_relative = 1e-12);
        }
        let stored = crate::io::load::<crate::coupling::CouplingTable>(
            &stronger_configuration.output.coupling_cache(),
        )
        .unwrap();
        assert_eq!(stored.metadata(), stronger.coupling.metadata());

        let shifted = assemble(&configuration(0.04, 0.03)).unwrap();
        assert_ne!(
            shifted.coupling.metadata().inputs.band_energies,
            stronger.coupling.metadata().inputs.band_energies
        );
        assert_eq!(
            shifted.coupling.metadata().inputs.matrix_elements,
            stronger.coupling.metadata().inputs.matrix_elements
        );

        // An unchanged model reads the table back
        let reread = assemble(&configuration(0.04, 0.03)).unwrap();
        assert_eq!(reread.coupling.metadata(), shifted.coupling.metadata());
        assert_eq!(reread.coupling.len(), shifted.coupling.len());
        std::fs::remove_dir_all(&directory).unwrap();
    }

    #[test]
    fn screened_electron_electron_scattering_is_assembled_and_cached() {
        let directory = std::env::temp_dir().join(format!("carrier-dmd-screening-{}", std::process::id()));
        let configuration = Configuration::from_toml(&format!(
            r#"
            [grid]
            k_divisions = [6, 1, 1]
            q_divisions = [6, 1, 1]
            k_shift = [0.0, 0.0, 0.0]

            [coulomb]
            enabled = true
            background_permittivity = 11.7
            regularization = 0.05
            broadening = 0.01
            electron_electron_scale = 1.0
            screening_update_interval = 1
            cache_screening = true

            [coulomb.screening]
            kind = "Unscreened"

            [output]
            directory = "{}"
            integration_rule = "Trapezium"
            write_checkpoints = false
            "#,
            directory.display()
        ))
        .unwrap();
        let model = assemble(&configuration).unwrap();
        let coulomb = model.coulomb.as_ref().unwrap();
        assert!(configuration.output.screening_cache().exists());
        assert_eq!(model.settings.electron_electron_scale, Some(1.));
        assert_eq!(model.control.screening_update_interval, Some(1));

        let cached = assemble(&configuration).unwrap();
        assert_eq!(
            cached.coulomb.as_ref().unwrap().cached_screening(),
            coulomb.cached_screening()
        );

        let dt = 0.1 * crate::constants::FEMTOSECOND;
        let snapshots = propagate(&model, 2. * dt, dt, 1)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_relative_eq!(
            snapshots[2].observables.particle_number,
            snapshots[0].observables.particle_number,
            max_relative = 1e-8
        );
        std::fs::remove_dir_all(&directory).unwrap();
    }
}

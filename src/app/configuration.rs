//! Typed configuration, layered from the built-in defaults, an optional `RUN_MODE` override in
//! `.config/`, the user's input file and `DMD_` prefixed environment variables.
//!
//! Inputs are given in laboratory units (eV, K, fs, Å) and converted to atomic units when the
//! model is assembled.

use crate::density_matrix::DensityMatrixModel;
use crate::propagator::Broadening;
use crate::quadrature::IntegrationRule;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

const DEFAULTS: &str = include_str!("../../.config/default.toml");

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub grid: GridConfiguration,
    pub lattice: LatticeConfiguration,
    pub bands: BandConfiguration,
    pub phonons: PhononConfiguration,
    pub coupling: CouplingConfiguration,
    pub coulomb: CoulombConfiguration,
    pub propagation: PropagationConfiguration,
    pub initial: InitialConfiguration,
    pub output: OutputConfiguration,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GridConfiguration {
    pub k_divisions: [usize; 3],
    pub q_divisions: [usize; 3],
    /// Offset of the k-grid in units of the grid spacing
    pub k_shift: [f64; 3],
}

#[derive(Clone, Debug, Deserialize)]
pub struct LatticeConfiguration {
    /// Direct lattice vectors in Å
    pub vectors: [[f64; 3]; 3],
    /// Valley centres in fractional reciprocal coordinates
    #[serde(default)]
    pub valleys: Vec<[f64; 3]>,
    /// Valley radius in Å⁻¹
    #[serde(default)]
    pub valley_radius: f64,
}

/// Band energies in eV
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum BandConfiguration {
    Flat {
        energies: Vec<f64>,
    },
    Parabolic {
        offsets: Vec<f64>,
        effective_masses: Vec<f64>,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct PhononConfiguration {
    /// Lattice temperature in K
    pub temperature: f64,
    pub modes: Vec<PhononModeConfiguration>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum PhononModeConfiguration {
    /// Dispersionless mode of energy `energy` eV
    Einstein { energy: f64 },
    /// Linear mode with sound velocity in Å/fs, capped at the Debye energy in eV
    Acoustic {
        sound_velocity: f64,
        debye_energy: f64,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct CouplingConfiguration {
    /// Deformation potential amplitudes in eV
    pub intravalley: f64,
    pub intervalley: f64,
    pub interband_only: bool,
    /// Energy window around the phonon resonances in eV
    pub energy_cutoff: f64,
    pub scale: f64,
    /// Reuse the coupling table stored in the output directory when it matches the model
    pub cache: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CoulombConfiguration {
    pub enabled: bool,
    pub background_permittivity: f64,
    /// Regularisation wavevector in Å⁻¹
    pub regularization: Option<f64>,
    /// Lindhard resolvent broadening in eV
    pub broadening: f64,
    /// Overlap of distinct bands in the Lindhard sum, zero for intraband screening only
    pub interband_overlap: f64,
    pub screening: ScreeningConfiguration,
    pub electron_electron_scale: f64,
    /// Steps between refreshes of the screening from the evolving occupations
    pub screening_update_interval: Option<usize>,
    /// Reuse the static screening stored in the output directory when it matches the model
    pub cache_screening: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum ScreeningConfiguration {
    Rpa,
    /// Electron gas of `density` cm⁻³ at the lattice temperature
    HomogeneousGas { density: f64, effective_mass: f64 },
    Unscreened,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PropagationConfiguration {
    /// Time step in fs
    pub time_step: f64,
    /// Duration of the propagation in fs
    pub total_time: f64,
    /// Steps between recorded observables and checkpoints
    pub checkpoint_interval: usize,
    pub maximum_retries: usize,
    pub trace_tolerance: f64,
    /// Largest change in the electronic energy per k-point in one step, in eV
    pub energy_tolerance: Option<f64>,
    /// Coherence lifetime in fs
    pub dephasing_time: Option<f64>,
    /// Hot phonon lifetime in fs
    pub hot_phonon_relaxation_time: Option<f64>,
    /// Line shape of the energy-conserving delta function, width in eV
    pub broadening: Broadening,
    pub model: DensityMatrixModel,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum InitialConfiguration {
    /// Fermi-Dirac occupations holding `electrons_per_k_point` at `temperature` K
    Thermal {
        electrons_per_k_point: f64,
        temperature: f64,
    },
    /// The lowest `filled_bands` bands full, the rest empty
    Filled { filled_bands: usize },
}

#[derive(Clone, Debug, Deserialize)]
pub struct OutputConfiguration {
    pub directory: PathBuf,
    /// Rule used for the time-averaged observables reported at the end of a run
    pub integration_rule: IntegrationRule,
    pub write_checkpoints: bool,
}

impl OutputConfiguration {
    pub fn coupling_cache(&self) -> PathBuf {
        self.directory.join("coupling.bin")
    }

    pub fn screening_cache(&self) -> PathBuf {
        self.directory.join("screening.bin")
    }

    pub fn checkpoint_directory(&self) -> PathBuf {
        self.directory.join("checkpoints")
    }

    pub fn observables_file(&self) -> PathBuf {
        self.directory.join("observables.dat")
    }
}

impl Configuration {
    /// Layers the user's file, if given, over the defaults
    pub fn build(file_path: Option<&Path>) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            // The default settings for the simulation
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            // Overrides for the run mode, optional
            .add_source(File::with_name(&format!(".config/{}", run_mode)).required(false));
        if let Some(path) = file_path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(Environment::with_prefix("DMD").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// The defaults overridden by the TOML in `overrides`
    pub fn from_toml(overrides: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .add_source(File::from_str(overrides, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod test {
    use super::{BandConfiguration, Configuration, InitialConfiguration, ScreeningConfiguration};
    use crate::density_matrix::DensityMatrixModel;
    use crate::propagator::Broadening;

    #[test]
    fn defaults_deserialize() {
        let configuration = Configuration::from_toml("").unwrap();
        assert!(configuration.propagation.time_step > 0.);
        assert!(configuration.propagation.checkpoint_interval > 0);
        assert_eq!(configuration.propagation.model, DensityMatrixModel::FullGrid);
        assert!(!configuration.phonons.modes.is_empty());
        assert!(matches!(
            configuration.bands,
            BandConfiguration::Parabolic { .. }
        ));
    }

    #[test]
    fn user_values_override_the_defaults() {
        let configuration = Configuration::from_toml(
            r#"
            [grid]
            k_divisions = [4, 4, 1]
            q_divisions = [2, 2, 1]
            k_shift = [0.0, 0.0, 0.0]

            [bands]
            kind = "Flat"
            energies = [0.0, 0.5]

            [coulomb.screening]
            kind = "HomogeneousGas"
            density = 1e18
            effective_mass = 0.26

            [propagation.broadening]
            kind = "Lorentzian"
            width = 0.002

            [propagation.model]
            kind = "SingleK"
            k_index = 3

            [initial]
            kind = "Filled"
            filled_bands = 1
            "#,
        )
        .unwrap();
        assert_eq!(configuration.grid.k_divisions, [4, 4, 1]);
        assert!(
            matches!(configuration.bands, BandConfiguration::Flat { ref energies } if energies.len() == 2)
        );
        assert!(matches!(
            configuration.coulomb.screening,
            ScreeningConfiguration::HomogeneousGas { .. }
        ));
        assert_eq!(
            configuration.propagation.broadening,
            Broadening::Lorentzian { width: 0.002 }
        );
        assert_eq!(
            configuration.propagation.model,
            DensityMatrixModel::SingleK { k_index: 3 }
        );
        assert!(matches!(
            configuration.initial,
            InitialConfiguration::Filled { filled_bands: 1 }
        ));
    }
}

use super::{CouplingEntry, CouplingMetadata, CouplingTable, MatrixElements, Transition};
use crate::bands::BandStructure;
use crate::constants::FREQUENCY_FLOOR;
use crate::error::BuildError;
use crate::index_map::{KIndexMap, QIndexMap};
use crate::phonon::PhononModel;
use console::Term;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;

/// Builder for a `CouplingTable`
///
/// ```ignore
/// let table = CouplingTableBuilder::new()
///     .with_k_map(&k_map)
///     .with_q_map(&q_map)
///     .with_band_structure(&bands)
///     .with_phonons(&phonons)
///     .with_matrix_elements(&elements)
///     .with_energy_cutoff(0.01)
///     .build()?;
/// ```
pub struct CouplingTableBuilder<RefK, RefQ, RefBands, RefPhonons, RefElements> {
    k_map: RefK,
    q_map: RefQ,
    bands: RefBands,
    phonons: RefPhonons,
    elements: RefElements,
    energy_cutoff: f64,
    scale: f64,
}

impl CouplingTableBuilder<(), (), (), (), ()> {
    pub fn new() -> Self {
        Self {
            k_map: (),
            q_map: (),
            bands: (),
            phonons: (),
            elements: (),
            energy_cutoff: f64::INFINITY,
            scale: 1.,
        }
    }
}

impl Default for CouplingTableBuilder<(), (), (), (), ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<RefK, RefQ, RefBands, RefPhonons, RefElements>
    CouplingTableBuilder<RefK, RefQ, RefBands, RefPhonons, RefElements>
{
    pub fn with_k_map(
        self,
        k_map: &KIndexMap,
    ) -> CouplingTableBuilder<&KIndexMap, RefQ, RefBands, RefPhonons, RefElements> {
        CouplingTableBuilder {
            k_map,
            q_map: self.q_map,
            bands: self.bands,
            phonons: self.phonons,
            elements: self.elements,
            energy_cutoff: self.energy_cutoff,
            scale: self.scale,
        }
    }

    pub fn with_q_map(
        self,
        q_map: &QIndexMap,
    ) -> CouplingTableBuilder<RefK, &QIndexMap, RefBands, RefPhonons, RefElements> {
        CouplingTableBuilder {
            k_map: self.k_map,
            q_map,
            bands: self.bands,
            phonons: self.phonons,
            elements: self.elements,
            energy_cutoff: self.energy_cutoff,
            scale: self.scale,
        }
    }

    pub fn with_band_structure(
        self,
        bands: &BandStructure,
    ) -> CouplingTableBuilder<RefK, RefQ, &BandStructure, RefPhonons, RefElements> {
        CouplingTableBuilder {
            k_map: self.k_map,
            q_map: self.q_map,
            bands,
            phonons: self.phonons,
            elements: self.elements,
            energy_cutoff: self.energy_cutoff,
            scale: self.scale,
        }
    }

    pub fn with_phonons(
        self,
        phonons: &PhononModel,
    ) -> CouplingTableBuilder<RefK, RefQ, RefBands, &PhononModel, RefElements> {
        CouplingTableBuilder {
            k_map: self.k_map,
            q_map: self.q_map,
            bands: self.bands,
            phonons,
            elements: self.elements,
            energy_cutoff: self.energy_cutoff,
            scale: self.scale,
        }
    }

    pub fn with_matrix_elements<Elements: ?Sized>(
        self,
        elements: &Elements,
    ) -> CouplingTableBuilder<RefK, RefQ, RefBands, RefPhonons, &Elements> {
        CouplingTableBuilder {
            k_map: self.k_map,
            q_map: self.q_map,
            bands: self.bands,
            phonons: self.phonons,
            elements,
            energy_cutoff: self.energy_cutoff,
            scale: self.scale,
        }
    }

    /// Transitions further than `energy_cutoff` from both the emission and absorption resonance
    /// are discarded
    pub fn with_energy_cutoff(self, energy_cutoff: f64) -> Self {
        Self {
            energy_cutoff,
            ..self
        }
    }

    /// Multiplies every matrix element by `scale`
    pub fn with_scale(self, scale: f64) -> Self {
        Self { scale, ..self }
    }
}

impl<'a, Elements> CouplingTableBuilder<
    &'a KIndexMap,
    &'a QIndexMap,
    &'a BandStructure,
    &'a PhononModel,
    &'a Elements,
>
where
    Elements: MatrixElements + ?Sized,
{
    fn check_shapes(&self) -> Result<(), BuildError> {
        if self.bands.number_of_k_points() != self.k_map.len() {
            return Err(BuildError::Shape(format!(
                "band structure has {} k-points but the k-grid has {}",
                self.bands.number_of_k_points(),
                self.k_map.len()
            )));
        }
        if self.phonons.number_of_q_points() != self.q_map.len() {
            return Err(BuildError::Shape(format!(
                "phonon model has {} q-points but the q-grid has {}",
                self.phonons.number_of_q_points(),
                self.q_map.len()
            )));
        }
        if self.energy_cutoff.is_nan() || self.energy_cutoff < 0. {
            return Err(BuildError::Configuration(
                "the coupling energy cutoff must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Entries with target wavevector `k`, over every q-point, mode and band pair
    fn entries_at_k(&self, k: usize) -> Result<Vec<CouplingEntry>, BuildError> {
        let number_of_bands = self.bands.number_of_bands();
        let mut entries = Vec::new();
        for q in 0..self.q_map.len() {
            let k_prime = self.k_map.difference(k, q, self.q_map)?;
            for mode in 0..self.phonons.number_of_modes() {
                let frequency = self.phonons.frequency(q, mode);
                // Soft modes at the zone centre do not scatter
                if frequency < FREQUENCY_FLOOR {
                    continue;
                }
                for m in 0..number_of_bands {
                    for n in 0..number_of_bands {
                        let amplitude = self.elements.amplitude(Transition {
                            k,
                            q,
                            k_prime,
                            mode,
                            m,
                            n,
                        }) * self.scale;
                        if amplitude.norm() == 0. {
                            continue;
                        }
                        let delta_energy =
                            self.bands.energy(k, n) - self.bands.energy(k_prime, m);
                        let detuning = (delta_energy - frequency)
                            .abs()
                            .min((delta_energy + frequency).abs());
                        if detuning <= self.energy_cutoff {
                            entries.push(CouplingEntry {
                                k,
                                q,
                                k_prime,
                                mode,
                                m,
                                n,
                                amplitude,
                            });
                        }
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Builds the table, in parallel over k-points
    #[tracing::instrument(name = "Coupling table builder", level = "info", skip(self))]
    pub fn build(self) -> Result<CouplingTable, BuildError> {
        self.check_shapes()?;

        let term = Term::stdout();
        let spinner_style = ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{prefix:.bold.dim} {spinner} {msg} [{wide_bar:.cyan/blue}] {percent}% ({eta})");
        let pb = ProgressBar::with_draw_target(
            self.k_map.len() as u64,
            ProgressDrawTarget::term(term, 60),
        );
        pb.set_style(spinner_style);

        let entries = (0..self.k_map.len())
            .into_par_iter()
            .progress_with(pb)
            .map(|k| self.entries_at_k(k))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        tracing::info!(
            "Retained {} electron-phonon matrix elements over {} k-points",
            entries.len(),
            self.k_map.len()
        );

        let metadata = CouplingMetadata::describe(
            self.k_map,
            self.q_map,
            self.bands,
            self.phonons,
            self.elements,
            self.energy_cutoff,
            self.scale,
        );
        Ok(CouplingTable::from_entries(metadata, entries))
    }
}

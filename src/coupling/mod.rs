//! # Electron-phonon coupling
//!
//! A sparse table of electron-phonon matrix elements `g_mn(k, q, λ)` coupling band `n` at `k` to
//! band `m` at `k' = k - q` through phonon mode `λ`. Only transitions close enough to energy
//! conservation to matter for the dynamics are kept.
//!
//! The table is an arena of entries sorted by `(k, q, mode, m, n)`, plus an index from each
//! `(k, q)` pair to its contiguous run of entries. It is read only once built.

mod builder;
mod matrix_elements;

pub use builder::CouplingTableBuilder;
pub use matrix_elements::{
    DeformationPotential, MatrixElements, TabulatedElement, TabulatedMatrixElements, Transition,
};

use crate::bands::BandStructure;
use crate::error::{BuildError, CsrError};
use crate::index_map::{KIndexMap, QIndexMap};
use crate::phonon::PhononModel;
use dmd_lattice::Lattice;
use itertools::Itertools;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use num_complex::Complex;
use std::collections::HashMap;
use std::ops::Range;

/// A single retained matrix element
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CouplingEntry {
    pub k: usize,
    pub q: usize,
    /// The index of `k - q`
    pub k_prime: usize,
    pub mode: usize,
    /// Band at `k'`
    pub m: usize,
    /// Band at `k`
    pub n: usize,
    pub amplitude: Complex<f64>,
}

impl CouplingEntry {
    fn sort_key(&self) -> (usize, usize, usize, usize, usize) {
        (self.k, self.q, self.mode, self.m, self.n)
    }
}

/// Parameters a table was built with, stored alongside cached tables so a stale cache is detected
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CouplingMetadata {
    pub number_of_k_points: usize,
    pub number_of_q_points: usize,
    pub number_of_modes: usize,
    pub number_of_bands: usize,
    pub energy_cutoff: f64,
    pub scale: f64,
    pub inputs: CouplingInputs,
}

/// The physical inputs a table depends on beyond its dimensions
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CouplingInputs {
    /// Fractional coordinates of every k-point
    pub k_points: Vec<[f64; 3]>,
    /// Band energies, k-major
    pub band_energies: Vec<f64>,
    /// Phonon frequencies, q-major
    pub phonon_frequencies: Vec<f64>,
    /// Parameters of the matrix-element provider
    pub matrix_elements: Vec<f64>,
}

impl CouplingMetadata {
    /// Describes the table built from these inputs
    pub fn describe<Elements: MatrixElements + ?Sized>(
        k_map: &KIndexMap,
        q_map: &QIndexMap,
        bands: &BandStructure,
        phonons: &PhononModel,
        elements: &Elements,
        energy_cutoff: f64,
        scale: f64,
    ) -> Self {
        let k_points = k_map
            .iter()
            .map(|point| {
                let fractional = point.fractional();
                [fractional.x, fractional.y, fractional.z]
            })
            .collect();
        let band_energies = (0..bands.number_of_k_points())
            .flat_map(|k| (0..bands.number_of_bands()).map(move |n| bands.energy(k, n)))
            .collect();
        let phonon_frequencies = (0..phonons.number_of_q_points())
            .flat_map(|q| (0..phonons.number_of_modes()).map(move |mode| phonons.frequency(q, mode)))
            .collect();
        Self {
            number_of_k_points: k_map.len(),
            number_of_q_points: q_map.len(),
            number_of_modes: phonons.number_of_modes(),
            number_of_bands: bands.number_of_bands(),
            energy_cutoff,
            scale,
            inputs: CouplingInputs {
                k_points,
                band_energies,
                phonon_frequencies,
                matrix_elements: elements.parameters(),
            },
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CouplingRecord {
    metadata: CouplingMetadata,
    entries: Vec<CouplingEntry>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(from = "CouplingRecord", into = "CouplingRecord")]
pub struct CouplingTable {
    metadata: CouplingMetadata,
    entries: Vec<CouplingEntry>,
    index: HashMap<(usize, usize), Range<usize>>,
}

impl From<CouplingRecord> for CouplingTable {
    fn from(record: CouplingRecord) -> Self {
        Self::from_entries(record.metadata, record.entries)
    }
}

impl From<CouplingTable> for CouplingRecord {
    fn from(table: CouplingTable) -> Self {
        Self {
            metadata: table.metadata,
            entries: table.entries,
        }
    }
}

impl CouplingTable {
    /// Sorts `entries` into the canonical order and indexes them by `(k, q)`
    pub(crate) fn from_entries(metadata: CouplingMetadata, mut entries: Vec<CouplingEntry>) -> Self {
        entries.sort_by_key(CouplingEntry::sort_key);
        let mut index = HashMap::new();
        let mut start = 0;
        for (key, group) in &entries.iter().group_by(|entry| (entry.k, entry.q)) {
            let end = start + group.count();
            index.insert(key, start..end);
            start = end;
        }
        Self {
            metadata,
            entries,
            index,
        }
    }

    /// A table with no entries, for runs without electron-phonon scattering
    pub fn empty(metadata: CouplingMetadata) -> Self {
        Self::from_entries(metadata, Vec::new())
    }

    pub fn metadata(&self) -> &CouplingMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn number_of_modes(&self) -> usize {
        self.metadata.number_of_modes
    }

    pub fn number_of_bands(&self) -> usize {
        self.metadata.number_of_bands
    }

    pub fn iter(&self) -> impl Iterator<Item = &CouplingEntry> {
        self.entries.iter()
    }

    /// All entries for the pair `(k, q)`, ordered by `(mode, m, n)`
    pub fn entries_at(&self, k: usize, q: usize) -> &[CouplingEntry] {
        match self.index.get(&(k, q)) {
            Some(range) => &self.entries[range.clone()],
            None => &[],
        }
    }

    /// The `(k, q)` pairs with at least one entry, in canonical order
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry.k, entry.q))
            .dedup()
    }

    /// The coupling matrix of one mode, with rows indexing bands at `k - q` and columns bands at `k`
    pub fn matrix_at(
        &self,
        k: usize,
        q: usize,
        mode: usize,
    ) -> Result<CsrMatrix<Complex<f64>>, BuildError> {
        let number_of_bands = self.number_of_bands();
        let (rows, (columns, values)): (Vec<_>, (Vec<_>, Vec<_>)) = self
            .entries_at(k, q)
            .iter()
            .filter(|entry| entry.mode == mode)
            .map(|entry| (entry.m, (entry.n, entry.amplitude)))
            .unzip();
        let coo = CooMatrix::try_from_triplets(
            number_of_bands,
            number_of_bands,
            rows,
            columns,
            values,
        )
        .map_err(CsrError::from)?;
        Ok(CsrMatrix::from(&coo))
    }
}

/// Valley classification of k-points, delegating the geometry to the lattice
pub struct ValleyClassifier<'a> {
    lattice: &'a Lattice,
    k_map: &'a KIndexMap,
}

impl<'a> ValleyClassifier<'a> {
    pub fn new(lattice: &'a Lattice, k_map: &'a KIndexMap) -> Self {
        Self { lattice, k_map }
    }

    pub fn has_valleys(&self) -> bool {
        !self.lattice.valleys().is_empty()
    }

    pub fn valley_of(&self, k: usize) -> Option<usize> {
        self.lattice.valley_of(self.k_map.point(k).fractional())
    }

    pub fn is_k_valley(&self, k: usize) -> bool {
        self.lattice.is_k_valley(self.k_map.point(k).fractional())
    }

    pub fn is_intravalley(&self, k: usize, k_prime: usize) -> bool {
        self.lattice.is_intravalley(
            self.k_map.point(k).fractional(),
            self.k_map.point(k_prime).fractional(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::{CouplingEntry, CouplingInputs, CouplingMetadata, CouplingTable, ValleyClassifier};
    use crate::index_map::KIndexMap;
    use dmd_lattice::Lattice;
    use nalgebra::{Matrix3, Vector3};
    use num_complex::Complex;

    fn metadata() -> CouplingMetadata {
        CouplingMetadata {
            number_of_k_points: 2,
            number_of_q_points: 2,
            number_of_modes: 2,
            number_of_bands: 2,
            energy_cutoff: 1.,
            scale: 1.,
            inputs: CouplingInputs::default(),
        }
    }

    fn entry(k: usize, q: usize, mode: usize, m: usize, n: usize, value: f64) -> CouplingEntry {
        CouplingEntry {
            k,
            q,
            k_prime: (k + q) % 2,
            mode,
            m,
            n,
            amplitude: Complex::new(value, 0.),
        }
    }

    #[test]
    fn entries_are_sorted_and_indexed_by_pair() {
        let table = CouplingTable::from_entries(
            metadata(),
            vec![
                entry(1, 0, 0, 1, 0, 1.),
                entry(0, 1, 1, 0, 1, 2.),
                entry(0, 1, 0, 1, 1, 3.),
                entry(0, 0, 0, 0, 0, 4.),
            ],
        );
        assert_eq!(table.len(), 4);
        assert_eq!(table.entries_at(0, 1).len(), 2);
        assert_eq!(table.entries_at(0, 1)[0].mode, 0);
        assert!(table.entries_at(1, 1).is_empty());
        assert_eq!(table.pairs().collect::<Vec<_>>(), vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn matrix_at_places_entries_at_band_pairs() {
        let table = CouplingTable::from_entries(
            metadata(),
            vec![entry(0, 1, 0, 1, 0, 2.), entry(0, 1, 1, 0, 0, 5.)],
        );
        let matrix = table.matrix_at(0, 1, 0).unwrap();
        assert_eq!(matrix.nnz(), 1);
        let dense = nalgebra_sparse::convert::serial::convert_csr_dense(&matrix);
        let expected = nalgebra::DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex::new(0., 0.),
                Complex::new(0., 0.),
                Complex::new(2., 0.),
                Complex::new(0., 0.),
            ],
        );
        matrixcompare::assert_matrix_eq!(dense, expected);
    }

    #[test]
    fn classifier_delegates_to_lattice_valleys() {
        let lattice = Lattice::new(Matrix3::from_diagonal_element(4.))
            .unwrap()
            .with_valleys(
                vec![Vector3::new(0.25, 0., 0.), Vector3::new(0.75, 0., 0.)],
                0.3,
            );
        let k_map = KIndexMap::build([4, 1, 1], Vector3::zeros());
        let classifier = ValleyClassifier::new(&lattice, &k_map);
        assert!(classifier.has_valleys());
        assert!(classifier.is_k_valley(1));
        assert_eq!(classifier.valley_of(3), Some(1));
        assert_eq!(classifier.valley_of(0), None);
        assert!(classifier.is_intravalley(1, 1));
        assert!(!classifier.is_intravalley(1, 3));
    }
}

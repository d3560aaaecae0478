use carrier_dmd::{
    bands::BandStructure,
    coupling::{CouplingTable, CouplingTableBuilder, DeformationPotential},
    density_matrix::InitialState,
    index_map::{KIndexMap, QIndexMap},
    phonon::PhononModel,
    propagator::{Propagator, PropagatorBuilder, PropagatorSettings},
};
use nalgebra::{DMatrix, Vector3};

/// A one dimensional chain of `number_of_k_points` points with two flat bands split by an
/// Einstein phonon
pub struct ResonantChain {
    pub k_map: KIndexMap,
    pub q_map: QIndexMap,
    pub bands: BandStructure,
    pub phonons: PhononModel,
    pub table: CouplingTable,
}

pub fn construct_resonant_chain(number_of_k_points: usize) -> ResonantChain {
    let k_map = KIndexMap::build([number_of_k_points, 1, 1], Vector3::zeros());
    let q_map = QIndexMap::build([number_of_k_points, 1, 1], Vector3::zeros());
    let bands = BandStructure::flat(number_of_k_points, &[0., 0.1]).unwrap();
    let phonons = PhononModel::equilibrium(
        DMatrix::from_element(number_of_k_points, 1, 0.1),
        0.1 / 2_f64.ln(),
    )
    .unwrap();
    let table = CouplingTableBuilder::new()
        .with_k_map(&k_map)
        .with_q_map(&q_map)
        .with_band_structure(&bands)
        .with_phonons(&phonons)
        .with_matrix_elements(&DeformationPotential::uniform(0.4, true))
        .build()
        .unwrap();
    ResonantChain {
        k_map,
        q_map,
        bands,
        phonons,
        table,
    }
}

/// An initialised propagator with the lower band full
pub fn construct_propagator(chain: &ResonantChain) -> Propagator<'_> {
    let mut propagator = PropagatorBuilder::new()
        .with_coupling_table(&chain.table)
        .with_k_map(&chain.k_map)
        .with_q_map(&chain.q_map)
        .with_band_structure(&chain.bands)
        .with_phonons(&chain.phonons)
        .with_settings(PropagatorSettings::default())
        .build()
        .unwrap();
    propagator.init_coherent_hamiltonian(None).unwrap();
    let occupations = DMatrix::from_fn(chain.k_map.len(), 2, |_, n| if n == 0 { 1. } else { 0. });
    propagator
        .init(&InitialState::Occupations(occupations))
        .unwrap();
    propagator
}

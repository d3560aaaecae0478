use crate::density_matrix::DensityMatrix;
use chrono::{DateTime, Utc};
use nalgebra::DMatrix;

/// Everything needed to resume a propagation exactly where it stopped
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Checkpoint {
    pub time: f64,
    pub steps: usize,
    /// Grid indices of the evolved k-points
    pub k_indices: Vec<usize>,
    pub density_matrix: DensityMatrix,
    pub phonon_occupations: DMatrix<f64>,
    /// Particle number the trace check is measured against
    pub reference_particle_number: f64,
    pub written: DateTime<Utc>,
}

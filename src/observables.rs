//! # Observables
//!
//! Scalar quantities measured from the density matrix and phonon bath, normalised per evolved
//! k-point (electrons) or per q-point (phonons) so they read as values per unit cell.

use crate::density_matrix::DensityMatrix;
use crate::phonon::PhononModel;
use crate::quadrature::IntegrationRule;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Observables {
    pub time: f64,
    pub particle_number: f64,
    pub electronic_energy: f64,
    pub band_populations: Vec<f64>,
    pub phonon_energy: f64,
}

impl Observables {
    /// `total_energy` is `Σ_k Tr(H_k ρ_k)` over the evolved k-points
    pub(crate) fn measure(
        time: f64,
        rho: &DensityMatrix,
        total_energy: f64,
        phonons: &PhononModel,
    ) -> Self {
        let cells = rho.len().max(1) as f64;
        Self {
            time,
            particle_number: rho.particle_number() / cells,
            electronic_energy: total_energy / cells,
            band_populations: rho
                .band_populations()
                .iter()
                .map(|population| population / cells)
                .collect(),
            phonon_energy: phonons.energy(),
        }
    }

    pub fn total_energy(&self) -> f64 {
        self.electronic_energy + self.phonon_energy
    }
}

/// Time average of a uniformly sampled series, using `rule` to integrate each observable
pub fn time_average(series: &[Observables], rule: IntegrationRule) -> Option<Observables> {
    let (first, last) = (series.first()?, series.last()?);
    if series.len() == 1 {
        return Some(first.clone());
    }
    let duration = last.time - first.time;
    if duration <= 0. {
        return None;
    }
    let spacing = duration / (series.len() - 1) as f64;
    let average = |value: &dyn Fn(&Observables) -> f64| {
        let samples = series.iter().map(value).collect::<Vec<_>>();
        rule.integrate(&samples, spacing) / duration
    };
    Some(Observables {
        time: first.time + duration / 2.,
        particle_number: average(&|o| o.particle_number),
        electronic_energy: average(&|o| o.electronic_energy),
        band_populations: (0..first.band_populations.len())
            .map(|band| average(&|o| o.band_populations[band]))
            .collect(),
        phonon_energy: average(&|o| o.phonon_energy),
    })
}

#[cfg(test)]
mod test {
    use super::{time_average, Observables};
    use crate::quadrature::IntegrationRule;
    use approx::assert_relative_eq;

    fn sample(time: f64) -> Observables {
        Observables {
            time,
            particle_number: 1.,
            electronic_energy: time * time,
            band_populations: vec![1. - time, time],
            phonon_energy: 2. * time,
        }
    }

    #[test]
    fn averages_are_exact_for_low_order_polynomials() {
        let series = (0..17).map(|i| sample(i as f64 / 16.)).collect::<Vec<_>>();
        let average = time_average(&series, IntegrationRule::ThreePoint).unwrap();
        assert_relative_eq!(average.particle_number, 1., epsilon = 1e-12);
        assert_relative_eq!(average.electronic_energy, 1. / 3., epsilon = 1e-12);
        assert_relative_eq!(average.band_populations[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(average.phonon_energy, 1., epsilon = 1e-12);
        assert_relative_eq!(average.time, 0.5);
    }

    #[test]
    fn degenerate_series() {
        assert!(time_average(&[], IntegrationRule::Trapezium).is_none());
        let single = sample(0.3);
        assert_eq!(
            time_average(&[single.clone()], IntegrationRule::Trapezium),
            Some(single)
        );
        assert!(time_average(&[sample(0.3), sample(0.3)], IntegrationRule::Trapezium).is_none());
    }
}

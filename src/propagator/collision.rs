//! The Markovian collision term.
//!
//! Every scattering process is stored as a channel: an operator `A` carrying the density matrix at
//! a source k-point to a target k-point, with a weight looked up from the phonon occupations when
//! the term is evaluated. For each k-point the term reads
//!
//! `dρ_k/dt = ½ {1 - ρ_k, Σ_in w A ρ_src A†} / N_q - ½ {Σ_out w A† (1 - ρ_tgt) A, ρ_k} / N_q`
//!
//! which keeps `ρ_k` Hermitian and conserves `Σ_k Tr ρ_k` exactly.

use crate::bands::BandStructure;
use crate::coulomb::CoulombModel;
use crate::coupling::CouplingTable;
use crate::error::PropagationError;
use crate::index_map::{KIndexMap, QIndexMap};
use crate::phonon::PhononModel;
use crate::utilities::matrices::anticommutator;
use nalgebra::DMatrix;
use num_complex::Complex;
use rayon::prelude::*;
use std::f64::consts::PI;

/// Line shape replacing the energy-conserving delta function
#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind")]
pub enum Broadening {
    Gaussian { width: f64 },
    Lorentzian { width: f64 },
}

impl Default for Broadening {
    fn default() -> Self {
        Broadening::Gaussian { width: 1e-3 }
    }
}

impl Broadening {
    /// The broadened delta function at energy mismatch `x`
    pub fn delta(&self, x: f64) -> f64 {
        match *self {
            Broadening::Gaussian { width } => {
                (-x * x / (2. * width * width)).exp() / (width * (2. * PI).sqrt())
            }
            Broadening::Lorentzian { width } => width / (PI * (x * x + width * width)),
        }
    }

    pub fn width(&self) -> f64 {
        match *self {
            Broadening::Gaussian { width } | Broadening::Lorentzian { width } => width,
        }
    }

    fn rate_factor(&self, x: f64) -> f64 {
        (2. * PI * self.delta(x)).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ChannelWeight {
    /// Weighted by `n_q + 1`
    Emission { q: usize, mode: usize },
    /// Weighted by `n_-q`
    Absorption { q: usize, mode: usize },
    Unit,
}

#[derive(Clone, Debug)]
struct Channel {
    source: usize,
    target: usize,
    operator: DMatrix<Complex<f64>>,
    adjoint: DMatrix<Complex<f64>>,
    weight: ChannelWeight,
}

impl Channel {
    fn new(
        source: usize,
        target: usize,
        operator: DMatrix<Complex<f64>>,
        weight: ChannelWeight,
    ) -> Option<Self> {
        if operator.iter().all(|element| element.norm() == 0.) {
            return None;
        }
        Some(Self {
            source,
            target,
            adjoint: operator.adjoint(),
            operator,
            weight,
        })
    }
}

/// Scattering channels for the full k-grid, indexed by the k-point they leave and enter
#[derive(Clone, Debug, Default)]
pub(crate) struct ScatteringCache {
    channels: Vec<Channel>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    minus_q: Vec<usize>,
    number_of_q_points: usize,
}

pub(crate) struct ScatteringInputs<'a> {
    pub(crate) table: &'a CouplingTable,
    pub(crate) k_map: &'a KIndexMap,
    pub(crate) q_map: &'a QIndexMap,
    pub(crate) bands: &'a BandStructure,
    pub(crate) phonons: &'a PhononModel,
    pub(crate) broadening: Broadening,
}

impl ScatteringCache {
    #[tracing::instrument(name = "Scattering channels", level = "info", skip(inputs, coulomb))]
    pub(crate) fn build(
        inputs: &ScatteringInputs<'_>,
        coulomb: Option<(&mut CoulombModel, f64)>,
    ) -> Result<Self, PropagationError> {
        let mut channels = phonon_channels(inputs);
        let phonon_channel_count = channels.len();
        if let Some((coulomb, scale)) = coulomb {
            channels.extend(electron_electron_channels(inputs, coulomb, scale)?);
        }
        tracing::info!(
            "{} phonon and {} electron-electron scattering channels",
            phonon_channel_count,
            channels.len() - phonon_channel_count
        );

        let number_of_k_points = inputs.k_map.len();
        let mut outgoing = vec![Vec::new(); number_of_k_points];
        let mut incoming = vec![Vec::new(); number_of_k_points];
        for (index, channel) in channels.iter().enumerate() {
            outgoing[channel.source].push(index);
            incoming[channel.target].push(index);
        }
        let minus_q = (0..inputs.q_map.len())
            .map(|q| inputs.q_map.negate(q))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            channels,
            outgoing,
            incoming,
            minus_q,
            number_of_q_points: inputs.q_map.len(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn weight(&self, channel: &Channel, phonons: &PhononModel) -> f64 {
        match channel.weight {
            ChannelWeight::Emission { q, mode } => phonons.occupation(q, mode) + 1.,
            ChannelWeight::Absorption { q, mode } => phonons.occupation(self.minus_q[q], mode),
            ChannelWeight::Unit => 1.,
        }
    }

    /// Evaluates the collision term for every k-point of `rho`
    pub(crate) fn collision(
        &self,
        rho: &[DMatrix<Complex<f64>>],
        phonons: &PhononModel,
    ) -> Vec<DMatrix<Complex<f64>>> {
        let number_of_bands = rho.first().map_or(0, |matrix| matrix.nrows());
        let zeros = DMatrix::<Complex<f64>>::zeros(number_of_bands, number_of_bands);
        if self.channels.is_empty() {
            return vec![zeros; rho.len()];
        }
        let identity = DMatrix::<Complex<f64>>::identity(number_of_bands, number_of_bands);
        let normalisation = Complex::from(0.5 / self.number_of_q_points as f64);

        (0..rho.len())
            .into_par_iter()
            .map(|k| {
                let out_rate = self.outgoing[k].iter().fold(zeros.clone(), |total, &index| {
                    let channel = &self.channels[index];
                    let blocking = &identity - &rho[channel.target];
                    total
                        + &channel.adjoint
                            * blocking
                            * &channel.operator
                            * Complex::from(self.weight(channel, phonons))
                });
                let gain = self.incoming[k].iter().fold(zeros.clone(), |total, &index| {
                    let channel = &self.channels[index];
                    total
                        + &channel.operator
                            * &rho[channel.source]
                            * &channel.adjoint
                            * Complex::from(self.weight(channel, phonons))
                });
                let blocking = &identity - &rho[k];
                (anticommutator(&blocking, &gain) - anticommutator(&out_rate, &rho[k]))
                    * normalisation
            })
            .collect()
    }

    /// `dn_q/dt` per mode from phonon emission less absorption, per unit cell
    pub(crate) fn phonon_generation(
        &self,
        rho: &[DMatrix<Complex<f64>>],
        phonons: &PhononModel,
    ) -> DMatrix<f64> {
        let (number_of_q_points, number_of_modes) = phonons.occupations().shape();
        let number_of_bands = rho.first().map_or(0, |matrix| matrix.nrows());
        let identity = DMatrix::<Complex<f64>>::identity(number_of_bands, number_of_bands);

        let generation = self
            .channels
            .par_iter()
            .fold(
                || DMatrix::zeros(number_of_q_points, number_of_modes),
                |mut total: DMatrix<f64>, channel| {
                    let (q, mode, sign) = match channel.weight {
                        ChannelWeight::Emission { q, mode } => (q, mode, 1.),
                        ChannelWeight::Absorption { q, mode } => (self.minus_q[q], mode, -1.),
                        ChannelWeight::Unit => return total,
                    };
                    let blocking = &identity - &rho[channel.target];
                    let rate = (&channel.adjoint * blocking * &channel.operator * &rho[channel.source])
                        .trace()
                        .re;
                    total[(q, mode)] += sign * self.weight(channel, phonons) * rate;
                    total
                },
            )
            .reduce(
                || DMatrix::zeros(number_of_q_points, number_of_modes),
                |a, b| a + b,
            );
        generation / rho.len().max(1) as f64
    }
}

/// Emission and absorption channels for every `(k, q, mode)` in the coupling table
fn phonon_channels(inputs: &ScatteringInputs<'_>) -> Vec<Channel> {
    let number_of_bands = inputs.bands.number_of_bands();
    let number_of_modes = inputs.table.number_of_modes();
    let pairs = inputs.table.pairs().collect::<Vec<_>>();

    pairs
        .par_iter()
        .flat_map_iter(|&(k, q)| {
            let entries = inputs.table.entries_at(k, q);
            (0..number_of_modes).flat_map(move |mode| {
                let mut emission = DMatrix::zeros(number_of_bands, number_of_bands);
                let mut absorption = DMatrix::zeros(number_of_bands, number_of_bands);
                let mut k_prime = None;
                let frequency = inputs.phonons.frequency(q, mode);
                for entry in entries.iter().filter(|entry| entry.mode == mode) {
                    k_prime = Some(entry.k_prime);
                    let mismatch =
                        inputs.bands.energy(k, entry.n) - inputs.bands.energy(entry.k_prime, entry.m);
                    emission[(entry.m, entry.n)] =
                        entry.amplitude * inputs.broadening.rate_factor(mismatch - frequency);
                    absorption[(entry.m, entry.n)] =
                        entry.amplitude * inputs.broadening.rate_factor(mismatch + frequency);
                }
                k_prime.into_iter().flat_map(move |k_prime| {
                    [
                        Channel::new(k, k_prime, emission.clone(), ChannelWeight::Emission { q, mode }),
                        Channel::new(k, k_prime, absorption.clone(), ChannelWeight::Absorption { q, mode }),
                    ]
                    .into_iter()
                    .flatten()
                })
            })
        })
        .collect()
}

/// Quasi-elastic intraband channels driven by the statically screened interaction `W(q, 0)`
fn electron_electron_channels(
    inputs: &ScatteringInputs<'_>,
    coulomb: &mut CoulombModel,
    scale: f64,
) -> Result<Vec<Channel>, PropagationError> {
    let dielectric = {
        let screening = coulomb.screening_matrix(&[0.])?;
        (0..screening.number_of_q_points())
            .map(|q| screening.dielectric(q, 0))
            .collect::<Vec<_>>()
    };
    let strengths = dielectric
        .iter()
        .enumerate()
        .map(|(q, &epsilon)| -> Result<f64, PropagationError> {
            Ok(scale.sqrt() * (coulomb.bare_coulomb(q)? / epsilon).norm())
        })
        .collect::<Result<Vec<_>, PropagationError>>()?;

    let number_of_bands = inputs.bands.number_of_bands();
    let channels = (0..inputs.k_map.len())
        .into_par_iter()
        .map(|k| -> Result<Vec<Channel>, PropagationError> {
            let mut channels = Vec::new();
            for (q, &strength) in strengths.iter().enumerate() {
                let k_prime = inputs.k_map.difference(k, q, inputs.q_map)?;
                if k_prime == k {
                    continue;
                }
                let operator = DMatrix::from_fn(number_of_bands, number_of_bands, |m, n| {
                    if m != n {
                        return Complex::from(0.);
                    }
                    let mismatch = inputs.bands.energy(k, n) - inputs.bands.energy(k_prime, n);
                    Complex::from(strength * inputs.broadening.rate_factor(mismatch))
                });
                channels.extend(Channel::new(k, k_prime, operator, ChannelWeight::Unit));
            }
            Ok(channels)
        })
        .collect::<Result<Vec<_>, PropagationError>>()?;
    Ok(channels.into_iter().flatten().collect())
}

#[cfg(test)]
mod test {
    use super::Broadening;
    use approx::assert_relative_eq;

    #[test]
    fn broadened_deltas_are_normalised() {
        for broadening in [
            Broadening::Gaussian { width: 0.05 },
            Broadening::Lorentzian { width: 0.01 },
        ] {
            let spacing = 1e-4;
            let integral = (-200_000..=200_000)
                .map(|i| broadening.delta(i as f64 * spacing) * spacing)
                .sum::<f64>();
            assert_relative_eq!(integral, 1., epsilon = 1e-3);
        }
    }

    #[test]
    fn gaussian_peak_height() {
        let broadening = Broadening::Gaussian { width: 0.01 };
        assert_relative_eq!(
            broadening.delta(0.),
            1. / (0.01 * (2. * std::f64::consts::PI).sqrt())
        );
    }
}

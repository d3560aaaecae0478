//! # Quadrature
//!
//! Weights for integrating uniformly sampled data, and an adaptive composite Gauss-Legendre rule
//! for the smooth-but-awkward one-dimensional integrals of the electron gas.

use ndarray::Array1;

/// Enum for discrete integration methods on a uniform grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum IntegrationRule {
    /// Trapezium rule
    Trapezium,
    /// Romberg integration
    Romberg,
    /// Three point integration
    ThreePoint,
}

impl Default for IntegrationRule {
    fn default() -> Self {
        IntegrationRule::Trapezium
    }
}

impl IntegrationRule {
    /// Weights for `num_points` samples separated by `spacing`
    ///
    /// Each rule falls back to the trapezium rule when there are too few points to apply it: the
    /// Romberg (Simpson) weights need an odd number of at least three samples, the three-point
    /// end corrections need at least eight.
    pub fn weights(&self, num_points: usize, spacing: f64) -> Array1<f64> {
        if num_points < 2 {
            return Array1::zeros(num_points);
        }
        let rule = match self {
            IntegrationRule::Romberg if num_points < 3 || num_points % 2 == 0 => {
                IntegrationRule::Trapezium
            }
            IntegrationRule::ThreePoint if num_points < 8 => IntegrationRule::Trapezium,
            rule => *rule,
        };
        // A closure generating the weight for a given point index
        let weight = |idx: usize| -> f64 {
            match rule {
                IntegrationRule::Trapezium => {
                    if (idx == 0) | (idx == num_points - 1) {
                        0.5
                    } else {
                        1.
                    }
                }
                IntegrationRule::Romberg => {
                    if (idx == 0) | (idx == num_points - 1) {
                        1. / 3.
                    } else if idx % 2 == 0 {
                        2. / 3.
                    } else {
                        4. / 3.
                    }
                }
                IntegrationRule::ThreePoint => {
                    if (idx == 0) | (idx == num_points - 1) {
                        17. / 48.
                    } else if (idx == 1) | (idx == num_points - 2) {
                        59. / 48.
                    } else if (idx == 2) | (idx == num_points - 3) {
                        43. / 48.
                    } else if (idx == 3) | (idx == num_points - 4) {
                        49. / 48.
                    } else {
                        1.
                    }
                }
            }
        };
        Array1::from_shape_fn(num_points, weight) * spacing
    }

    /// Integrates samples taken at uniform `spacing`
    pub fn integrate(&self, samples: &[f64], spacing: f64) -> f64 {
        let weights = self.weights(samples.len(), spacing);
        weights.dot(&Array1::from(samples.to_vec()))
    }
}

const GAUSS_LEGENDRE_NODES: [f64; 5] = [
    0.,
    -0.5384693101056831,
    0.5384693101056831,
    -0.906179845938664,
    0.906179845938664,
];
const GAUSS_LEGENDRE_WEIGHTS: [f64; 5] = [
    0.5688888888888889,
    0.4786286704993665,
    0.4786286704993665,
    0.2369268850561891,
    0.2369268850561891,
];

/// Five-point Gauss-Legendre rule applied on `panels` equal sub-intervals of `[a, b]`
///
/// The integrand is never evaluated at the interval end points, so integrable end-point
/// singularities are tolerated.
pub fn composite_gauss_legendre<F: Fn(f64) -> f64>(f: &F, a: f64, b: f64, panels: usize) -> f64 {
    let width = (b - a) / panels as f64;
    let half_width = width / 2.;
    (0..panels)
        .map(|panel| {
            let centre = a + (panel as f64 + 0.5) * width;
            GAUSS_LEGENDRE_NODES
                .iter()
                .zip(GAUSS_LEGENDRE_WEIGHTS.iter())
                .map(|(node, weight)| weight * f(centre + half_width * node))
                .sum::<f64>()
                * half_width
        })
        .sum()
}

/// Controls the refinement of `integrate_adaptive`
#[derive(Clone, Copy, Debug)]
pub struct Refinement {
    pub initial_panels: usize,
    pub relative_tolerance: f64,
    pub maximum_refinements: usize,
}

impl Default for Refinement {
    fn default() -> Self {
        Self {
            initial_panels: 8,
            relative_tolerance: 1e-10,
            maximum_refinements: 12,
        }
    }
}

/// The outcome of an adaptive integration
#[derive(Clone, Copy, Debug)]
pub struct Quadrature {
    pub value: f64,
    pub panels: usize,
    pub converged: bool,
}

/// Integrates `f` over `[a, b]`, doubling the number of Gauss-Legendre panels until successive
/// estimates agree to the requested relative tolerance
pub fn integrate_adaptive<F: Fn(f64) -> f64>(
    f: &F,
    a: f64,
    b: f64,
    refinement: Refinement,
) -> Quadrature {
    let mut panels = refinement.initial_panels.max(1);
    let mut previous = composite_gauss_legendre(f, a, b, panels);
    for _ in 0..refinement.maximum_refinements {
        panels *= 2;
        let current = composite_gauss_legendre(f, a, b, panels);
        if (current - previous).abs() <= refinement.relative_tolerance * current.abs().max(1e-300)
        {
            return Quadrature {
                value: current,
                panels,
                converged: true,
            };
        }
        previous = current;
    }
    tracing::debug!(
        "Gauss-Legendre quadrature on [{a}, {b}] unconverged after {panels} panels"
    );
    Quadrature {
        value: previous,
        panels,
        converged: false,
    }
}

#[cfg(test)]
mod test {
    use super::{composite_gauss_legendre, integrate_adaptive, IntegrationRule, Refinement};
    use approx::assert_relative_eq;

    #[test]
    fn trapezium_weights_sum_to_interval_length() {
        let weights = IntegrationRule::Trapezium.weights(11, 0.1);
        assert_relative_eq!(weights.sum(), 1.0, epsilon = 1e-14);
    }

    #[test]
    fn romberg_integrates_cubics_exactly() {
        let n = 21;
        let spacing = 2. / (n - 1) as f64;
        let samples = (0..n)
            .map(|i| {
                let x = i as f64 * spacing;
                x.powi(3) - x
            })
            .collect::<Vec<_>>();
        assert_relative_eq!(
            IntegrationRule::Romberg.integrate(&samples, spacing),
            2.,
            epsilon = 1e-12
        );
    }

    #[test]
    fn three_point_rule_integrates_quadratics_exactly() {
        let n = 16;
        let spacing = 1. / (n - 1) as f64;
        let samples = (0..n)
            .map(|i| (i as f64 * spacing).powi(2))
            .collect::<Vec<_>>();
        assert_relative_eq!(
            IntegrationRule::ThreePoint.integrate(&samples, spacing),
            1. / 3.,
            epsilon = 1e-12
        );
    }

    #[test]
    fn romberg_with_even_samples_falls_back_to_trapezium() {
        let samples = [1., 1., 1., 1.];
        assert_relative_eq!(IntegrationRule::Romberg.integrate(&samples, 1.), 3.);
    }

    #[test]
    fn gauss_legendre_is_exact_for_degree_nine_polynomials() {
        let f = |x: f64| x.powi(9) + 2. * x.powi(4);
        assert_relative_eq!(
            composite_gauss_legendre(&f, 0., 1., 1),
            0.1 + 0.4,
            epsilon = 1e-14
        );
    }

    #[test]
    fn adaptive_integration_handles_square_root_end_point() {
        let f = |x: f64| x.sqrt();
        let result = integrate_adaptive(&f, 0., 1., Refinement::default());
        assert_relative_eq!(result.value, 2. / 3., epsilon = 1e-9);
    }
}

//! # Homogeneous electron gas
//!
//! Reference integrals for a parabolic three-dimensional electron gas at finite temperature. They
//! parametrise the screening when no band-resolved Lindhard sum is wanted, and give closed-form
//! limits to validate the grid-based response against.
//!
//! Energies are measured in units of `kT` and wavevectors in units of the thermal wavevector
//! `k_T = sqrt(2 m kT)`, so the reduced chemical potential `α = μ / kT` is the only parameter of
//! the integrands.

use crate::error::HegError;
use crate::quadrature::{integrate_adaptive, Refinement};
use std::f64::consts::PI;

/// Integration range past the Fermi level, in units of kT, beyond which the occupation is negligible
const OCCUPATION_TAIL: f64 = 60.;

const REFINEMENT: Refinement = Refinement {
    initial_panels: 8,
    relative_tolerance: 1e-10,
    maximum_refinements: 12,
};

fn fermi_dirac_reduced(exponent: f64) -> f64 {
    if exponent > 0. {
        let decay = (-exponent).exp();
        decay / (1. + decay)
    } else {
        1. / (1. + exponent.exp())
    }
}

/// `√x / (e^{x - α} + 1)`, whose integral over `x` fixes the density at reduced chemical potential α
pub fn integrand_solve_alpha(x: f64, alpha: f64) -> f64 {
    x.sqrt() * fermi_dirac_reduced(x - alpha)
}

/// `x / (e^{x² - α} + 1) ln|(x + y) / (x - y)|`, the finite-temperature static Lindhard integrand
///
/// `x = k / k_T` and `y = q / 2k_T`. The logarithm is integrably singular at `x = y`, where the
/// integrand is defined to vanish.
pub fn integrand_g(x: f64, y: f64, alpha: f64) -> f64 {
    let ratio = ((x + y) / (x - y)).abs();
    if !ratio.is_finite() || ratio == 0. {
        return 0.;
    }
    x * fermi_dirac_reduced(x * x - alpha) * ratio.ln()
}

/// Integrates over `[a, b]`, splitting at `split` when it lies inside the interval
fn integrate_split<F: Fn(f64) -> f64>(f: &F, a: f64, b: f64, split: f64) -> f64 {
    if split > a && split < b {
        integrate_adaptive(f, a, split, REFINEMENT).value
            + integrate_adaptive(f, split, b, REFINEMENT).value
    } else {
        integrate_adaptive(f, a, b, REFINEMENT).value
    }
}

/// `F(α) = ∫₀^∞ √x / (e^{x - α} + 1) dx`
pub fn fermi_integral(alpha: f64) -> f64 {
    let upper = alpha.max(0.) + OCCUPATION_TAIL;
    integrate_split(&|x| integrand_solve_alpha(x, alpha), 0., upper, alpha)
}

/// A parabolic electron gas
#[derive(Clone, Copy, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HomogeneousElectronGas {
    /// Electron density in bohr⁻³
    pub density: f64,
    /// kT in Hartree
    pub temperature: f64,
    /// Effective mass in units of the electron mass
    pub effective_mass: f64,
    pub spin_degeneracy: f64,
}

impl HomogeneousElectronGas {
    /// The thermal wavevector `k_T = sqrt(2 m kT)`
    pub fn thermal_wavevector(&self) -> f64 {
        (2. * self.effective_mass * self.temperature).sqrt()
    }

    /// The value of `F(α)` that reproduces the density
    fn target_fermi_integral(&self) -> f64 {
        4. * PI * PI * self.density / (self.spin_degeneracy * self.thermal_wavevector().powi(3))
    }

    /// The density of a gas at reduced chemical potential `alpha`
    pub fn density_at(&self, alpha: f64) -> f64 {
        self.spin_degeneracy * self.thermal_wavevector().powi(3) * fermi_integral(alpha)
            / (4. * PI * PI)
    }

    /// Solves for the reduced chemical potential `α = μ / kT` by bisection
    pub fn solve_alpha(&self) -> Result<f64, HegError> {
        let target = self.target_fermi_integral();
        if !target.is_finite() || target <= 0. {
            return Err(HegError::Divergent {
                quantity: "density",
                value: self.density,
            });
        }
        let mut lower = -OCCUPATION_TAIL;
        if fermi_integral(lower) > target {
            return Err(HegError::NoBracket {
                density: self.density,
            });
        }
        let mut upper = OCCUPATION_TAIL;
        while fermi_integral(upper) < target {
            upper *= 2.;
            if upper > 1e7 {
                return Err(HegError::NoBracket {
                    density: self.density,
                });
            }
        }
        for _ in 0..200 {
            let middle = 0.5 * (lower + upper);
            if fermi_integral(middle) < target {
                lower = middle;
            } else {
                upper = middle;
            }
            if upper - lower < 1e-12 * (1. + middle.abs()) {
                break;
            }
        }
        Ok(0.5 * (lower + upper))
    }

    /// Static polarisability `Π(q) = -χ₀(q, 0)` at finite temperature, in Hartree⁻¹ bohr⁻³
    pub fn static_polarizability(&self, q: f64) -> Result<f64, HegError> {
        let alpha = self.solve_alpha()?;
        self.static_polarizability_at(q, alpha)
    }

    /// As `static_polarizability`, with a precomputed reduced chemical potential
    pub fn static_polarizability_at(&self, q: f64, alpha: f64) -> Result<f64, HegError> {
        let thermal_wavevector = self.thermal_wavevector();
        let prefactor = self.spin_degeneracy * self.effective_mass / (2. * PI * PI);
        let upper = (alpha.max(0.) + OCCUPATION_TAIL).sqrt();
        let value = if q < 1e-12 * thermal_wavevector {
            // ln|(x+y)/(x-y)| -> 2y/x as y -> 0
            let integral = integrate_adaptive(
                &|x: f64| fermi_dirac_reduced(x * x - alpha),
                0.,
                upper,
                REFINEMENT,
            )
            .value;
            prefactor * thermal_wavevector * integral
        } else {
            let y = q / (2. * thermal_wavevector);
            let integral = integrate_split(&|x| integrand_g(x, y, alpha), 0., upper.max(2. * y), y);
            prefactor * thermal_wavevector * thermal_wavevector * integral / q
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(HegError::Divergent {
                quantity: "q",
                value: q,
            })
        }
    }

    /// The Fermi wavevector `(6π² n / g_s)^{1/3}`
    pub fn fermi_wavevector(&self) -> f64 {
        (6. * PI * PI * self.density / self.spin_degeneracy).cbrt()
    }

    pub fn fermi_energy(&self) -> f64 {
        self.fermi_wavevector().powi(2) / (2. * self.effective_mass)
    }

    /// Density of states at the Fermi level, `g_s m k_F / 2π²`
    pub fn density_of_states_at_fermi_level(&self) -> f64 {
        self.spin_degeneracy * self.effective_mass * self.fermi_wavevector() / (2. * PI * PI)
    }

    /// The zero-temperature static Lindhard function `Π₀(q)`
    pub fn lindhard_zero_temperature(&self, q: f64) -> f64 {
        let z = q / (2. * self.fermi_wavevector());
        let shape = if z < 1e-12 {
            1.
        } else if (z - 1.).abs() < 1e-12 {
            0.5
        } else {
            0.5 + (1. - z * z) / (4. * z) * ((1. + z) / (1. - z)).abs().ln()
        };
        self.density_of_states_at_fermi_level() * shape
    }

    /// The Thomas-Fermi screening wavevector in a background of relative permittivity
    /// `background_permittivity`
    pub fn thomas_fermi_wavevector(&self, background_permittivity: f64) -> f64 {
        (4. * PI * self.density_of_states_at_fermi_level() / background_permittivity).sqrt()
    }
}

#[cfg(test)]
mod test {
    use super::{fermi_integral, integrand_g, integrand_solve_alpha, HomogeneousElectronGas};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    /// A gas with unit Fermi wavevector at a temperature of `ratio * E_F`
    fn degenerate_gas(ratio: f64) -> HomogeneousElectronGas {
        let density = 2. / (6. * PI * PI);
        HomogeneousElectronGas {
            density,
            temperature: ratio * 0.5,
            effective_mass: 1.,
            spin_degeneracy: 2.,
        }
    }

    #[test]
    fn integrands_are_well_behaved_at_special_points() {
        assert_relative_eq!(integrand_solve_alpha(0., 3.), 0.);
        assert_relative_eq!(integrand_g(0.5, 0.5, 1.), 0.);
        assert!(integrand_g(0.5 + 1e-9, 0.5, 1.).is_finite());
        assert!(integrand_g(1., 0.2, 1.) > 0.);
    }

    #[test]
    fn nondegenerate_fermi_integral_approaches_boltzmann_limit() {
        // F(α) -> e^α √π / 2 as α -> -∞
        let alpha: f64 = -20.;
        assert_relative_eq!(
            fermi_integral(alpha),
            alpha.exp() * PI.sqrt() / 2.,
            max_relative = 1e-6
        );
    }

    #[test]
    fn solved_alpha_reproduces_the_density() {
        for ratio in [0.01, 0.3, 5.] {
            let gas = degenerate_gas(ratio);
            let alpha = gas.solve_alpha().unwrap();
            assert_relative_eq!(gas.density_at(alpha), gas.density, max_relative = 1e-8);
        }
        // In the degenerate limit μ approaches E_F
        let gas = degenerate_gas(0.01);
        assert_relative_eq!(gas.solve_alpha().unwrap(), 100., max_relative = 1e-3);
    }

    #[test]
    fn low_temperature_polarizability_approaches_zero_temperature_lindhard() {
        let gas = degenerate_gas(0.01);
        let alpha = gas.solve_alpha().unwrap();
        for z in [0.25, 0.5, 0.75] {
            let q = 2. * gas.fermi_wavevector() * z;
            let finite = gas.static_polarizability_at(q, alpha).unwrap();
            let zero = gas.lindhard_zero_temperature(q);
            assert_relative_eq!(finite, zero, max_relative = 1e-3);
        }
    }

    #[test]
    fn long_wavelength_limit_is_continuous() {
        let gas = degenerate_gas(0.3);
        let alpha = gas.solve_alpha().unwrap();
        let at_zero = gas.static_polarizability_at(0., alpha).unwrap();
        let small_q = gas.static_polarizability_at(1e-4, alpha).unwrap();
        assert_relative_eq!(at_zero, small_q, max_relative = 1e-4);
    }

    #[test]
    fn thomas_fermi_wavevector_matches_closed_form() {
        let gas = degenerate_gas(0.01);
        // k_TF² = 4 k_F / π for unit mass and k_F = 1
        assert_relative_eq!(
            gas.thomas_fermi_wavevector(1.).powi(2),
            4. / PI,
            max_relative = 1e-12
        );
    }
}

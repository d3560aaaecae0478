//! # Constants
//!
//! Unit conversions into Hartree atomic units, in which the simulation runs internally

/// One electron volt in Hartree
pub const ELECTRON_VOLT: f64 = 1. / 27.21138505;
/// One Kelvin, as an energy kT, in Hartree
pub const KELVIN: f64 = 1. / 3.1577464e5;
/// One femtosecond in atomic units of time
pub const FEMTOSECOND: f64 = 1. / 0.02418884326;
/// One Angstrom in bohr
pub const ANGSTROM: f64 = 1. / 0.5291772;
/// One cubic centimetre in cubic bohr
pub const CUBIC_CENTIMETRE: f64 = 1e24 * ANGSTROM * ANGSTROM * ANGSTROM;

/// Phonon frequencies are floored at this value before computing a Bose-Einstein occupation
pub const FREQUENCY_FLOOR: f64 = 1e-6;
/// Spin degeneracy of a spin-unpolarised band
pub const SPIN_DEGENERACY: f64 = 2.;

// Copyright 2022 Chris Gubbin
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Carrier DMD propagates the single-particle density matrix of photoexcited carriers in a
//! periodic crystal as they relax through electron-phonon and electron-electron scattering
//!
//! # Overview
//! The density matrix `ρ_k` lives on a Monkhorst-Pack grid of k-points, one `N_b × N_b` matrix per
//! point. It evolves under the Lindblad-type equation
//!
//! ```text
//! dρ_k/dt = -i [H_k, ρ_k] + C_k[ρ] - D[ρ_k]
//! ```
//!
//! where the coherent part is integrated exactly in the band eigenbasis, the collision term
//! `C_k` collects phonon emission, phonon absorption and screened electron-electron channels
//! built from a precomputed coupling table, and the optional dephasing `D` damps coherences.
//! Each step is checked for particle conservation and a physical energy, and an unstable step
//! is retried with a smaller time step from the last good state.
//!
//! # Usage
//! Carrier DMD is distributed as a binary crate. Any value of the built-in defaults can be
//! overridden from a `.toml` file passed on the command line:
//!
//! ```toml
//! [bands]
//! kind = "Flat"
//! energies = [0.0, 0.036]
//!
//! [propagation]
//! time_step = 0.5
//! total_time = 100.0
//! ```
//!
//! Observables are written to `observables.dat` in the output directory, and a run can be
//! resumed from its checkpoints with `--restart`.

#![allow(clippy::type_complexity)]

/// The command line application, configuration and tracing
pub mod app;

/// Band energies and Fermi-Dirac statistics
pub mod bands;

/// Physical constants and unit conversions
pub mod constants;

/// The bare and screened Coulomb interaction
pub mod coulomb;

/// Electron-phonon coupling tables
pub mod coupling;

/// The per-k-point density matrix
pub mod density_matrix;

/// Error handling
pub mod error;

/// Finite temperature homogeneous electron gas
pub mod heg;

/// Lookup between grid points and flat indices
pub mod index_map;

/// Binary caches and checkpoints
pub mod io;

/// Scalar observables and their time averages
pub mod observables;

/// Phonon dispersions and occupations
pub mod phonon;

/// Time propagation of the density matrix
pub mod propagator;

/// Quadrature on uniform grids
pub mod quadrature;

/// Model assembly and the propagation driver
pub mod simulation;

/// Helper functions and traits
mod utilities;

//! # Error
//!
//! Error types raised by the library. Each concern gets its own enum, `DmdError` gathers them for
//! the public entry points in `simulation`.

use crate::propagator::PropagatorState;
use miette::Diagnostic;

#[derive(thiserror::Error, Debug, Diagnostic)]
/// Errors resolving coordinates on a reciprocal-space grid
pub enum IndexError {
    /// A fractional coordinate does not coincide with any grid point
    #[error("point {point:?} does not lie on the grid")]
    #[diagnostic(help("check that the point was generated from the same grid divisions and shift"))]
    NotOnGrid { point: [f64; 3] },
    /// `k ∓ q` fell between the points of the k-grid
    #[error("k = {k:?} combined with q = {q:?} gives {result:?}, which is off the k-grid")]
    #[diagnostic(help("the k-grid divisions must be multiples of the q-grid divisions"))]
    OffGrid {
        k: [f64; 3],
        q: [f64; 3],
        result: [f64; 3],
    },
}

#[derive(thiserror::Error, Debug, Diagnostic)]
/// Errors evaluating the screened Coulomb interaction
pub enum ScreeningError {
    /// The interaction is singular, or evaluated to a non-finite value
    #[error("screened interaction diverges at q-index {q} and frequency {frequency}")]
    #[diagnostic(help("set a regularisation wavevector to screen the q -> 0 singularity"))]
    Divergent { q: usize, frequency: f64 },
}

#[derive(thiserror::Error, Debug, Diagnostic)]
/// Errors in the homogeneous electron gas integrals
pub enum HegError {
    #[error("homogeneous gas integral is not finite for {quantity} = {value}")]
    Divergent { quantity: &'static str, value: f64 },
    #[error("failed to bracket the reduced chemical potential for density {density}")]
    NoBracket { density: f64 },
}

#[derive(thiserror::Error, Debug, Diagnostic)]
/// Errors raised while propagating the density matrix
pub enum PropagationError {
    /// A step violated a conservation check. The step was not committed.
    #[error(
        "step ending at t = {time} is unstable: relative particle drift {trace_drift:e}, energy {energy}"
    )]
    #[diagnostic(help("reduce the time step, or raise the trace tolerance"))]
    Unstable {
        time: f64,
        trace_drift: f64,
        energy: f64,
    },
    #[error("cannot call `{operation}` on a propagator in the {state} state")]
    InvalidState {
        operation: &'static str,
        state: PropagatorState,
    },
    #[error("{0}")]
    Shape(String),
    /// An initial state with a single-particle occupation outside `[0, 1]`
    #[error("density matrix {index} has an occupation {occupation} outside [0, 1]")]
    Occupation { index: usize, occupation: f64 },
    #[error("step at t = {time} still unstable after {retries} halvings of the time step")]
    RetriesExhausted { time: f64, retries: usize },
    #[error(transparent)]
    Screening(#[from] ScreeningError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum BuildError {
    #[error(transparent)]
    Csr(#[from] CsrError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Screening(#[from] ScreeningError),
    #[error(transparent)]
    Heg(#[from] HegError),
    #[error("{0}")]
    Shape(String),
    #[error("{0}")]
    Configuration(String),
}

#[derive(thiserror::Error, Debug, Diagnostic)]
/// General error for Csr construction, patterns and element access problems
pub enum CsrError {
    #[error("{0}")]
    Access(String),
    #[error(transparent)]
    Pattern(#[from] nalgebra_sparse::pattern::SparsityPatternFormatError),
    #[error(transparent)]
    Construction(#[from] nalgebra_sparse::SparseFormatError),
}

#[derive(thiserror::Error, Debug, Diagnostic)]
/// Error for IO events
pub enum IOError {
    #[error("IO Failure: {0}")]
    IO(#[from] std::io::Error),
    #[error("Serialisation failure: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Unreadable path: {0}")]
    Glob(#[from] glob::GlobError),
}

#[derive(thiserror::Error, Debug, Diagnostic)]
/// The error returned by the public simulation entry points
pub enum DmdError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Propagation(#[from] PropagationError),
    #[error(transparent)]
    IO(#[from] IOError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Screening(#[from] ScreeningError),
}

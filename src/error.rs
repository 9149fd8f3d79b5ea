use std::error;
use std::fmt;
use std::io;

/**
 * Error conditions surfaced by the solver core. The first two abort a run
 * before any iteration; the admissibility and linear-solver conditions are
 * retried with a reduced CFL by the outer loop; `Diverged` terminates the
 * run with a diagnostic.
 */
#[derive(Debug)]
pub enum Error {
    InvalidInput(String),
    DegenerateGeometry(String),
    NonAdmissible {
        cell: usize,
        density: f64,
        pressure: f64,
    },
    LinearSolverDiverged {
        achieved: f64,
        target: f64,
        iterations: usize,
    },
    Diverged(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;

        match self {
            InvalidInput(what) => {
                write!(fmt, "invalid input: {}", what)
            }
            DegenerateGeometry(what) => {
                write!(fmt, "degenerate geometry: {}", what)
            }
            NonAdmissible {
                cell,
                density,
                pressure,
            } => {
                write!(
                    fmt,
                    "non-admissible state in cell {}: density = {:.6e}, pressure = {:.6e}",
                    cell, density, pressure
                )
            }
            LinearSolverDiverged {
                achieved,
                target,
                iterations,
            } => {
                write!(
                    fmt,
                    "linear solver reached residual {:.3e} (target {:.3e}) after {} iterations",
                    achieved, target, iterations
                )
            }
            Diverged(what) => {
                write!(fmt, "solution diverged: {}", what)
            }
            Io(e) => {
                write!(fmt, "i/o error: {}", e)
            }
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

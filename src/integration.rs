use crate::config::{TimeScheme, TurbulenceModel};
use crate::error::Error;
use crate::monitor::{force_coefficients, Monitor, MonitorSample};
use crate::solver::mean::Bdf2;
use crate::solver::{Case, IterationOutcome, MeanSolver, TurbSolver};
use crate::state::{FlowField, TurbField};
use crate::turbulence::{sa_freestream, sst_freestream};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

/**
 * Terminal state of a run. `Converged` means the density residual dropped
 * by the configured factor from its initial value; `IterationLimit` means
 * the cap was reached first; cancellation through the stop flag is
 * reported separately so the driver can distinguish it from stagnation.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Converged,
    IterationLimit,
    Cancelled,
}

#[derive(Clone, Copy, Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub iterations: usize,
    pub final_residual: f64,
    pub final_cfl: f64,
}

/**
 * The outer pseudo-time integration: CFL ramping and cutback, the loosely
 * coupled turbulence subiteration, convergence bookkeeping against the
 * initial residual, divergence detection, and the dual-time BDF2 wrapper
 * for unsteady runs. The stop flag is checked once per outer iteration.
 */
pub struct Integrator {
    mean: MeanSolver,
    turbulence: Option<(TurbSolver, TurbField)>,
    cfl: f64,
    consecutive_failures: usize,
}

// ============================================================================
impl Integrator {
    pub fn new(case: &Case, field: &FlowField) -> Self {
        let mean = MeanSolver::new(case);
        let turbulence = match case.config.turbulence {
            TurbulenceModel::None => None,
            TurbulenceModel::Sa => {
                let vars = [sa_freestream(&case.freestream, &case.gas), 0.0];
                let solver = TurbSolver::new(case, vars);
                let turb = TurbField::new(1, field.cell_count(), &vars[..1]);
                Some((solver, turb))
            }
            TurbulenceModel::Sst => {
                let vars = sst_freestream(&case.freestream, &case.gas);
                let solver = TurbSolver::new(case, vars);
                let turb = TurbField::new(2, field.cell_count(), &vars);
                Some((solver, turb))
            }
        };
        Self {
            mean,
            turbulence,
            cfl: case.config.cfl_init,
            consecutive_failures: 0,
        }
    }

    pub fn cfl(&self) -> f64 {
        self.cfl
    }

    pub fn set_cfl(&mut self, cfl: f64) {
        self.cfl = cfl;
    }

    pub fn turbulence_state(&self) -> Option<&TurbField> {
        self.turbulence.as_ref().map(|(_, turb)| turb)
    }

    pub fn turbulence_state_mut(&mut self) -> Option<&mut TurbField> {
        self.turbulence.as_mut().map(|(_, turb)| turb)
    }

    /// Run to steady state (or to the caps). Also used as the inner driver
    /// of each physical time step in dual-time mode.
    pub fn run_steady(
        &mut self,
        case: &Case,
        field: &mut FlowField,
        monitor: &mut dyn Monitor,
        stop: &AtomicBool,
    ) -> Result<RunOutcome, Error> {
        match case.config.time_integration {
            TimeScheme::DualTimeBdf2 => self.run_dual_time(case, field, monitor, stop),
            _ => self.pseudo_time_loop(
                case,
                field,
                monitor,
                stop,
                case.config.max_iterations,
                case.config.residual_target,
                None,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn pseudo_time_loop(
        &mut self,
        case: &Case,
        field: &mut FlowField,
        monitor: &mut dyn Monitor,
        stop: &AtomicBool,
        max_iterations: usize,
        residual_target: f64,
        unsteady: Option<Bdf2>,
    ) -> Result<RunOutcome, Error> {
        let config = case.config;
        let mut initial_residual = None;
        let mut last_residual = f64::INFINITY;

        for iteration in 0..max_iterations {
            if stop.load(Ordering::Relaxed) {
                return Ok(RunOutcome {
                    status: RunStatus::Cancelled,
                    iterations: iteration,
                    final_residual: last_residual,
                    final_cfl: self.cfl,
                });
            }
            let outcome = match self.mean.iterate(case, field, self.cfl, unsteady) {
                Ok(outcome) => outcome,
                Err(e @ Error::LinearSolverDiverged { .. }) => {
                    warn!("iteration {}: {}", iteration, e);
                    self.cut_back(case)?;
                    continue;
                }
                Err(e @ Error::NonAdmissible { .. }) => {
                    warn!("iteration {}: {}", iteration, e);
                    self.cut_back(case)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let density_rms = outcome.residual_rms[0];
            if !density_rms.is_finite() {
                warn!("iteration {}: residual is not finite", iteration);
                self.cut_back(case)?;
                continue;
            }

            let mut turbulence_rms = [0.0; 2];
            if let Some((solver, turb)) = self.turbulence.as_mut() {
                match solver.iterate(case, field, turb, 1.0) {
                    Ok(outcome) => turbulence_rms = outcome.residual_rms,
                    Err(e) => {
                        warn!("turbulence subiteration {}: {}", iteration, e);
                        self.cut_back(case)?;
                        continue;
                    }
                }
            }

            self.adapt_cfl(case, &outcome)?;
            last_residual = density_rms;
            let reference = *initial_residual.get_or_insert(density_rms.max(1e-300));

            if unsteady.is_none() || iteration % config.monitor_interval == 0 {
                let forces = case
                    .boundary
                    .iter()
                    .any(|bc| bc.is_wall())
                    .then(|| force_coefficients(case, field));
                monitor.record(&MonitorSample {
                    iteration,
                    cfl: self.cfl,
                    residual_rms: outcome.residual_rms,
                    turbulence_rms,
                    forces,
                });
            }

            if density_rms <= residual_target * reference {
                return Ok(RunOutcome {
                    status: RunStatus::Converged,
                    iterations: iteration + 1,
                    final_residual: density_rms,
                    final_cfl: self.cfl,
                });
            }
        }

        Ok(RunOutcome {
            status: RunStatus::IterationLimit,
            iterations: max_iterations,
            final_residual: last_residual,
            final_cfl: self.cfl,
        })
    }

    /// Physical time stepping with BDF2: each step converges an inner
    /// pseudo-time problem whose residual carries the three-point backward
    /// difference.
    fn run_dual_time(
        &mut self,
        case: &Case,
        field: &mut FlowField,
        monitor: &mut dyn Monitor,
        stop: &AtomicBool,
    ) -> Result<RunOutcome, Error> {
        let config = case.config;
        let bdf2 = Bdf2 {
            dt: config.time_step,
        };
        let mut total_iterations = 0;
        let mut last = RunOutcome {
            status: RunStatus::IterationLimit,
            iterations: 0,
            final_residual: f64::INFINITY,
            final_cfl: self.cfl,
        };

        // seed both time levels with the initial state; the first step is
        // effectively first order
        field.push_time_level();
        field.push_time_level();

        for step in 0..config.n_time_steps {
            if stop.load(Ordering::Relaxed) {
                last.status = RunStatus::Cancelled;
                return Ok(last);
            }
            let inner = self.pseudo_time_loop(
                case,
                field,
                monitor,
                stop,
                config.inner_iterations,
                config.residual_target.max(1e-4),
                Some(bdf2),
            )?;
            total_iterations += inner.iterations;
            info!(
                "time step {:5}  t = {:.6e}  inner iterations {:3}  residual {:.3e}",
                step,
                (step + 1) as f64 * config.time_step,
                inner.iterations,
                inner.final_residual
            );
            last = inner;
            if last.status == RunStatus::Cancelled {
                return Ok(last);
            }
            field.push_time_level();
        }

        Ok(RunOutcome {
            status: RunStatus::Converged,
            iterations: total_iterations,
            final_residual: last.final_residual,
            final_cfl: self.cfl,
        })
    }

    /// Growth on success, cutback on trouble; the floor turns a stall into
    /// a hard divergence.
    fn adapt_cfl(&mut self, case: &Case, outcome: &IterationOutcome) -> Result<(), Error> {
        let config = case.config;
        if outcome.clipped > 0 {
            self.consecutive_failures += 1;
            if self.consecutive_failures > config.admissibility_retries {
                return Err(Error::Diverged(format!(
                    "{} consecutive iterations produced non-admissible states",
                    self.consecutive_failures
                )));
            }
            self.cfl = (self.cfl * config.cfl_cutback).max(0.0);
            if self.cfl < config.cfl_floor {
                return Err(Error::Diverged(format!(
                    "cfl collapsed below the floor {:.3e}",
                    config.cfl_floor
                )));
            }
        } else {
            self.consecutive_failures = 0;
            self.cfl = (self.cfl * config.cfl_growth).min(config.cfl_max);
        }
        Ok(())
    }

    fn cut_back(&mut self, case: &Case) -> Result<(), Error> {
        let config = case.config;
        self.consecutive_failures += 1;
        self.cfl *= config.cfl_cutback;
        if self.cfl < config.cfl_floor {
            return Err(Error::Diverged(format!(
                "cfl collapsed below the floor {:.3e}",
                config.cfl_floor
            )));
        }
        if self.consecutive_failures > config.admissibility_retries {
            return Err(Error::Diverged(
                "repeated solver failures at minimum cfl".to_string(),
            ));
        }
        Ok(())
    }
}

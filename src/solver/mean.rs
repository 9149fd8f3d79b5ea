use super::boundary::boundary_flux;
use super::Case;
use crate::config::{BoundaryCondition, ConvectiveScheme, KrylovMethod, LimiterKind, TimeScheme};
use crate::error::Error;
use crate::gas::MAX_VARS;
use crate::geometry::sub;
use crate::linalg::block::add_into_row;
use crate::linalg::{bicgstab, gmres, BlockMatrix, Preconditioner, SolveStats};
use crate::numerics::convective::{
    ausm_flux, hllc_flux, jst_flux, roe_flux, spectral_radius, UpwindOptions,
};
use crate::numerics::gradients::{
    compute_gradients, compute_jst_sensors, compute_limiters, reconstruct,
};
use crate::numerics::viscous::{viscous_flux, viscous_spectral_radius};
use crate::numerics::{block_add_scaled, EdgeFlux};
use crate::state::FlowField;
use rayon::prelude::*;

/// Jameson-style explicit multistage coefficients.
const RK_STAGES: [f64; 4] = [0.25, 1.0 / 3.0, 0.5, 1.0];

/// Weight of the viscous spectral radius in the local time step.
const TIME_STEP_VISCOUS_COEFF: f64 = 4.0;

/**
 * Result of one nonlinear iteration, consumed by the outer loop for CFL
 * control and convergence monitoring.
 */
#[derive(Clone, Copy, Debug)]
pub struct IterationOutcome {
    pub residual_rms: [f64; MAX_VARS],
    pub residual_max: f64,
    pub clipped: usize,
    pub linear: Option<SolveStats>,
}

/// Physical-time contribution for dual-time stepping: the three-point
/// backward difference of the conservatives enters the residual and
/// 3/(2 dt) scales into the diagonal.
#[derive(Clone, Copy)]
pub struct Bdf2 {
    pub dt: f64,
}

struct PlanEntry {
    edge: u32,
    sign: f64,
    local_slot: u32,
}

/**
 * The mean-flow nonlinear iteration: gradients and limiters, parallel
 * edge-flux computation, per-cell owner-gather of the residual and the
 * Jacobian rows, boundary contributions, local time stepping, and either an
 * implicit Krylov update or an explicit multistage one.
 */
pub struct MeanSolver {
    implicit: bool,
    viscous: bool,
    nvar: usize,
    residual: Vec<f64>,
    delta: Vec<f64>,
    edge_fluxes: Vec<EdgeFlux>,
    boundary_fluxes: Vec<EdgeFlux>,
    /// boundary condition per flattened boundary face
    face_bcs: Vec<BoundaryCondition>,
    matrix: Option<BlockMatrix>,
    plan_offsets: Vec<u32>,
    plan: Vec<PlanEntry>,
    diag_local: Vec<u32>,
    /// cells whose momentum rows are strongly pinned to zero velocity
    noslip_cells: Vec<u32>,
    /// cells with a strongly imposed wall temperature
    isothermal_cells: Vec<(u32, f64)>,
}

// ============================================================================
impl MeanSolver {
    pub fn new(case: &Case) -> Self {
        let geometry = case.geometry;
        let config = case.config;
        let n_cells = geometry.cell_count();
        let nvar = config.nvar();
        let implicit = config.time_integration != TimeScheme::ExplicitRk;
        let viscous = config.viscous();

        let edges: Vec<[u32; 2]> = (0..geometry.edge_count())
            .map(|e| geometry.edge_cells(e))
            .collect();
        let matrix = implicit.then(|| BlockMatrix::from_graph(n_cells, nvar, &edges));

        // Scatter plan: for every cell, its incident edges with orientation
        // sign and (implicit) the row-local slot of the neighbor block.
        let mut plan_offsets = vec![0u32];
        let mut plan = Vec::new();
        let mut diag_local = vec![0u32; n_cells];
        for c in 0..n_cells {
            for (e, sign) in geometry.edges_of_cell(c) {
                let nbr = geometry.neighbor(e, c);
                let local_slot = matrix
                    .as_ref()
                    .map(|m| m.local_slot(c, nbr).unwrap() as u32)
                    .unwrap_or(0);
                plan.push(PlanEntry {
                    edge: e as u32,
                    sign,
                    local_slot,
                });
            }
            plan_offsets.push(plan.len() as u32);
            if let Some(m) = &matrix {
                diag_local[c] = m.local_slot(c, c).unwrap() as u32;
            }
        }

        let mut face_bcs = Vec::with_capacity(geometry.boundary_face_count());
        let mut noslip_cells = Vec::new();
        let mut isothermal_cells = Vec::new();
        for (marker, bc) in case.boundary.iter().enumerate() {
            for face in geometry.boundary_faces(marker) {
                face_bcs.push(*bc);
                if viscous {
                    match bc {
                        BoundaryCondition::WallHeatflux { .. } => noslip_cells.push(face.cell),
                        BoundaryCondition::WallIsothermal { temperature } => {
                            noslip_cells.push(face.cell);
                            isothermal_cells.push((face.cell, *temperature));
                        }
                        _ => {}
                    }
                }
            }
        }
        noslip_cells.sort_unstable();
        noslip_cells.dedup();

        Self {
            implicit,
            viscous,
            nvar,
            residual: vec![0.0; n_cells * nvar],
            delta: vec![0.0; n_cells * nvar],
            edge_fluxes: vec![EdgeFlux::default(); geometry.edge_count()],
            boundary_fluxes: vec![EdgeFlux::default(); geometry.boundary_face_count()],
            face_bcs,
            matrix,
            plan_offsets,
            plan,
            diag_local,
            noslip_cells,
            isothermal_cells,
        }
    }

    pub fn residual(&self) -> &[f64] {
        &self.residual
    }

    /// One nonlinear iteration at the given CFL. For explicit mode this
    /// runs the full multistage sequence; for dual-time runs the BDF2 terms
    /// are folded into residual and diagonal.
    pub fn iterate(
        &mut self,
        case: &Case,
        field: &mut FlowField,
        cfl: f64,
        unsteady: Option<Bdf2>,
    ) -> Result<IterationOutcome, Error> {
        if self.implicit {
            self.iterate_implicit(case, field, cfl, unsteady)
        } else {
            self.iterate_explicit(case, field, cfl)
        }
    }

    fn iterate_implicit(
        &mut self,
        case: &Case,
        field: &mut FlowField,
        cfl: f64,
        unsteady: Option<Bdf2>,
    ) -> Result<IterationOutcome, Error> {
        let config = case.config;
        field.refresh_primitives(&case.gas)?;
        self.prepare_derived(case, field);
        self.compute_time_step(case, field, cfl);
        self.assemble(case, field, true);
        if let Some(bdf2) = unsteady {
            self.add_bdf2_terms(case, field, bdf2);
        }

        let geometry = case.geometry;
        let nvar = self.nvar;
        {
            let matrix = self.matrix.as_mut().unwrap();
            let dt = &field.dt;
            let extra = unsteady.map(|b| 1.5 / b.dt).unwrap_or(0.0);
            for c in 0..geometry.cell_count() {
                let volume = geometry.volume(c);
                matrix.add_to_diagonal(c, volume / dt[c] + volume * extra);
            }
        }
        self.enforce_strong_walls(field, true);

        let (residual_rms, residual_max) = self.residual_norms(field.cell_count());

        // solve M delta = -r
        let matrix = self.matrix.as_ref().unwrap();
        let precond = Preconditioner::build(config.linear_preconditioner, matrix)?;
        let rhs: Vec<f64> = self.residual.iter().map(|r| -r).collect();
        self.delta.iter_mut().for_each(|x| *x = 0.0);
        let stats = match config.linear_solver {
            KrylovMethod::Gmres => gmres(
                matrix,
                &precond,
                &rhs,
                &mut self.delta,
                config.gmres_restart,
                config.linear_tol,
                0.0,
                config.linear_max_iter,
            ),
            KrylovMethod::Bicgstab => bicgstab(
                matrix,
                &precond,
                &rhs,
                &mut self.delta,
                config.linear_tol,
                0.0,
                config.linear_max_iter,
            ),
        };
        if stats.stalled || !stats.residual.is_finite() {
            return Err(Error::LinearSolverDiverged {
                achieved: stats.residual,
                target: stats.target,
                iterations: stats.iterations,
            });
        }

        let clipped = field.apply_update(&self.delta, config.relaxation, &case.gas);
        self.impose_wall_state(case, field);
        field.refresh_primitives(&case.gas)?;

        Ok(IterationOutcome {
            residual_rms,
            residual_max,
            clipped,
            linear: Some(stats),
        })
    }

    fn iterate_explicit(
        &mut self,
        case: &Case,
        field: &mut FlowField,
        cfl: f64,
    ) -> Result<IterationOutcome, Error> {
        field.push_old();
        let mut clipped = 0;
        let mut norms = ([0.0; MAX_VARS], 0.0);
        let volumes: Vec<f64> = (0..field.cell_count())
            .map(|c| case.geometry.volume(c))
            .collect();

        for (stage, alpha) in RK_STAGES.iter().enumerate() {
            field.refresh_primitives(&case.gas)?;
            self.prepare_derived(case, field);
            if stage == 0 {
                self.compute_time_step(case, field, cfl);
            }
            self.assemble(case, field, false);
            self.enforce_strong_walls(field, false);
            if stage == 0 {
                norms = self.residual_norms(field.cell_count());
            }
            clipped += field.apply_stage(&self.residual, &volumes, *alpha, &case.gas);
            self.impose_wall_state(case, field);
        }
        field.refresh_primitives(&case.gas)?;

        Ok(IterationOutcome {
            residual_rms: norms.0,
            residual_max: norms.1,
            clipped,
            linear: None,
        })
    }

    /// Gradients, limiters and JST sensors for the current primitives.
    fn prepare_derived(&self, case: &Case, field: &mut FlowField) {
        let config = case.config;
        let needs_gradients = config.muscl || self.viscous;
        if needs_gradients {
            compute_gradients(case.geometry, field, config.gradient_scheme);
        }
        if config.muscl && config.limiter != LimiterKind::None {
            compute_limiters(
                case.geometry,
                field,
                config.limiter,
                config.limiter_coefficient,
            );
        }
        if config.convective_scheme == ConvectiveScheme::Jst {
            compute_jst_sensors(case.geometry, field);
        }
    }

    /// Local pseudo-time step from the inviscid and viscous spectral radii.
    fn compute_time_step(&self, case: &Case, field: &mut FlowField, cfl: f64) {
        let geometry = case.geometry;
        let gas = case.gas;
        let viscous = self.viscous;
        let primitive = &field.primitive;
        let eddy = &field.eddy_viscosity;
        let mu = &field.laminar_viscosity;

        let lambdas: Vec<(f64, f64)> = (0..geometry.cell_count())
            .into_par_iter()
            .map(|c| {
                let v = &primitive[c];
                let volume = geometry.volume(c);
                let mut inv = 0.0;
                let mut vis = 0.0;
                for (e, _) in geometry.edges_of_cell(c) {
                    let n = geometry.normal(e);
                    inv += spectral_radius(v, &n, &gas);
                    if viscous {
                        vis += viscous_spectral_radius(v, mu[c], eddy[c], &n, &gas) / volume;
                    }
                }
                for f in geometry.boundary_faces_of_cell(c) {
                    let n = geometry.all_boundary_faces()[f].normal;
                    inv += spectral_radius(v, &n, &gas);
                    if viscous {
                        vis += viscous_spectral_radius(v, mu[c], eddy[c], &n, &gas) / volume;
                    }
                }
                (inv, vis)
            })
            .collect();

        field
            .dt
            .par_iter_mut()
            .zip(field.lambda_inv.par_iter_mut())
            .zip(field.lambda_visc.par_iter_mut())
            .enumerate()
            .for_each(|(c, ((dt, l_inv), l_visc))| {
                let (inv, vis) = lambdas[c];
                *l_inv = inv;
                *l_visc = vis;
                *dt = cfl * geometry.volume(c) / (inv + TIME_STEP_VISCOUS_COEFF * vis);
            });
    }

    /// Residual and (implicit) Jacobian assembly: parallel edge and
    /// boundary kernels into per-face buffers, then a parallel owner-gather
    /// over cells and matrix rows.
    fn assemble(&mut self, case: &Case, field: &FlowField, implicit: bool) {
        let geometry = case.geometry;
        let config = case.config;
        let gas = case.gas;
        let ndim = geometry.ndim();
        let nvar = self.nvar;
        let viscous = self.viscous;
        let muscl = config.muscl && config.convective_scheme != ConvectiveScheme::Jst;
        let options = UpwindOptions {
            entropy_fix: config.entropy_fix_coeff,
            low_mach_cutoff: config.low_mach_prec.then_some(config.low_mach_cutoff),
        };

        // phase 1: one flux (and Jacobian pair) per edge
        self.edge_fluxes
            .par_iter_mut()
            .enumerate()
            .for_each(|(e, out)| {
                let [i, j] = geometry.edge_cells(e);
                let (i, j) = (i as usize, j as usize);
                let vi = field.primitive[i];
                let vj = field.primitive[j];

                let (left, right) = if muscl {
                    let xf = geometry.edge_midpoint(e);
                    let di = sub(&xf, &geometry.cell_center(i));
                    let dj = sub(&xf, &geometry.cell_center(j));
                    (
                        reconstruct(&vi, &field.gradient[i], &field.limiter[i], &di, ndim),
                        reconstruct(&vj, &field.gradient[j], &field.limiter[j], &dj, ndim),
                    )
                } else {
                    (vi, vj)
                };

                let n = geometry.normal(e);
                let mut result = match config.convective_scheme {
                    ConvectiveScheme::Roe => {
                        roe_flux(&left, &right, &n, &gas, ndim, &options, implicit)
                    }
                    ConvectiveScheme::Hllc => hllc_flux(&left, &right, &n, &gas, ndim, implicit),
                    ConvectiveScheme::Ausm => ausm_flux(&left, &right, &n, &gas, ndim, implicit),
                    ConvectiveScheme::Jst => jst_flux(
                        &vi,
                        &vj,
                        &field.laplacian[i],
                        &field.laplacian[j],
                        field.pressure_sensor[i],
                        field.pressure_sensor[j],
                        &n,
                        &gas,
                        ndim,
                        config.jst_k2,
                        config.jst_k4,
                        implicit,
                    ),
                };

                if viscous {
                    let vflux = viscous_flux(
                        &vi,
                        &vj,
                        &field.gradient[i],
                        &field.gradient[j],
                        field.eddy_viscosity[i],
                        field.eddy_viscosity[j],
                        &geometry.cell_center(i),
                        &geometry.cell_center(j),
                        &n,
                        &gas,
                        ndim,
                        implicit,
                    );
                    result.flux = result.flux - vflux.flux;
                    if implicit {
                        block_add_scaled(&mut result.jac_i, &vflux.jac_i, -1.0, nvar);
                        block_add_scaled(&mut result.jac_j, &vflux.jac_j, -1.0, nvar);
                    }
                }
                *out = result;
            });

        // boundary faces
        let freestream = case.freestream;
        self.boundary_fluxes
            .par_iter_mut()
            .zip(self.face_bcs.par_iter())
            .zip(geometry.all_boundary_faces().par_iter())
            .for_each(|((out, bc), face)| {
                let v = field.primitive[face.cell as usize];
                *out = boundary_flux(
                    bc, &v, face, &freestream, &gas, ndim, &options, viscous, implicit,
                );
            });

        // phase 2: owner-gather of the residual
        let edge_fluxes = &self.edge_fluxes;
        let boundary_fluxes = &self.boundary_fluxes;
        let plan = &self.plan;
        let plan_offsets = &self.plan_offsets;
        self.residual
            .par_chunks_exact_mut(nvar)
            .enumerate()
            .for_each(|(c, r)| {
                r.iter_mut().for_each(|x| *x = 0.0);
                let mut sum = [0.0f64; MAX_VARS];
                for entry in &plan[plan_offsets[c] as usize..plan_offsets[c + 1] as usize] {
                    let f = &edge_fluxes[entry.edge as usize].flux;
                    sum[0] += entry.sign * f.density;
                    for k in 0..ndim {
                        sum[1 + k] += entry.sign * f.momentum[k];
                    }
                    sum[nvar - 1] += entry.sign * f.energy;
                }
                for bf in geometry.boundary_faces_of_cell(c) {
                    let f = &boundary_fluxes[bf].flux;
                    sum[0] += f.density;
                    for k in 0..ndim {
                        sum[1 + k] += f.momentum[k];
                    }
                    sum[nvar - 1] += f.energy;
                }
                r.copy_from_slice(&sum[..nvar]);
            });

        // phase 2b: Jacobian rows, same gather over the fixed pattern
        if implicit {
            let diag_local = &self.diag_local;
            let matrix = self.matrix.as_mut().unwrap();
            matrix.with_rows_mut(|row, blocks| {
                blocks.iter_mut().for_each(|x| *x = 0.0);
                let diag = diag_local[row] as usize;
                for entry in &plan[plan_offsets[row] as usize..plan_offsets[row + 1] as usize] {
                    let ef = &edge_fluxes[entry.edge as usize];
                    let (own, other) = if entry.sign > 0.0 {
                        (&ef.jac_i, &ef.jac_j)
                    } else {
                        (&ef.jac_j, &ef.jac_i)
                    };
                    add_into_row(blocks, diag, nvar, own, entry.sign);
                    add_into_row(blocks, entry.local_slot as usize, nvar, other, entry.sign);
                }
                for bf in geometry.boundary_faces_of_cell(row) {
                    add_into_row(blocks, diag, nvar, &boundary_fluxes[bf].jac_i, 1.0);
                }
            });
        }
    }

    /// Physical-time derivative for dual time stepping, BDF2 form.
    fn add_bdf2_terms(&mut self, case: &Case, field: &FlowField, bdf2: Bdf2) {
        let geometry = case.geometry;
        let nvar = self.nvar;
        let current = &field.conservative;
        let old = &field.conservative_old;
        let older = &field.conservative_older;
        let scale = 0.5 / bdf2.dt;
        self.residual
            .par_chunks_exact_mut(nvar)
            .enumerate()
            .for_each(|(c, r)| {
                let volume = geometry.volume(c);
                for k in 0..nvar {
                    let idx = c * nvar + k;
                    r[k] += volume * scale * (3.0 * current[idx] - 4.0 * old[idx] + older[idx]);
                }
            });
    }

    /// Strong no-slip (and isothermal) rows: zero the residual entries and
    /// put identity rows in the matrix so the update leaves them alone.
    fn enforce_strong_walls(&mut self, field: &FlowField, implicit: bool) {
        let nvar = self.nvar;
        let ndim = field.ndim;
        let pinned_energy: std::collections::HashSet<u32> =
            self.isothermal_cells.iter().map(|&(c, _)| c).collect();

        for &c in &self.noslip_cells {
            let base = c as usize * nvar;
            for k in 0..ndim {
                self.residual[base + 1 + k] = 0.0;
            }
            if pinned_energy.contains(&c) {
                self.residual[base + nvar - 1] = 0.0;
            }
        }
        if implicit {
            let matrix = self.matrix.as_mut().unwrap();
            for &c in &self.noslip_cells {
                let mut rows: Vec<usize> = (1..=ndim).collect();
                if pinned_energy.contains(&c) {
                    rows.push(nvar - 1);
                }
                for slot in matrix.row_slots(c as usize) {
                    let on_diagonal = slot == matrix.diagonal_slot(c as usize);
                    let block = matrix.block_mut(slot);
                    for &row in &rows {
                        for col in 0..nvar {
                            block[row * nvar + col] =
                                if on_diagonal && row == col { 1.0 } else { 0.0 };
                        }
                    }
                }
            }
        }
    }

    /// Impose the wall state itself: zero velocity at no-slip cells and the
    /// prescribed temperature at isothermal ones.
    fn impose_wall_state(&self, case: &Case, field: &mut FlowField) {
        if self.noslip_cells.is_empty() {
            return;
        }
        let nvar = self.nvar;
        let ndim = field.ndim;
        for &c in &self.noslip_cells {
            let base = c as usize * nvar;
            let density = field.conservative[base];
            let mut kinetic = 0.0;
            for k in 0..ndim {
                let momentum = field.conservative[base + 1 + k];
                kinetic += 0.5 * momentum * momentum / density;
                field.conservative[base + 1 + k] = 0.0;
            }
            // total energy collapses to the internal part
            field.conservative[base + nvar - 1] -= kinetic;
        }
        for &(c, temperature) in &self.isothermal_cells {
            let base = c as usize * nvar;
            let density = field.conservative[base];
            field.conservative[base + nvar - 1] = density * case.gas.cv() * temperature;
        }
    }

    fn residual_norms(&self, n_cells: usize) -> ([f64; MAX_VARS], f64) {
        let nvar = self.nvar;
        let mut rms = [0.0f64; MAX_VARS];
        let mut max_abs = 0.0f64;
        for r in self.residual.chunks_exact(nvar) {
            for k in 0..nvar {
                rms[k] += r[k] * r[k];
                max_abs = max_abs.max(r[k].abs());
            }
        }
        for value in rms.iter_mut() {
            *value = (*value / n_cells as f64).sqrt();
        }
        (rms, max_abs)
    }
}

use super::Case;
use crate::config::{BoundaryCondition, KrylovMethod, TurbulenceModel};
use crate::error::Error;
use crate::geometry::{dot, norm, sub};
use crate::linalg::{bicgstab, gmres, BlockMatrix, Preconditioner, SolveStats};
use crate::state::{FlowField, TurbField};
use crate::turbulence::{
    sa_eddy_viscosity, sa_source, sst_blending, sst_diffusivity, sst_eddy_viscosity, sst_sources,
    vorticity_magnitude, SourceTerm, SA_SIGMA, SST_BETA_1,
};
use rayon::prelude::*;

/**
 * The turbulence-transport iteration, mirroring the mean-flow assembly with
 * scalar (SA) or 2x2 (SST) blocks: first-order upwind convection on the
 * mean mass flux, edge-normal diffusion, volumetric sources with their
 * stabilizing diagonals, and an implicit solve. Coupling is loose: this
 * solver reads the current mean primitives and hands back the eddy
 * viscosity the next mean iteration will see.
 */
pub struct TurbSolver {
    model: TurbulenceModel,
    nturb: usize,
    residual: Vec<f64>,
    delta: Vec<f64>,
    edge_flux: Vec<[f64; 2]>,
    edge_jac_i: Vec<[f64; 2]>,
    edge_jac_j: Vec<[f64; 2]>,
    matrix: BlockMatrix,
    /// row-local slots: diagonal per cell, then (edge, local slot, sign)
    diag_local: Vec<u32>,
    plan_offsets: Vec<u32>,
    plan: Vec<(u32, u32, f64)>,
    wall_cells: Vec<u32>,
    /// distance to the nearest off-wall neighbor, setting the wall omega
    wall_spacing: Vec<f64>,
    freestream_vars: [f64; 2],
}

#[derive(Clone, Copy, Debug)]
pub struct TurbOutcome {
    pub residual_rms: [f64; 2],
    pub linear: SolveStats,
}

// ============================================================================
impl TurbSolver {
    pub fn new(case: &Case, freestream_vars: [f64; 2]) -> Self {
        let geometry = case.geometry;
        let model = case.config.turbulence;
        let nturb = match model {
            TurbulenceModel::Sa => 1,
            TurbulenceModel::Sst => 2,
            TurbulenceModel::None => unreachable!("turbulence solver without a model"),
        };
        let n_cells = geometry.cell_count();
        let edges: Vec<[u32; 2]> = (0..geometry.edge_count())
            .map(|e| geometry.edge_cells(e))
            .collect();
        let matrix = BlockMatrix::from_graph(n_cells, nturb, &edges);

        let mut diag_local = vec![0u32; n_cells];
        let mut plan_offsets = vec![0u32];
        let mut plan = Vec::new();
        for c in 0..n_cells {
            diag_local[c] = matrix.local_slot(c, c).unwrap() as u32;
            for (e, sign) in geometry.edges_of_cell(c) {
                let nbr = geometry.neighbor(e, c);
                plan.push((e as u32, matrix.local_slot(c, nbr).unwrap() as u32, sign));
            }
            plan_offsets.push(plan.len() as u32);
        }

        let mut wall_cells = Vec::new();
        for (marker, bc) in case.boundary.iter().enumerate() {
            if bc.is_wall() {
                for face in geometry.boundary_faces(marker) {
                    wall_cells.push(face.cell);
                }
            }
        }
        wall_cells.sort_unstable();
        wall_cells.dedup();

        let wall_spacing = wall_cells
            .iter()
            .map(|&c| {
                let mut spacing = f64::INFINITY;
                for (e, _) in geometry.edges_of_cell(c as usize) {
                    let nbr = geometry.neighbor(e, c as usize);
                    let d = geometry.wall_distance(nbr);
                    if d > 0.0 {
                        spacing = spacing.min(d);
                    }
                }
                if spacing.is_finite() {
                    spacing
                } else {
                    geometry
                        .volume(c as usize)
                        .powf(1.0 / geometry.ndim() as f64)
                }
            })
            .collect();

        Self {
            model,
            nturb,
            residual: vec![0.0; n_cells * nturb],
            delta: vec![0.0; n_cells * nturb],
            edge_flux: vec![[0.0; 2]; geometry.edge_count()],
            edge_jac_i: vec![[0.0; 2]; geometry.edge_count()],
            edge_jac_j: vec![[0.0; 2]; geometry.edge_count()],
            matrix,
            diag_local,
            plan_offsets,
            plan,
            wall_cells,
            wall_spacing,
            freestream_vars,
        }
    }

    /// One implicit subiteration against the current mean primitives; the
    /// mean local time step is reused, optionally scaled down. Updates the
    /// eddy viscosity in the mean-flow store on success.
    pub fn iterate(
        &mut self,
        case: &Case,
        field: &mut FlowField,
        turb: &mut TurbField,
        cfl_scale: f64,
    ) -> Result<TurbOutcome, Error> {
        let geometry = case.geometry;
        let config = case.config;
        let n_cells = geometry.cell_count();
        let nturb = self.nturb;

        self.compute_gradients(case, turb);
        if self.model == TurbulenceModel::Sst {
            self.update_blending(case, field, turb);
        }
        self.compute_edge_kernels(case, field, turb);

        let sources = self.compute_sources(case, field, turb);
        self.gather_residual(case, field, turb, &sources);
        self.fill_matrix(case, field, &sources, cfl_scale);
        self.enforce_wall_rows(field, turb);

        let residual_rms = self.norms(n_cells);

        let precond = Preconditioner::build(config.linear_preconditioner, &self.matrix)?;
        let rhs: Vec<f64> = self.residual.iter().map(|r| -r).collect();
        self.delta.iter_mut().for_each(|x| *x = 0.0);
        let stats = match config.linear_solver {
            KrylovMethod::Gmres => gmres(
                &self.matrix,
                &precond,
                &rhs,
                &mut self.delta,
                config.gmres_restart,
                config.linear_tol,
                0.0,
                config.linear_max_iter,
            ),
            KrylovMethod::Bicgstab => bicgstab(
                &self.matrix,
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

        let model = self.model;
        turb.vars
            .par_chunks_exact_mut(nturb)
            .zip(self.delta.par_chunks_exact(nturb))
            .for_each(|(vars, delta)| {
                for q in 0..nturb {
                    vars[q] += delta[q];
                }
                match model {
                    TurbulenceModel::Sa => vars[0] = vars[0].max(0.0),
                    TurbulenceModel::Sst => {
                        vars[0] = vars[0].max(1e-12);
                        vars[1] = vars[1].max(1e-6);
                    }
                    TurbulenceModel::None => unreachable!(),
                }
            });

        self.update_eddy_viscosity(case, field, turb);

        Ok(TurbOutcome {
            residual_rms,
            linear: stats,
        })
    }

    /// Green-Gauss gradients of the turbulence variables.
    fn compute_gradients(&self, case: &Case, turb: &mut TurbField) {
        let geometry = case.geometry;
        let nturb = self.nturb;
        let vars = &turb.vars;
        turb.gradient
            .par_iter_mut()
            .enumerate()
            .for_each(|(c, gradient)| {
                *gradient = [[0.0; 3]; 2];
                let inv_volume = 1.0 / geometry.volume(c);
                for (e, sign) in geometry.edges_of_cell(c) {
                    let nbr = geometry.neighbor(e, c);
                    let n = geometry.normal(e);
                    for q in 0..nturb {
                        let face = 0.5 * (vars[c * nturb + q] + vars[nbr * nturb + q]);
                        for k in 0..3 {
                            gradient[q][k] += sign * face * n[k] * inv_volume;
                        }
                    }
                }
                for bf in geometry.boundary_faces_of_cell(c) {
                    let face = &geometry.all_boundary_faces()[bf];
                    for q in 0..nturb {
                        for k in 0..3 {
                            gradient[q][k] += vars[c * nturb + q] * face.normal[k] * inv_volume;
                        }
                    }
                }
            });
    }

    fn update_blending(&self, case: &Case, field: &FlowField, turb: &mut TurbField) {
        let geometry = case.geometry;
        let ndim = geometry.ndim();
        let vars = &turb.vars;
        let gradient = &turb.gradient;
        turb.f1
            .par_iter_mut()
            .zip(turb.f2.par_iter_mut())
            .enumerate()
            .for_each(|(c, (f1, f2))| {
                let (a, b) = sst_blending(
                    &field.primitive[c],
                    vars[c * 2],
                    vars[c * 2 + 1],
                    field.laminar_viscosity[c],
                    geometry.wall_distance(c),
                    &gradient[c][0],
                    &gradient[c][1],
                    ndim,
                );
                *f1 = a;
                *f2 = b;
            });
    }

    /// Upwind convection on the mean mass flux plus edge-normal diffusion,
    /// one kernel per edge.
    fn compute_edge_kernels(&mut self, case: &Case, field: &FlowField, turb: &TurbField) {
        let geometry = case.geometry;
        let model = self.model;
        let nturb = self.nturb;
        let vars = &turb.vars;
        let f1 = &turb.f1;
        let gradient = &turb.gradient;

        self.edge_flux
            .par_iter_mut()
            .zip(self.edge_jac_i.par_iter_mut())
            .zip(self.edge_jac_j.par_iter_mut())
            .enumerate()
            .for_each(|(e, ((flux, jac_i), jac_j))| {
                let [i, j] = geometry.edge_cells(e);
                let (i, j) = (i as usize, j as usize);
                let n = geometry.normal(e);
                let vi = &field.primitive[i];
                let vj = &field.primitive[j];

                let velocity = [
                    0.5 * (vi.velocity[0] + vj.velocity[0]),
                    0.5 * (vi.velocity[1] + vj.velocity[1]),
                    0.5 * (vi.velocity[2] + vj.velocity[2]),
                ];
                let density = 0.5 * (vi.density + vj.density);
                let mass = density * dot(&velocity, &n);

                let mu_face = 0.5 * (field.laminar_viscosity[i] + field.laminar_viscosity[j]);
                let diffusivity: [f64; 2] = match model {
                    TurbulenceModel::Sa => {
                        let rho_nu = 0.5
                            * (vi.density * vars[i] + vj.density * vars[j]).max(0.0);
                        [(mu_face + rho_nu) / SA_SIGMA, 0.0]
                    }
                    TurbulenceModel::Sst => sst_diffusivity(
                        mu_face,
                        0.5 * (field.eddy_viscosity[i] + field.eddy_viscosity[j]),
                        0.5 * (f1[i] + f1[j]),
                    ),
                    TurbulenceModel::None => unreachable!(),
                };

                let t = sub(&geometry.cell_center(j), &geometry.cell_center(i));
                let ds = norm(&t);
                let unit_t = [t[0] / ds, t[1] / ds, t[2] / ds];
                let area = norm(&n);
                let dist_n = dot(&t, &n).max(1e-300);

                *flux = [0.0; 2];
                *jac_i = [0.0; 2];
                *jac_j = [0.0; 2];
                for q in 0..nturb {
                    let phi_i = vars[i * nturb + q];
                    let phi_j = vars[j * nturb + q];

                    let convective =
                        0.5 * (mass * (phi_i + phi_j) - mass.abs() * (phi_j - phi_i));

                    // corrected average gradient along the edge
                    let mut grad_f = [0.0f64; 3];
                    for k in 0..3 {
                        grad_f[k] = 0.5 * (gradient[i][q][k] + gradient[j][q][k]);
                    }
                    let along = dot(&grad_f, &unit_t);
                    let jump = (phi_j - phi_i) / ds;
                    for k in 0..3 {
                        grad_f[k] -= (along - jump) * unit_t[k];
                    }
                    let diffusive = diffusivity[q] * dot(&grad_f, &n);

                    flux[q] = convective - diffusive;
                    let diff_jac = diffusivity[q] * area * area / dist_n;
                    jac_i[q] = 0.5 * (mass + mass.abs()) + diff_jac;
                    jac_j[q] = 0.5 * (mass - mass.abs()) - diff_jac;
                }
            });
    }

    /// Volumetric sources (value and stabilizing diagonal) per cell.
    fn compute_sources(
        &self,
        case: &Case,
        field: &FlowField,
        turb: &TurbField,
    ) -> Vec<[SourceTerm; 2]> {
        let geometry = case.geometry;
        let ndim = geometry.ndim();
        let model = self.model;
        let vars = &turb.vars;
        let f1 = &turb.f1;
        let gradient = &turb.gradient;

        (0..geometry.cell_count())
            .into_par_iter()
            .map(|c| {
                let v = &field.primitive[c];
                let vorticity = vorticity_magnitude(&field.gradient[c], ndim);
                match model {
                    TurbulenceModel::Sa => [
                        sa_source(
                            v,
                            vars[c],
                            field.laminar_viscosity[c],
                            vorticity,
                            geometry.wall_distance(c),
                            &gradient[c][0],
                            ndim,
                        ),
                        SourceTerm::default(),
                    ],
                    TurbulenceModel::Sst => sst_sources(
                        v,
                        vars[c * 2],
                        vars[c * 2 + 1],
                        field.eddy_viscosity[c].max(1e-12),
                        vorticity,
                        f1[c],
                        &gradient[c][0],
                        &gradient[c][1],
                        ndim,
                    ),
                    TurbulenceModel::None => unreachable!(),
                }
            })
            .collect()
    }

    fn gather_residual(
        &mut self,
        case: &Case,
        field: &FlowField,
        turb: &TurbField,
        sources: &[[SourceTerm; 2]],
    ) {
        let geometry = case.geometry;
        let boundary = &case.boundary;
        let nturb = self.nturb;
        let edge_flux = &self.edge_flux;
        let plan = &self.plan;
        let plan_offsets = &self.plan_offsets;
        let vars = &turb.vars;
        let freestream_vars = self.freestream_vars;

        self.residual
            .par_chunks_exact_mut(nturb)
            .enumerate()
            .for_each(|(c, r)| {
                r.iter_mut().for_each(|x| *x = 0.0);
                for &(e, _, sign) in
                    &plan[plan_offsets[c] as usize..plan_offsets[c + 1] as usize]
                {
                    for q in 0..nturb {
                        r[q] += sign * edge_flux[e as usize][q];
                    }
                }
                let volume = geometry.volume(c);
                for q in 0..nturb {
                    r[q] -= sources[c][q].value * volume;
                }
                // open boundaries convect against the freestream ghost
                for bf in geometry.boundary_faces_of_cell(c) {
                    let marker = geometry.marker_of_boundary_face(bf);
                    let bc = &boundary[marker];
                    if bc.is_wall() || matches!(bc, BoundaryCondition::Symmetry) {
                        continue;
                    }
                    let face = &geometry.all_boundary_faces()[bf];
                    let v = &field.primitive[c];
                    let mass = v.density * v.normal_velocity(&face.normal);
                    for q in 0..nturb {
                        let phi = if mass > 0.0 {
                            vars[c * nturb + q]
                        } else {
                            freestream_vars[q]
                        };
                        r[q] += mass * phi;
                    }
                }
            });
    }

    fn fill_matrix(
        &mut self,
        case: &Case,
        field: &FlowField,
        sources: &[[SourceTerm; 2]],
        cfl_scale: f64,
    ) {
        let geometry = case.geometry;
        let boundary = &case.boundary;
        let nturb = self.nturb;
        let edge_jac_i = &self.edge_jac_i;
        let edge_jac_j = &self.edge_jac_j;
        let plan = &self.plan;
        let plan_offsets = &self.plan_offsets;
        let diag_local = &self.diag_local;
        let dt = &field.dt;

        self.matrix.with_rows_mut(|row, blocks| {
            blocks.iter_mut().for_each(|x| *x = 0.0);
            let block_len = nturb * nturb;
            let diag = diag_local[row] as usize;
            for &(e, local, sign) in
                &plan[plan_offsets[row] as usize..plan_offsets[row + 1] as usize]
            {
                let (own, other) = if sign > 0.0 {
                    (&edge_jac_i[e as usize], &edge_jac_j[e as usize])
                } else {
                    (&edge_jac_j[e as usize], &edge_jac_i[e as usize])
                };
                for q in 0..nturb {
                    blocks[diag * block_len + q * nturb + q] += sign * own[q];
                    blocks[local as usize * block_len + q * nturb + q] += sign * other[q];
                }
            }

            let mut outflow = 0.0;
            for bf in geometry.boundary_faces_of_cell(row) {
                let marker = geometry.marker_of_boundary_face(bf);
                let bc = &boundary[marker];
                if bc.is_wall() || matches!(bc, BoundaryCondition::Symmetry) {
                    continue;
                }
                let face = &geometry.all_boundary_faces()[bf];
                let v = &field.primitive[row];
                let mass = v.density * v.normal_velocity(&face.normal);
                if mass > 0.0 {
                    outflow += mass;
                }
            }

            let volume = geometry.volume(row);
            let time_term =
                field.primitive[row].density * volume / (dt[row] * cfl_scale).max(1e-300);
            for q in 0..nturb {
                blocks[diag * block_len + q * nturb + q] +=
                    outflow + sources[row][q].diagonal * volume + time_term;
            }
        });
    }

    /// Strong wall rows: the working variable (and k) vanish at the wall;
    /// SST omega takes Menter's near-wall value from the first spacing.
    fn enforce_wall_rows(&mut self, field: &FlowField, turb: &TurbField) {
        let nturb = self.nturb;
        for (idx, &c) in self.wall_cells.iter().enumerate() {
            let c = c as usize;
            for q in 0..nturb {
                let target = if q == 0 {
                    0.0
                } else {
                    let v = &field.primitive[c];
                    let nu = field.laminar_viscosity[c] / v.density;
                    let spacing = self.wall_spacing[idx];
                    60.0 * nu / (SST_BETA_1 * spacing * spacing)
                };
                self.residual[c * nturb + q] = turb.vars[c * nturb + q] - target;
            }
            let matrix = &mut self.matrix;
            for slot in matrix.row_slots(c) {
                let on_diagonal = slot == matrix.diagonal_slot(c);
                let block = matrix.block_mut(slot);
                for q in 0..nturb {
                    for p in 0..nturb {
                        block[q * nturb + p] = if on_diagonal && q == p { 1.0 } else { 0.0 };
                    }
                }
            }
        }
    }

    /// Refresh the eddy viscosity the mean flow will see next iteration.
    pub fn update_eddy_viscosity(&self, case: &Case, field: &mut FlowField, turb: &TurbField) {
        let geometry = case.geometry;
        let ndim = geometry.ndim();
        let model = self.model;
        let nturb = self.nturb;
        let vars = &turb.vars;
        let f2 = &turb.f2;
        let gradient = &field.gradient;
        let primitive = &field.primitive;
        let mu = &field.laminar_viscosity;
        field
            .eddy_viscosity
            .par_iter_mut()
            .enumerate()
            .for_each(|(c, eddy)| {
                *eddy = match model {
                    TurbulenceModel::Sa => sa_eddy_viscosity(primitive[c].density, vars[c], mu[c]),
                    TurbulenceModel::Sst => {
                        let vorticity = vorticity_magnitude(&gradient[c], ndim);
                        sst_eddy_viscosity(
                            &primitive[c],
                            vars[c * nturb],
                            vars[c * nturb + 1],
                            vorticity,
                            f2[c],
                        )
                    }
                    TurbulenceModel::None => unreachable!(),
                };
            });
    }

    fn norms(&self, n_cells: usize) -> [f64; 2] {
        let nturb = self.nturb;
        let mut rms = [0.0f64; 2];
        for r in self.residual.chunks_exact(nturb) {
            for q in 0..nturb {
                rms[q] += r[q] * r[q];
            }
        }
        for value in rms.iter_mut() {
            *value = (*value / n_cells as f64).sqrt();
        }
        rms
    }
}

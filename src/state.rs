use crate::error::Error;
use crate::gas::{Conserved, GasModel, Primitive, MAX_VARS};
use rayon::prelude::*;

/// Primitive-gradient variable ordering shared by the gradient, limiter and
/// viscous kernels: temperature, velocity components, pressure.
pub const GRAD_TEMPERATURE: usize = 0;
pub const GRAD_VELOCITY: usize = 1;
pub fn grad_pressure(ndim: usize) -> usize {
    1 + ndim
}
pub fn n_grad_vars(ndim: usize) -> usize {
    ndim + 2
}

/**
 * Per-cell solution storage for the mean flow, kept as flat arrays so the
 * hot loops see plain data. Conservatives are the canonical state; the
 * primitive cache and every derived field are rebuilt at phase boundaries
 * and never mutated independently.
 */
pub struct FlowField {
    pub ndim: usize,
    pub nvar: usize,
    n_cells: usize,

    /// canonical state, `nvar` entries per cell
    pub conservative: Vec<f64>,
    /// states frozen at the start of the current and previous physical time
    /// steps (Runge-Kutta stages and BDF2 read these)
    pub conservative_old: Vec<f64>,
    pub conservative_older: Vec<f64>,

    pub primitive: Vec<Primitive>,
    pub laminar_viscosity: Vec<f64>,
    pub eddy_viscosity: Vec<f64>,

    /// gradient[cell][variable][direction] over the primitive-gradient set
    pub gradient: Vec<[[f64; 3]; MAX_VARS]>,
    pub limiter: Vec<[f64; MAX_VARS]>,

    pub dt: Vec<f64>,
    pub lambda_inv: Vec<f64>,
    pub lambda_visc: Vec<f64>,

    /// undivided Laplacian of the conservatives and the pressure switch,
    /// both feeding the blended JST dissipation
    pub laplacian: Vec<Conserved>,
    pub pressure_sensor: Vec<f64>,
}

// ============================================================================
impl FlowField {
    pub fn new(ndim: usize, n_cells: usize, freestream: Primitive, gas: &GasModel) -> Self {
        let nvar = ndim + 2;
        let u_inf = freestream.to_conserved(gas);
        let mut conservative = vec![0.0; n_cells * nvar];
        for chunk in conservative.chunks_exact_mut(nvar) {
            u_inf.write_to_slice(ndim, chunk);
        }
        let mut field = Self {
            ndim,
            nvar,
            n_cells,
            conservative_old: conservative.clone(),
            conservative_older: conservative.clone(),
            conservative,
            primitive: vec![Primitive::default(); n_cells],
            laminar_viscosity: vec![0.0; n_cells],
            eddy_viscosity: vec![0.0; n_cells],
            gradient: vec![[[0.0; 3]; MAX_VARS]; n_cells],
            limiter: vec![[1.0; MAX_VARS]; n_cells],
            dt: vec![0.0; n_cells],
            lambda_inv: vec![0.0; n_cells],
            lambda_visc: vec![0.0; n_cells],
            laplacian: vec![Conserved::default(); n_cells],
            pressure_sensor: vec![0.0; n_cells],
        };
        field
            .refresh_primitives(gas)
            .expect("freestream state must be admissible");
        field
    }

    pub fn cell_count(&self) -> usize {
        self.n_cells
    }

    pub fn conserved(&self, cell: usize) -> Conserved {
        Conserved::from_slice(self.ndim, &self.conservative[cell * self.nvar..])
    }

    pub fn set_conserved(&mut self, cell: usize, u: &Conserved) {
        u.write_to_slice(
            self.ndim,
            &mut self.conservative[cell * self.nvar..(cell + 1) * self.nvar],
        );
    }

    /// Rebuild the primitive cache from the canonical conservatives.
    /// Fails on the first non-admissible cell.
    pub fn refresh_primitives(&mut self, gas: &GasModel) -> Result<(), Error> {
        let ndim = self.ndim;
        let gas = *gas;
        self.conservative
            .par_chunks_exact(self.nvar)
            .zip(self.primitive.par_iter_mut())
            .zip(self.laminar_viscosity.par_iter_mut())
            .enumerate()
            .try_for_each(|(cell, ((u, v), mu))| {
                match Conserved::from_slice(ndim, u).to_primitive(&gas) {
                    Ok(prim) => {
                        *v = prim;
                        *mu = gas.viscosity(prim.temperature);
                        Ok(())
                    }
                    Err(bad) => Err(Error::NonAdmissible {
                        cell,
                        density: bad.density,
                        pressure: bad.pressure,
                    }),
                }
            })
    }

    /// Copy the current state into the old slot (start of a pseudo-time
    /// iteration or Runge-Kutta sequence).
    pub fn push_old(&mut self) {
        self.conservative_old.copy_from_slice(&self.conservative);
    }

    /// Rotate time levels for BDF2: older <- old <- current.
    pub fn push_time_level(&mut self) {
        std::mem::swap(&mut self.conservative_older, &mut self.conservative_old);
        self.conservative_old.copy_from_slice(&self.conservative);
    }

    /// Apply `u += relaxation * delta` cell by cell, halving the step for
    /// any cell whose candidate state loses admissibility and freezing the
    /// cell entirely if that fails. Returns the number of interventions.
    pub fn apply_update(&mut self, delta: &[f64], relaxation: f64, gas: &GasModel) -> usize {
        let ndim = self.ndim;
        let nvar = self.nvar;
        let gas = *gas;
        self.conservative
            .par_chunks_exact_mut(nvar)
            .zip(delta.par_chunks_exact(nvar))
            .map(|(u, du)| {
                let mut omega = relaxation;
                for _ in 0..3 {
                    let mut candidate = [0.0; MAX_VARS];
                    for k in 0..nvar {
                        candidate[k] = u[k] + omega * du[k];
                    }
                    if Conserved::from_slice(ndim, &candidate)
                        .to_primitive(&gas)
                        .is_ok()
                    {
                        u.copy_from_slice(&candidate[..nvar]);
                        return usize::from(omega < relaxation);
                    }
                    omega *= 0.5;
                }
                1
            })
            .sum()
    }

    /// Explicit stage update u = u_old - alpha * (dt / volume) * residual,
    /// clipping exactly like `apply_update`. Returns the intervention count.
    pub fn apply_stage(
        &mut self,
        residual: &[f64],
        volumes: &[f64],
        alpha: f64,
        gas: &GasModel,
    ) -> usize {
        let ndim = self.ndim;
        let nvar = self.nvar;
        let gas = *gas;
        let dt = &self.dt;
        self.conservative
            .par_chunks_exact_mut(nvar)
            .enumerate()
            .map(|(cell, u)| {
                let scale = alpha * dt[cell] / volumes[cell];
                let mut candidate = [0.0; MAX_VARS];
                for k in 0..nvar {
                    candidate[k] =
                        self.conservative_old[cell * nvar + k] - scale * residual[cell * nvar + k];
                }
                if Conserved::from_slice(ndim, &candidate)
                    .to_primitive(&gas)
                    .is_ok()
                {
                    u.copy_from_slice(&candidate[..nvar]);
                    0
                } else {
                    1
                }
            })
            .sum()
    }
}

/**
 * Working set of the turbulence system: one variable for Spalart-Allmaras,
 * two for SST, stored flat like the mean flow.
 */
pub struct TurbField {
    pub nturb: usize,
    pub vars: Vec<f64>,
    pub vars_old: Vec<f64>,
    pub gradient: Vec<[[f64; 3]; 2]>,
    /// SST blending functions, rebuilt each turbulence subiteration
    pub f1: Vec<f64>,
    pub f2: Vec<f64>,
}

impl TurbField {
    pub fn new(nturb: usize, n_cells: usize, freestream_vars: &[f64]) -> Self {
        let mut vars = vec![0.0; n_cells * nturb];
        for chunk in vars.chunks_exact_mut(nturb) {
            chunk.copy_from_slice(freestream_vars);
        }
        Self {
            nturb,
            vars_old: vars.clone(),
            vars,
            gradient: vec![[[0.0; 3]; 2]; n_cells],
            f1: vec![1.0; n_cells],
            f2: vec![1.0; n_cells],
        }
    }

    pub fn push_old(&mut self) {
        self.vars_old.copy_from_slice(&self.vars);
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform_field() -> (FlowField, GasModel) {
        let gas = GasModel::default();
        let freestream = Primitive {
            density: 1.2,
            velocity: [50.0, 5.0, 0.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / (1.2 * gas.gas_constant),
        };
        (FlowField::new(2, 16, freestream, &gas), gas)
    }

    #[test]
    fn primitives_follow_conservatives() {
        let (mut field, gas) = uniform_field();
        assert_relative_eq!(field.primitive[3].density, 1.2, max_relative = 1e-14);

        let mut u = field.conserved(3);
        u.density *= 2.0;
        u.energy *= 2.0;
        u.momentum = [0.0; 3];
        field.set_conserved(3, &u);
        field.refresh_primitives(&gas).unwrap();
        assert_relative_eq!(field.primitive[3].density, 2.4, max_relative = 1e-14);
        assert_eq!(field.primitive[2].density, 1.2);
    }

    #[test]
    fn non_admissible_cell_is_reported() {
        let (mut field, gas) = uniform_field();
        let nvar = field.nvar;
        field.conservative[5 * nvar] = -1.0;
        match field.refresh_primitives(&gas) {
            Err(Error::NonAdmissible { cell, .. }) => assert_eq!(cell, 5),
            other => panic!("expected NonAdmissible, got {:?}", other.err()),
        }
    }

    #[test]
    fn destabilizing_update_is_clipped() {
        let (mut field, gas) = uniform_field();
        let before = field.conserved(0);
        let mut delta = vec![0.0; 16 * field.nvar];
        delta[0] = -1.0e9; // would drive density hopelessly negative
        let clipped = field.apply_update(&delta, 1.0, &gas);
        assert_eq!(clipped, 1);
        assert_eq!(field.conserved(0), before);
    }

    #[test]
    fn time_level_rotation() {
        let (mut field, _gas) = uniform_field();
        let first = field.conservative.clone();
        field.push_time_level();
        field.conservative[0] += 1.0;
        field.push_time_level();
        assert_eq!(field.conservative_older, first);
        assert_eq!(field.conservative_old[0], first[0] + 1.0);
    }
}

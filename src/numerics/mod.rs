pub mod convective;
pub mod gradients;
pub mod viscous;

use crate::gas::{Conserved, GasModel, Primitive, MAX_VARS};

/// Dense Jacobian block in conservative ordering [rho, rho*u.., rho*E];
/// only the leading nvar x nvar entries are meaningful.
pub type Block = [[f64; MAX_VARS]; MAX_VARS];

/**
 * Result of one edge kernel: the flux leaving cell i toward cell j through
 * the shared dual face, and its derivatives with respect to the two cell
 * states (zeroed in explicit mode).
 */
#[derive(Clone, Copy)]
pub struct EdgeFlux {
    pub flux: Conserved,
    pub jac_i: Block,
    pub jac_j: Block,
}

impl Default for EdgeFlux {
    fn default() -> Self {
        Self {
            flux: Conserved::default(),
            jac_i: [[0.0; MAX_VARS]; MAX_VARS],
            jac_j: [[0.0; MAX_VARS]; MAX_VARS],
        }
    }
}

pub fn block_zero() -> Block {
    [[0.0; MAX_VARS]; MAX_VARS]
}

pub fn block_add_scaled(target: &mut Block, source: &Block, scale: f64, nvar: usize) {
    for (trow, srow) in target.iter_mut().zip(source).take(nvar) {
        for (t, s) in trow.iter_mut().zip(srow).take(nvar) {
            *t += scale * s;
        }
    }
}

pub fn block_matmul(a: &Block, b: &Block, nvar: usize) -> Block {
    let mut c = block_zero();
    for i in 0..nvar {
        for k in 0..nvar {
            let aik = a[i][k];
            if aik != 0.0 {
                for j in 0..nvar {
                    c[i][j] += aik * b[k][j];
                }
            }
        }
    }
    c
}

pub fn block_matvec(a: &Block, x: &[f64; MAX_VARS], nvar: usize) -> [f64; MAX_VARS] {
    let mut y = [0.0; MAX_VARS];
    for i in 0..nvar {
        for j in 0..nvar {
            y[i] += a[i][j] * x[j];
        }
    }
    y
}

/// Pack a conserved state into the flat variable ordering.
pub fn to_vars(u: &Conserved, ndim: usize) -> [f64; MAX_VARS] {
    let mut x = [0.0; MAX_VARS];
    u.write_to_slice(ndim, &mut x);
    x
}

pub fn from_vars(x: &[f64; MAX_VARS], ndim: usize) -> Conserved {
    Conserved::from_slice(ndim, x)
}

/**
 * Analytic Jacobian of the projected inviscid flux, d(F . n)/dU, for a
 * velocity / total-enthalpy pair. Linear in the normal, so an area-scaled
 * normal yields the area-scaled Jacobian.
 */
pub fn inviscid_jacobian(
    velocity: &[f64; 3],
    total_enthalpy: f64,
    normal: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
) -> Block {
    let gm1 = gas.gamma - 1.0;
    let un = velocity[0] * normal[0] + velocity[1] * normal[1] + velocity[2] * normal[2];
    let q2 = velocity[0] * velocity[0] + velocity[1] * velocity[1] + velocity[2] * velocity[2];
    let nvar = ndim + 2;
    let mut a = block_zero();

    a[0][0] = 0.0;
    for l in 0..ndim {
        a[0][1 + l] = normal[l];
    }
    a[0][nvar - 1] = 0.0;

    for k in 0..ndim {
        a[1 + k][0] = 0.5 * gm1 * q2 * normal[k] - velocity[k] * un;
        for l in 0..ndim {
            a[1 + k][1 + l] = velocity[k] * normal[l] - gm1 * velocity[l] * normal[k];
            if k == l {
                a[1 + k][1 + l] += un;
            }
        }
        a[1 + k][nvar - 1] = gm1 * normal[k];
    }

    a[nvar - 1][0] = (0.5 * gm1 * q2 - total_enthalpy) * un;
    for l in 0..ndim {
        a[nvar - 1][1 + l] = total_enthalpy * normal[l] - gm1 * velocity[l] * un;
    }
    a[nvar - 1][nvar - 1] = gas.gamma * un;

    a
}

pub fn inviscid_jacobian_of(
    v: &Primitive,
    normal: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
) -> Block {
    inviscid_jacobian(&v.velocity, v.total_enthalpy(gas), normal, gas, ndim)
}

/**
 * |A| for the projected flux Jacobian at a given velocity / enthalpy state,
 * with externally supplied (entropy-fixed) absolute eigenvalues. The
 * minimal polynomial of A has degree three, so |A| is the exact quadratic
 * interpolant c0 I + c1 A + c2 A^2 through the three eigenvalue pairs.
 */
pub fn absolute_jacobian(
    velocity: &[f64; 3],
    total_enthalpy: f64,
    normal: &[f64; 3],
    eigenvalues: &[f64; 3],
    fixed_absolutes: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
) -> Block {
    let a = inviscid_jacobian(velocity, total_enthalpy, normal, gas, ndim);
    let a2 = block_matmul(&a, &a, ndim + 2);

    let [l0, lp, lm] = *eigenvalues;
    let [f0, fp, fm] = *fixed_absolutes;
    let d0 = (l0 - lp) * (l0 - lm);
    let dp = (lp - l0) * (lp - lm);
    let dm = (lm - l0) * (lm - lp);

    let c2 = f0 / d0 + fp / dp + fm / dm;
    let c1 = -(f0 * (lp + lm) / d0 + fp * (l0 + lm) / dp + fm * (l0 + lp) / dm);
    let c0 = f0 * lp * lm / d0 + fp * l0 * lm / dp + fm * l0 * lp / dm;

    let nvar = ndim + 2;
    let mut result = block_zero();
    for i in 0..nvar {
        result[i][i] = c0;
    }
    block_add_scaled(&mut result, &a, c1, nvar);
    block_add_scaled(&mut result, &a2, c2, nvar);
    result
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn state() -> (Primitive, GasModel) {
        let gas = GasModel::default();
        let v = Primitive {
            density: 1.1,
            velocity: [120.0, -30.0, 10.0],
            pressure: 9.0e4,
            temperature: 9.0e4 / (1.1 * gas.gas_constant),
        };
        (v, gas)
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let (v, gas) = state();
        let ndim = 3;
        let n = [0.4, 0.8, -0.3];
        let a = inviscid_jacobian_of(&v, &n, &gas, ndim);

        let u0 = to_vars(&v.to_conserved(&gas), ndim);
        let f0 = to_vars(&v.flux(&n, &gas), ndim);
        for col in 0..5 {
            let mut up = u0;
            let h = 1e-6 * u0[col].abs().max(1.0);
            up[col] += h;
            let vp = from_vars(&up, ndim).to_primitive(&gas).unwrap();
            let fp = to_vars(&vp.flux(&n, &gas), ndim);
            for row in 0..5 {
                let fd = (fp[row] - f0[row]) / h;
                assert_relative_eq!(a[row][col], fd, epsilon = 2e-2, max_relative = 2e-4);
            }
        }
    }

    #[test]
    fn absolute_jacobian_of_a_supersonic_state_is_the_jacobian() {
        let gas = GasModel::default();
        let v = Primitive {
            density: 1.0,
            velocity: [800.0, 0.0, 0.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / gas.gas_constant,
        };
        let ndim = 3;
        let n = [1.0, 0.0, 0.0];
        let c = v.sound_speed(&gas);
        let un = v.velocity[0];
        let eigenvalues = [un, un + c, un - c];
        let absolutes = [un.abs(), (un + c).abs(), (un - c).abs()];
        // fully supersonic: every eigenvalue positive, so |A| = A
        let h = v.total_enthalpy(&gas);
        let abs_a = absolute_jacobian(&v.velocity, h, &n, &eigenvalues, &absolutes, &gas, ndim);
        let a = inviscid_jacobian_of(&v, &n, &gas, ndim);
        for i in 0..5 {
            for j in 0..5 {
                assert_relative_eq!(abs_a[i][j], a[i][j], epsilon = 1e-6, max_relative = 1e-8);
            }
        }
    }
}

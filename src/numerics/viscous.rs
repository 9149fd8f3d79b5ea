use super::{block_zero, Block, EdgeFlux};
use crate::gas::{Conserved, GasModel, Primitive, MAX_VARS};
use crate::geometry::{dot, norm, sub};
use crate::state::{GRAD_TEMPERATURE, GRAD_VELOCITY};

/**
 * Viscous flux through a dual face from face-averaged gradients, corrected
 * along the edge direction so the normal derivative is consistent with the
 * two cell values (the compact-stencil correction of Mathur and Murthy).
 * The returned flux is the diffusive transport leaving cell i, to be
 * subtracted from the convective edge flux; the Jacobian pair is the
 * thin-shear-layer approximation.
 */
#[allow(clippy::too_many_arguments)]
pub fn viscous_flux(
    left: &Primitive,
    right: &Primitive,
    grad_i: &[[f64; 3]; MAX_VARS],
    grad_j: &[[f64; 3]; MAX_VARS],
    eddy_i: f64,
    eddy_j: f64,
    xi: &[f64; 3],
    xj: &[f64; 3],
    normal: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
    implicit: bool,
) -> EdgeFlux {
    let t = sub(xj, xi);
    let ds = norm(&t);
    let unit_t = [t[0] / ds, t[1] / ds, t[2] / ds];

    // face-averaged gradients with the edge-direction correction
    let mut grad = [[0.0f64; 3]; MAX_VARS];
    for var in 0..ndim + 2 {
        for k in 0..3 {
            grad[var][k] = 0.5 * (grad_i[var][k] + grad_j[var][k]);
        }
        let along = dot(&grad[var], &unit_t);
        let jump = (face_value(right, var, ndim) - face_value(left, var, ndim)) / ds;
        for k in 0..3 {
            grad[var][k] -= (along - jump) * unit_t[k];
        }
    }

    let mu_lam = 0.5 * (gas.viscosity(left.temperature) + gas.viscosity(right.temperature));
    let mu_turb = 0.5 * (eddy_i + eddy_j);
    let mu = mu_lam + mu_turb;
    let velocity = [
        0.5 * (left.velocity[0] + right.velocity[0]),
        0.5 * (left.velocity[1] + right.velocity[1]),
        0.5 * (left.velocity[2] + right.velocity[2]),
    ];

    let mut div = 0.0;
    for k in 0..ndim {
        div += grad[GRAD_VELOCITY + k][k];
    }

    // tau . n through the area-scaled normal
    let mut traction = [0.0f64; 3];
    for k in 0..ndim {
        for l in 0..ndim {
            let mut tau = mu * (grad[GRAD_VELOCITY + k][l] + grad[GRAD_VELOCITY + l][k]);
            if k == l {
                tau -= 2.0 / 3.0 * mu * div;
            }
            traction[k] += tau * normal[l];
        }
    }

    let conductivity = gas.heat_flux_coefficient(mu_lam, mu_turb);
    let heat = conductivity * dot(&grad[GRAD_TEMPERATURE], normal);

    let flux = Conserved {
        density: 0.0,
        momentum: traction,
        energy: dot(&velocity, &traction) + heat,
    };

    let mut result = EdgeFlux {
        flux,
        ..EdgeFlux::default()
    };
    if implicit {
        let area = norm(normal);
        let dist = dot(&t, normal).max(1e-300);
        let theta = mu * area * area / (0.5 * (left.density + right.density) * dist);
        let kappa = conductivity * area * area / dist;
        let unit_n = [normal[0] / area, normal[1] / area, normal[2] / area];
        result.jac_j = tsl_block(right, &velocity, &unit_n, theta, kappa, gas, ndim);
        result.jac_i = tsl_block(left, &velocity, &unit_n, theta, kappa, gas, ndim);
        for row in result.jac_i.iter_mut() {
            for entry in row.iter_mut() {
                *entry = -*entry;
            }
        }
    }
    result
}

fn face_value(v: &Primitive, var: usize, ndim: usize) -> f64 {
    if var == GRAD_TEMPERATURE {
        v.temperature
    } else if var < GRAD_VELOCITY + ndim {
        v.velocity[var - GRAD_VELOCITY]
    } else {
        v.pressure
    }
}

/// Derivative of the thin-shear-layer flux model with respect to one cell's
/// conservative state: momentum rows through d(velocity)/dU, the energy row
/// through the work term and d(temperature)/dU.
fn tsl_block(
    v: &Primitive,
    face_velocity: &[f64; 3],
    unit_n: &[f64; 3],
    theta: f64,
    kappa: f64,
    gas: &GasModel,
    ndim: usize,
) -> Block {
    let nvar = ndim + 2;
    let rho = v.density;
    let gm1 = gas.gamma - 1.0;
    let q2 = v.velocity_squared();
    let mut jac = block_zero();

    for k in 0..ndim {
        // d(traction_k)/d(velocity_l) = theta (delta_kl + n_k n_l / 3)
        let mut wrt_density = 0.0;
        for l in 0..ndim {
            let shape = theta * (((k == l) as usize) as f64 + unit_n[k] * unit_n[l] / 3.0);
            jac[1 + k][1 + l] = shape / rho;
            wrt_density -= shape * v.velocity[l] / rho;
        }
        jac[1 + k][0] = wrt_density;
    }

    // temperature derivatives: T = p / (rho R)
    let dt_drho = 0.5 * gm1 * q2 / (rho * gas.gas_constant) - v.temperature / rho;
    let dt_dm = |l: usize| -gm1 * v.velocity[l] / (rho * gas.gas_constant);
    let dt_de = gm1 / (rho * gas.gas_constant);

    jac[nvar - 1][0] = kappa * dt_drho;
    for l in 0..ndim {
        jac[nvar - 1][1 + l] = kappa * dt_dm(l);
    }
    jac[nvar - 1][nvar - 1] = kappa * dt_de;
    for k in 0..ndim {
        // work of the traction on the face velocity
        jac[nvar - 1][0] += face_velocity[k] * jac[1 + k][0];
        for l in 0..ndim {
            jac[nvar - 1][1 + l] += face_velocity[k] * jac[1 + k][1 + l];
        }
    }
    jac
}

/// Viscous spectral radius contribution of one face, entering the local
/// time step as lambda_visc.
pub fn viscous_spectral_radius(
    v: &Primitive,
    mu_lam: f64,
    mu_turb: f64,
    normal: &[f64; 3],
    gas: &GasModel,
) -> f64 {
    let area2 = dot(normal, normal);
    let coefficient = (4.0 / 3.0 * (mu_lam + mu_turb)).max(
        gas.gamma * (mu_lam / gas.prandtl_lam + mu_turb / gas.prandtl_turb),
    );
    coefficient * area2 / v.density
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn still_air(gas: &GasModel) -> Primitive {
        Primitive {
            density: 1.2,
            velocity: [0.0; 3],
            pressure: 1.0e5,
            temperature: 1.0e5 / (1.2 * gas.gas_constant),
        }
    }

    #[test]
    fn uniform_flow_has_no_viscous_flux() {
        let gas = GasModel::default();
        let mut v = still_air(&gas);
        v.velocity = [30.0, 5.0, 0.0];
        let zero = [[0.0; 3]; MAX_VARS];
        let f = viscous_flux(
            &v,
            &v,
            &zero,
            &zero,
            0.0,
            0.0,
            &[0.0, 0.0, 0.0],
            &[0.1, 0.0, 0.0],
            &[0.02, 0.0, 0.0],
            &gas,
            2,
            false,
        );
        assert_relative_eq!(f.flux.momentum[0], 0.0, epsilon = 1e-14);
        assert_relative_eq!(f.flux.momentum[1], 0.0, epsilon = 1e-14);
        assert_relative_eq!(f.flux.energy, 0.0, epsilon = 1e-14);
    }

    #[test]
    fn shear_layer_traction_matches_the_hand_value() {
        let gas = GasModel::default();
        let dudy = 100.0;
        let mut left = still_air(&gas);
        let mut right = still_air(&gas);
        left.velocity = [10.0, 0.0, 0.0];
        right.velocity = [10.0, 0.0, 0.0];

        // du/dy across a horizontal face of area 0.5
        let mut grad = [[0.0; 3]; MAX_VARS];
        grad[GRAD_VELOCITY][1] = dudy;
        let area = 0.5;
        let n = [0.0, area, 0.0];
        let f = viscous_flux(
            &left,
            &right,
            &grad,
            &grad,
            0.0,
            0.0,
            &[0.0, 0.0, 0.0],
            &[1.0, 0.0, 0.0], // edge orthogonal to the normal: no correction
            &n,
            &gas,
            2,
            false,
        );
        let mu = gas.viscosity(left.temperature);
        assert_relative_eq!(f.flux.momentum[0], mu * dudy * area, max_relative = 1e-12);
        // traction works on the face velocity
        assert_relative_eq!(f.flux.energy, 10.0 * mu * dudy * area, max_relative = 1e-12);
    }

    #[test]
    fn edge_correction_restores_the_two_point_derivative() {
        let gas = GasModel::default();
        let left = still_air(&gas);
        let mut right = still_air(&gas);
        // pure temperature jump with an (inconsistent) zero average gradient
        right.temperature += 10.0;
        right.pressure = right.density * gas.gas_constant * right.temperature;

        let zero = [[0.0; 3]; MAX_VARS];
        let ds = 0.05;
        let n = [1.0, 0.0, 0.0];
        let f = viscous_flux(
            &left,
            &right,
            &zero,
            &zero,
            0.0,
            0.0,
            &[0.0, 0.0, 0.0],
            &[ds, 0.0, 0.0],
            &n,
            &gas,
            2,
            false,
        );
        let mu = 0.5 * (gas.viscosity(left.temperature) + gas.viscosity(right.temperature));
        let expected = gas.heat_flux_coefficient(mu, 0.0) * (10.0 / ds);
        assert_relative_eq!(f.flux.energy, expected, max_relative = 1e-12);
    }
}

use crate::gas::{GasModel, Primitive, MAX_VARS};
use crate::state::GRAD_VELOCITY;

// Spalart-Allmaras closure coefficients (standard model without ft2).
pub const SA_CB1: f64 = 0.1355;
pub const SA_CB2: f64 = 0.622;
pub const SA_SIGMA: f64 = 2.0 / 3.0;
pub const SA_KAPPA: f64 = 0.41;
pub const SA_CW2: f64 = 0.3;
pub const SA_CW3: f64 = 2.0;
pub const SA_CV1: f64 = 7.1;

pub fn sa_cw1() -> f64 {
    SA_CB1 / (SA_KAPPA * SA_KAPPA) + (1.0 + SA_CB2) / SA_SIGMA
}

// Menter SST coefficients: set 1 applies near the wall, set 2 in the free
// stream, blended by F1.
pub const SST_SIGMA_K1: f64 = 0.85;
pub const SST_SIGMA_K2: f64 = 1.0;
pub const SST_SIGMA_W1: f64 = 0.5;
pub const SST_SIGMA_W2: f64 = 0.856;
pub const SST_BETA_1: f64 = 0.075;
pub const SST_BETA_2: f64 = 0.0828;
pub const SST_BETA_STAR: f64 = 0.09;
pub const SST_A1: f64 = 0.31;

pub fn sst_gamma_1() -> f64 {
    SST_BETA_1 / SST_BETA_STAR - SST_SIGMA_W1 * SA_KAPPA * SA_KAPPA / SST_BETA_STAR.sqrt()
}

pub fn sst_gamma_2() -> f64 {
    SST_BETA_2 / SST_BETA_STAR - SST_SIGMA_W2 * SA_KAPPA * SA_KAPPA / SST_BETA_STAR.sqrt()
}

/// Source term of one turbulence equation at a cell, integrated over the
/// dual volume, with the (negative semi-definite) diagonal contribution the
/// implicit side keeps for stability.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceTerm {
    pub value: f64,
    pub diagonal: f64,
}

/// Magnitude of the vorticity vector from a cell's velocity gradient.
pub fn vorticity_magnitude(gradient: &[[f64; 3]; MAX_VARS], ndim: usize) -> f64 {
    let g = |k: usize, l: usize| gradient[GRAD_VELOCITY + k][l];
    if ndim == 2 {
        (g(1, 0) - g(0, 1)).abs()
    } else {
        let wx = g(2, 1) - g(1, 2);
        let wy = g(0, 2) - g(2, 0);
        let wz = g(1, 0) - g(0, 1);
        (wx * wx + wy * wy + wz * wz).sqrt()
    }
}

// ============================================================================
// Spalart-Allmaras

/// Eddy viscosity from the working variable: mu_t = rho nu_tilde fv1.
pub fn sa_eddy_viscosity(density: f64, nu_tilde: f64, mu_lam: f64) -> f64 {
    if nu_tilde <= 0.0 {
        return 0.0;
    }
    let chi = nu_tilde * density / mu_lam;
    let chi3 = chi * chi * chi;
    let fv1 = chi3 / (chi3 + SA_CV1.powi(3));
    density * nu_tilde * fv1
}

/// Production minus destruction plus the non-conservative diffusion part,
/// per unit volume. The diagonal keeps the destruction derivative (and the
/// production only when it stabilizes), following the usual positivity
/// treatment.
pub fn sa_source(
    v: &Primitive,
    nu_tilde: f64,
    mu_lam: f64,
    vorticity: f64,
    wall_distance: f64,
    grad_nu: &[f64; 3],
    ndim: usize,
) -> SourceTerm {
    if nu_tilde < 0.0 {
        // negative working variable: let destruction pull it back
        return SourceTerm {
            value: 0.0,
            diagonal: 0.0,
        };
    }
    let rho = v.density;
    let nu = mu_lam / rho;
    let d = wall_distance.max(1e-10);
    let d2 = d * d;
    let k2d2 = SA_KAPPA * SA_KAPPA * d2;

    let chi = nu_tilde / nu;
    let chi3 = chi * chi * chi;
    let fv1 = chi3 / (chi3 + SA_CV1.powi(3));
    let fv2 = 1.0 - chi / (1.0 + chi * fv1);
    let s_tilde = (vorticity + nu_tilde / k2d2 * fv2).max(1e-10);

    let r = (nu_tilde / (s_tilde * k2d2)).min(10.0);
    let g = r + SA_CW2 * (r.powi(6) - r);
    let cw3_6 = SA_CW3.powi(6);
    let fw = g * ((1.0 + cw3_6) / (g.powi(6) + cw3_6)).powf(1.0 / 6.0);

    let production = SA_CB1 * s_tilde * nu_tilde;
    let destruction = sa_cw1() * fw * (nu_tilde / d) * (nu_tilde / d);
    let mut grad2 = 0.0;
    for k in 0..ndim {
        grad2 += grad_nu[k] * grad_nu[k];
    }
    let cross = SA_CB2 / SA_SIGMA * grad2;

    // residual convention: sources enter with a negative sign, and the
    // diagonal keeps only contributions that increase diagonal dominance
    SourceTerm {
        value: rho * (production - destruction + cross),
        diagonal: rho * (2.0 * sa_cw1() * fw * nu_tilde / d2 - SA_CB1 * s_tilde).max(0.0),
    }
}

/// Freestream working variable, a few times the molecular kinematic
/// viscosity.
pub fn sa_freestream(freestream: &Primitive, gas: &GasModel) -> f64 {
    3.0 * gas.viscosity(freestream.temperature) / freestream.density
}

// ============================================================================
// Menter SST

/// Blending functions F1 and F2 from the wall distance and the local
/// turbulence state.
pub fn sst_blending(
    v: &Primitive,
    k: f64,
    omega: f64,
    mu_lam: f64,
    wall_distance: f64,
    grad_k: &[f64; 3],
    grad_w: &[f64; 3],
    ndim: usize,
) -> (f64, f64) {
    let rho = v.density;
    let nu = mu_lam / rho;
    let d = wall_distance.max(1e-10);
    let d2 = d * d;
    let k = k.max(1e-20);
    let omega = omega.max(1e-20);

    let mut cross = 0.0;
    for l in 0..ndim {
        cross += grad_k[l] * grad_w[l];
    }
    let cd_kw = (2.0 * rho * SST_SIGMA_W2 / omega * cross).max(1e-10);

    let sqrt_k = k.sqrt();
    let term1 = sqrt_k / (SST_BETA_STAR * omega * d);
    let term2 = 500.0 * nu / (d2 * omega);
    let term3 = 4.0 * rho * SST_SIGMA_W2 * k / (cd_kw * d2);

    let arg1 = term1.max(term2).min(term3);
    let arg2 = (2.0 * term1).max(term2);
    (arg1.powi(4).tanh(), (arg2 * arg2).tanh())
}

/// Eddy viscosity with Menter's shear-stress limiter.
pub fn sst_eddy_viscosity(v: &Primitive, k: f64, omega: f64, vorticity: f64, f2: f64) -> f64 {
    let k = k.max(0.0);
    let denominator = (SST_A1 * omega).max(vorticity * f2).max(1e-20);
    v.density * SST_A1 * k / denominator
}

/// Volumetric sources of the (k, omega) pair with blended coefficients and
/// the production limiter; diagonals keep the destruction derivatives.
#[allow(clippy::too_many_arguments)]
pub fn sst_sources(
    v: &Primitive,
    k: f64,
    omega: f64,
    mu_turb: f64,
    vorticity: f64,
    f1: f64,
    grad_k: &[f64; 3],
    grad_w: &[f64; 3],
    ndim: usize,
) -> [SourceTerm; 2] {
    let rho = v.density;
    let omega_pos = omega.max(1e-20);

    let beta = f1 * SST_BETA_1 + (1.0 - f1) * SST_BETA_2;
    let gamma = f1 * sst_gamma_1() + (1.0 - f1) * sst_gamma_2();

    let production_raw = mu_turb * vorticity * vorticity;
    let production_k = production_raw.min(10.0 * SST_BETA_STAR * rho * k.max(0.0) * omega_pos);
    let destruction_k = SST_BETA_STAR * rho * omega_pos * k.max(0.0);

    let production_w = gamma * rho / mu_turb.max(1e-20) * production_k;
    let destruction_w = beta * rho * omega_pos * omega_pos;

    let mut cross = 0.0;
    for l in 0..ndim {
        cross += grad_k[l] * grad_w[l];
    }
    let cross_diffusion = 2.0 * (1.0 - f1) * rho * SST_SIGMA_W2 / omega_pos * cross;

    [
        SourceTerm {
            value: production_k - destruction_k,
            diagonal: SST_BETA_STAR * rho * omega_pos,
        },
        SourceTerm {
            value: production_w - destruction_w + cross_diffusion,
            diagonal: 2.0 * beta * rho * omega_pos,
        },
    ]
}

/// Freestream (k, omega) from a turbulence intensity of one percent and an
/// eddy-to-molecular viscosity ratio of ten.
pub fn sst_freestream(freestream: &Primitive, gas: &GasModel) -> [f64; 2] {
    let intensity = 0.01;
    let viscosity_ratio = 10.0;
    let q2 = freestream.velocity_squared();
    let k = 1.5 * (intensity * intensity) * q2;
    let mu = gas.viscosity(freestream.temperature);
    let omega = freestream.density * k / (viscosity_ratio * mu);
    [k.max(1e-12), omega.max(1e-6)]
}

/// Blended diffusion coefficients (mu + sigma mu_t) for the two equations.
pub fn sst_diffusivity(mu_lam: f64, mu_turb: f64, f1: f64) -> [f64; 2] {
    let sigma_k = f1 * SST_SIGMA_K1 + (1.0 - f1) * SST_SIGMA_K2;
    let sigma_w = f1 * SST_SIGMA_W1 + (1.0 - f1) * SST_SIGMA_W2;
    [mu_lam + sigma_k * mu_turb, mu_lam + sigma_w * mu_turb]
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn air_state(gas: &GasModel) -> Primitive {
        Primitive {
            density: 1.2,
            velocity: [50.0, 0.0, 0.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / (1.2 * gas.gas_constant),
        }
    }

    #[test]
    fn sa_eddy_viscosity_vanishes_at_zero_and_grows_with_chi() {
        assert_eq!(sa_eddy_viscosity(1.2, 0.0, 1.8e-5), 0.0);
        let low = sa_eddy_viscosity(1.2, 1e-5, 1.8e-5);
        let high = sa_eddy_viscosity(1.2, 1e-3, 1.8e-5);
        assert!(low > 0.0 && high > low);
        // at large chi, fv1 -> 1 and mu_t -> rho nu_tilde
        let huge = sa_eddy_viscosity(1.2, 1.0, 1.8e-5);
        assert_relative_eq!(huge, 1.2, max_relative = 1e-6);
    }

    #[test]
    fn sa_source_balances_production_and_destruction() {
        let gas = GasModel::default();
        let v = air_state(&gas);
        let mu = gas.viscosity(v.temperature);
        let nu_tilde = 5.0 * mu / v.density;
        let grad = [0.0; 3];

        // strong vorticity far from the wall: production dominates
        let s = sa_source(&v, nu_tilde, mu, 1.0e3, 1.0, &grad, 2);
        assert!(s.value > 0.0);

        // quiescent flow near the wall: destruction dominates
        let s = sa_source(&v, nu_tilde, mu, 0.0, 1.0e-4, &grad, 2);
        assert!(s.value < 0.0);
        assert!(s.diagonal > 0.0);
    }

    #[test]
    fn sst_blending_saturates_at_the_wall() {
        let gas = GasModel::default();
        let v = air_state(&gas);
        let mu = gas.viscosity(v.temperature);
        let [k, omega] = sst_freestream(&v, &gas);
        let zero = [0.0; 3];

        let (f1_wall, f2_wall) = sst_blending(&v, k, omega, mu, 1e-6, &zero, &zero, 2);
        assert_relative_eq!(f1_wall, 1.0, epsilon = 1e-10);
        assert_relative_eq!(f2_wall, 1.0, epsilon = 1e-10);

        let (f1_far, _) = sst_blending(&v, k, omega, mu, 10.0, &zero, &zero, 2);
        assert!(f1_far < 0.1);
    }

    #[test]
    fn sst_production_limiter_caps_the_k_source() {
        let gas = GasModel::default();
        let v = air_state(&gas);
        let [k, omega] = sst_freestream(&v, &gas);
        let mu_t = sst_eddy_viscosity(&v, k, omega, 1.0, 1.0);
        let zero = [0.0; 3];

        let huge_vorticity = 1.0e6;
        let sources = sst_sources(&v, k, omega, mu_t, huge_vorticity, 0.5, &zero, &zero, 2);
        let cap = 10.0 * SST_BETA_STAR * v.density * k * omega;
        assert!(sources[0].value <= cap);
    }

    #[test]
    fn sst_freestream_matches_the_viscosity_ratio() {
        let gas = GasModel::default();
        let v = air_state(&gas);
        let [k, omega] = sst_freestream(&v, &gas);
        let mu = gas.viscosity(v.temperature);
        assert_relative_eq!(v.density * k / omega, 10.0 * mu, max_relative = 1e-12);
    }
}

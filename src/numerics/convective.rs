use super::{
    absolute_jacobian, block_add_scaled, block_matvec, block_zero, inviscid_jacobian,
    inviscid_jacobian_of, to_vars, EdgeFlux,
};
use crate::gas::{Conserved, GasModel, Primitive};
use crate::geometry::{dot, norm};

/**
 * Settings shared by the upwind kernels; all surfaced in the configuration
 * rather than baked in.
 */
#[derive(Clone, Copy)]
pub struct UpwindOptions {
    pub entropy_fix: f64,
    /// lower bound on the dissipation-scaling Mach when low-Mach
    /// preconditioning is active
    pub low_mach_cutoff: Option<f64>,
}

/// Roe averages of two states: velocity, total enthalpy and sound speed.
struct RoeAverage {
    velocity: [f64; 3],
    enthalpy: f64,
    sound_speed: f64,
}

fn roe_average(left: &Primitive, right: &Primitive, gas: &GasModel) -> RoeAverage {
    let r = (right.density / left.density).sqrt();
    let w = 1.0 / (1.0 + r);
    let velocity = [
        (left.velocity[0] + r * right.velocity[0]) * w,
        (left.velocity[1] + r * right.velocity[1]) * w,
        (left.velocity[2] + r * right.velocity[2]) * w,
    ];
    let enthalpy = (left.total_enthalpy(gas) + r * right.total_enthalpy(gas)) * w;
    let q2 = velocity[0] * velocity[0] + velocity[1] * velocity[1] + velocity[2] * velocity[2];
    let c2 = ((gas.gamma - 1.0) * (enthalpy - 0.5 * q2)).max(1e-12);
    RoeAverage {
        velocity,
        enthalpy,
        sound_speed: c2.sqrt(),
    }
}

/// Harten-Hyman fix: parabolic smoothing of an eigenvalue magnitude inside
/// the band delta.
fn entropy_fixed(lambda: f64, delta: f64) -> f64 {
    if lambda.abs() < delta {
        (lambda * lambda + delta * delta) / (2.0 * delta)
    } else {
        lambda.abs()
    }
}

// ============================================================================
/**
 * Roe's approximate Riemann solver through an area-scaled normal, with the
 * frozen-dissipation Jacobian pair: the central part is differentiated
 * exactly while |A~| is treated as constant.
 */
pub fn roe_flux(
    left: &Primitive,
    right: &Primitive,
    normal: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
    options: &UpwindOptions,
    implicit: bool,
) -> EdgeFlux {
    let nvar = ndim + 2;
    let area = norm(normal);
    let avg = roe_average(left, right, gas);

    let un = dot(&avg.velocity, normal);
    let ca = avg.sound_speed * area;
    let eigenvalues = [un, un + ca, un - ca];

    let delta = options.entropy_fix * (un.abs() + ca);
    let mut absolutes = [
        entropy_fixed(eigenvalues[0], delta),
        entropy_fixed(eigenvalues[1], delta),
        entropy_fixed(eigenvalues[2], delta),
    ];

    if let Some(cutoff) = options.low_mach_cutoff {
        // blend the acoustic dissipation toward the convective one as the
        // face Mach number falls below unity
        let q = (avg.velocity[0] * avg.velocity[0]
            + avg.velocity[1] * avg.velocity[1]
            + avg.velocity[2] * avg.velocity[2])
            .sqrt();
        let scale = (q / avg.sound_speed).clamp(cutoff, 1.0);
        absolutes[1] = scale * absolutes[1] + (1.0 - scale) * absolutes[0];
        absolutes[2] = scale * absolutes[2] + (1.0 - scale) * absolutes[0];
    }

    let dissipation = absolute_jacobian(
        &avg.velocity,
        avg.enthalpy,
        normal,
        &eigenvalues,
        &absolutes,
        gas,
        ndim,
    );

    let fl = left.flux(normal, gas);
    let fr = right.flux(normal, gas);
    let du = to_vars(
        &(right.to_conserved(gas) - left.to_conserved(gas)),
        ndim,
    );
    let diss = block_matvec(&dissipation, &du, nvar);

    let flux = (fl + fr) * 0.5 - Conserved::from_slice(ndim, &diss[..nvar]) * 0.5;

    let mut result = EdgeFlux {
        flux,
        ..EdgeFlux::default()
    };
    if implicit {
        let al = inviscid_jacobian_of(left, normal, gas, ndim);
        let ar = inviscid_jacobian_of(right, normal, gas, ndim);
        block_add_scaled(&mut result.jac_i, &al, 0.5, nvar);
        block_add_scaled(&mut result.jac_i, &dissipation, 0.5, nvar);
        block_add_scaled(&mut result.jac_j, &ar, 0.5, nvar);
        block_add_scaled(&mut result.jac_j, &dissipation, -0.5, nvar);
    }
    result
}

// ============================================================================
/**
 * HLLC with Roe-averaged wave-speed estimates. The Jacobian pair falls back
 * to the scalar-dissipation form, which keeps the left-hand side spectrally
 * correct without differentiating the wave structure.
 */
pub fn hllc_flux(
    left: &Primitive,
    right: &Primitive,
    normal: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
    implicit: bool,
) -> EdgeFlux {
    let area = norm(normal);
    let unit = [normal[0] / area, normal[1] / area, normal[2] / area];

    let avg = roe_average(left, right, gas);
    let un_avg = dot(&avg.velocity, &unit);

    let unl = left.normal_velocity(&unit);
    let unr = right.normal_velocity(&unit);
    let cl = left.sound_speed(gas);
    let cr = right.sound_speed(gas);

    let sl = (unl - cl).min(un_avg - avg.sound_speed);
    let sr = (unr + cr).max(un_avg + avg.sound_speed);

    let flux = if sl >= 0.0 {
        left.flux(&unit, gas)
    } else if sr <= 0.0 {
        right.flux(&unit, gas)
    } else {
        let ml = left.density * (sl - unl);
        let mr = right.density * (sr - unr);
        let s_star = (right.pressure - left.pressure + ml * unl - mr * unr) / (ml - mr);

        let star = |v: &Primitive, s: f64, un: f64| -> Conserved {
            let u = v.to_conserved(gas);
            let factor = v.density * (s - un) / (s - s_star);
            let mut momentum = [0.0; 3];
            for k in 0..3 {
                momentum[k] = factor * (v.velocity[k] + (s_star - un) * unit[k]);
            }
            let energy = factor
                * (u.energy / v.density
                    + (s_star - un) * (s_star + v.pressure / (v.density * (s - un))));
            Conserved {
                density: factor,
                momentum,
                energy,
            }
        };

        if s_star >= 0.0 {
            let u = left.to_conserved(gas);
            left.flux(&unit, gas) + (star(left, sl, unl) - u) * sl
        } else {
            let u = right.to_conserved(gas);
            right.flux(&unit, gas) + (star(right, sr, unr) - u) * sr
        }
    };

    let mut result = EdgeFlux {
        flux: flux * area,
        ..EdgeFlux::default()
    };
    if implicit {
        scalar_dissipation_jacobian(
            &mut result,
            left,
            right,
            normal,
            un_avg.abs() * area + avg.sound_speed * area,
            gas,
            ndim,
        );
    }
    result
}

// ============================================================================
/**
 * AUSM+-up for all speed regimes (Liou 2006), with the standard polynomial
 * splittings and the pressure/velocity diffusion couplings.
 */
pub fn ausm_flux(
    left: &Primitive,
    right: &Primitive,
    normal: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
    implicit: bool,
) -> EdgeFlux {
    const KP: f64 = 0.25;
    const KU: f64 = 0.75;
    const SIGMA: f64 = 1.0;
    const BETA: f64 = 1.0 / 8.0;
    const ALPHA: f64 = 3.0 / 16.0;

    let area = norm(normal);
    let unit = [normal[0] / area, normal[1] / area, normal[2] / area];

    let unl = left.normal_velocity(&unit);
    let unr = right.normal_velocity(&unit);
    let a_half = 0.5 * (left.sound_speed(gas) + right.sound_speed(gas));
    let rho_half = 0.5 * (left.density + right.density);

    let ml = unl / a_half;
    let mr = unr / a_half;
    let m2_bar = 0.5 * (ml * ml + mr * mr);

    let m4 = |m: f64, sign: f64| -> f64 {
        if m.abs() >= 1.0 {
            0.5 * (m + sign * m.abs())
        } else {
            let m2 = sign * 0.25 * (m + sign).powi(2);
            m2 * (1.0 - sign * 16.0 * BETA * (-sign * 0.25 * (m - sign).powi(2)))
        }
    };
    let p5 = |m: f64, sign: f64| -> f64 {
        if m.abs() >= 1.0 {
            0.5 * (1.0 + sign * m.signum())
        } else {
            let m2 = sign * 0.25 * (m + sign).powi(2);
            m2 * ((sign * 2.0 - m) - sign * 16.0 * ALPHA * m * (-sign * 0.25 * (m - sign).powi(2)))
        }
    };

    // pressure diffusion drives the interface Mach at low speed
    let mp = -KP * (1.0f64 - SIGMA * m2_bar).max(0.0) * (right.pressure - left.pressure)
        / (rho_half * a_half * a_half);
    let m_half = m4(ml, 1.0) + m4(mr, -1.0) + mp;

    let pu = -KU * p5(ml, 1.0) * p5(mr, -1.0) * (left.density + right.density) * a_half
        * (unr - unl);
    let p_half = p5(ml, 1.0) * left.pressure + p5(mr, -1.0) * right.pressure + pu;

    let mass = if m_half > 0.0 {
        a_half * m_half * left.density
    } else {
        a_half * m_half * right.density
    };

    let upwind = if mass > 0.0 { left } else { right };
    let h = upwind.total_enthalpy(gas);
    let flux = Conserved {
        density: mass,
        momentum: [
            mass * upwind.velocity[0] + p_half * unit[0],
            mass * upwind.velocity[1] + p_half * unit[1],
            mass * upwind.velocity[2] + p_half * unit[2],
        ],
        energy: mass * h,
    } * area;

    let mut result = EdgeFlux {
        flux,
        ..EdgeFlux::default()
    };
    if implicit {
        let lambda = 0.5 * (unl.abs() + unr.abs()) * area + a_half * area;
        scalar_dissipation_jacobian(&mut result, left, right, normal, lambda, gas, ndim);
    }
    result
}

// ============================================================================
/**
 * JST central flux with blended second/fourth-difference dissipation. The
 * undivided Laplacians and the pressure switches of the two cells are
 * precomputed over the dual stencil; kappa2/kappa4 come from the
 * configuration. Scalar first-order Jacobian pair.
 */
#[allow(clippy::too_many_arguments)]
pub fn jst_flux(
    left: &Primitive,
    right: &Primitive,
    laplacian_i: &Conserved,
    laplacian_j: &Conserved,
    sensor_i: f64,
    sensor_j: f64,
    normal: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
    k2: f64,
    k4: f64,
    implicit: bool,
) -> EdgeFlux {
    let area = norm(normal);
    let velocity = [
        0.5 * (left.velocity[0] + right.velocity[0]),
        0.5 * (left.velocity[1] + right.velocity[1]),
        0.5 * (left.velocity[2] + right.velocity[2]),
    ];
    let sound = 0.5 * (left.sound_speed(gas) + right.sound_speed(gas));
    let lambda = dot(&velocity, normal).abs() + sound * area;

    let kappa2 = k2 * sensor_i.max(sensor_j);
    let kappa4 = (k4 - kappa2).max(0.0);

    let du = right.to_conserved(gas) - left.to_conserved(gas);
    let dlap = *laplacian_j - *laplacian_i;
    let dissipation = du * (kappa2 * lambda) - dlap * (kappa4 * lambda);

    let flux = (left.flux(normal, gas) + right.flux(normal, gas)) * 0.5 - dissipation;

    let mut result = EdgeFlux {
        flux,
        ..EdgeFlux::default()
    };
    if implicit {
        scalar_dissipation_jacobian(&mut result, left, right, normal, lambda, gas, ndim);
    }
    result
}

/// Central Jacobian pair with a scalar spectral-radius dissipation on the
/// diagonal.
fn scalar_dissipation_jacobian(
    result: &mut EdgeFlux,
    left: &Primitive,
    right: &Primitive,
    normal: &[f64; 3],
    lambda: f64,
    gas: &GasModel,
    ndim: usize,
) {
    let nvar = ndim + 2;
    let al = inviscid_jacobian_of(left, normal, gas, ndim);
    let ar = inviscid_jacobian_of(right, normal, gas, ndim);
    result.jac_i = block_zero();
    result.jac_j = block_zero();
    block_add_scaled(&mut result.jac_i, &al, 0.5, nvar);
    block_add_scaled(&mut result.jac_j, &ar, 0.5, nvar);
    for k in 0..nvar {
        result.jac_i[k][k] += 0.5 * lambda;
        result.jac_j[k][k] -= 0.5 * lambda;
    }
}

/// Spectral radius of the projected Jacobian through an area-scaled normal.
pub fn spectral_radius(v: &Primitive, normal: &[f64; 3], gas: &GasModel) -> f64 {
    v.normal_velocity(normal).abs() + v.sound_speed(gas) * norm(normal)
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::gas::GasModel;
    use approx::assert_relative_eq;

    fn options() -> UpwindOptions {
        UpwindOptions {
            entropy_fix: 0.1,
            low_mach_cutoff: None,
        }
    }

    fn subsonic(gas: &GasModel) -> Primitive {
        Primitive {
            density: 1.2,
            velocity: [80.0, 20.0, -5.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / (1.2 * gas.gas_constant),
        }
    }

    fn assert_flux_eq(a: &Conserved, b: &Conserved, tol: f64) {
        assert_relative_eq!(a.density, b.density, max_relative = tol, epsilon = 1e-7);
        assert_relative_eq!(a.energy, b.energy, max_relative = tol, epsilon = 1e-7);
        for k in 0..3 {
            assert_relative_eq!(
                a.momentum[k],
                b.momentum[k],
                max_relative = tol,
                epsilon = 1e-7
            );
        }
    }

    #[test]
    fn all_schemes_are_consistent() {
        let gas = GasModel::default();
        let v = subsonic(&gas);
        let n = [0.6, -0.2, 0.15];
        let exact = v.flux(&n, &gas);

        let roe = roe_flux(&v, &v, &n, &gas, 3, &options(), false);
        assert_flux_eq(&roe.flux, &exact, 1e-12);

        let hllc = hllc_flux(&v, &v, &n, &gas, 3, false);
        assert_flux_eq(&hllc.flux, &exact, 1e-12);

        let ausm = ausm_flux(&v, &v, &n, &gas, 3, false);
        assert_flux_eq(&ausm.flux, &exact, 1e-10);

        let lap = Conserved::default();
        let jst = jst_flux(&v, &v, &lap, &lap, 0.0, 0.0, &n, &gas, 3, 0.5, 0.02, false);
        assert_flux_eq(&jst.flux, &exact, 1e-12);
    }

    #[test]
    fn upwind_schemes_select_the_left_state_when_supersonic() {
        let gas = GasModel::default();
        let left = Primitive {
            density: 1.0,
            velocity: [700.0, 0.0, 0.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / gas.gas_constant,
        };
        let right = Primitive {
            density: 0.9,
            velocity: [650.0, 10.0, 0.0],
            pressure: 0.8e5,
            temperature: 0.8e5 / (0.9 * gas.gas_constant),
        };
        let n = [2.0, 0.0, 0.0];
        let exact = left.flux(&n, &gas);

        let roe = roe_flux(&left, &right, &n, &gas, 3, &options(), false);
        assert_flux_eq(&roe.flux, &exact, 1e-9);

        let hllc = hllc_flux(&left, &right, &n, &gas, 3, false);
        assert_flux_eq(&hllc.flux, &exact, 1e-9);
    }

    #[test]
    fn roe_flux_is_rotationally_invariant() {
        let gas = GasModel::default();
        let theta: f64 = 0.7;
        let (sin, cos) = theta.sin_cos();
        let rotate = |x: &[f64; 3]| [cos * x[0] - sin * x[1], sin * x[0] + cos * x[1], x[2]];

        let left = subsonic(&gas);
        let right = Primitive {
            density: 1.1,
            velocity: [70.0, 35.0, 2.0],
            pressure: 0.95e5,
            temperature: 0.95e5 / (1.1 * gas.gas_constant),
        };
        let n = [0.4, 0.3, 0.0];

        let plain = roe_flux(&left, &right, &n, &gas, 3, &options(), false);

        let rot = |v: &Primitive| Primitive {
            velocity: rotate(&v.velocity),
            ..*v
        };
        let rotated = roe_flux(
            &rot(&left),
            &rot(&right),
            &rotate(&n),
            &gas,
            3,
            &options(),
            false,
        );

        assert_relative_eq!(rotated.flux.density, plain.flux.density, max_relative = 1e-11);
        assert_relative_eq!(rotated.flux.energy, plain.flux.energy, max_relative = 1e-11);
        let expected = rotate(&plain.flux.momentum);
        for k in 0..3 {
            assert_relative_eq!(
                rotated.flux.momentum[k],
                expected[k],
                max_relative = 1e-10,
                epsilon = 1e-8
            );
        }
    }

    #[test]
    fn roe_dissipation_vanishes_only_for_equal_states() {
        let gas = GasModel::default();
        let left = subsonic(&gas);
        let mut right = left;
        right.density *= 1.05;
        right.temperature = right.pressure / (right.density * gas.gas_constant);
        let n = [1.0, 0.0, 0.0];

        let central = (left.flux(&n, &gas) + right.flux(&n, &gas)) * 0.5;
        let roe = roe_flux(&left, &right, &n, &gas, 3, &options(), false);
        // an actual jump must be dissipated
        assert!((roe.flux.density - central.density).abs() > 1e-6);
    }

    #[test]
    fn jacobians_linearize_the_roe_flux_around_equal_states() {
        // with zero jump the frozen-|A~| derivative term vanishes and the
        // Jacobian pair is the exact linearization
        let gas = GasModel::default();
        let ndim = 3;
        let v = subsonic(&gas);
        let n = [0.5, 0.2, -0.1];
        let base = roe_flux(&v, &v, &n, &gas, ndim, &options(), true);

        let u0 = to_vars(&v.to_conserved(&gas), ndim);
        for col in 0..5 {
            let mut ul = u0;
            let h = 1e-6 * u0[col].abs().max(1.0);
            ul[col] += h;
            let left = super::super::from_vars(&ul, ndim)
                .to_primitive(&gas)
                .unwrap();
            let perturbed = roe_flux(&left, &v, &n, &gas, ndim, &options(), false);
            let fd = to_vars(&(perturbed.flux - base.flux), ndim);
            for row in 0..5 {
                assert_relative_eq!(
                    fd[row] / h,
                    base.jac_i[row][col],
                    max_relative = 5e-3,
                    epsilon = 5e-2
                );
            }
        }
    }
}

use crate::config::BoundaryCondition;
use crate::gas::{Conserved, GasModel, Primitive};
use crate::geometry::{norm, BoundaryFace};
use crate::numerics::convective::{roe_flux, UpwindOptions};
use crate::numerics::EdgeFlux;

/**
 * Boundary contribution of one dual boundary face to its owner cell, as a
 * flux plus its derivative with respect to the owner state. Ghost-state
 * conditions run the interior Roe kernel against the ghost and freeze the
 * ghost in the Jacobian; wall and symmetry faces apply the pressure flux
 * directly. No-slip velocity (and isothermal temperature) are enforced
 * strongly on the wall rows by the solver, so only the pressure and
 * prescribed-heat-flux parts appear here.
 */
#[allow(clippy::too_many_arguments)]
pub fn boundary_flux(
    bc: &BoundaryCondition,
    v: &Primitive,
    face: &BoundaryFace,
    freestream: &Primitive,
    gas: &GasModel,
    ndim: usize,
    options: &UpwindOptions,
    viscous: bool,
    implicit: bool,
) -> EdgeFlux {
    match bc {
        BoundaryCondition::Symmetry => pressure_flux(v, &face.normal, gas, ndim, implicit),

        BoundaryCondition::WallHeatflux { heat_flux } => {
            let mut result = pressure_flux(v, &face.normal, gas, ndim, implicit);
            if viscous && *heat_flux != 0.0 {
                // prescribed heat leaving the fluid through the wall
                result.flux.energy -= heat_flux * norm(&face.normal);
            }
            result
        }

        BoundaryCondition::WallIsothermal { .. } => {
            // energy is pinned strongly with the temperature; the flux only
            // carries the pressure force
            pressure_flux(v, &face.normal, gas, ndim, implicit)
        }

        BoundaryCondition::Farfield => roe_flux(
            v,
            freestream,
            &face.normal,
            gas,
            ndim,
            options,
            implicit,
        ),

        BoundaryCondition::InletTotal {
            total_pressure,
            total_temperature,
        } => {
            let ghost = inlet_state(
                *total_pressure,
                *total_temperature,
                v,
                freestream,
                gas,
            );
            roe_flux(v, &ghost, &face.normal, gas, ndim, options, implicit)
        }

        BoundaryCondition::OutletPressure { pressure } => {
            let ghost = outlet_state(*pressure, v, &face.normal, gas);
            roe_flux(v, &ghost, &face.normal, gas, ndim, options, implicit)
        }
    }
}

/// Zero-mass-flux wall: only the pressure acts on the momentum rows.
fn pressure_flux(
    v: &Primitive,
    normal: &[f64; 3],
    gas: &GasModel,
    ndim: usize,
    implicit: bool,
) -> EdgeFlux {
    let mut result = EdgeFlux::default();
    result.flux = Conserved {
        density: 0.0,
        momentum: [
            v.pressure * normal[0],
            v.pressure * normal[1],
            v.pressure * normal[2],
        ],
        energy: 0.0,
    };

    if implicit {
        // dp/dU = (gamma - 1) [q^2/2, -u, 1]
        let gm1 = gas.gamma - 1.0;
        let q2 = v.velocity_squared();
        let nvar = ndim + 2;
        for k in 0..ndim {
            result.jac_i[1 + k][0] = gm1 * 0.5 * q2 * normal[k];
            for l in 0..ndim {
                result.jac_i[1 + k][1 + l] = -gm1 * v.velocity[l] * normal[k];
            }
            result.jac_i[1 + k][nvar - 1] = gm1 * normal[k];
        }
    }
    result
}

/// Subsonic inflow from stagnation conditions: the interior hands back the
/// static pressure, the reservoir fixes total temperature and pressure, and
/// the flow enters along the freestream direction.
fn inlet_state(
    total_pressure: f64,
    total_temperature: f64,
    interior: &Primitive,
    freestream: &Primitive,
    gas: &GasModel,
) -> Primitive {
    let p = interior.pressure.min(total_pressure);
    let exponent = (gas.gamma - 1.0) / gas.gamma;
    let temperature = total_temperature * (p / total_pressure).powf(exponent);
    let speed = (2.0 * gas.cp() * (total_temperature - temperature).max(0.0)).sqrt();

    let q = freestream.velocity_squared().sqrt().max(1e-300);
    let direction = [
        freestream.velocity[0] / q,
        freestream.velocity[1] / q,
        freestream.velocity[2] / q,
    ];
    Primitive {
        density: p / (gas.gas_constant * temperature),
        velocity: [
            speed * direction[0],
            speed * direction[1],
            speed * direction[2],
        ],
        pressure: p,
        temperature,
    }
}

/// Static-pressure outflow: the back pressure replaces the interior one at
/// subsonic exits; supersonic exits extrapolate everything.
fn outlet_state(back_pressure: f64, interior: &Primitive, normal: &[f64; 3], gas: &GasModel) -> Primitive {
    let area = norm(normal);
    let mach_n = interior.normal_velocity(normal) / (area * interior.sound_speed(gas));
    if mach_n >= 1.0 {
        return *interior;
    }
    // isentropic density correction to the imposed pressure
    let density = interior.density * (back_pressure / interior.pressure).powf(1.0 / gas.gamma);
    Primitive {
        density,
        velocity: interior.velocity,
        pressure: back_pressure,
        temperature: back_pressure / (density * gas.gas_constant),
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn face(normal: [f64; 3]) -> BoundaryFace {
        BoundaryFace {
            cell: 0,
            normal,
            midpoint: [0.0; 3],
        }
    }

    fn state(gas: &GasModel) -> Primitive {
        Primitive {
            density: 1.2,
            velocity: [60.0, 10.0, 0.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / (1.2 * gas.gas_constant),
        }
    }

    fn options() -> UpwindOptions {
        UpwindOptions {
            entropy_fix: 0.1,
            low_mach_cutoff: None,
        }
    }

    #[test]
    fn symmetry_carries_no_mass_or_energy() {
        let gas = GasModel::default();
        let v = state(&gas);
        let f = boundary_flux(
            &BoundaryCondition::Symmetry,
            &v,
            &face([0.0, 0.3, 0.0]),
            &v,
            &gas,
            2,
            &options(),
            false,
            false,
        );
        assert_eq!(f.flux.density, 0.0);
        assert_eq!(f.flux.energy, 0.0);
        assert_relative_eq!(f.flux.momentum[1], 0.3 * v.pressure);
    }

    #[test]
    fn farfield_with_the_freestream_inside_is_the_exact_flux() {
        let gas = GasModel::default();
        let v = state(&gas);
        let n = [0.2, -0.4, 0.0];
        let f = boundary_flux(
            &BoundaryCondition::Farfield,
            &v,
            &face(n),
            &v,
            &gas,
            2,
            &options(),
            false,
            false,
        );
        let exact = v.flux(&n, &gas);
        assert_relative_eq!(f.flux.density, exact.density, max_relative = 1e-12);
        assert_relative_eq!(f.flux.energy, exact.energy, max_relative = 1e-12);
    }

    #[test]
    fn inlet_recovers_total_conditions() {
        let gas = GasModel::default();
        let interior = state(&gas);
        let ghost = inlet_state(1.2e5, 300.0, &interior, &interior, &gas);
        // total temperature of the ghost equals the reservoir value
        let t0 = ghost.temperature + 0.5 * ghost.velocity_squared() / gas.cp();
        assert_relative_eq!(t0, 300.0, max_relative = 1e-12);
        assert!(ghost.pressure <= 1.2e5);
    }

    #[test]
    fn subsonic_outlet_imposes_the_back_pressure() {
        let gas = GasModel::default();
        let interior = state(&gas);
        let ghost = outlet_state(0.9e5, &interior, &[1.0, 0.0, 0.0], &gas);
        assert_relative_eq!(ghost.pressure, 0.9e5);
        assert!(ghost.is_admissible());

        let mut fast = interior;
        fast.velocity = [800.0, 0.0, 0.0];
        let ghost = outlet_state(0.9e5, &fast, &[1.0, 0.0, 0.0], &gas);
        assert_relative_eq!(ghost.pressure, fast.pressure);
    }
}

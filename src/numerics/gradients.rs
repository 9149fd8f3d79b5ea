use crate::config::{GradientScheme, LimiterKind};
use crate::gas::{Conserved, Primitive, MAX_VARS};
use crate::geometry::{dot, sub, Geometry};
use crate::state::{grad_pressure, n_grad_vars, FlowField, GRAD_TEMPERATURE, GRAD_VELOCITY};
use rayon::prelude::*;

/// Value of one primitive-gradient variable (temperature, velocity
/// components, pressure) at a cell.
pub fn grad_value(v: &Primitive, var: usize, ndim: usize) -> f64 {
    if var == GRAD_TEMPERATURE {
        v.temperature
    } else if var < GRAD_VELOCITY + ndim {
        v.velocity[var - GRAD_VELOCITY]
    } else {
        v.pressure
    }
}

/**
 * Cell gradients of the primitive set, by area-weighted Green-Gauss face
 * averages or by weighted least squares over the edge neighborhood. Each
 * cell gathers from its own stencil, so the loop parallelizes cleanly.
 */
pub fn compute_gradients(geometry: &Geometry, field: &mut FlowField, scheme: GradientScheme) {
    let ndim = geometry.ndim();
    let nvars = n_grad_vars(ndim);
    let primitive = &field.primitive;

    field
        .gradient
        .par_iter_mut()
        .enumerate()
        .for_each(|(c, gradient)| {
            *gradient = [[0.0; 3]; MAX_VARS];
            match scheme {
                GradientScheme::GreenGauss => {
                    let inv_volume = 1.0 / geometry.volume(c);
                    for (e, sign) in geometry.edges_of_cell(c) {
                        let nbr = geometry.neighbor(e, c);
                        let n = geometry.normal(e);
                        for var in 0..nvars {
                            let face = 0.5 * (grad_value(&primitive[c], var, ndim)
                                + grad_value(&primitive[nbr], var, ndim));
                            for k in 0..ndim {
                                gradient[var][k] += sign * face * n[k] * inv_volume;
                            }
                        }
                    }
                    for f in geometry.boundary_faces_of_cell(c) {
                        let face = &geometry.all_boundary_faces()[f];
                        for var in 0..nvars {
                            let value = grad_value(&primitive[c], var, ndim);
                            for k in 0..ndim {
                                gradient[var][k] += value * face.normal[k] * inv_volume;
                            }
                        }
                    }
                }
                GradientScheme::LeastSquares => {
                    // normal equations sum w dx dx^T g = sum w dx dphi with
                    // inverse-distance-squared weights
                    let xc = geometry.cell_center(c);
                    let mut a = [[0.0f64; 3]; 3];
                    let mut b = [[0.0f64; 3]; MAX_VARS];
                    for (e, _) in geometry.edges_of_cell(c) {
                        let nbr = geometry.neighbor(e, c);
                        let dx = sub(&geometry.cell_center(nbr), &xc);
                        let w = 1.0 / dot(&dx, &dx);
                        for k in 0..ndim {
                            for l in 0..ndim {
                                a[k][l] += w * dx[k] * dx[l];
                            }
                        }
                        for var in 0..nvars {
                            let dphi = grad_value(&primitive[nbr], var, ndim)
                                - grad_value(&primitive[c], var, ndim);
                            for k in 0..ndim {
                                b[var][k] += w * dx[k] * dphi;
                            }
                        }
                    }
                    for var in 0..nvars {
                        gradient[var] = solve_spd(&a, &b[var], ndim);
                    }
                }
            }
        });
}

/// Direct solve of the small symmetric positive-definite normal-equation
/// system by cofactors.
fn solve_spd(a: &[[f64; 3]; 3], b: &[f64; 3], ndim: usize) -> [f64; 3] {
    if ndim == 2 {
        let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
        [
            (b[0] * a[1][1] - b[1] * a[0][1]) / det,
            (a[0][0] * b[1] - a[1][0] * b[0]) / det,
            0.0,
        ]
    } else {
        let det = a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
            - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0]);
        let inv_det = 1.0 / det;
        let mut x = [0.0; 3];
        for k in 0..3 {
            // replace column k by b (Cramer)
            let mut m = *a;
            for row in 0..3 {
                m[row][k] = b[row];
            }
            x[k] = inv_det
                * (m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
                    - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
                    + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]));
        }
        x
    }
}

/**
 * Slope limiters over the edge neighborhood. Venkatakrishnan's smooth
 * limiter uses eps^2 = (K h)^3 with h the cell length scale; Barth-Jespersen
 * clamps reconstruction hard at the neighborhood extrema.
 */
pub fn compute_limiters(
    geometry: &Geometry,
    field: &mut FlowField,
    kind: LimiterKind,
    venkat_coefficient: f64,
) {
    let ndim = geometry.ndim();
    let nvars = n_grad_vars(ndim);
    let primitive = &field.primitive;
    let gradient = &field.gradient;

    field
        .limiter
        .par_iter_mut()
        .enumerate()
        .for_each(|(c, limiter)| {
            *limiter = [1.0; MAX_VARS];
            if kind == LimiterKind::None {
                return;
            }

            let xc = geometry.cell_center(c);
            let mut vmin = [f64::INFINITY; MAX_VARS];
            let mut vmax = [f64::NEG_INFINITY; MAX_VARS];
            for var in 0..nvars {
                let own = grad_value(&primitive[c], var, ndim);
                vmin[var] = own;
                vmax[var] = own;
            }
            for (e, _) in geometry.edges_of_cell(c) {
                let nbr = geometry.neighbor(e, c);
                for var in 0..nvars {
                    let value = grad_value(&primitive[nbr], var, ndim);
                    vmin[var] = vmin[var].min(value);
                    vmax[var] = vmax[var].max(value);
                }
            }

            let h = geometry.volume(c).powf(1.0 / ndim as f64);
            let eps2 = (venkat_coefficient * h).powi(3);

            for (e, _) in geometry.edges_of_cell(c) {
                let xf = geometry.edge_midpoint(e);
                let dx = sub(&xf, &xc);
                for var in 0..nvars {
                    let own = grad_value(&primitive[c], var, ndim);
                    let d2 = dot(&gradient[c][var], &dx);
                    if d2.abs() < 1e-14 * own.abs().max(1e-14) {
                        continue;
                    }
                    let d1 = if d2 > 0.0 {
                        vmax[var] - own
                    } else {
                        vmin[var] - own
                    };
                    let phi = match kind {
                        LimiterKind::Venkat => {
                            ((d1 * d1 + eps2) * d2 + 2.0 * d2 * d2 * d1)
                                / (d2 * (d1 * d1 + 2.0 * d2 * d2 + d1 * d2 + eps2))
                        }
                        LimiterKind::Barth => (d1 / d2).min(1.0),
                        LimiterKind::None => 1.0,
                    };
                    limiter[var] = limiter[var].min(phi.clamp(0.0, 1.0));
                }
            }
        });
}

/**
 * Stencil sums feeding the JST dissipation: the undivided Laplacian of the
 * conservatives and the normalized pressure switch.
 */
pub fn compute_jst_sensors(geometry: &Geometry, field: &mut FlowField) {
    let ndim = geometry.ndim();
    let primitive = &field.primitive;
    let conservative = &field.conservative;
    let nvar = field.nvar;

    field
        .laplacian
        .par_iter_mut()
        .zip(field.pressure_sensor.par_iter_mut())
        .enumerate()
        .for_each(|(c, (laplacian, sensor))| {
            let uc = Conserved::from_slice(ndim, &conservative[c * nvar..]);
            let pc = primitive[c].pressure;
            let mut lap = Conserved::default();
            let mut dp = 0.0;
            let mut sp = 0.0;
            for (e, _) in geometry.edges_of_cell(c) {
                let nbr = geometry.neighbor(e, c);
                let un = Conserved::from_slice(ndim, &conservative[nbr * nvar..]);
                lap = lap + (un - uc);
                dp += primitive[nbr].pressure - pc;
                sp += primitive[nbr].pressure + pc;
            }
            *laplacian = lap;
            *sensor = if sp > 0.0 { dp.abs() / sp } else { 0.0 };
        });
}

/**
 * MUSCL extrapolation of the primitive state from a cell center to a face
 * midpoint, with the cell's scalar limiters applied per variable. Falls
 * back to first order when `muscl` is off (the caller passes the cell state
 * through unchanged).
 */
pub fn reconstruct(
    v: &Primitive,
    gradient: &[[f64; 3]; MAX_VARS],
    limiter: &[f64; MAX_VARS],
    dx: &[f64; 3],
    ndim: usize,
) -> Primitive {
    let extrapolate = |var: usize, value: f64| value + limiter[var] * dot(&gradient[var], dx);

    let temperature = extrapolate(GRAD_TEMPERATURE, v.temperature);
    let mut velocity = [0.0; 3];
    for k in 0..ndim {
        velocity[k] = extrapolate(GRAD_VELOCITY + k, v.velocity[k]);
    }
    let pressure = extrapolate(grad_pressure(ndim), v.pressure);

    if pressure <= 0.0 || temperature <= 0.0 {
        // reconstruction overshot into a non-physical state; drop to first
        // order at this face
        return *v;
    }
    let density = v.density * (pressure / v.pressure) * (v.temperature / temperature);
    Primitive {
        density,
        velocity,
        pressure,
        temperature,
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{GradientScheme, LimiterKind};
    use crate::gas::GasModel;
    use crate::mesh;
    use approx::assert_relative_eq;

    /// Linear primitive field T = 300 + a.x, p = 1e5 + b.x, u = c + D.x.
    fn linear_field(geometry: &Geometry, gas: &GasModel) -> FlowField {
        let freestream = Primitive {
            density: 1.0,
            velocity: [10.0, 0.0, 0.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / gas.gas_constant,
        };
        let mut field = FlowField::new(geometry.ndim(), geometry.cell_count(), freestream, gas);
        for c in 0..geometry.cell_count() {
            let x = geometry.cell_center(c);
            let temperature = 300.0 + 8.0 * x[0] - 3.0 * x[1];
            let pressure = 1.0e5 + 400.0 * x[0] + 150.0 * x[1];
            let v = Primitive {
                density: pressure / (gas.gas_constant * temperature),
                velocity: [10.0 + 2.0 * x[0], 1.0 - 4.0 * x[1], 0.0],
                pressure,
                temperature,
            };
            let u = v.to_conserved(gas);
            field.set_conserved(c, &u);
        }
        field.refresh_primitives(gas).unwrap();
        field
    }

    #[test]
    fn least_squares_gradients_are_exact_on_linear_fields() {
        let gas = GasModel::default();
        let mut grid = mesh::box_2d(6, 6, 1.0, 1.0);
        mesh::distort(&mut grid, 0.06);
        let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
        let mut field = linear_field(&geometry, &gas);

        compute_gradients(&geometry, &mut field, GradientScheme::LeastSquares);
        for c in 0..geometry.cell_count() {
            let g = &field.gradient[c];
            assert_relative_eq!(g[GRAD_TEMPERATURE][0], 8.0, max_relative = 1e-9);
            assert_relative_eq!(g[GRAD_TEMPERATURE][1], -3.0, max_relative = 1e-9);
            assert_relative_eq!(g[GRAD_VELOCITY][0], 2.0, max_relative = 1e-9);
            assert_relative_eq!(g[GRAD_VELOCITY + 1][1], -4.0, max_relative = 1e-9);
            assert_relative_eq!(g[3][0], 400.0, max_relative = 1e-9);
            assert_relative_eq!(g[3][1], 150.0, max_relative = 1e-9);
        }
    }

    #[test]
    fn green_gauss_gradients_are_exact_on_interior_uniform_cells() {
        let gas = GasModel::default();
        let grid = mesh::box_2d(6, 6, 1.0, 1.0);
        let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
        let mut field = linear_field(&geometry, &gas);

        compute_gradients(&geometry, &mut field, GradientScheme::GreenGauss);
        // interior vertex away from the boundary closure
        let c = 3 * 7 + 3;
        assert_relative_eq!(field.gradient[c][GRAD_TEMPERATURE][0], 8.0, max_relative = 1e-9);
        assert_relative_eq!(field.gradient[c][3][1], 150.0, max_relative = 1e-9);
    }

    #[test]
    fn barth_limiter_does_not_clip_linear_data() {
        let gas = GasModel::default();
        let mut grid = mesh::box_2d(6, 6, 1.0, 1.0);
        mesh::distort(&mut grid, 0.05);
        let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
        let mut field = linear_field(&geometry, &gas);

        compute_gradients(&geometry, &mut field, GradientScheme::LeastSquares);
        compute_limiters(&geometry, &mut field, LimiterKind::Barth, 5.0);
        let ndim = geometry.ndim();
        for c in 0..geometry.cell_count() {
            for var in 0..n_grad_vars(ndim) {
                assert_relative_eq!(field.limiter[c][var], 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn venkat_limiter_stays_in_bounds_and_relaxes_with_k() {
        let gas = GasModel::default();
        let grid = mesh::box_2d(8, 8, 1.0, 1.0);
        let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
        let mut field = linear_field(&geometry, &gas);
        compute_gradients(&geometry, &mut field, GradientScheme::LeastSquares);

        compute_limiters(&geometry, &mut field, LimiterKind::Venkat, 5.0);
        let tight = field.limiter.clone();
        compute_limiters(&geometry, &mut field, LimiterKind::Venkat, 500.0);
        let loose = field.limiter.clone();

        for c in 0..geometry.cell_count() {
            for var in 0..n_grad_vars(2) {
                assert!((0.0..=1.0).contains(&tight[c][var]));
                // venkat asymptotes to 3/4 at sharp relative variation and
                // to 1 as eps dominates
                assert!(tight[c][var] > 0.7);
                assert!(loose[c][var] >= tight[c][var] - 1e-12);
                assert!(loose[c][var] > 0.999);
            }
        }
    }

    #[test]
    fn reconstruction_reproduces_linear_face_values() {
        let gas = GasModel::default();
        let mut grid = mesh::box_2d(6, 6, 1.0, 1.0);
        mesh::distort(&mut grid, 0.04);
        let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
        let mut field = linear_field(&geometry, &gas);
        compute_gradients(&geometry, &mut field, GradientScheme::LeastSquares);

        for e in 0..geometry.edge_count() {
            let [i, _] = geometry.edge_cells(e);
            let c = i as usize;
            let xf = geometry.edge_midpoint(e);
            let dx = crate::geometry::sub(&xf, &geometry.cell_center(c));
            let unlimited = [1.0; MAX_VARS];
            let v = reconstruct(&field.primitive[c], &field.gradient[c], &unlimited, &dx, 2);
            let expected_t = 300.0 + 8.0 * xf[0] - 3.0 * xf[1];
            let expected_p = 1.0e5 + 400.0 * xf[0] + 150.0 * xf[1];
            assert_relative_eq!(v.temperature, expected_t, max_relative = 1e-10);
            assert_relative_eq!(v.pressure, expected_p, max_relative = 1e-10);
            assert_relative_eq!(v.velocity[0], 10.0 + 2.0 * xf[0], max_relative = 1e-10);
        }
    }

    #[test]
    fn uniform_pressure_gives_a_silent_sensor() {
        let gas = GasModel::default();
        let grid = mesh::box_2d(5, 5, 1.0, 1.0);
        let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
        let freestream = Primitive {
            density: 1.0,
            velocity: [10.0, 0.0, 0.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / gas.gas_constant,
        };
        let mut field = FlowField::new(2, geometry.cell_count(), freestream, &gas);
        compute_jst_sensors(&geometry, &mut field);
        for c in 0..geometry.cell_count() {
            assert_relative_eq!(field.pressure_sensor[c], 0.0, epsilon = 1e-14);
            assert_relative_eq!(field.laplacian[c].density, 0.0, epsilon = 1e-14);
        }
    }
}

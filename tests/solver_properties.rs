use slipstream::config::{BoundaryCondition, Config, ConvectiveScheme, SolverKind, TimeScheme, TurbulenceModel};
use slipstream::geometry::Geometry;
use slipstream::integration::Integrator;
use slipstream::mesh;
use slipstream::monitor::HistoryMonitor;
use slipstream::solver::{Case, MeanSolver};
use slipstream::state::FlowField;
use std::sync::atomic::AtomicBool;

fn farfield_box_config_2d() -> Config {
    let mut config = Config::default();
    config.freestream_mach = 0.5;
    config.aoa = 7.0;
    for name in ["west", "east", "south", "north"] {
        config
            .markers
            .insert(name.to_string(), BoundaryCondition::Farfield);
    }
    config
}

fn field_for(case: &Case) -> FlowField {
    FlowField::new(
        case.geometry.ndim(),
        case.geometry.cell_count(),
        case.freestream,
        &case.gas,
    )
}

/// A uniform freestream on a distorted mesh must produce a residual at the
/// round-off level of the flux magnitudes after a single assembly.
#[test]
fn freestream_is_preserved_on_a_distorted_2d_mesh() {
    let config = farfield_box_config_2d();
    let mut grid = mesh::box_2d(10, 8, 1.0, 1.0);
    mesh::distort(&mut grid, 0.06);
    let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
    let case = Case::new(&config, &geometry).unwrap();
    let mut field = field_for(&case);

    let mut solver = MeanSolver::new(&case);
    let outcome = solver
        .iterate(&case, &mut field, config.cfl_init, None)
        .unwrap();

    // scale of one face's energy flux, the largest entry in play
    let scale = case.freestream.density
        * case.freestream.velocity_squared().sqrt()
        * case.freestream.total_enthalpy(&case.gas)
        * 0.2;
    assert!(
        outcome.residual_max < 1e-11 * scale,
        "residual {:.3e} vs scale {:.3e}",
        outcome.residual_max,
        scale
    );
}

#[test]
fn freestream_is_preserved_on_a_distorted_3d_hex_mesh() {
    let mut config = Config::default();
    config.ndim = 3;
    config.freestream_mach = 0.4;
    config.aoa = 3.0;
    config.sideslip = 2.0;
    for name in ["xmin", "xmax", "ymin", "ymax", "zmin", "zmax"] {
        config
            .markers
            .insert(name.to_string(), BoundaryCondition::Farfield);
    }
    let mut grid = mesh::box_3d(5, 5, 5, 1.0, 1.0, 1.0);
    mesh::distort(&mut grid, 0.04);
    let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
    let case = Case::new(&config, &geometry).unwrap();
    let mut field = field_for(&case);

    let mut solver = MeanSolver::new(&case);
    let outcome = solver
        .iterate(&case, &mut field, config.cfl_init, None)
        .unwrap();
    let scale = case.freestream.density
        * case.freestream.velocity_squared().sqrt()
        * case.freestream.total_enthalpy(&case.gas)
        * 0.04;
    assert!(
        outcome.residual_max < 1e-11 * scale,
        "residual {:.3e} vs scale {:.3e}",
        outcome.residual_max,
        scale
    );
}

/// Still air inside slip walls is an exact steady state: the pressure
/// fluxes close around every dual cell.
#[test]
fn still_air_in_a_closed_box_is_steady() {
    let mut config = Config::default();
    config.freestream_mach = 1e-9; // effectively quiescent
    for name in ["west", "east", "south", "north"] {
        config
            .markers
            .insert(name.to_string(), BoundaryCondition::Symmetry);
    }
    let mut grid = mesh::box_2d(6, 6, 1.0, 1.0);
    mesh::distort(&mut grid, 0.05);
    let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
    let case = Case::new(&config, &geometry).unwrap();
    let mut field = field_for(&case);

    let mut solver = MeanSolver::new(&case);
    let outcome = solver
        .iterate(&case, &mut field, config.cfl_init, None)
        .unwrap();
    let scale = case.freestream.pressure * 0.2;
    assert!(outcome.residual_max < 1e-11 * scale);
}

/// The same property must hold for every convective scheme.
#[test]
fn every_scheme_preserves_the_freestream() {
    for scheme in [
        ConvectiveScheme::Roe,
        ConvectiveScheme::Jst,
        ConvectiveScheme::Ausm,
        ConvectiveScheme::Hllc,
    ] {
        let mut config = farfield_box_config_2d();
        config.convective_scheme = scheme;
        let mut grid = mesh::box_2d(6, 6, 1.0, 1.0);
        mesh::distort(&mut grid, 0.05);
        let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
        let case = Case::new(&config, &geometry).unwrap();
        let mut field = field_for(&case);

        let mut solver = MeanSolver::new(&case);
        let outcome = solver
            .iterate(&case, &mut field, config.cfl_init, None)
            .unwrap();
        let scale = case.freestream.density
            * case.freestream.velocity_squared().sqrt()
            * case.freestream.total_enthalpy(&case.gas)
            * 0.2;
        assert!(
            outcome.residual_max < 1e-10 * scale,
            "{:?}: residual {:.3e}",
            scheme,
            outcome.residual_max
        );
    }
}

/// Explicit multistage time stepping keeps the quiescent exact solution.
#[test]
fn explicit_rk_keeps_still_air_still() {
    let mut config = Config::default();
    config.time_integration = TimeScheme::ExplicitRk;
    config.freestream_mach = 1e-9;
    for name in ["west", "east", "south", "north"] {
        config
            .markers
            .insert(name.to_string(), BoundaryCondition::Symmetry);
    }
    let grid = mesh::box_2d(5, 5, 1.0, 1.0);
    let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
    let case = Case::new(&config, &geometry).unwrap();
    let mut field = field_for(&case);
    let before = field.conservative.clone();

    let mut solver = MeanSolver::new(&case);
    for _ in 0..5 {
        solver
            .iterate(&case, &mut field, config.cfl_init, None)
            .unwrap();
    }
    for (a, b) in field.conservative.iter().zip(&before) {
        assert!((a - b).abs() <= 1e-9 * b.abs().max(1.0));
    }
}

/// A near-freestream channel driven by total inlet and static outlet
/// conditions converges under the implicit scheme with CFL ramping.
#[test]
fn implicit_channel_run_converges() {
    let mut config = Config::default();
    config.freestream_mach = 0.3;
    config.cfl_init = 5.0;
    config.cfl_max = 1000.0;
    config.max_iterations = 300;
    config.residual_target = 1e-6;

    let gas = config.gas_model();
    let freestream = config.freestream(&gas);
    let mach = config.freestream_mach;
    let total_factor = 1.0 + 0.5 * (gas.gamma - 1.0) * mach * mach;
    let total_pressure = freestream.pressure * total_factor.powf(gas.gamma / (gas.gamma - 1.0));
    let total_temperature = freestream.temperature * total_factor;

    config.markers.insert(
        "west".to_string(),
        BoundaryCondition::InletTotal {
            total_pressure,
            total_temperature,
        },
    );
    config.markers.insert(
        "east".to_string(),
        BoundaryCondition::OutletPressure {
            pressure: freestream.pressure,
        },
    );
    config
        .markers
        .insert("south".to_string(), BoundaryCondition::Symmetry);
    config
        .markers
        .insert("north".to_string(), BoundaryCondition::Symmetry);

    let grid = mesh::box_2d(8, 4, 2.0, 1.0);
    let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
    let case = Case::new(&config, &geometry).unwrap();
    let mut field = field_for(&case);

    // smooth one-percent density bump so the first residual is finite and
    // the run has something to converge away
    for c in 0..geometry.cell_count() {
        let x = geometry.cell_center(c);
        let bump = 1.0
            + 0.01
                * (std::f64::consts::PI * x[0] / 2.0).sin()
                * (std::f64::consts::PI * x[1]).sin();
        let mut u = field.conserved(c);
        u.density *= bump;
        u.energy *= bump;
        field.set_conserved(c, &u);
    }
    field.refresh_primitives(&case.gas).unwrap();

    let mut integrator = Integrator::new(&case, &field);
    let mut monitor = HistoryMonitor::default();
    let stop = AtomicBool::new(false);
    let outcome = integrator
        .run_steady(&case, &mut field, &mut monitor, &stop)
        .unwrap();

    assert!(!monitor.samples.is_empty());
    field.refresh_primitives(&case.gas).unwrap();
    for v in &field.primitive {
        assert!(v.is_admissible());
        assert!(v.velocity[0] > 0.0, "flow reversed: {:?}", v.velocity);
    }
    // the run either hit the relative target or kept shrinking the residual
    let first = monitor.samples.first().unwrap().residual_rms[0];
    assert!(
        outcome.final_residual <= 1e-3 * first.max(1e-300),
        "residual {:.3e} from {:.3e}",
        outcome.final_residual,
        first
    );
}

/// Dual-time stepping leaves an exact steady state untouched across
/// physical steps.
#[test]
fn dual_time_keeps_a_steady_state() {
    let mut config = Config::default();
    config.time_integration = TimeScheme::DualTimeBdf2;
    config.time_step = 1e-4;
    config.n_time_steps = 3;
    config.inner_iterations = 20;
    config.freestream_mach = 1e-9;
    for name in ["west", "east", "south", "north"] {
        config
            .markers
            .insert(name.to_string(), BoundaryCondition::Symmetry);
    }
    let grid = mesh::box_2d(4, 4, 1.0, 1.0);
    let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
    let case = Case::new(&config, &geometry).unwrap();
    let mut field = field_for(&case);
    let before = field.conservative.clone();

    let mut integrator = Integrator::new(&case, &field);
    let mut monitor = HistoryMonitor::default();
    let stop = AtomicBool::new(false);
    integrator
        .run_steady(&case, &mut field, &mut monitor, &stop)
        .unwrap();

    for (a, b) in field.conservative.iter().zip(&before) {
        assert!((a - b).abs() <= 1e-8 * b.abs().max(1.0));
    }
}

/// The cooperative stop flag cancels a run at an iteration boundary.
#[test]
fn stop_flag_cancels_the_run() {
    use slipstream::integration::RunStatus;
    let config = farfield_box_config_2d();
    let grid = mesh::box_2d(4, 4, 1.0, 1.0);
    let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
    let case = Case::new(&config, &geometry).unwrap();
    let mut field = field_for(&case);

    let mut integrator = Integrator::new(&case, &field);
    let mut monitor = HistoryMonitor::default();
    let stop = AtomicBool::new(true);
    let outcome = integrator
        .run_steady(&case, &mut field, &mut monitor, &stop)
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.iterations, 0);
}

/// A short RANS-SA run on a box with a heated-wall floor: the turbulence
/// system iterates alongside the mean flow, wall values stay pinned, and
/// the eddy viscosity stays physical.
#[test]
fn rans_sa_iterations_keep_wall_values_pinned() {
    let mut config = Config::default();
    config.solver = SolverKind::Rans;
    config.turbulence = TurbulenceModel::Sa;
    config.freestream_mach = 0.2;
    config.reynolds = 1e5;
    config.cfl_init = 2.0;
    config
        .markers
        .insert("south".to_string(), BoundaryCondition::WallHeatflux { heat_flux: 0.0 });
    for name in ["west", "east", "north"] {
        config
            .markers
            .insert(name.to_string(), BoundaryCondition::Farfield);
    }

    let grid = mesh::box_2d(6, 6, 1.0, 1.0);
    let geometry = Geometry::from_mesh(&grid, &["south"]).unwrap();
    let case = Case::new(&config, &geometry).unwrap();
    let mut field = field_for(&case);

    let mut integrator = Integrator::new(&case, &field);
    let mut monitor = HistoryMonitor::default();
    let stop = AtomicBool::new(false);

    // a handful of coupled iterations, not a converged boundary layer
    let mut limited = config.clone();
    limited.max_iterations = 5;
    limited.residual_target = 1e-30;
    let case = Case::new(&limited, &geometry).unwrap();
    integrator
        .run_steady(&case, &mut field, &mut monitor, &stop)
        .unwrap();

    let turb = integrator.turbulence_state().unwrap();
    for c in 0..geometry.cell_count() {
        assert!(field.eddy_viscosity[c] >= 0.0);
        assert!(field.eddy_viscosity[c].is_finite());
        if geometry.wall_distance(c) == 0.0 {
            assert_eq!(turb.vars[c], 0.0, "wall cell {} not pinned", c);
            // no-slip enforced strongly on the wall momentum
            assert_eq!(field.conserved(c).momentum[0], 0.0);
            assert_eq!(field.conserved(c).momentum[1], 0.0);
        }
    }
}

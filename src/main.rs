use clap::Parser;
use log::{error, info};
use slipstream::config::Config;
use slipstream::error::Error;
use slipstream::geometry::Geometry;
use slipstream::integration::{Integrator, RunStatus};
use slipstream::mesh::MeshData;
use slipstream::monitor::LogMonitor;
use slipstream::output;
use slipstream::restart::Snapshot;
use slipstream::solver::{wall_marker_names, Case};
use slipstream::state::FlowField;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

/// Compressible-flow finite-volume RANS solver on unstructured meshes.
#[derive(Parser)]
#[clap(name = "slipstream", version)]
struct Opts {
    /// Configuration file (JSON)
    config: PathBuf,

    /// Worker threads (defaults to all cores)
    #[clap(short, long)]
    threads: Option<usize>,

    /// Log level: error, warn, info, debug, trace
    #[clap(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    simple_logger::SimpleLogger::new()
        .with_level(opts.log_level)
        .init()
        .expect("logger initialization");

    if let Some(threads) = opts.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .expect("thread pool initialization");
    }

    match run(&opts) {
        Ok(RunStatus::Converged) => ExitCode::from(0),
        Ok(status) => {
            error!("run ended without convergence: {:?}", status);
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{}", e);
            let code = match e {
                Error::InvalidInput(_) | Error::DegenerateGeometry(_) => 2,
                Error::Io(_) => 3,
                _ => 1,
            };
            ExitCode::from(code)
        }
    }
}

fn run(opts: &Opts) -> Result<RunStatus, Error> {
    let config = Config::from_file(&opts.config)?;
    if config.mesh_file.is_empty() {
        return Err(Error::InvalidInput(
            "configuration does not name a mesh_file".to_string(),
        ));
    }

    info!("reading mesh {}", config.mesh_file);
    let mesh = MeshData::from_su2_file(&config.mesh_file)?;
    let walls = wall_marker_names(&config);
    let geometry = Geometry::from_mesh(&mesh, &walls)?;
    info!(
        "dual mesh: {} cells, {} edges, {} boundary faces",
        geometry.cell_count(),
        geometry.edge_count(),
        geometry.boundary_face_count()
    );

    let case = Case::new(&config, &geometry)?;
    let mut field = FlowField::new(
        geometry.ndim(),
        geometry.cell_count(),
        case.freestream,
        &case.gas,
    );
    let mut integrator = Integrator::new(&case, &field);

    if !config.restart_file.is_empty() {
        info!("restarting from {}", config.restart_file);
        let snapshot = Snapshot::read_file(&config.restart_file)?;
        snapshot.restore(&mut field, integrator.turbulence_state_mut())?;
        integrator.set_cfl(snapshot.cfl);
        field.refresh_primitives(&case.gas)?;
    }

    let stop = AtomicBool::new(false);
    let mut monitor = LogMonitor;
    let outcome = integrator.run_steady(&case, &mut field, &mut monitor, &stop)?;
    info!(
        "finished after {} iterations, residual {:.3e}",
        outcome.iterations, outcome.final_residual
    );

    let prefix = &config.output_prefix;
    output::write_tecplot(
        format!("{}.dat", prefix),
        &mesh,
        &geometry,
        &field,
        &case.gas,
    )?;
    output::write_vtk(
        format!("{}.vtk", prefix),
        &mesh,
        &geometry,
        &field,
        &case.gas,
    )?;
    let q = 0.5 * case.freestream.density * case.freestream.velocity_squared();
    for wall in &walls {
        output::write_surface_csv(
            format!("{}_{}.csv", prefix, wall),
            &geometry,
            &field,
            wall,
            case.freestream.pressure,
            q,
        )?;
    }

    if !config.snapshot_file.is_empty() {
        Snapshot::capture(
            &field,
            integrator.turbulence_state(),
            outcome.iterations,
            outcome.final_cfl,
        )
        .write_file(&config.snapshot_file)?;
        info!("snapshot written to {}", config.snapshot_file);
    }

    Ok(outcome.status)
}

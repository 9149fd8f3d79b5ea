use crate::error::Error;
use crate::gas::{GasModel, Primitive};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/**
 * Governing equations to integrate.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Euler,
    NavierStokes,
    Rans,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurbulenceModel {
    None,
    Sa,
    Sst,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvectiveScheme {
    Roe,
    Jst,
    Ausm,
    Hllc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterKind {
    None,
    Venkat,
    Barth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientScheme {
    GreenGauss,
    LeastSquares,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeScheme {
    ExplicitRk,
    ImplicitEuler,
    DualTimeBdf2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KrylovMethod {
    Gmres,
    Bicgstab,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionerKind {
    Jacobi,
    Ilu0,
    Sgs,
}

/**
 * Per-marker boundary condition. Heat-flux walls with zero flux are
 * adiabatic; under the Euler equations any wall degenerates to a slip wall.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundaryCondition {
    WallHeatflux {
        #[serde(default)]
        heat_flux: f64,
    },
    WallIsothermal {
        temperature: f64,
    },
    Farfield,
    Symmetry,
    InletTotal {
        total_pressure: f64,
        total_temperature: f64,
    },
    OutletPressure {
        pressure: f64,
    },
}

impl BoundaryCondition {
    pub fn is_wall(&self) -> bool {
        matches!(
            self,
            BoundaryCondition::WallHeatflux { .. } | BoundaryCondition::WallIsothermal { .. }
        )
    }
}

/**
 * The full option bag. Every field has a serde default so partial files
 * stay valid; `validate` rejects inconsistent combinations before any
 * allocation happens.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_ndim")]
    pub ndim: usize,
    #[serde(default = "default_solver")]
    pub solver: SolverKind,
    #[serde(default = "default_turbulence")]
    pub turbulence: TurbulenceModel,

    #[serde(default = "default_scheme")]
    pub convective_scheme: ConvectiveScheme,
    #[serde(default = "default_true")]
    pub muscl: bool,
    #[serde(default = "default_limiter")]
    pub limiter: LimiterKind,
    #[serde(default = "default_limiter_coefficient")]
    pub limiter_coefficient: f64,
    #[serde(default = "default_gradient_scheme")]
    pub gradient_scheme: GradientScheme,
    #[serde(default = "default_entropy_fix")]
    pub entropy_fix_coeff: f64,
    #[serde(default = "default_jst_k2")]
    pub jst_k2: f64,
    #[serde(default = "default_jst_k4")]
    pub jst_k4: f64,
    #[serde(default)]
    pub low_mach_prec: bool,
    #[serde(default = "default_low_mach_cutoff")]
    pub low_mach_cutoff: f64,

    #[serde(default = "default_time_integration")]
    pub time_integration: TimeScheme,
    #[serde(default = "default_cfl_init")]
    pub cfl_init: f64,
    #[serde(default = "default_cfl_max")]
    pub cfl_max: f64,
    #[serde(default = "default_cfl_growth")]
    pub cfl_growth: f64,
    #[serde(default = "default_cfl_cutback")]
    pub cfl_cutback: f64,
    #[serde(default = "default_cfl_floor")]
    pub cfl_floor: f64,
    #[serde(default = "default_relaxation")]
    pub relaxation: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_residual_target")]
    pub residual_target: f64,
    #[serde(default = "default_admissibility_retries")]
    pub admissibility_retries: usize,

    /// Physical time step and step count for dual-time runs.
    #[serde(default)]
    pub time_step: f64,
    #[serde(default)]
    pub n_time_steps: usize,
    #[serde(default = "default_inner_iterations")]
    pub inner_iterations: usize,

    #[serde(default = "default_linear_solver")]
    pub linear_solver: KrylovMethod,
    #[serde(default = "default_preconditioner")]
    pub linear_preconditioner: PreconditionerKind,
    #[serde(default = "default_linear_tol")]
    pub linear_tol: f64,
    #[serde(default = "default_linear_max_iter")]
    pub linear_max_iter: usize,
    #[serde(default = "default_gmres_restart")]
    pub gmres_restart: usize,

    #[serde(default = "default_mach")]
    pub freestream_mach: f64,
    #[serde(default = "default_temperature")]
    pub freestream_temperature: f64,
    #[serde(default = "default_pressure")]
    pub freestream_pressure: f64,
    #[serde(default)]
    pub aoa: f64,
    #[serde(default)]
    pub sideslip: f64,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default = "default_gas_constant")]
    pub gas_constant: f64,
    #[serde(default = "default_prandtl_lam")]
    pub prandtl_laminar: f64,
    #[serde(default = "default_prandtl_turb")]
    pub prandtl_turbulent: f64,
    /// Freestream Reynolds number; when positive the Sutherland reference
    /// viscosity is rescaled so the freestream matches it.
    #[serde(default)]
    pub reynolds: f64,
    #[serde(default = "default_reference_length")]
    pub reference_length: f64,
    #[serde(default)]
    pub reference_point: [f64; 3],

    /// Boundary condition per mesh marker tag.
    #[serde(default)]
    pub markers: BTreeMap<String, BoundaryCondition>,

    /// SU2-format mesh file; required by the driver binary, unused by the
    /// library (tests build meshes programmatically).
    #[serde(default)]
    pub mesh_file: String,
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    /// Read this snapshot before iterating, when present.
    #[serde(default)]
    pub restart_file: String,
    /// Write a snapshot here after the run, when nonempty.
    #[serde(default)]
    pub snapshot_file: String,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: usize,
}

fn default_ndim() -> usize {
    2
}
fn default_solver() -> SolverKind {
    SolverKind::Euler
}
fn default_turbulence() -> TurbulenceModel {
    TurbulenceModel::None
}
fn default_scheme() -> ConvectiveScheme {
    ConvectiveScheme::Roe
}
fn default_true() -> bool {
    true
}
fn default_limiter() -> LimiterKind {
    LimiterKind::Venkat
}
fn default_limiter_coefficient() -> f64 {
    5.0
}
fn default_gradient_scheme() -> GradientScheme {
    GradientScheme::GreenGauss
}
fn default_entropy_fix() -> f64 {
    0.1
}
fn default_jst_k2() -> f64 {
    0.5
}
fn default_jst_k4() -> f64 {
    1.0 / 64.0
}
fn default_low_mach_cutoff() -> f64 {
    0.05
}
fn default_time_integration() -> TimeScheme {
    TimeScheme::ImplicitEuler
}
fn default_cfl_init() -> f64 {
    5.0
}
fn default_cfl_max() -> f64 {
    1.0e4
}
fn default_cfl_growth() -> f64 {
    1.2
}
fn default_cfl_cutback() -> f64 {
    0.5
}
fn default_cfl_floor() -> f64 {
    1.0e-3
}
fn default_relaxation() -> f64 {
    1.0
}
fn default_max_iterations() -> usize {
    10000
}
fn default_residual_target() -> f64 {
    1.0e-8
}
fn default_admissibility_retries() -> usize {
    10
}
fn default_inner_iterations() -> usize {
    50
}
fn default_linear_solver() -> KrylovMethod {
    KrylovMethod::Gmres
}
fn default_preconditioner() -> PreconditionerKind {
    PreconditionerKind::Ilu0
}
fn default_linear_tol() -> f64 {
    1.0e-2
}
fn default_linear_max_iter() -> usize {
    100
}
fn default_gmres_restart() -> usize {
    30
}
fn default_mach() -> f64 {
    0.3
}
fn default_temperature() -> f64 {
    288.15
}
fn default_pressure() -> f64 {
    101325.0
}
fn default_gamma() -> f64 {
    1.4
}
fn default_gas_constant() -> f64 {
    287.058
}
fn default_prandtl_lam() -> f64 {
    0.72
}
fn default_prandtl_turb() -> f64 {
    0.9
}
fn default_reference_length() -> f64 {
    1.0
}
fn default_output_prefix() -> String {
    "solution".to_string()
}
fn default_monitor_interval() -> usize {
    10
}

// ============================================================================
impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::InvalidInput(format!("configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let fail = |what: &str| Err(Error::InvalidInput(what.to_string()));

        if self.ndim != 2 && self.ndim != 3 {
            return fail("ndim must be 2 or 3");
        }
        if self.gamma <= 1.0 {
            return fail("gamma must exceed 1");
        }
        if self.gas_constant <= 0.0 {
            return fail("gas_constant must be positive");
        }
        if self.freestream_mach <= 0.0
            || self.freestream_temperature <= 0.0
            || self.freestream_pressure <= 0.0
        {
            return fail("freestream mach, temperature and pressure must be positive");
        }
        if self.cfl_init <= 0.0 || self.cfl_max < self.cfl_init {
            return fail("cfl_init must be positive and no larger than cfl_max");
        }
        if self.cfl_growth < 1.0 {
            return fail("cfl_growth must be at least 1");
        }
        if !(0.0..1.0).contains(&self.cfl_cutback) {
            return fail("cfl_cutback must lie in (0, 1)");
        }
        if self.limiter == LimiterKind::Venkat && self.limiter_coefficient <= 0.0 {
            return fail("limiter_coefficient must be positive");
        }
        if self.linear_tol <= 0.0 || self.linear_tol >= 1.0 {
            return fail("linear_tol must lie in (0, 1)");
        }
        if self.gmres_restart < 2 {
            return fail("gmres_restart must be at least 2");
        }
        if !(0.0..=1.0).contains(&self.relaxation) || self.relaxation == 0.0 {
            return fail("relaxation must lie in (0, 1]");
        }
        if self.time_integration == TimeScheme::DualTimeBdf2 {
            if self.time_step <= 0.0 {
                return fail("dual-time integration requires a positive time_step");
            }
            if self.n_time_steps == 0 {
                return fail("dual-time integration requires n_time_steps");
            }
        }
        if self.solver == SolverKind::Rans && self.turbulence == TurbulenceModel::None {
            return fail("rans solver requires a turbulence model");
        }
        if self.solver != SolverKind::Rans && self.turbulence != TurbulenceModel::None {
            return fail("turbulence model requires the rans solver");
        }
        Ok(())
    }

    pub fn viscous(&self) -> bool {
        self.solver != SolverKind::Euler
    }

    pub fn nvar(&self) -> usize {
        self.ndim + 2
    }

    /// Gas model with the Sutherland reference viscosity rescaled to match
    /// the requested freestream Reynolds number, when one is given.
    pub fn gas_model(&self) -> GasModel {
        let mut gas = GasModel {
            gamma: self.gamma,
            gas_constant: self.gas_constant,
            prandtl_lam: self.prandtl_laminar,
            prandtl_turb: self.prandtl_turbulent,
            ..GasModel::default()
        };
        if self.viscous() && self.reynolds > 0.0 {
            let t = self.freestream_temperature;
            let density = self.freestream_pressure / (gas.gas_constant * t);
            let speed = self.freestream_mach * (gas.gamma * gas.gas_constant * t).sqrt();
            let mu_inf = density * speed * self.reference_length / self.reynolds;
            let shape = (t / gas.t_ref).powf(1.5) * (gas.t_ref + gas.t_sutherland)
                / (t + gas.t_sutherland);
            gas.mu_ref = mu_inf / shape;
        }
        gas
    }

    /// Freestream primitive state from Mach, static conditions and flow
    /// angles (angles in degrees; 3D uses angle of attack in the x-z plane
    /// and sideslip toward y).
    pub fn freestream(&self, gas: &GasModel) -> Primitive {
        let t = self.freestream_temperature;
        let p = self.freestream_pressure;
        let density = p / (gas.gas_constant * t);
        let speed = self.freestream_mach * (gas.gamma * gas.gas_constant * t).sqrt();
        let alpha = self.aoa.to_radians();
        let beta = self.sideslip.to_radians();

        let velocity = if self.ndim == 2 {
            [speed * alpha.cos(), speed * alpha.sin(), 0.0]
        } else {
            [
                speed * alpha.cos() * beta.cos(),
                speed * beta.sin(),
                speed * alpha.sin() * beta.cos(),
            ]
        };
        Primitive {
            density,
            velocity,
            pressure: p,
            temperature: t,
        }
    }

    /// Freestream dynamic pressure scaled by the reference length, the
    /// denominator of every force coefficient.
    pub fn force_normalization(&self, gas: &GasModel) -> f64 {
        let freestream = self.freestream(gas);
        let q = 0.5 * freestream.density * freestream.velocity_squared();
        let area = if self.ndim == 2 {
            self.reference_length
        } else {
            self.reference_length * self.reference_length
        };
        q * area
    }
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ndim, 2);
        assert_eq!(config.nvar(), 4);
        assert_eq!(config.convective_scheme, ConvectiveScheme::Roe);
    }

    #[test]
    fn full_document_parses() {
        let text = r#"{
            "ndim": 3,
            "solver": "rans",
            "turbulence": "sa",
            "convective_scheme": "jst",
            "muscl": false,
            "limiter": "none",
            "time_integration": "implicit_euler",
            "cfl_init": 10.0,
            "cfl_max": 100.0,
            "linear_solver": "bicgstab",
            "linear_preconditioner": "sgs",
            "freestream_mach": 0.8,
            "aoa": 1.25,
            "reynolds": 6.5e6,
            "markers": {
                "airfoil": { "kind": "wall_heatflux" },
                "inflow": { "kind": "inlet_total",
                            "total_pressure": 1.1e5,
                            "total_temperature": 300.0 },
                "outflow": { "kind": "outlet_pressure", "pressure": 9.9e4 },
                "far": { "kind": "farfield" }
            }
        }"#;
        let config: Config = serde_json::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.nvar(), 5);
        assert!(config.markers["airfoil"].is_wall());
        assert!(!config.markers["far"].is_wall());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{ "cfl": 4.0 }"#).is_err());
    }

    #[test]
    fn inconsistent_choices_are_rejected() {
        let mut config = Config::default();
        config.solver = SolverKind::Rans;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ndim = 4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.time_integration = TimeScheme::DualTimeBdf2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reynolds_rescales_the_viscosity() {
        let mut config = Config::default();
        config.solver = SolverKind::NavierStokes;
        config.reynolds = 1.0e6;
        let gas = config.gas_model();
        let freestream = config.freestream(&gas);
        let speed = freestream.velocity_squared().sqrt();
        let re = freestream.density * speed * config.reference_length
            / gas.viscosity(freestream.temperature);
        assert_relative_eq!(re, 1.0e6, max_relative = 1e-10);
    }

    #[test]
    fn freestream_angles_set_the_velocity_direction() {
        let mut config = Config::default();
        config.aoa = 90.0;
        let gas = config.gas_model();
        let freestream = config.freestream(&gas);
        assert_relative_eq!(freestream.velocity[0], 0.0, epsilon = 1e-10);
        assert!(freestream.velocity[1] > 0.0);
    }
}

use std::ops::{Add, Div, Mul, Sub};

/// Number of conserved variables is `ndim + 2`; state vectors are stored in
/// fixed arrays of this length so 2D and 3D share one monomorphic code path.
pub const MAX_VARS: usize = 5;

/**
 * Calorically perfect gas with Sutherland viscosity. All thermodynamic
 * conversions in the solver go through this model; nothing else knows the
 * equation of state.
 */
#[derive(Clone, Copy, Debug)]
pub struct GasModel {
    pub gamma: f64,
    pub gas_constant: f64,
    pub prandtl_lam: f64,
    pub prandtl_turb: f64,
    pub mu_ref: f64,
    pub t_ref: f64,
    pub t_sutherland: f64,
}

/**
 * Conserved state (or a flux of it): density, momentum, total energy per
 * unit volume. The third momentum component is identically zero in 2D.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Conserved {
    pub density: f64,
    pub momentum: [f64; 3],
    pub energy: f64,
}

/**
 * Primitive state at a cell or face: the working set every stencil kernel
 * reads. Temperature and pressure are consistent through the gas model.
 */
#[derive(Clone, Copy, Debug, Default)]
pub struct Primitive {
    pub density: f64,
    pub velocity: [f64; 3],
    pub pressure: f64,
    pub temperature: f64,
}

/// Conversion failure carrying the offending values; the caller attaches the
/// cell index.
#[derive(Clone, Copy, Debug)]
pub struct NonPhysical {
    pub density: f64,
    pub pressure: f64,
}

// ============================================================================
impl GasModel {
    pub fn cp(&self) -> f64 {
        self.gamma * self.gas_constant / (self.gamma - 1.0)
    }

    pub fn cv(&self) -> f64 {
        self.gas_constant / (self.gamma - 1.0)
    }

    /// Dynamic viscosity from Sutherland's law.
    pub fn viscosity(&self, temperature: f64) -> f64 {
        let t = temperature;
        self.mu_ref
            * (t / self.t_ref).powf(1.5)
            * (self.t_ref + self.t_sutherland)
            / (t + self.t_sutherland)
    }

    /// Effective thermal conductivity over cp, combining laminar and
    /// turbulent contributions: mu/Pr + mu_t/Pr_t.
    pub fn heat_flux_coefficient(&self, mu_lam: f64, mu_turb: f64) -> f64 {
        self.cp() * (mu_lam / self.prandtl_lam + mu_turb / self.prandtl_turb)
    }
}

impl Default for GasModel {
    fn default() -> Self {
        Self {
            gamma: 1.4,
            gas_constant: 287.058,
            prandtl_lam: 0.72,
            prandtl_turb: 0.9,
            mu_ref: 1.716e-5,
            t_ref: 273.15,
            t_sutherland: 110.4,
        }
    }
}

// ============================================================================
impl Conserved {
    /// Unpack from a solver array laid out [rho, rho u, rho v, (rho w), rho E].
    pub fn from_slice(ndim: usize, u: &[f64]) -> Self {
        let mut momentum = [0.0; 3];
        momentum[..ndim].copy_from_slice(&u[1..1 + ndim]);
        Self {
            density: u[0],
            momentum,
            energy: u[1 + ndim],
        }
    }

    pub fn write_to_slice(&self, ndim: usize, u: &mut [f64]) {
        u[0] = self.density;
        u[1..1 + ndim].copy_from_slice(&self.momentum[..ndim]);
        u[1 + ndim] = self.energy;
    }

    pub fn momentum_squared(&self) -> f64 {
        let [mx, my, mz] = self.momentum;
        mx * mx + my * my + mz * mz
    }

    pub fn to_primitive(&self, gas: &GasModel) -> Result<Primitive, NonPhysical> {
        let d = self.density;
        let ek = 0.5 * self.momentum_squared() / d;
        let pg = (self.energy - ek) * (gas.gamma - 1.0);

        if d <= 0.0 || pg <= 0.0 || !d.is_finite() || !pg.is_finite() {
            return Err(NonPhysical {
                density: d,
                pressure: pg,
            });
        }
        Ok(Primitive {
            density: d,
            velocity: [
                self.momentum[0] / d,
                self.momentum[1] / d,
                self.momentum[2] / d,
            ],
            pressure: pg,
            temperature: pg / (d * gas.gas_constant),
        })
    }
}

// ============================================================================
impl Primitive {
    pub fn velocity_squared(&self) -> f64 {
        let [u, v, w] = self.velocity;
        u * u + v * v + w * w
    }

    pub fn sound_speed(&self, gas: &GasModel) -> f64 {
        (gas.gamma * self.pressure / self.density).sqrt()
    }

    pub fn mach_number(&self, gas: &GasModel) -> f64 {
        (self.velocity_squared() / (gas.gamma * self.pressure / self.density)).sqrt()
    }

    /// Specific total enthalpy h + |u|^2 / 2.
    pub fn total_enthalpy(&self, gas: &GasModel) -> f64 {
        gas.cp() * self.temperature + 0.5 * self.velocity_squared()
    }

    /// Velocity projected on an (area-scaled or unit) normal.
    pub fn normal_velocity(&self, normal: &[f64; 3]) -> f64 {
        self.velocity[0] * normal[0] + self.velocity[1] * normal[1] + self.velocity[2] * normal[2]
    }

    pub fn to_conserved(&self, gas: &GasModel) -> Conserved {
        let d = self.density;
        Conserved {
            density: d,
            momentum: [
                d * self.velocity[0],
                d * self.velocity[1],
                d * self.velocity[2],
            ],
            energy: self.pressure / (gas.gamma - 1.0) + 0.5 * d * self.velocity_squared(),
        }
    }

    /// Inviscid flux through an area-scaled normal.
    pub fn flux(&self, normal: &[f64; 3], gas: &GasModel) -> Conserved {
        let qn = self.normal_velocity(normal);
        let d = self.density;
        let p = self.pressure;
        let h = self.total_enthalpy(gas);

        Conserved {
            density: d * qn,
            momentum: [
                d * self.velocity[0] * qn + p * normal[0],
                d * self.velocity[1] * qn + p * normal[1],
                d * self.velocity[2] * qn + p * normal[2],
            ],
            energy: d * h * qn,
        }
    }

    pub fn is_admissible(&self) -> bool {
        self.density > 0.0 && self.pressure > 0.0
    }
}

// ============================================================================
impl Add<Conserved> for Conserved {
    type Output = Conserved;
    fn add(self, u: Self) -> Conserved {
        Conserved {
            density: self.density + u.density,
            momentum: [
                self.momentum[0] + u.momentum[0],
                self.momentum[1] + u.momentum[1],
                self.momentum[2] + u.momentum[2],
            ],
            energy: self.energy + u.energy,
        }
    }
}

impl Sub<Conserved> for Conserved {
    type Output = Self;
    fn sub(self, u: Self) -> Self {
        Self {
            density: self.density - u.density,
            momentum: [
                self.momentum[0] - u.momentum[0],
                self.momentum[1] - u.momentum[1],
                self.momentum[2] - u.momentum[2],
            ],
            energy: self.energy - u.energy,
        }
    }
}

impl Mul<f64> for Conserved {
    type Output = Self;
    fn mul(self, a: f64) -> Self {
        Self {
            density: self.density * a,
            momentum: [
                self.momentum[0] * a,
                self.momentum[1] * a,
                self.momentum[2] * a,
            ],
            energy: self.energy * a,
        }
    }
}

impl Div<f64> for Conserved {
    type Output = Self;
    fn div(self, a: f64) -> Self {
        self * (1.0 / a)
    }
}

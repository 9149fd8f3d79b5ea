pub mod boundary;
pub mod mean;
pub mod turbulent;

pub use mean::{IterationOutcome, MeanSolver};
pub use turbulent::TurbSolver;

use crate::config::{BoundaryCondition, Config};
use crate::error::Error;
use crate::gas::{GasModel, Primitive};
use crate::geometry::Geometry;

/**
 * Everything the nonlinear iterations share and never mutate: the
 * configuration, the gas model, the geometry, the freestream state, and the
 * boundary condition resolved per mesh marker.
 */
pub struct Case<'a> {
    pub config: &'a Config,
    pub geometry: &'a Geometry,
    pub gas: GasModel,
    pub freestream: Primitive,
    /// boundary condition per geometry marker, in marker order
    pub boundary: Vec<BoundaryCondition>,
}

impl<'a> Case<'a> {
    /// Pair up config markers and mesh markers; both directions must match
    /// exactly.
    pub fn new(config: &'a Config, geometry: &'a Geometry) -> Result<Self, Error> {
        let mut boundary = Vec::with_capacity(geometry.marker_names().len());
        for name in geometry.marker_names() {
            match config.markers.get(name) {
                Some(bc) => boundary.push(*bc),
                None => {
                    return Err(Error::InvalidInput(format!(
                        "mesh marker '{}' has no boundary condition",
                        name
                    )))
                }
            }
        }
        for name in config.markers.keys() {
            if geometry.marker_index(name).is_none() {
                return Err(Error::InvalidInput(format!(
                    "boundary condition references a nonexistent marker '{}'",
                    name
                )));
            }
        }
        let gas = config.gas_model();
        let freestream = config.freestream(&gas);
        Ok(Self {
            config,
            geometry,
            gas,
            freestream,
            boundary,
        })
    }
}

/// Marker names the configuration declares as solid walls, needed before
/// the geometry (and its wall-distance field) can be built.
pub fn wall_marker_names(config: &Config) -> Vec<&str> {
    config
        .markers
        .iter()
        .filter(|(_, bc)| bc.is_wall())
        .map(|(name, _)| name.as_str())
        .collect()
}

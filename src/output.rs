use crate::error::Error;
use crate::gas::GasModel;
use crate::geometry::Geometry;
use crate::mesh::{ElementKind, MeshData};
use crate::state::FlowField;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/**
 * Field writers over read-only views of the mesh, the geometry and the
 * solution. The vertex-centered discretization makes these point writers:
 * one record per mesh point, with the primal elements as connectivity.
 */

/// Tecplot ASCII FEPOINT zone. Triangles and the 3D degenerate elements are
/// padded to the fixed node count of the zone element type.
pub fn write_tecplot<P: AsRef<Path>>(
    path: P,
    mesh: &MeshData,
    geometry: &Geometry,
    field: &FlowField,
    gas: &GasModel,
) -> Result<(), Error> {
    let mut w = BufWriter::new(File::create(path)?);
    let ndim = geometry.ndim();

    writeln!(w, "TITLE = \"flow solution\"")?;
    if ndim == 2 {
        writeln!(
            w,
            "VARIABLES = \"x\", \"y\", \"rho\", \"u\", \"v\", \"p\", \"T\", \"M\""
        )?;
        writeln!(
            w,
            "ZONE N={}, E={}, F=FEPOINT, ET=QUADRILATERAL",
            geometry.cell_count(),
            mesh.elements.len()
        )?;
    } else {
        writeln!(
            w,
            "VARIABLES = \"x\", \"y\", \"z\", \"rho\", \"u\", \"v\", \"w\", \"p\", \"T\", \"M\""
        )?;
        writeln!(
            w,
            "ZONE N={}, E={}, F=FEPOINT, ET=BRICK",
            geometry.cell_count(),
            mesh.elements.len()
        )?;
    }

    for c in 0..geometry.cell_count() {
        let x = geometry.cell_center(c);
        let v = &field.primitive[c];
        for k in 0..ndim {
            write!(w, "{:.10e} ", x[k])?;
        }
        write!(w, "{:.10e} ", v.density)?;
        for k in 0..ndim {
            write!(w, "{:.10e} ", v.velocity[k])?;
        }
        writeln!(
            w,
            "{:.10e} {:.10e} {:.10e}",
            v.pressure,
            v.temperature,
            v.mach_number(gas)
        )?;
    }

    for element in &mesh.elements {
        let padded = padded_connectivity(element.kind, element.vertices(), ndim);
        for v in &padded {
            write!(w, "{} ", v + 1)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Degenerate-element padding to the Tecplot zone types (quadrilateral in
/// 2D, brick in 3D).
fn padded_connectivity(kind: ElementKind, verts: &[u32], ndim: usize) -> Vec<u32> {
    if ndim == 2 {
        match kind {
            ElementKind::Triangle => vec![verts[0], verts[1], verts[2], verts[2]],
            _ => verts.to_vec(),
        }
    } else {
        match kind {
            ElementKind::Tetrahedron => vec![
                verts[0], verts[1], verts[2], verts[2], verts[3], verts[3], verts[3], verts[3],
            ],
            ElementKind::Pyramid => vec![
                verts[0], verts[1], verts[2], verts[3], verts[4], verts[4], verts[4], verts[4],
            ],
            ElementKind::Prism => vec![
                verts[0], verts[1], verts[2], verts[2], verts[3], verts[4], verts[5], verts[5],
            ],
            _ => verts.to_vec(),
        }
    }
}

/// Legacy-VTK unstructured grid with point data; VTK keeps the native mixed
/// element types.
pub fn write_vtk<P: AsRef<Path>>(
    path: P,
    mesh: &MeshData,
    geometry: &Geometry,
    field: &FlowField,
    gas: &GasModel,
) -> Result<(), Error> {
    let mut w = BufWriter::new(File::create(path)?);
    let n = geometry.cell_count();

    writeln!(w, "# vtk DataFile Version 3.0")?;
    writeln!(w, "flow solution")?;
    writeln!(w, "ASCII")?;
    writeln!(w, "DATASET UNSTRUCTURED_GRID")?;
    writeln!(w, "POINTS {} double", n)?;
    for c in 0..n {
        let x = geometry.cell_center(c);
        writeln!(w, "{:.10e} {:.10e} {:.10e}", x[0], x[1], x[2])?;
    }

    let total: usize = mesh
        .elements
        .iter()
        .map(|e| e.kind.num_vertices() + 1)
        .sum();
    writeln!(w, "CELLS {} {}", mesh.elements.len(), total)?;
    for element in &mesh.elements {
        write!(w, "{}", element.kind.num_vertices())?;
        for v in element.vertices() {
            write!(w, " {}", v)?;
        }
        writeln!(w)?;
    }
    writeln!(w, "CELL_TYPES {}", mesh.elements.len())?;
    for element in &mesh.elements {
        writeln!(w, "{}", element.kind.to_vtk())?;
    }

    writeln!(w, "POINT_DATA {}", n)?;
    writeln!(w, "SCALARS density double")?;
    writeln!(w, "LOOKUP_TABLE default")?;
    for c in 0..n {
        writeln!(w, "{:.10e}", field.primitive[c].density)?;
    }
    writeln!(w, "SCALARS pressure double")?;
    writeln!(w, "LOOKUP_TABLE default")?;
    for c in 0..n {
        writeln!(w, "{:.10e}", field.primitive[c].pressure)?;
    }
    writeln!(w, "SCALARS mach double")?;
    writeln!(w, "LOOKUP_TABLE default")?;
    for c in 0..n {
        writeln!(w, "{:.10e}", field.primitive[c].mach_number(gas))?;
    }
    writeln!(w, "SCALARS eddy_viscosity double")?;
    writeln!(w, "LOOKUP_TABLE default")?;
    for c in 0..n {
        writeln!(w, "{:.10e}", field.eddy_viscosity[c])?;
    }
    writeln!(w, "VECTORS velocity double")?;
    for c in 0..n {
        let u = field.primitive[c].velocity;
        writeln!(w, "{:.10e} {:.10e} {:.10e}", u[0], u[1], u[2])?;
    }
    Ok(())
}

/// Surface quantities along one marker as CSV: position, pressure
/// coefficient, pressure and temperature per boundary vertex.
pub fn write_surface_csv<P: AsRef<Path>>(
    path: P,
    geometry: &Geometry,
    field: &FlowField,
    marker: &str,
    reference_pressure: f64,
    dynamic_pressure: f64,
) -> Result<(), Error> {
    let marker = geometry
        .marker_index(marker)
        .ok_or_else(|| Error::InvalidInput(format!("unknown marker '{}'", marker)))?;
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "x,y,z,cp,pressure,temperature")?;
    for face in geometry.boundary_faces(marker) {
        let c = face.cell as usize;
        let v = &field.primitive[c];
        let cp = (v.pressure - reference_pressure) / dynamic_pressure;
        let x = geometry.cell_center(c);
        writeln!(
            w,
            "{:.10e},{:.10e},{:.10e},{:.10e},{:.10e},{:.10e}",
            x[0], x[1], x[2], cp, v.pressure, v.temperature
        )?;
    }
    Ok(())
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::gas::Primitive;
    use crate::mesh;

    #[test]
    fn writers_produce_well_formed_files() {
        let gas = GasModel::default();
        let grid = mesh::box_2d(3, 3, 1.0, 1.0);
        let geometry = Geometry::from_mesh(&grid, &[]).unwrap();
        let freestream = Primitive {
            density: 1.2,
            velocity: [30.0, 0.0, 0.0],
            pressure: 1.0e5,
            temperature: 1.0e5 / (1.2 * gas.gas_constant),
        };
        let field = FlowField::new(2, geometry.cell_count(), freestream, &gas);

        let dir = std::env::temp_dir().join("slipstream-output-test");
        std::fs::create_dir_all(&dir).unwrap();

        let tec = dir.join("flow.dat");
        write_tecplot(&tec, &grid, &geometry, &field, &gas).unwrap();
        let text = std::fs::read_to_string(&tec).unwrap();
        assert!(text.starts_with("TITLE"));
        assert!(text.contains("ET=QUADRILATERAL"));
        // header + zone + 16 points + 9 elements
        assert_eq!(text.lines().count(), 2 + 1 + 16 + 9);

        let vtk = dir.join("flow.vtk");
        write_vtk(&vtk, &grid, &geometry, &field, &gas).unwrap();
        let text = std::fs::read_to_string(&vtk).unwrap();
        assert!(text.contains("DATASET UNSTRUCTURED_GRID"));
        assert!(text.contains("POINTS 16 double"));
        assert!(text.contains("CELL_TYPES 9"));

        let csv = dir.join("surface.csv");
        write_surface_csv(&csv, &geometry, &field, "south", 1.0e5, 1000.0).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        // header plus one line per boundary vertex on the south edge
        assert_eq!(text.lines().count(), 1 + 4);
    }
}

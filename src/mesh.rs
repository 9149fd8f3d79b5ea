use crate::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/**
 * Primal element topologies, identified on disk by their VTK type ids.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    Line,
    Triangle,
    Quadrilateral,
    Tetrahedron,
    Hexahedron,
    Prism,
    Pyramid,
}

impl ElementKind {
    pub fn from_vtk(id: u32) -> Option<Self> {
        match id {
            3 => Some(ElementKind::Line),
            5 => Some(ElementKind::Triangle),
            9 => Some(ElementKind::Quadrilateral),
            10 => Some(ElementKind::Tetrahedron),
            12 => Some(ElementKind::Hexahedron),
            13 => Some(ElementKind::Prism),
            14 => Some(ElementKind::Pyramid),
            _ => None,
        }
    }

    pub fn to_vtk(self) -> u32 {
        match self {
            ElementKind::Line => 3,
            ElementKind::Triangle => 5,
            ElementKind::Quadrilateral => 9,
            ElementKind::Tetrahedron => 10,
            ElementKind::Hexahedron => 12,
            ElementKind::Prism => 13,
            ElementKind::Pyramid => 14,
        }
    }

    pub fn num_vertices(self) -> usize {
        match self {
            ElementKind::Line => 2,
            ElementKind::Triangle => 3,
            ElementKind::Quadrilateral => 4,
            ElementKind::Tetrahedron => 4,
            ElementKind::Hexahedron => 8,
            ElementKind::Prism => 6,
            ElementKind::Pyramid => 5,
        }
    }

    /// Local vertex pairs forming the element's edges, in the reference
    /// numbering of the VTK cell types.
    pub fn edges(self) -> &'static [[usize; 2]] {
        match self {
            ElementKind::Line => &[[0, 1]],
            ElementKind::Triangle => &[[0, 1], [1, 2], [2, 0]],
            ElementKind::Quadrilateral => &[[0, 1], [1, 2], [2, 3], [3, 0]],
            ElementKind::Tetrahedron => &[[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]],
            ElementKind::Hexahedron => &[
                [0, 1],
                [1, 2],
                [2, 3],
                [3, 0],
                [4, 5],
                [5, 6],
                [6, 7],
                [7, 4],
                [0, 4],
                [1, 5],
                [2, 6],
                [3, 7],
            ],
            ElementKind::Prism => &[
                [0, 1],
                [1, 2],
                [2, 0],
                [3, 4],
                [4, 5],
                [5, 3],
                [0, 3],
                [1, 4],
                [2, 5],
            ],
            ElementKind::Pyramid => &[
                [0, 1],
                [1, 2],
                [2, 3],
                [3, 0],
                [0, 4],
                [1, 4],
                [2, 4],
                [3, 4],
            ],
        }
    }

    /// Local vertex loops of the element's faces (3D elements only).
    pub fn faces(self) -> &'static [&'static [usize]] {
        match self {
            ElementKind::Tetrahedron => &[&[0, 2, 1], &[0, 1, 3], &[1, 2, 3], &[0, 3, 2]],
            ElementKind::Hexahedron => &[
                &[0, 3, 2, 1],
                &[4, 5, 6, 7],
                &[0, 1, 5, 4],
                &[1, 2, 6, 5],
                &[2, 3, 7, 6],
                &[3, 0, 4, 7],
            ],
            ElementKind::Prism => &[
                &[0, 2, 1],
                &[3, 4, 5],
                &[0, 1, 4, 3],
                &[1, 2, 5, 4],
                &[2, 0, 3, 5],
            ],
            ElementKind::Pyramid => &[
                &[0, 3, 2, 1],
                &[0, 1, 4],
                &[1, 2, 4],
                &[2, 3, 4],
                &[3, 0, 4],
            ],
            _ => &[],
        }
    }
}

/**
 * A primal element: topology tag plus an ordered vertex tuple.
 */
#[derive(Clone, Debug)]
pub struct Element {
    pub kind: ElementKind,
    verts: [u32; 8],
}

impl Element {
    pub fn new(kind: ElementKind, vertices: &[u32]) -> Self {
        let mut verts = [0; 8];
        verts[..vertices.len()].copy_from_slice(vertices);
        Self { kind, verts }
    }

    pub fn vertices(&self) -> &[u32] {
        &self.verts[..self.kind.num_vertices()]
    }
}

/**
 * A tagged group of boundary faces (line elements in 2D, triangles and
 * quadrilaterals in 3D).
 */
#[derive(Clone, Debug)]
pub struct BoundaryPatch {
    pub name: String,
    pub faces: Vec<Element>,
}

/**
 * Raw mesh as delivered by the loader: points, volume elements, marked
 * boundary patches. Geometric preprocessing happens in `geometry`.
 */
#[derive(Clone, Debug)]
pub struct MeshData {
    pub ndim: usize,
    pub points: Vec<[f64; 3]>,
    pub elements: Vec<Element>,
    pub patches: Vec<BoundaryPatch>,
}

// ============================================================================
impl MeshData {
    /// Read an SU2-format ASCII mesh (NDIME / NELEM / NPOIN / NMARK
    /// sections with VTK element type ids).
    pub fn from_su2_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.split('%').next().unwrap_or("").trim().to_string();
            if !trimmed.is_empty() {
                lines.push(trimmed);
            }
        }
        Self::from_su2_lines(&lines)
    }

    fn from_su2_lines(lines: &[String]) -> Result<Self, Error> {
        let invalid = |what: String| Error::InvalidInput(format!("su2 mesh: {}", what));
        let mut cursor = 0usize;
        let mut ndim = 0usize;
        let mut points = Vec::new();
        let mut elements = Vec::new();
        let mut patches = Vec::new();

        fn keyed(line: &str, key: &str) -> Option<String> {
            line.strip_prefix(key).map(|rest| rest.trim().to_string())
        }

        while cursor < lines.len() {
            let line = &lines[cursor];
            if let Some(value) = keyed(line, "NDIME=") {
                ndim = value
                    .parse()
                    .map_err(|_| invalid(format!("bad NDIME '{}'", value)))?;
                cursor += 1;
            } else if let Some(value) = keyed(line, "NELEM=") {
                let count: usize = value
                    .parse()
                    .map_err(|_| invalid(format!("bad NELEM '{}'", value)))?;
                cursor += 1;
                for _ in 0..count {
                    let line = lines
                        .get(cursor)
                        .ok_or_else(|| invalid("truncated element section".into()))?;
                    elements.push(parse_element(line)?);
                    cursor += 1;
                }
            } else if let Some(value) = keyed(line, "NPOIN=") {
                let count: usize = value
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .parse()
                    .map_err(|_| invalid(format!("bad NPOIN '{}'", value)))?;
                cursor += 1;
                for _ in 0..count {
                    let line = lines
                        .get(cursor)
                        .ok_or_else(|| invalid("truncated point section".into()))?;
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if fields.len() < ndim {
                        return Err(invalid(format!("bad point line '{}'", line)));
                    }
                    let mut x = [0.0; 3];
                    for (k, slot) in x.iter_mut().enumerate().take(ndim) {
                        *slot = fields[k]
                            .parse()
                            .map_err(|_| invalid(format!("bad coordinate '{}'", fields[k])))?;
                    }
                    points.push(x);
                    cursor += 1;
                }
            } else if let Some(value) = keyed(line, "NMARK=") {
                let count: usize = value
                    .parse()
                    .map_err(|_| invalid(format!("bad NMARK '{}'", value)))?;
                cursor += 1;
                for _ in 0..count {
                    let tag_line = lines
                        .get(cursor)
                        .ok_or_else(|| invalid("truncated marker section".into()))?;
                    let name = keyed(tag_line, "MARKER_TAG=")
                        .ok_or_else(|| invalid(format!("expected MARKER_TAG, got '{}'", tag_line)))?;
                    cursor += 1;
                    let elems_line = lines
                        .get(cursor)
                        .ok_or_else(|| invalid("truncated marker section".into()))?;
                    let n_faces: usize = keyed(elems_line, "MARKER_ELEMS=")
                        .ok_or_else(|| {
                            invalid(format!("expected MARKER_ELEMS, got '{}'", elems_line))
                        })?
                        .parse()
                        .map_err(|_| invalid("bad MARKER_ELEMS".into()))?;
                    cursor += 1;
                    let mut faces = Vec::with_capacity(n_faces);
                    for _ in 0..n_faces {
                        let line = lines
                            .get(cursor)
                            .ok_or_else(|| invalid("truncated marker faces".into()))?;
                        faces.push(parse_element(line)?);
                        cursor += 1;
                    }
                    patches.push(BoundaryPatch { name, faces });
                }
            } else {
                cursor += 1;
            }
        }

        let mesh = Self {
            ndim,
            points,
            elements,
            patches,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |what: String| Error::InvalidInput(format!("mesh: {}", what));
        if self.ndim != 2 && self.ndim != 3 {
            return Err(invalid(format!("dimension {} not supported", self.ndim)));
        }
        if self.points.is_empty() || self.elements.is_empty() {
            return Err(invalid("no points or no elements".into()));
        }
        let n = self.points.len() as u32;
        for element in &self.elements {
            if self.ndim == 2 && element.kind.num_vertices() != element.kind.edges().len() {
                return Err(invalid(format!("{:?} is not a 2d element", element.kind)));
            }
            if self.ndim == 3 && element.kind.faces().is_empty() {
                return Err(invalid(format!("{:?} is not a 3d element", element.kind)));
            }
            if element.vertices().iter().any(|&v| v >= n) {
                return Err(invalid("element references a nonexistent point".into()));
            }
        }
        for patch in &self.patches {
            for face in &patch.faces {
                if face.vertices().iter().any(|&v| v >= n) {
                    return Err(invalid(format!(
                        "marker '{}' references a nonexistent point",
                        patch.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_element(line: &str) -> Result<Element, Error> {
    let invalid = |what: String| Error::InvalidInput(format!("su2 mesh: {}", what));
    let fields: Vec<&str> = line.split_whitespace().collect();
    let vtk: u32 = fields
        .first()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| invalid(format!("bad element line '{}'", line)))?;
    let kind =
        ElementKind::from_vtk(vtk).ok_or_else(|| invalid(format!("unknown vtk type {}", vtk)))?;
    let nv = kind.num_vertices();
    if fields.len() < 1 + nv {
        return Err(invalid(format!("element line too short: '{}'", line)));
    }
    let mut vertices = Vec::with_capacity(nv);
    for field in &fields[1..1 + nv] {
        vertices.push(
            field
                .parse()
                .map_err(|_| invalid(format!("bad vertex index '{}'", field)))?,
        );
    }
    Ok(Element::new(kind, &vertices))
}

// ============================================================================
/// Structured quadrilateral box on [0, lx] x [0, ly] with markers "west",
/// "east", "south", "north". Used by tests and demo cases.
pub fn box_2d(nx: usize, ny: usize, lx: f64, ly: f64) -> MeshData {
    let vertex = |i: usize, j: usize| (j * (nx + 1) + i) as u32;
    let mut points = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            points.push([lx * i as f64 / nx as f64, ly * j as f64 / ny as f64, 0.0]);
        }
    }

    let mut elements = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            elements.push(Element::new(
                ElementKind::Quadrilateral,
                &[
                    vertex(i, j),
                    vertex(i + 1, j),
                    vertex(i + 1, j + 1),
                    vertex(i, j + 1),
                ],
            ));
        }
    }

    let side = |name: &str, faces: Vec<Element>| BoundaryPatch {
        name: name.to_string(),
        faces,
    };
    let patches = vec![
        side(
            "west",
            (0..ny)
                .map(|j| Element::new(ElementKind::Line, &[vertex(0, j + 1), vertex(0, j)]))
                .collect(),
        ),
        side(
            "east",
            (0..ny)
                .map(|j| Element::new(ElementKind::Line, &[vertex(nx, j), vertex(nx, j + 1)]))
                .collect(),
        ),
        side(
            "south",
            (0..nx)
                .map(|i| Element::new(ElementKind::Line, &[vertex(i, 0), vertex(i + 1, 0)]))
                .collect(),
        ),
        side(
            "north",
            (0..nx)
                .map(|i| Element::new(ElementKind::Line, &[vertex(i + 1, ny), vertex(i, ny)]))
                .collect(),
        ),
    ];

    MeshData {
        ndim: 2,
        points,
        elements,
        patches,
    }
}

/// Structured hexahedral box on [0, lx] x [0, ly] x [0, lz] with markers
/// "xmin", "xmax", "ymin", "ymax", "zmin", "zmax".
pub fn box_3d(nx: usize, ny: usize, nz: usize, lx: f64, ly: f64, lz: f64) -> MeshData {
    let vertex = |i: usize, j: usize, k: usize| (k * (ny + 1) * (nx + 1) + j * (nx + 1) + i) as u32;
    let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                points.push([
                    lx * i as f64 / nx as f64,
                    ly * j as f64 / ny as f64,
                    lz * k as f64 / nz as f64,
                ]);
            }
        }
    }

    let mut elements = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                elements.push(Element::new(
                    ElementKind::Hexahedron,
                    &[
                        vertex(i, j, k),
                        vertex(i + 1, j, k),
                        vertex(i + 1, j + 1, k),
                        vertex(i, j + 1, k),
                        vertex(i, j, k + 1),
                        vertex(i + 1, j, k + 1),
                        vertex(i + 1, j + 1, k + 1),
                        vertex(i, j + 1, k + 1),
                    ],
                ));
            }
        }
    }

    let quad = |a, b, c, d| Element::new(ElementKind::Quadrilateral, &[a, b, c, d]);
    let mut patches = Vec::new();
    let mut push = |name: &str, faces: Vec<Element>| {
        patches.push(BoundaryPatch {
            name: name.to_string(),
            faces,
        })
    };

    let mut xmin = Vec::new();
    let mut xmax = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            xmin.push(quad(
                vertex(0, j, k),
                vertex(0, j, k + 1),
                vertex(0, j + 1, k + 1),
                vertex(0, j + 1, k),
            ));
            xmax.push(quad(
                vertex(nx, j, k),
                vertex(nx, j + 1, k),
                vertex(nx, j + 1, k + 1),
                vertex(nx, j, k + 1),
            ));
        }
    }
    push("xmin", xmin);
    push("xmax", xmax);

    let mut ymin = Vec::new();
    let mut ymax = Vec::new();
    for k in 0..nz {
        for i in 0..nx {
            ymin.push(quad(
                vertex(i, 0, k),
                vertex(i + 1, 0, k),
                vertex(i + 1, 0, k + 1),
                vertex(i, 0, k + 1),
            ));
            ymax.push(quad(
                vertex(i, ny, k),
                vertex(i, ny, k + 1),
                vertex(i + 1, ny, k + 1),
                vertex(i + 1, ny, k),
            ));
        }
    }
    push("ymin", ymin);
    push("ymax", ymax);

    let mut zmin = Vec::new();
    let mut zmax = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            zmin.push(quad(
                vertex(i, j, 0),
                vertex(i, j + 1, 0),
                vertex(i + 1, j + 1, 0),
                vertex(i + 1, j, 0),
            ));
            zmax.push(quad(
                vertex(i, j, nz),
                vertex(i + 1, j, nz),
                vertex(i + 1, j + 1, nz),
                vertex(i, j + 1, nz),
            ));
        }
    }
    push("zmin", zmin);
    push("zmax", zmax);

    MeshData {
        ndim: 3,
        points,
        elements,
        patches,
    }
}

/// Smoothly distort the interior points of a box mesh while keeping the
/// boundary fixed. Deterministic, and gentle enough to preserve positive
/// dual volumes at the given amplitude.
pub fn distort(mesh: &mut MeshData, amplitude: f64) {
    use std::f64::consts::PI;

    let (lo, hi) = bounding_box(&mesh.points);
    let span = [hi[0] - lo[0], hi[1] - lo[1], (hi[2] - lo[2]).max(1.0)];
    let on_boundary = |x: &[f64; 3], ndim: usize| {
        (0..ndim).any(|k| {
            (x[k] - lo[k]).abs() < 1e-12 * span[k] || (x[k] - hi[k]).abs() < 1e-12 * span[k]
        })
    };

    let ndim = mesh.ndim;
    for x in mesh.points.iter_mut() {
        if on_boundary(x, ndim) {
            continue;
        }
        let s = [
            (x[0] - lo[0]) / span[0],
            (x[1] - lo[1]) / span[1],
            (x[2] - lo[2]) / span[2],
        ];
        let wobble = [
            (2.0 * PI * s[1]).sin() * (PI * s[0]).sin() * (2.0 * PI * s[2]).cos(),
            (2.0 * PI * s[0]).sin() * (PI * s[1]).sin(),
            (2.0 * PI * (s[0] + s[1])).sin() * (PI * s[2]).sin(),
        ];
        for k in 0..ndim {
            x[k] += amplitude * span[k] * wobble[k];
        }
    }
}

fn bounding_box(points: &[[f64; 3]]) -> ([f64; 3], [f64; 3]) {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for x in points {
        for k in 0..3 {
            lo[k] = lo[k].min(x[k]);
            hi[k] = hi[k].max(x[k]);
        }
    }
    (lo, hi)
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn box_meshes_are_valid() {
        box_2d(4, 3, 1.0, 1.0).validate().unwrap();
        box_3d(3, 3, 2, 1.0, 1.0, 0.5).validate().unwrap();
    }

    #[test]
    fn su2_round_trip_of_a_small_mesh() {
        let lines: Vec<String> = vec![
            "NDIME= 2",
            "NPOIN= 4",
            "0.0 0.0 0",
            "1.0 0.0 1",
            "1.0 1.0 2",
            "0.0 1.0 3",
            "NELEM= 2",
            "5 0 1 2 0",
            "5 0 2 3 1",
            "NMARK= 1",
            "MARKER_TAG= boundary",
            "MARKER_ELEMS= 4",
            "3 0 1",
            "3 1 2",
            "3 2 3",
            "3 3 0",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mesh = MeshData::from_su2_lines(&lines).unwrap();
        assert_eq!(mesh.ndim, 2);
        assert_eq!(mesh.points.len(), 4);
        assert_eq!(mesh.elements.len(), 2);
        assert_eq!(mesh.patches[0].faces.len(), 4);
    }

    #[test]
    fn bad_vertex_reference_is_rejected() {
        let mut mesh = box_2d(2, 2, 1.0, 1.0);
        mesh.elements[0] = Element::new(ElementKind::Triangle, &[0, 1, 99]);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn distortion_keeps_the_boundary() {
        let mut mesh = box_2d(8, 8, 1.0, 1.0);
        let before = mesh.points.clone();
        distort(&mut mesh, 0.05);
        assert!(mesh.points[0] == before[0]);
        let moved = mesh
            .points
            .iter()
            .zip(&before)
            .any(|(a, b)| (a[0] - b[0]).abs() > 1e-6 || (a[1] - b[1]).abs() > 1e-6);
        assert!(moved);
    }
}

use crate::error::Error;
use crate::mesh::{ElementKind, MeshData};
use rayon::prelude::*;
use std::collections::HashMap;

/**
 * One dual boundary face: the piece of domain boundary owned by a boundary
 * vertex under one marker, with its area-scaled outward normal.
 */
#[derive(Clone, Copy, Debug)]
pub struct BoundaryFace {
    pub cell: u32,
    pub normal: [f64; 3],
    pub midpoint: [f64; 3],
}

/**
 * Vertex-centered dual mesh with all geometric scalars the solver reads:
 * dual volumes, edge normals and midpoints, per-marker boundary faces, wall
 * distances, and the cell-edge adjacency. Immutable after construction;
 * every accessor is O(1).
 *
 * Normals are area-scaled and oriented from the lower-indexed cell of an
 * edge to the higher-indexed one. Construction verifies that every dual
 * volume is positive, that no face normal vanishes, and that the faces of
 * each dual cell close up (the discrete freestream-preservation condition).
 */
pub struct Geometry {
    ndim: usize,
    cell_centers: Vec<[f64; 3]>,
    volumes: Vec<f64>,
    wall_distances: Vec<f64>,
    edge_cells: Vec<[u32; 2]>,
    edge_normals: Vec<[f64; 3]>,
    edge_midpoints: Vec<[f64; 3]>,
    cell_edge_offsets: Vec<u32>,
    cell_edge_ids: Vec<u32>,
    cell_bface_offsets: Vec<u32>,
    cell_bface_ids: Vec<u32>,
    marker_names: Vec<String>,
    marker_offsets: Vec<usize>,
    boundary_faces: Vec<BoundaryFace>,
    total_volume: f64,
}

// ============================================================================
// Small fixed-size vector helpers used throughout the metric construction.

pub fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn norm(a: &[f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

fn axpy(y: &mut [f64; 3], a: f64, x: &[f64; 3]) {
    y[0] += a * x[0];
    y[1] += a * x[1];
    y[2] += a * x[2];
}

fn centroid(points: &[[f64; 3]], vertices: &[u32]) -> [f64; 3] {
    let mut c = [0.0; 3];
    for &v in vertices {
        axpy(&mut c, 1.0, &points[v as usize]);
    }
    let w = 1.0 / vertices.len() as f64;
    [c[0] * w, c[1] * w, c[2] * w]
}

fn midpoint(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        0.5 * (a[0] + b[0]),
        0.5 * (a[1] + b[1]),
        0.5 * (a[2] + b[2]),
    ]
}

// ============================================================================
impl Geometry {
    /// Build the dual mesh. `wall_markers` names the markers that count as
    /// solid walls for the distance field; every name must exist in the
    /// mesh.
    pub fn from_mesh(mesh: &MeshData, wall_markers: &[&str]) -> Result<Self, Error> {
        mesh.validate()?;
        let ndim = mesh.ndim;
        let n_cells = mesh.points.len();

        for name in wall_markers {
            if !mesh.patches.iter().any(|p| p.name == *name) {
                return Err(Error::InvalidInput(format!(
                    "wall marker '{}' does not exist in the mesh",
                    name
                )));
            }
        }

        // Pass 1: accumulate dual-face contributions per primal-element
        // edge, keyed on the (low, high) vertex pair.
        let mut edge_index: HashMap<(u32, u32), usize> = HashMap::new();
        let mut edge_cells: Vec<[u32; 2]> = Vec::new();
        let mut edge_normals: Vec<[f64; 3]> = Vec::new();
        let mut edge_mid_sums: Vec<[f64; 3]> = Vec::new();
        let mut edge_weights: Vec<f64> = Vec::new();
        let mut volumes = vec![0.0; n_cells];

        let mut add_face = |i: u32,
                            j: u32,
                            mut normal: [f64; 3],
                            face_centroid: [f64; 3],
                            edge_cells: &mut Vec<[u32; 2]>,
                            edge_normals: &mut Vec<[f64; 3]>,
                            edge_mid_sums: &mut Vec<[f64; 3]>,
                            edge_weights: &mut Vec<f64>,
                            volumes: &mut [f64]| {
            let (lo, hi) = if i < j { (i, j) } else { (j, i) };
            let along = sub(
                &mesh.points[hi as usize],
                &mesh.points[lo as usize],
            );
            if dot(&normal, &along) < 0.0 {
                normal = [-normal[0], -normal[1], -normal[2]];
            }
            let id = *edge_index.entry((lo, hi)).or_insert_with(|| {
                edge_cells.push([lo, hi]);
                edge_normals.push([0.0; 3]);
                edge_mid_sums.push([0.0; 3]);
                edge_weights.push(0.0);
                edge_cells.len() - 1
            });
            let area = norm(&normal);
            axpy(&mut edge_normals[id], 1.0, &normal);
            axpy(&mut edge_mid_sums[id], area, &face_centroid);
            edge_weights[id] += area;

            // divergence-theorem volume: V = (1/d) sum x_f . n_f
            let dv = dot(&face_centroid, &normal) / ndim as f64;
            volumes[lo as usize] += dv;
            volumes[hi as usize] -= dv;
        };

        for element in &mesh.elements {
            let verts = element.vertices();
            let ce = centroid(&mesh.points, verts);

            for pair in element.kind.edges() {
                let (a, b) = (verts[pair[0]], verts[pair[1]]);
                let m = midpoint(&mesh.points[a as usize], &mesh.points[b as usize]);

                if ndim == 2 {
                    // segment from the edge midpoint to the element centroid
                    let t = sub(&ce, &m);
                    let normal = [t[1], -t[0], 0.0];
                    let c = midpoint(&m, &ce);
                    add_face(
                        a,
                        b,
                        normal,
                        c,
                        &mut edge_cells,
                        &mut edge_normals,
                        &mut edge_mid_sums,
                        &mut edge_weights,
                        &mut volumes,
                    );
                } else {
                    // quadrilateral through the edge midpoint, the centroids
                    // of the two faces sharing the edge, and the element
                    // centroid
                    let mut face_centroids = [[0.0; 3]; 2];
                    let mut found = 0;
                    for face in element.kind.faces() {
                        let touches_both = face.contains(&pair[0]) && face.contains(&pair[1]);
                        if touches_both && found < 2 {
                            let fv: Vec<u32> = face.iter().map(|&l| verts[l]).collect();
                            face_centroids[found] = centroid(&mesh.points, &fv);
                            found += 1;
                        }
                    }
                    debug_assert_eq!(found, 2);
                    let [cf1, cf2] = face_centroids;
                    let d1 = sub(&ce, &m);
                    let d2 = sub(&cf2, &cf1);
                    let n = cross(&d1, &d2);
                    let normal = [0.5 * n[0], 0.5 * n[1], 0.5 * n[2]];
                    let c = [
                        0.25 * (m[0] + cf1[0] + ce[0] + cf2[0]),
                        0.25 * (m[1] + cf1[1] + ce[1] + cf2[1]),
                        0.25 * (m[2] + cf1[2] + ce[2] + cf2[2]),
                    ];
                    add_face(
                        a,
                        b,
                        normal,
                        c,
                        &mut edge_cells,
                        &mut edge_normals,
                        &mut edge_mid_sums,
                        &mut edge_weights,
                        &mut volumes,
                    );
                }
            }
        }

        let edge_midpoints: Vec<[f64; 3]> = edge_mid_sums
            .iter()
            .zip(&edge_weights)
            .map(|(s, &w)| [s[0] / w, s[1] / w, s[2] / w])
            .collect();

        // Pass 2: boundary dual faces, one per (marker, boundary vertex),
        // aggregated from the vertex-adjacent pieces of each marker face.
        // The loader contract orders boundary faces with outward normals.
        let mut marker_names = Vec::with_capacity(mesh.patches.len());
        let mut boundary_map: Vec<HashMap<u32, ([f64; 3], [f64; 3], f64)>> =
            vec![HashMap::new(); mesh.patches.len()];

        for (patch_id, patch) in mesh.patches.iter().enumerate() {
            marker_names.push(patch.name.clone());
            for face in &patch.faces {
                let fv = face.vertices();
                if ndim == 2 {
                    if face.kind != ElementKind::Line {
                        return Err(Error::InvalidInput(format!(
                            "marker '{}': boundary faces must be lines in 2d",
                            patch.name
                        )));
                    }
                    let (a, b) = (fv[0], fv[1]);
                    let xa = mesh.points[a as usize];
                    let xb = mesh.points[b as usize];
                    let t = sub(&xb, &xa);
                    let n_half = [0.5 * t[1], -0.5 * t[0], 0.0];
                    for (v, other) in [(a, xb), (b, xa)] {
                        let xv = mesh.points[v as usize];
                        let m = midpoint(&xv, &other);
                        let c = midpoint(&xv, &m);
                        let entry = boundary_map[patch_id]
                            .entry(v)
                            .or_insert(([0.0; 3], [0.0; 3], 0.0));
                        let area = norm(&n_half);
                        axpy(&mut entry.0, 1.0, &n_half);
                        axpy(&mut entry.1, area, &c);
                        entry.2 += area;
                        volumes[v as usize] += dot(&c, &n_half) / ndim as f64;
                    }
                } else {
                    if face.kind.num_vertices() != face.kind.edges().len() {
                        return Err(Error::InvalidInput(format!(
                            "marker '{}': boundary faces must be triangles or quadrilaterals in 3d",
                            patch.name
                        )));
                    }
                    let cf = centroid(&mesh.points, fv);
                    let k = fv.len();
                    for l in 0..k {
                        let v = fv[l];
                        let xv = mesh.points[v as usize];
                        let m_next = midpoint(&xv, &mesh.points[fv[(l + 1) % k] as usize]);
                        let m_prev = midpoint(&xv, &mesh.points[fv[(l + k - 1) % k] as usize]);
                        let d1 = sub(&cf, &xv);
                        let d2 = sub(&m_prev, &m_next);
                        let n = cross(&d1, &d2);
                        let n_sub = [0.5 * n[0], 0.5 * n[1], 0.5 * n[2]];
                        let c = [
                            0.25 * (xv[0] + m_next[0] + cf[0] + m_prev[0]),
                            0.25 * (xv[1] + m_next[1] + cf[1] + m_prev[1]),
                            0.25 * (xv[2] + m_next[2] + cf[2] + m_prev[2]),
                        ];
                        let entry = boundary_map[patch_id]
                            .entry(v)
                            .or_insert(([0.0; 3], [0.0; 3], 0.0));
                        let area = norm(&n_sub);
                        axpy(&mut entry.0, 1.0, &n_sub);
                        axpy(&mut entry.1, area, &c);
                        entry.2 += area;
                        volumes[v as usize] += dot(&c, &n_sub) / ndim as f64;
                    }
                }
            }
        }

        let mut marker_offsets = vec![0usize];
        let mut boundary_faces = Vec::new();
        for map in &boundary_map {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by_key(|(&v, _)| v);
            for (&v, &(normal, mid_sum, weight)) in entries {
                boundary_faces.push(BoundaryFace {
                    cell: v,
                    normal,
                    midpoint: [
                        mid_sum[0] / weight,
                        mid_sum[1] / weight,
                        mid_sum[2] / weight,
                    ],
                });
            }
            marker_offsets.push(boundary_faces.len());
        }

        // Cell-edge adjacency as a CSR table.
        let mut cell_edge_offsets = vec![0u32; n_cells + 1];
        for cells in &edge_cells {
            cell_edge_offsets[cells[0] as usize + 1] += 1;
            cell_edge_offsets[cells[1] as usize + 1] += 1;
        }
        for c in 0..n_cells {
            cell_edge_offsets[c + 1] += cell_edge_offsets[c];
        }
        let mut fill = cell_edge_offsets.clone();
        let mut cell_edge_ids = vec![0u32; 2 * edge_cells.len()];
        for (e, cells) in edge_cells.iter().enumerate() {
            for &c in cells {
                cell_edge_ids[fill[c as usize] as usize] = e as u32;
                fill[c as usize] += 1;
            }
        }

        // Boundary-face adjacency as a CSR table.
        let mut cell_bface_offsets = vec![0u32; n_cells + 1];
        for face in &boundary_faces {
            cell_bface_offsets[face.cell as usize + 1] += 1;
        }
        for c in 0..n_cells {
            cell_bface_offsets[c + 1] += cell_bface_offsets[c];
        }
        let mut fill = cell_bface_offsets.clone();
        let mut cell_bface_ids = vec![0u32; boundary_faces.len()];
        for (f, face) in boundary_faces.iter().enumerate() {
            cell_bface_ids[fill[face.cell as usize] as usize] = f as u32;
            fill[face.cell as usize] += 1;
        }

        // Validation: volumes, normals, and per-cell metric closure.
        let mut total_volume = 0.0;
        for (c, &v) in volumes.iter().enumerate() {
            if !(v > 0.0) || !v.is_finite() {
                return Err(Error::DegenerateGeometry(format!(
                    "dual volume of cell {} is {:.6e}",
                    c, v
                )));
            }
            total_volume += v;
        }
        for (e, n) in edge_normals.iter().enumerate() {
            if norm(n) <= 0.0 {
                return Err(Error::DegenerateGeometry(format!(
                    "zero dual-face normal on edge {}",
                    e
                )));
            }
        }

        let mut closure = vec![[0.0f64; 3]; n_cells];
        let mut scale = vec![0.0f64; n_cells];
        for (e, cells) in edge_cells.iter().enumerate() {
            let n = edge_normals[e];
            axpy(&mut closure[cells[0] as usize], 1.0, &n);
            axpy(&mut closure[cells[1] as usize], -1.0, &n);
            let a = norm(&n);
            scale[cells[0] as usize] += a;
            scale[cells[1] as usize] += a;
        }
        for face in &boundary_faces {
            axpy(&mut closure[face.cell as usize], 1.0, &face.normal);
            scale[face.cell as usize] += norm(&face.normal);
        }
        for c in 0..n_cells {
            if norm(&closure[c]) > 1e-10 * scale[c].max(1e-300) {
                return Err(Error::DegenerateGeometry(format!(
                    "dual faces of cell {} do not close up (defect {:.3e})",
                    c,
                    norm(&closure[c])
                )));
            }
        }

        let mut geometry = Self {
            ndim,
            cell_centers: mesh.points.clone(),
            volumes,
            wall_distances: vec![1.0e30; n_cells],
            edge_cells,
            edge_normals,
            edge_midpoints,
            cell_edge_offsets,
            cell_edge_ids,
            cell_bface_offsets,
            cell_bface_ids,
            marker_names,
            marker_offsets,
            boundary_faces,
            total_volume,
        };
        geometry.compute_wall_distances(mesh, wall_markers);
        Ok(geometry)
    }

    fn compute_wall_distances(&mut self, mesh: &MeshData, wall_markers: &[&str]) {
        // collect wall faces as triangles (2d: segments)
        let mut segments: Vec<[[f64; 3]; 2]> = Vec::new();
        let mut triangles: Vec<[[f64; 3]; 3]> = Vec::new();
        for patch in &mesh.patches {
            if !wall_markers.contains(&patch.name.as_str()) {
                continue;
            }
            for face in &patch.faces {
                let fv = face.vertices();
                if self.ndim == 2 {
                    segments.push([mesh.points[fv[0] as usize], mesh.points[fv[1] as usize]]);
                } else {
                    // fan triangulation
                    for l in 1..fv.len() - 1 {
                        triangles.push([
                            mesh.points[fv[0] as usize],
                            mesh.points[fv[l] as usize],
                            mesh.points[fv[l + 1] as usize],
                        ]);
                    }
                }
            }
        }
        if segments.is_empty() && triangles.is_empty() {
            return;
        }

        let ndim = self.ndim;
        let centers = &self.cell_centers;
        self.wall_distances = centers
            .par_iter()
            .map(|x| {
                let mut d = f64::INFINITY;
                if ndim == 2 {
                    for s in &segments {
                        d = d.min(point_segment_distance(x, &s[0], &s[1]));
                    }
                } else {
                    for t in &triangles {
                        d = d.min(point_triangle_distance(x, &t[0], &t[1], &t[2]));
                    }
                }
                d
            })
            .collect();
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn cell_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_cells.len()
    }

    pub fn boundary_face_count(&self) -> usize {
        self.boundary_faces.len()
    }

    pub fn volume(&self, cell: usize) -> f64 {
        self.volumes[cell]
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    pub fn wall_distance(&self, cell: usize) -> f64 {
        self.wall_distances[cell]
    }

    pub fn cell_center(&self, cell: usize) -> [f64; 3] {
        self.cell_centers[cell]
    }

    /// The two cells of an edge; the normal points from `cells[0]` (low
    /// index) toward `cells[1]`.
    pub fn edge_cells(&self, edge: usize) -> [u32; 2] {
        self.edge_cells[edge]
    }

    pub fn normal(&self, edge: usize) -> [f64; 3] {
        self.edge_normals[edge]
    }

    pub fn edge_midpoint(&self, edge: usize) -> [f64; 3] {
        self.edge_midpoints[edge]
    }

    /// Edges incident to a cell, each with the sign of the cell's outward
    /// orientation on that edge (+1 when the stored normal leaves the cell).
    pub fn edges_of_cell(&self, cell: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let lo = self.cell_edge_offsets[cell] as usize;
        let hi = self.cell_edge_offsets[cell + 1] as usize;
        self.cell_edge_ids[lo..hi].iter().map(move |&e| {
            let e = e as usize;
            let sign = if self.edge_cells[e][0] as usize == cell {
                1.0
            } else {
                -1.0
            };
            (e, sign)
        })
    }

    /// Boundary faces owned by a cell (indices into `all_boundary_faces`).
    pub fn boundary_faces_of_cell(&self, cell: usize) -> impl Iterator<Item = usize> + '_ {
        let lo = self.cell_bface_offsets[cell] as usize;
        let hi = self.cell_bface_offsets[cell + 1] as usize;
        self.cell_bface_ids[lo..hi].iter().map(|&f| f as usize)
    }

    /// The cell on the other side of an edge.
    pub fn neighbor(&self, edge: usize, cell: usize) -> usize {
        let [i, j] = self.edge_cells[edge];
        if i as usize == cell {
            j as usize
        } else {
            i as usize
        }
    }

    pub fn marker_names(&self) -> &[String] {
        &self.marker_names
    }

    pub fn marker_index(&self, name: &str) -> Option<usize> {
        self.marker_names.iter().position(|n| n == name)
    }

    pub fn boundary_faces(&self, marker: usize) -> &[BoundaryFace] {
        &self.boundary_faces[self.marker_offsets[marker]..self.marker_offsets[marker + 1]]
    }

    pub fn all_boundary_faces(&self) -> &[BoundaryFace] {
        &self.boundary_faces
    }

    /// Marker owning a flattened boundary-face index.
    pub fn marker_of_boundary_face(&self, face: usize) -> usize {
        self.marker_offsets.partition_point(|&offset| offset <= face) - 1
    }
}

// ============================================================================
fn point_segment_distance(x: &[f64; 3], a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let ab = sub(b, a);
    let ax = sub(x, a);
    let t = (dot(&ax, &ab) / dot(&ab, &ab)).clamp(0.0, 1.0);
    let closest = [a[0] + t * ab[0], a[1] + t * ab[1], a[2] + t * ab[2]];
    norm(&sub(x, &closest))
}

/// Distance from a point to a triangle (closest-point classification over
/// the vertex, edge and interior regions).
fn point_triangle_distance(p: &[f64; 3], a: &[f64; 3], b: &[f64; 3], c: &[f64; 3]) -> f64 {
    let ab = sub(b, a);
    let ac = sub(c, a);
    let ap = sub(p, a);

    let d1 = dot(&ab, &ap);
    let d2 = dot(&ac, &ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return norm(&ap);
    }

    let bp = sub(p, b);
    let d3 = dot(&ab, &bp);
    let d4 = dot(&ac, &bp);
    if d3 >= 0.0 && d4 <= d3 {
        return norm(&bp);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        let q = [a[0] + t * ab[0], a[1] + t * ab[1], a[2] + t * ab[2]];
        return norm(&sub(p, &q));
    }

    let cp = sub(p, c);
    let d5 = dot(&ab, &cp);
    let d6 = dot(&ac, &cp);
    if d6 >= 0.0 && d5 <= d6 {
        return norm(&cp);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        let q = [a[0] + t * ac[0], a[1] + t * ac[1], a[2] + t * ac[2]];
        return norm(&sub(p, &q));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let bc = sub(c, b);
        let q = [b[0] + t * bc[0], b[1] + t * bc[1], b[2] + t * bc[2]];
        return norm(&sub(p, &q));
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    let q = [
        a[0] + v * ab[0] + w * ac[0],
        a[1] + v * ab[1] + w * ac[1],
        a[2] + v * ab[2] + w * ac[2],
    ];
    norm(&sub(p, &q))
}

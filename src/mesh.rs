//! Simplex mesh descriptor for finite-element discretizations.
//!
//! Meshes are triangles in 2-D and tetrahedra in 3-D with piecewise linear
//! (P1) elements, so the shape-function gradients are constant per element
//! and precomputed at construction. The mesh is immutable per registration
//! level and read-only to the assemblers.

use crate::cofactor::{cofactor2, cofactor3};
use crate::Real;
use nalgebra::{DVector, Matrix2, Matrix3, Vector2, Vector3};
use numeric_literals::replace_float_literals;

/// A conforming simplex mesh with precomputed per-element P1 data.
#[derive(Debug, Clone)]
pub struct SimplexMesh<T> {
    dim: usize,
    /// Node coordinates, node-major: `vertices[node * dim + axis]`.
    vertices: Vec<T>,
    /// Flat connectivity, `dim + 1` node indices per element.
    connectivity: Vec<usize>,
    /// Absolute element volumes (areas in 2-D).
    volumes: Vec<T>,
    /// Constant shape-function gradients, per element `(dim + 1) * dim`
    /// entries laid out `[node][axis]`.
    shape_gradients: Vec<T>,
}

impl<T> SimplexMesh<T>
where
    T: Real,
{
    /// Build a mesh from raw node coordinates and connectivity.
    ///
    /// Shape-function gradients are obtained from the cofactor expansion of
    /// the edge matrix, so a degenerate (zero-volume) element yields
    /// non-finite gradients rather than an error — consistent with the
    /// unguarded degeneracy policy of the energy assembler.
    ///
    /// # Panics
    ///
    /// Panics if the dimension is not 2 or 3, if the vertex array length is
    /// not a multiple of the dimension, or if the connectivity refers to
    /// nonexistent nodes or is not a multiple of `dim + 1`.
    pub fn from_raw(dim: usize, vertices: Vec<T>, connectivity: Vec<usize>) -> Self {
        assert!(
            dim == 2 || dim == 3,
            "Simplex meshes are only supported in 2 or 3 dimensions (got {})",
            dim
        );
        assert_eq!(vertices.len() % dim, 0, "Vertex array length must be a multiple of dim");
        assert_eq!(
            connectivity.len() % (dim + 1),
            0,
            "Connectivity length must be a multiple of dim + 1"
        );
        let num_nodes = vertices.len() / dim;
        assert!(
            connectivity.iter().all(|&v| v < num_nodes),
            "Connectivity refers to a nonexistent node"
        );

        let mut mesh = Self {
            dim,
            vertices,
            connectivity,
            volumes: Vec::new(),
            shape_gradients: Vec::new(),
        };
        mesh.precompute_element_data();
        mesh
    }

    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn precompute_element_data(&mut self) {
        let d = self.dim;
        let num_elements = self.num_elements();
        self.volumes = Vec::with_capacity(num_elements);
        self.shape_gradients = Vec::with_capacity(num_elements * (d + 1) * d);

        let coord = |node: usize, axis: usize| self.vertices[node * d + axis];
        for e in 0..num_elements {
            let nodes = &self.connectivity[e * (d + 1)..(e + 1) * (d + 1)];
            // Edge matrix E = [x_1 - x_0, ..., x_d - x_0]; the P1 gradients
            // are the columns of E^{-T} = cof(E) / det(E), and the gradient
            // of the first shape function is minus their sum.
            if d == 2 {
                let e1 = Vector2::new(
                    coord(nodes[1], 0) - coord(nodes[0], 0),
                    coord(nodes[1], 1) - coord(nodes[0], 1),
                );
                let e2 = Vector2::new(
                    coord(nodes[2], 0) - coord(nodes[0], 0),
                    coord(nodes[2], 1) - coord(nodes[0], 1),
                );
                let edges = Matrix2::from_columns(&[e1, e2]);
                let det = edges.determinant();
                self.volumes.push(det.abs() / 2.0);
                let inv_t = cofactor2(&edges) / det;
                let g1 = inv_t.column(0).clone_owned();
                let g2 = inv_t.column(1).clone_owned();
                let g0 = -(g1 + g2);
                for g in [g0, g1, g2] {
                    self.shape_gradients.push(g[0]);
                    self.shape_gradients.push(g[1]);
                }
            } else {
                let edge = |a: usize| {
                    Vector3::new(
                        coord(nodes[a], 0) - coord(nodes[0], 0),
                        coord(nodes[a], 1) - coord(nodes[0], 1),
                        coord(nodes[a], 2) - coord(nodes[0], 2),
                    )
                };
                let edges = Matrix3::from_columns(&[edge(1), edge(2), edge(3)]);
                let det = edges.determinant();
                self.volumes.push(det.abs() / 6.0);
                let inv_t = cofactor3(&edges) / det;
                let g1 = inv_t.column(0).clone_owned();
                let g2 = inv_t.column(1).clone_owned();
                let g3 = inv_t.column(2).clone_owned();
                let g0 = -(g1 + g2 + g3);
                for g in [g0, g1, g2, g3] {
                    self.shape_gradients.push(g[0]);
                    self.shape_gradients.push(g[1]);
                    self.shape_gradients.push(g[2]);
                }
            }
        }
    }

    /// Uniform triangulation of a rectangle: `cells` grid cells per axis,
    /// two triangles per cell.
    pub fn triangulated_rectangle(domain: &[(T, T)], cells: &[usize]) -> Self {
        assert_eq!(domain.len(), 2);
        assert_eq!(cells.len(), 2);
        let (m0, m1) = (cells[0], cells[1]);
        let node = |i: usize, j: usize| i + j * (m0 + 1);

        let mut vertices = Vec::with_capacity((m0 + 1) * (m1 + 1) * 2);
        for j in 0..=m1 {
            for i in 0..=m0 {
                vertices.push(axis_coordinate(domain[0], m0, i));
                vertices.push(axis_coordinate(domain[1], m1, j));
            }
        }
        let mut connectivity = Vec::with_capacity(m0 * m1 * 6);
        for j in 0..m1 {
            for i in 0..m0 {
                let (v00, v10, v01, v11) = (node(i, j), node(i + 1, j), node(i, j + 1), node(i + 1, j + 1));
                connectivity.extend_from_slice(&[v00, v10, v11]);
                connectivity.extend_from_slice(&[v00, v11, v01]);
            }
        }
        Self::from_raw(2, vertices, connectivity)
    }

    /// Uniform tetrahedralization of a box: `cells` grid cells per axis, six
    /// tetrahedra per cell (Kuhn split along the main diagonal).
    pub fn tetrahedralized_box(domain: &[(T, T)], cells: &[usize]) -> Self {
        assert_eq!(domain.len(), 3);
        assert_eq!(cells.len(), 3);
        let (m0, m1, m2) = (cells[0], cells[1], cells[2]);
        let node = |i: usize, j: usize, k: usize| i + (m0 + 1) * (j + (m1 + 1) * k);

        let mut vertices = Vec::with_capacity((m0 + 1) * (m1 + 1) * (m2 + 1) * 3);
        for k in 0..=m2 {
            for j in 0..=m1 {
                for i in 0..=m0 {
                    vertices.push(axis_coordinate(domain[0], m0, i));
                    vertices.push(axis_coordinate(domain[1], m1, j));
                    vertices.push(axis_coordinate(domain[2], m2, k));
                }
            }
        }
        // Each tetrahedron walks from the cell's low corner to the high
        // corner along one of the six axis orderings.
        const ORDERINGS: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut connectivity = Vec::with_capacity(m0 * m1 * m2 * 24);
        for k in 0..m2 {
            for j in 0..m1 {
                for i in 0..m0 {
                    for ordering in &ORDERINGS {
                        let mut corner = [i, j, k];
                        let mut tet = [node(corner[0], corner[1], corner[2]), 0, 0, 0];
                        for (step, &axis) in ordering.iter().enumerate() {
                            corner[axis] += 1;
                            tet[step + 1] = node(corner[0], corner[1], corner[2]);
                        }
                        connectivity.extend_from_slice(&tet);
                    }
                }
            }
        }
        Self::from_raw(3, vertices, connectivity)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_nodes(&self) -> usize {
        self.vertices.len() / self.dim
    }

    pub fn num_elements(&self) -> usize {
        self.connectivity.len() / (self.dim + 1)
    }

    /// Total number of displacement degrees of freedom, `num_nodes * dim`.
    pub fn num_dofs(&self) -> usize {
        self.num_nodes() * self.dim
    }

    pub fn node_coordinates(&self) -> &[T] {
        &self.vertices
    }

    pub fn connectivity(&self) -> &[usize] {
        &self.connectivity
    }

    pub fn element_nodes(&self, element: usize) -> &[usize] {
        let n = self.dim + 1;
        &self.connectivity[element * n..(element + 1) * n]
    }

    pub fn element_volume(&self, element: usize) -> T {
        self.volumes[element]
    }

    /// The `(dim + 1) * dim` constant shape-function gradients of an
    /// element, laid out `[node][axis]`.
    pub fn shape_gradients(&self, element: usize) -> &[T] {
        let n = (self.dim + 1) * self.dim;
        &self.shape_gradients[element * n..(element + 1) * n]
    }

    /// The reference configuration `yRef`: node coordinates flattened in the
    /// component-block layout used for displacement vectors
    /// (`y[c * num_nodes + node]`).
    pub fn reference_configuration(&self) -> DVector<T> {
        let n = self.num_nodes();
        let d = self.dim;
        DVector::from_fn(n * d, |row, _| {
            let (c, node) = (row / n, row % n);
            self.vertices[node * d + c]
        })
    }
}

fn axis_coordinate<T: Real>(bounds: (T, T), cells: usize, index: usize) -> T {
    let h = (bounds.1 - bounds.0) / T::from_f64(cells as f64).expect("cell count must fit in T");
    bounds.0 + h * T::from_f64(index as f64).expect("index must fit in T")
}

//! Matrix-free differential operators.
//!
//! The discretized operator $B$ is represented by a *stream* of stencil
//! entries rather than a stored matrix: implementors enumerate the nonzero
//! coefficients row by row, and the trait derives the forward action $By$,
//! the adjoint action $B^T z$, the diagonal of the normal operator $B^T V B$
//! and — for the matrix-based mode and for verification — an assembled
//! [`CsrMatrix`]. This keeps the memory cost of applying $B$ at $O(n)$ while
//! guaranteeing that the matrix-free and assembled paths agree entry for
//! entry, since both are generated from the same stream.

use crate::grid::{strides, visit_indices, StaggeredGrid};
use crate::mesh::SimplexMesh;
use crate::params::ElasticParameters;
use crate::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// A linear operator usable through its action on vectors, with an adjoint.
///
/// The algebraic adjoint identity $\langle By, z \rangle = \langle y, B^T z
/// \rangle$ holds exactly (to rounding) for every implementor, because both
/// actions are derived from the same entry stream.
pub trait DifferentialOperator<T: Real> {
    /// Length of vectors in the domain of $B$.
    fn domain_dim(&self) -> usize;

    /// Length of vectors in the co-domain of $B$.
    fn range_dim(&self) -> usize;

    /// Stream every nonzero coefficient `(row, column, value)` of $B$.
    fn for_each_entry(&self, f: impl FnMut(usize, usize, T))
    where
        Self: Sized;

    /// Per-row quadrature weights of the co-domain (cell or element
    /// volumes), written into `weights`.
    ///
    /// # Panics
    ///
    /// Panics if `weights.len() != self.range_dim()`.
    fn range_weights_into(&self, weights: DVectorViewMut<T>);

    /// `out = B y`.
    ///
    /// # Panics
    ///
    /// Panics on dimension mismatch of either argument.
    fn apply_into(&self, mut out: DVectorViewMut<T>, y: DVectorView<T>)
    where
        Self: Sized,
    {
        assert_eq!(y.len(), self.domain_dim(), "Input vector length inconsistent with operator domain");
        assert_eq!(out.len(), self.range_dim(), "Output vector length inconsistent with operator range");
        out.fill(T::zero());
        self.for_each_entry(|row, col, value| {
            out[row] += value * y[col];
        });
    }

    /// `out = B^T z`.
    ///
    /// # Panics
    ///
    /// Panics on dimension mismatch of either argument.
    fn apply_adjoint_into(&self, mut out: DVectorViewMut<T>, z: DVectorView<T>)
    where
        Self: Sized,
    {
        assert_eq!(z.len(), self.range_dim(), "Input vector length inconsistent with operator range");
        assert_eq!(out.len(), self.domain_dim(), "Output vector length inconsistent with operator domain");
        out.fill(T::zero());
        self.for_each_entry(|row, col, value| {
            out[col] += value * z[row];
        });
    }

    /// Convenience wrapper for [`apply_into`](Self::apply_into) that
    /// allocates the result.
    fn apply(&self, y: DVectorView<T>) -> DVector<T>
    where
        Self: Sized,
    {
        let mut out = DVector::zeros(self.range_dim());
        self.apply_into((&mut out).into(), y);
        out
    }

    /// Convenience wrapper for [`apply_adjoint_into`](Self::apply_adjoint_into).
    fn apply_adjoint(&self, z: DVectorView<T>) -> DVector<T>
    where
        Self: Sized,
    {
        let mut out = DVector::zeros(self.domain_dim());
        self.apply_adjoint_into((&mut out).into(), z);
        out
    }

    /// Assemble the explicit sparse matrix of $B$.
    ///
    /// Only used by the matrix-based evaluation mode and by verification
    /// harnesses; the matrix-free paths never call this.
    fn assemble(&self) -> CsrMatrix<T>
    where
        Self: Sized,
    {
        let mut coo = CooMatrix::new(self.range_dim(), self.domain_dim());
        self.for_each_entry(|row, col, value| coo.push(row, col, value));
        CsrMatrix::from(&coo)
    }

    /// Write the diagonal of the normal operator $B^T V B$ into `diag`,
    /// where $V$ are the range weights. Used as the smoother preconditioner
    /// in the multigrid solver.
    ///
    /// # Panics
    ///
    /// Panics if `diag.len() != self.domain_dim()`.
    fn normal_diagonal_into(&self, mut diag: DVectorViewMut<T>)
    where
        Self: Sized,
    {
        assert_eq!(diag.len(), self.domain_dim(), "Diagonal length inconsistent with operator domain");
        let mut weights = DVector::zeros(self.range_dim());
        self.range_weights_into((&mut weights).into());
        diag.fill(T::zero());
        self.for_each_entry(|row, col, value| {
            diag[col] += weights[row] * value * value;
        });
    }
}

/// The discretized linear elasticity operator on a staggered grid.
///
/// Stacks, for every displacement component $c$ and axis $j$, the forward
/// difference $\partial_j u_c$ scaled by $\sqrt{\mu}$, followed by a
/// divergence block $\nabla \cdot u$ at cell centers scaled by
/// $\sqrt{\mu + \lambda}$, so that
/// $u^T B^T V B u = \int \mu \|\nabla u\|^2 + (\mu + \lambda)(\nabla \cdot u)^2$
/// up to quadrature. Derivative blocks with no interior positions along an
/// axis are empty and contribute no rows.
#[derive(Debug, Clone)]
pub struct ElasticOperator<T> {
    grid: StaggeredGrid<T>,
    grad_scale: T,
    div_scale: T,
}

impl<T> ElasticOperator<T>
where
    T: Real,
{
    pub fn new(grid: &StaggeredGrid<T>, params: &ElasticParameters<T>) -> Self {
        Self {
            grid: grid.clone(),
            grad_scale: params.mu.sqrt(),
            div_scale: (params.mu + params.lambda).sqrt(),
        }
    }

    pub fn grid(&self) -> &StaggeredGrid<T> {
        &self.grid
    }

    /// Shape of the derivative block $\partial_j u_c$: the component lattice
    /// shrunk by one along axis `j`.
    fn block_shape(&self, c: usize, j: usize) -> Vec<usize> {
        let mut shape = self.grid.component_shape(c);
        shape[j] -= 1;
        shape
    }

    fn block_len(&self, c: usize, j: usize) -> usize {
        self.block_shape(c, j).iter().product()
    }
}

impl<T> DifferentialOperator<T> for ElasticOperator<T>
where
    T: Real,
{
    fn domain_dim(&self) -> usize {
        self.grid.num_dofs()
    }

    fn range_dim(&self) -> usize {
        let d = self.grid.dim();
        let gradient_rows: usize = (0..d)
            .flat_map(|c| (0..d).map(move |j| (c, j)))
            .map(|(c, j)| self.block_len(c, j))
            .sum();
        gradient_rows + self.grid.num_cells()
    }

    fn for_each_entry(&self, mut f: impl FnMut(usize, usize, T)) {
        let d = self.grid.dim();
        let h = self.grid.spacing().to_vec();
        let mut row_offset = 0;

        // Gradient blocks: forward difference of component c along axis j,
        // evaluated at the positions between adjacent lattice points.
        for c in 0..d {
            let component_offset = self.grid.component_offset(c);
            let component_strides = strides(&self.grid.component_shape(c));
            for j in 0..d {
                let scale = self.grad_scale / h[j];
                let out_shape = self.block_shape(c, j);
                visit_indices(&out_shape, |index, linear| {
                    let low: usize = index.iter().zip(&component_strides).map(|(i, s)| i * s).sum();
                    let row = row_offset + linear;
                    f(row, component_offset + low, -scale);
                    f(row, component_offset + low + component_strides[j], scale);
                });
                row_offset += self.block_len(c, j);
            }
        }

        // Divergence block at cell centers: each cell differences the two
        // faces of every component.
        let cell_shape = self.grid.cells().to_vec();
        visit_indices(&cell_shape, |index, linear| {
            let row = row_offset + linear;
            for c in 0..d {
                let component_offset = self.grid.component_offset(c);
                let component_strides = strides(&self.grid.component_shape(c));
                let low: usize = index.iter().zip(&component_strides).map(|(i, s)| i * s).sum();
                let scale = self.div_scale / h[c];
                f(row, component_offset + low, -scale);
                f(row, component_offset + low + component_strides[c], scale);
            }
        });
    }

    fn range_weights_into(&self, mut weights: DVectorViewMut<T>) {
        assert_eq!(weights.len(), self.range_dim(), "Weight vector length inconsistent with operator range");
        weights.fill(self.grid.cell_volume());
    }
}

/// The deformation-gradient operator on a simplex mesh.
///
/// Maps a component-block displacement (or deformation) vector to the
/// per-element deformation-gradient samples: row `e * d^2 + c * d + j`
/// carries $F_{cj} = \partial_j y_c$ on element `e`, obtained by contracting
/// the element's constant shape-function gradients. The range weights repeat
/// the element volume over the $d^2$ rows of each element.
#[derive(Debug, Clone)]
pub struct GradientOperator<'a, T> {
    mesh: &'a SimplexMesh<T>,
}

impl<'a, T> GradientOperator<'a, T>
where
    T: Real,
{
    pub fn new(mesh: &'a SimplexMesh<T>) -> Self {
        Self { mesh }
    }

    pub fn mesh(&self) -> &'a SimplexMesh<T> {
        self.mesh
    }
}

impl<'a, T> DifferentialOperator<T> for GradientOperator<'a, T>
where
    T: Real,
{
    fn domain_dim(&self) -> usize {
        self.mesh.num_dofs()
    }

    fn range_dim(&self) -> usize {
        let d = self.mesh.dim();
        self.mesh.num_elements() * d * d
    }

    fn for_each_entry(&self, mut f: impl FnMut(usize, usize, T)) {
        let d = self.mesh.dim();
        let num_nodes = self.mesh.num_nodes();
        for e in 0..self.mesh.num_elements() {
            let nodes = self.mesh.element_nodes(e);
            let grads = self.mesh.shape_gradients(e);
            for c in 0..d {
                for j in 0..d {
                    let row = e * d * d + c * d + j;
                    for (a, &node) in nodes.iter().enumerate() {
                        f(row, c * num_nodes + node, grads[a * d + j]);
                    }
                }
            }
        }
    }

    fn range_weights_into(&self, mut weights: DVectorViewMut<T>) {
        assert_eq!(weights.len(), self.range_dim(), "Weight vector length inconsistent with operator range");
        let d = self.mesh.dim();
        for e in 0..self.mesh.num_elements() {
            let volume = self.mesh.element_volume(e);
            for r in 0..d * d {
                weights[e * d * d + r] = volume;
            }
        }
    }
}

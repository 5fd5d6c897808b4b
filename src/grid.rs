//! Staggered-grid descriptor.
//!
//! A staggered grid stores component $c$ of a vector field on the faces
//! normal to axis $c$, so each component lives on its own lattice of shape
//! $m + e_c$. Displacement vectors are laid out in component blocks: all
//! entries of component 0 first (axis 0 fastest), then component 1, and so
//! on. The descriptor is immutable for the duration of one registration
//! level; coarser levels are derived through [`StaggeredGrid::coarsen`].

use crate::Real;

/// Descriptor of a uniform staggered grid over a rectangular domain.
#[derive(Debug, Clone, PartialEq)]
pub struct StaggeredGrid<T> {
    domain: Vec<(T, T)>,
    cells: Vec<usize>,
    spacing: Vec<T>,
}

impl<T> StaggeredGrid<T>
where
    T: Real,
{
    /// Create a grid over the given per-axis domain bounds with `cells[i]`
    /// cells along axis `i`.
    ///
    /// # Panics
    ///
    /// Panics if the dimension is not 2 or 3, if any axis has zero cells or
    /// if any axis has non-positive extent.
    pub fn new(domain: &[(T, T)], cells: &[usize]) -> Self {
        let dim = cells.len();
        assert!(
            dim == 2 || dim == 3,
            "Staggered grids are only supported in 2 or 3 dimensions (got {})",
            dim
        );
        assert_eq!(domain.len(), dim, "Domain bounds must match grid dimension");
        assert!(cells.iter().all(|&m| m > 0), "Every axis must have at least one cell");
        let spacing = domain
            .iter()
            .zip(cells)
            .map(|(&(a, b), &m)| {
                let extent = b - a;
                assert!(extent > T::zero(), "Domain extent must be positive");
                extent / T::from_f64(m as f64).expect("cell count must fit in T")
            })
            .collect();
        Self {
            domain: domain.to_vec(),
            cells: cells.to_vec(),
            spacing,
        }
    }

    /// Grid over the unit cube $[0, 1]^d$.
    pub fn unit(cells: &[usize]) -> Self {
        let domain: Vec<_> = cells.iter().map(|_| (T::zero(), T::one())).collect();
        Self::new(&domain, cells)
    }

    pub fn dim(&self) -> usize {
        self.cells.len()
    }

    pub fn domain(&self) -> &[(T, T)] {
        &self.domain
    }

    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    pub fn spacing(&self) -> &[T] {
        &self.spacing
    }

    pub fn num_cells(&self) -> usize {
        self.cells.iter().product()
    }

    /// Volume of a single cell, $\prod_i h_i$.
    pub fn cell_volume(&self) -> T {
        self.spacing.iter().fold(T::one(), |acc, &h| acc * h)
    }

    /// Lattice shape of component `c`: the cell counts with axis `c`
    /// incremented by one.
    pub fn component_shape(&self, c: usize) -> Vec<usize> {
        assert!(c < self.dim());
        let mut shape = self.cells.clone();
        shape[c] += 1;
        shape
    }

    pub fn component_len(&self, c: usize) -> usize {
        self.component_shape(c).iter().product()
    }

    /// Offset of component `c` in the component-block dof layout.
    pub fn component_offset(&self, c: usize) -> usize {
        (0..c).map(|b| self.component_len(b)).sum()
    }

    /// Total number of degrees of freedom of a staggered vector field.
    pub fn num_dofs(&self) -> usize {
        (0..self.dim()).map(|c| self.component_len(c)).sum()
    }

    /// The grid with every cell count halved, or `None` if any axis has an
    /// odd cell count. The domain bounds are preserved.
    pub fn coarsen(&self) -> Option<Self> {
        if self.cells.iter().any(|&m| m % 2 != 0) {
            return None;
        }
        let coarse_cells: Vec<_> = self.cells.iter().map(|&m| m / 2).collect();
        Some(Self::new(&self.domain, &coarse_cells))
    }
}

/// Strides of a flat array with the given shape, axis 0 fastest.
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut acc = 1;
    for &n in shape {
        strides.push(acc);
        acc *= n;
    }
    strides
}

pub(crate) fn shape_len(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Visit every multi-index of `shape` together with its linear index
/// (axis 0 fastest).
pub(crate) fn visit_indices(shape: &[usize], mut f: impl FnMut(&[usize], usize)) {
    let n = shape_len(shape);
    if n == 0 {
        return;
    }
    let mut index = vec![0usize; shape.len()];
    for linear in 0..n {
        f(&index, linear);
        for axis in 0..shape.len() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

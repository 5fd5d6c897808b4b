//! Geometric multigrid V-cycle for the staggered elastic system.
//!
//! Solves $(M + \alpha B^T V B) u = f$ on a staggered grid, where $M$ is the
//! lumped mass $\mathrm{vol} \cdot I$ and $B$ the elastic operator. Every
//! level accesses its system strictly through operator actions (the
//! [`HessianOperator`] capability); only the coarsest level assembles, so
//! that the base solve can pre-factor a dense Cholesky decomposition.
//!
//! Levels are stored coarsest first. Transfers act per staggered component
//! as tensor products over the axes: linear interpolation along the
//! component's staggered axis, constant injection along the cell axes, and
//! restriction $R = 2^{-d} P^T$. The smoother is damped Jacobi with a
//! synchronous update.

use crate::energy::elastic::assemble_scaled_normal;
use crate::energy::HessianOperator;
use crate::grid::{strides, visit_indices, StaggeredGrid};
use crate::operator::{DifferentialOperator, ElasticOperator};
use crate::params::ElasticParameters;
use crate::Real;
use log::debug;
use nalgebra::{Cholesky, DVector, DVectorView, DVectorViewMut, Dyn};
use nalgebra_sparse::convert::serial::convert_csr_dense;
use nalgebra_sparse::CsrMatrix;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Cycling parameters of the V-cycle solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultigridConfig<T> {
    /// Jacobi sweeps before restriction.
    pub pre_smooth: usize,
    /// Jacobi sweeps after prolongation.
    pub post_smooth: usize,
    /// Jacobi damping factor.
    pub damping: T,
    /// Number of levels including the finest. `None` picks
    /// $\lfloor \log_2 \min_i m_i \rfloor + 1$.
    pub num_levels: Option<usize>,
}

impl<T> Default for MultigridConfig<T>
where
    T: Real,
{
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn default() -> Self {
        Self {
            pre_smooth: 2,
            post_smooth: 2,
            damping: 2.0 / 3.0,
            num_levels: None,
        }
    }
}

/// Failure to set up a multigrid hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    /// The requested level count was zero.
    NoLevels,
    /// Some axis cell count is not divisible by `2^(levels - 1)`.
    IndivisibleCells { cells: Vec<usize>, levels: usize },
    /// The assembled coarsest operator was not positive definite.
    CoarseFactorization,
}

impl fmt::Display for HierarchyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLevels => write!(f, "A multigrid hierarchy requires at least one level"),
            Self::IndivisibleCells { cells, levels } => write!(
                f,
                "Cell counts {:?} cannot be coarsened {} times (every axis must be divisible by 2^(levels - 1))",
                cells,
                levels - 1
            ),
            Self::CoarseFactorization => {
                write!(f, "Cholesky factorization of the coarsest operator failed")
            }
        }
    }
}

impl Error for HierarchyError {}

/// Result of a multigrid solve. Hitting the cycle limit is reported through
/// `converged`, never as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct MultigridOutput<T: Real> {
    pub solution: DVector<T>,
    /// V-cycles actually run.
    pub cycles: usize,
    /// Final residual norm $\|f - A u\|$.
    pub residual: T,
    pub converged: bool,
}

/// The level operator $M + \alpha B^T V B$, applied matrix-free.
#[derive(Debug, Clone)]
pub struct ElasticSystemOperator<T: Real> {
    operator: ElasticOperator<T>,
    alpha: T,
    mass: T,
}

impl<T> ElasticSystemOperator<T>
where
    T: Real,
{
    pub fn new(grid: &StaggeredGrid<T>, params: &ElasticParameters<T>) -> Self {
        Self {
            operator: ElasticOperator::new(grid, params),
            alpha: params.alpha,
            mass: grid.cell_volume(),
        }
    }

    /// Assemble the explicit sparse system matrix. Only the coarsest level
    /// and verification harnesses use this.
    pub fn assemble(&self) -> CsrMatrix<T> {
        let normal = assemble_scaled_normal(&self.operator, self.alpha);
        let mass = CsrMatrix::identity(self.operator.domain_dim()) * self.mass;
        &mass + &normal
    }
}

impl<T> HessianOperator<T> for ElasticSystemOperator<T>
where
    T: Real,
{
    fn dim(&self) -> usize {
        self.operator.domain_dim()
    }

    fn apply_into(&self, mut out: DVectorViewMut<T>, v: DVectorView<T>) {
        assert_eq!(v.len(), self.dim(), "Input vector length inconsistent with system dimension");
        assert_eq!(out.len(), self.dim(), "Output vector length inconsistent with system dimension");
        let mut range = self.operator.apply(v);
        let mut weights = DVector::zeros(self.operator.range_dim());
        self.operator.range_weights_into((&mut weights).into());
        range.zip_apply(&weights, |r, w| *r *= self.alpha * w);
        let regularized = self.operator.apply_adjoint((&range).into());
        out.copy_from(&regularized);
        out.axpy(self.mass, &v, T::one());
    }

    fn diagonal_into(&self, mut diag: DVectorViewMut<T>) {
        assert_eq!(diag.len(), self.dim(), "Diagonal length inconsistent with system dimension");
        let mut values = DVector::zeros(self.dim());
        self.operator.normal_diagonal_into((&mut values).into());
        values *= self.alpha;
        values.add_scalar_mut(self.mass);
        diag.copy_from(&values);
    }
}

#[derive(Debug)]
struct Level<T: Real> {
    grid: StaggeredGrid<T>,
    system: ElasticSystemOperator<T>,
    inverse_diagonal: DVector<T>,
}

/// A geometric multigrid hierarchy for the staggered elastic system.
#[derive(Debug)]
pub struct ElasticHierarchy<T: Real> {
    // Coarsest first.
    levels: Vec<Level<T>>,
    config: MultigridConfig<T>,
    coarse_solver: Cholesky<T, Dyn>,
}

impl<T> ElasticHierarchy<T>
where
    T: Real,
{
    /// Build the hierarchy by repeated coarsening of `grid`.
    ///
    /// Fails if the requested level count is zero or if any axis cell count
    /// is not divisible by `2^(levels - 1)`; no silent level-count clamping
    /// takes place.
    pub fn new(
        grid: &StaggeredGrid<T>,
        params: &ElasticParameters<T>,
        config: MultigridConfig<T>,
    ) -> Result<Self, HierarchyError> {
        let num_levels = config
            .num_levels
            .unwrap_or_else(|| default_num_levels(grid.cells()));
        if num_levels == 0 {
            return Err(HierarchyError::NoLevels);
        }

        let mut grids = vec![grid.clone()];
        for _ in 1..num_levels {
            let coarser = grids
                .last()
                .and_then(StaggeredGrid::coarsen)
                .ok_or_else(|| HierarchyError::IndivisibleCells {
                    cells: grid.cells().to_vec(),
                    levels: num_levels,
                })?;
            grids.push(coarser);
        }
        grids.reverse();

        let levels: Vec<_> = grids
            .into_iter()
            .map(|grid| {
                let system = ElasticSystemOperator::new(&grid, params);
                let inverse_diagonal = system.diagonal().map(|d| T::one() / d);
                Level {
                    grid,
                    system,
                    inverse_diagonal,
                }
            })
            .collect();

        let coarse_dense = convert_csr_dense(&levels[0].system.assemble());
        let coarse_solver =
            Cholesky::new(coarse_dense).ok_or(HierarchyError::CoarseFactorization)?;

        debug!(
            "Built multigrid hierarchy: {} levels, finest {:?} cells, coarsest {:?} cells",
            levels.len(),
            levels[levels.len() - 1].grid.cells(),
            levels[0].grid.cells()
        );

        Ok(Self {
            levels,
            config,
            coarse_solver,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// The finest grid of the hierarchy.
    pub fn grid(&self) -> &StaggeredGrid<T> {
        &self.levels[self.levels.len() - 1].grid
    }

    pub fn num_dofs(&self) -> usize {
        self.grid().num_dofs()
    }

    /// The finest-level system operator.
    pub fn system(&self) -> &ElasticSystemOperator<T> {
        &self.levels[self.levels.len() - 1].system
    }

    /// Run V-cycles from the zero initial guess until
    /// $\|f - A u\| \le$ `tolerance` or `max_cycles` is reached.
    ///
    /// # Panics
    ///
    /// Panics if `rhs.len()` is inconsistent with the finest grid.
    pub fn solve(&self, rhs: DVectorView<T>, tolerance: T, max_cycles: usize) -> MultigridOutput<T> {
        let guess = DVector::zeros(self.num_dofs());
        self.solve_with_guess((&guess).into(), rhs, tolerance, max_cycles)
    }

    /// As [`solve`](Self::solve), starting from the given iterate.
    pub fn solve_with_guess(
        &self,
        guess: DVectorView<T>,
        rhs: DVectorView<T>,
        tolerance: T,
        max_cycles: usize,
    ) -> MultigridOutput<T> {
        let ndof = self.num_dofs();
        assert_eq!(rhs.len(), ndof, "Right-hand side length inconsistent with finest grid");
        assert_eq!(guess.len(), ndof, "Initial guess length inconsistent with finest grid");

        let finest = self.levels.len() - 1;
        let f = rhs.clone_owned();
        let mut u = guess.clone_owned();

        let mut residual = self.residual_norm(finest, &u, &f);
        if residual <= tolerance {
            return MultigridOutput {
                solution: u,
                cycles: 0,
                residual,
                converged: true,
            };
        }

        for cycle in 1..=max_cycles {
            self.v_cycle(finest, &mut u, &f);
            residual = self.residual_norm(finest, &u, &f);
            debug!("V-cycle {}: residual norm {:?}", cycle, residual);
            if residual <= tolerance {
                return MultigridOutput {
                    solution: u,
                    cycles: cycle,
                    residual,
                    converged: true,
                };
            }
        }

        MultigridOutput {
            solution: u,
            cycles: max_cycles,
            residual,
            converged: false,
        }
    }

    fn residual_norm(&self, level: usize, u: &DVector<T>, f: &DVector<T>) -> T {
        let mut residual = f.clone();
        residual -= self.levels[level].system.apply(u.into());
        residual.norm()
    }

    fn v_cycle(&self, level: usize, u: &mut DVector<T>, f: &DVector<T>) {
        if level == 0 {
            u.copy_from(&self.coarse_solver.solve(f));
            return;
        }

        self.smooth(level, u, f, self.config.pre_smooth);

        let mut residual = f.clone();
        residual -= self.levels[level].system.apply((&*u).into());
        let coarse_rhs = self.restrict(level, &residual);

        let mut correction = DVector::zeros(self.levels[level - 1].grid.num_dofs());
        self.v_cycle(level - 1, &mut correction, &coarse_rhs);

        self.prolong_into(level, &correction, u);
        self.smooth(level, u, f, self.config.post_smooth);
    }

    /// Damped Jacobi with a synchronous update: the residual is formed from
    /// the complete iterate before any entry is written.
    fn smooth(&self, level: usize, u: &mut DVector<T>, f: &DVector<T>, sweeps: usize) {
        let data = &self.levels[level];
        for _ in 0..sweeps {
            let mut update = f.clone();
            update -= data.system.apply((&*u).into());
            update.component_mul_assign(&data.inverse_diagonal);
            u.axpy(self.config.damping, &update, T::one());
        }
    }

    /// Restriction $R = 2^{-d} P^T$ from `level` to `level - 1`.
    fn restrict(&self, level: usize, fine: &DVector<T>) -> DVector<T> {
        let fine_grid = &self.levels[level].grid;
        let coarse_grid = &self.levels[level - 1].grid;
        let d = fine_grid.dim();
        let half = T::from_f64(0.5).expect("literal must fit in T");
        let scale = half.powi(d as i32);

        let mut coarse = DVector::zeros(coarse_grid.num_dofs());
        for c in 0..d {
            let fine_offset = fine_grid.component_offset(c);
            let coarse_offset = coarse_grid.component_offset(c);
            for_each_prolongation_entry(
                &fine_grid.component_shape(c),
                &coarse_grid.component_shape(c),
                c,
                |fine_linear, coarse_linear, weight: T| {
                    coarse[coarse_offset + coarse_linear] +=
                        scale * weight * fine[fine_offset + fine_linear];
                },
            );
        }
        coarse
    }

    /// Prolongation from `level - 1`, added onto the fine iterate.
    fn prolong_into(&self, level: usize, coarse: &DVector<T>, fine: &mut DVector<T>) {
        let fine_grid = &self.levels[level].grid;
        let coarse_grid = &self.levels[level - 1].grid;
        let d = fine_grid.dim();

        for c in 0..d {
            let fine_offset = fine_grid.component_offset(c);
            let coarse_offset = coarse_grid.component_offset(c);
            for_each_prolongation_entry(
                &fine_grid.component_shape(c),
                &coarse_grid.component_shape(c),
                c,
                |fine_linear, coarse_linear, weight: T| {
                    fine[fine_offset + fine_linear] +=
                        weight * coarse[coarse_offset + coarse_linear];
                },
            );
        }
    }
}

/// Number of levels a hierarchy gets by default:
/// $\lfloor \log_2 \min_i m_i \rfloor + 1$.
fn default_num_levels(cells: &[usize]) -> usize {
    let min = cells.iter().copied().min().unwrap_or(1);
    (usize::BITS - min.leading_zeros()) as usize
}

/// Stream the prolongation stencil of one staggered component as
/// `(fine_linear, coarse_linear, weight)` triples: linear interpolation
/// along `staggered_axis` (fine even points coincide with coarse points,
/// odd points average their two coarse neighbors), constant injection along
/// the other axes.
fn for_each_prolongation_entry<T: Real>(
    fine_shape: &[usize],
    coarse_shape: &[usize],
    staggered_axis: usize,
    mut f: impl FnMut(usize, usize, T),
) {
    let coarse_strides = strides(coarse_shape);
    let half = T::from_f64(0.5).expect("literal must fit in T");
    visit_indices(fine_shape, |index, fine_linear| {
        let mut base = 0usize;
        for (axis, (&i, stride)) in index.iter().zip(&coarse_strides).enumerate() {
            if axis != staggered_axis {
                base += (i / 2) * stride;
            }
        }
        let i = index[staggered_axis];
        let stride = coarse_strides[staggered_axis];
        if i % 2 == 0 {
            f(fine_linear, base + (i / 2) * stride, T::one());
        } else {
            let k = i / 2;
            f(fine_linear, base + k * stride, half);
            f(fine_linear, base + (k + 1) * stride, half);
        }
    });
}

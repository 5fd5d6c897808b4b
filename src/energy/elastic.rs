//! Linear elastic (length) regularization energy on a staggered grid.
//!
//! The energy is the quadratic form
//! $S(u) = \tfrac{\alpha}{2}\, u^T B^T V B u$ with $B$ the staggered
//! elasticity operator and $V$ the cell-volume weights. The energy and the
//! gradient $\alpha B^T (V \odot B u)$ are always evaluated through operator
//! actions; the assembled normal operator $\alpha B^T V B$ exists only in
//! matrix-based mode and is cached, keyed on the parameter set and the
//! problem size, since it is constant as long as neither changes.

use crate::energy::{EnergyOutput, EnergyRequest, HessianAccess, HessianMode, HessianOperator};
use crate::grid::StaggeredGrid;
use crate::operator::{DifferentialOperator, ElasticOperator};
use crate::params::ElasticParameters;
use crate::Real;
use log::trace;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use parking_lot::Mutex;

/// Assemble $\alpha B^T V B$ for any differential operator.
pub(crate) fn assemble_scaled_normal<T, Op>(operator: &Op, alpha: T) -> CsrMatrix<T>
where
    T: Real,
    Op: DifferentialOperator<T>,
{
    let mut weighted = operator.assemble();
    let mut weights = DVector::zeros(operator.range_dim());
    operator.range_weights_into((&mut weights).into());

    let offsets = weighted.row_offsets().to_vec();
    let values = weighted.values_mut();
    for (row, weight) in weights.iter().enumerate() {
        let scale = alpha * *weight;
        for value in &mut values[offsets[row]..offsets[row + 1]] {
            *value *= scale;
        }
    }

    let transposed = operator.assemble().transpose();
    &transposed * &weighted
}

/// Matrix-free Hessian of a quadratic form $\alpha B^T V B$: applies the
/// operator, the weights and the adjoint in sequence without ever forming
/// the normal matrix.
pub struct QuadraticHessian<T, Op> {
    operator: Op,
    alpha: T,
}

impl<T, Op> QuadraticHessian<T, Op>
where
    T: Real,
    Op: DifferentialOperator<T>,
{
    pub fn new(operator: Op, alpha: T) -> Self {
        Self { operator, alpha }
    }
}

impl<T, Op> HessianOperator<T> for QuadraticHessian<T, Op>
where
    T: Real,
    Op: DifferentialOperator<T>,
{
    fn dim(&self) -> usize {
        self.operator.domain_dim()
    }

    fn apply_into(&self, out: DVectorViewMut<T>, v: DVectorView<T>) {
        let mut range = self.operator.apply(v);
        let mut weights = DVector::zeros(self.operator.range_dim());
        self.operator.range_weights_into((&mut weights).into());
        range.zip_apply(&weights, |r, w| *r *= self.alpha * w);
        self.operator.apply_adjoint_into(out, (&range).into());
    }

    fn diagonal_into(&self, mut diag: DVectorViewMut<T>) {
        self.operator.normal_diagonal_into((&mut diag).into());
        diag *= self.alpha;
    }
}

#[derive(Debug)]
struct CachedNormal<T> {
    params: ElasticParameters<T>,
    ndof: usize,
    matrix: CsrMatrix<T>,
}

/// Assembler for the linear elastic regularization energy.
///
/// Holds the cache of the assembled normal operator; everything else is
/// derived per call from the grid and parameters passed in.
#[derive(Debug, Default)]
pub struct ElasticEnergy<T: Real> {
    cache: Mutex<Option<CachedNormal<T>>>,
}

impl<T> ElasticEnergy<T>
where
    T: Real,
{
    pub fn new() -> Self {
        Self { cache: Mutex::new(None) }
    }

    /// Evaluate energy, and optionally gradient and Hessian access, of the
    /// elastic regularizer for the displacement `u`.
    ///
    /// # Panics
    ///
    /// Panics if `u.len()` is inconsistent with the grid's dof count.
    pub fn evaluate(
        &self,
        grid: &StaggeredGrid<T>,
        u: DVectorView<T>,
        params: &ElasticParameters<T>,
        request: &EnergyRequest,
    ) -> EnergyOutput<'static, T> {
        let operator = ElasticOperator::new(grid, params);
        assert_eq!(
            u.len(),
            operator.domain_dim(),
            "Displacement length inconsistent with grid (expected {})",
            operator.domain_dim()
        );

        let range = operator.apply(u);
        let mut weights = DVector::zeros(operator.range_dim());
        operator.range_weights_into((&mut weights).into());

        let half = T::from_f64(0.5).expect("literal must fit in T");
        let mut weighted = range.clone();
        weighted.zip_apply(&weights, |r, w| *r *= w);
        let energy = half * params.alpha * range.dot(&weighted);

        let gradient = request.gradient.then(|| {
            let mut gradient = operator.apply_adjoint((&weighted).into());
            gradient *= params.alpha;
            gradient
        });

        let hessian = request.hessian.map(|mode| match mode {
            HessianMode::Assembled => {
                HessianAccess::Assembled(self.cached_normal(&operator, params))
            }
            HessianMode::MatrixFree => {
                let handle = QuadraticHessian::new(operator.clone(), params.alpha);
                HessianAccess::MatrixFree(Box::new(handle))
            }
        });

        EnergyOutput {
            energy,
            gradient,
            hessian,
        }
    }

    /// The assembled normal operator, rebuilt only when the parameters or
    /// the problem size changed since the last assembly. The lock makes the
    /// rebuild atomic: concurrent evaluations with different weights never
    /// observe a half-updated cache.
    fn cached_normal(&self, operator: &ElasticOperator<T>, params: &ElasticParameters<T>) -> CsrMatrix<T> {
        let ndof = operator.domain_dim();
        let mut cache = self.cache.lock();
        let stale = match &*cache {
            Some(cached) => cached.params != *params || cached.ndof != ndof,
            None => true,
        };
        if stale {
            trace!("Rebuilding cached elastic normal operator (ndof = {})", ndof);
            *cache = Some(CachedNormal {
                params: *params,
                ndof,
                matrix: assemble_scaled_normal(operator, params.alpha),
            });
        }
        cache.as_ref().map(|cached| cached.matrix.clone()).expect("cache was just filled")
    }
}

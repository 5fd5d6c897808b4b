//! Energy assemblers and the second-derivative capability interface.
//!
//! Evaluating a regularization energy produces a scalar, optionally a
//! gradient, and optionally access to the second derivative. The latter
//! comes in two interchangeable representations: an assembled sparse matrix
//! (matrix-based mode) or a capability object that can only apply the
//! Hessian to vectors and extract its diagonal (matrix-free mode). Both
//! modes must agree on the energy, the gradient and the Hessian action to
//! numerical tolerance — only the representation differs.

use crate::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;

pub mod elastic;
pub mod hyperelastic;

pub use elastic::ElasticEnergy;
pub use hyperelastic::HyperelasticEnergy;

/// Which representation of the second derivative an evaluation should
/// produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HessianMode {
    /// Assemble the sparse Hessian explicitly.
    Assembled,
    /// Return a capability object exposing only the Hessian action and its
    /// diagonal; no global matrix is formed.
    MatrixFree,
}

/// What an energy evaluation should compute. Anything not requested is
/// skipped entirely (the cheap evaluation path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyRequest {
    pub gradient: bool,
    pub hessian: Option<HessianMode>,
}

impl EnergyRequest {
    pub fn energy_only() -> Self {
        Self {
            gradient: false,
            hessian: None,
        }
    }

    pub fn with_gradient() -> Self {
        Self {
            gradient: true,
            hessian: None,
        }
    }

    pub fn full(mode: HessianMode) -> Self {
        Self {
            gradient: true,
            hessian: Some(mode),
        }
    }
}

/// Capability interface to a symmetric second-derivative operator: apply to
/// a vector, extract the diagonal. Assembled matrices implement it too, so
/// solvers and smoothers consume either representation uniformly.
pub trait HessianOperator<T: Real> {
    fn dim(&self) -> usize;

    /// `out = H v`.
    ///
    /// # Panics
    ///
    /// Panics on dimension mismatch.
    fn apply_into(&self, out: DVectorViewMut<T>, v: DVectorView<T>);

    /// Write the diagonal of `H` into `diag`.
    ///
    /// # Panics
    ///
    /// Panics if `diag.len() != self.dim()`.
    fn diagonal_into(&self, diag: DVectorViewMut<T>);

    fn apply(&self, v: DVectorView<T>) -> DVector<T> {
        let mut out = DVector::zeros(self.dim());
        self.apply_into((&mut out).into(), v);
        out
    }

    fn diagonal(&self) -> DVector<T> {
        let mut diag = DVector::zeros(self.dim());
        self.diagonal_into((&mut diag).into());
        diag
    }
}

impl<'a, T, H> HessianOperator<T> for &'a H
where
    T: Real,
    H: ?Sized + HessianOperator<T>,
{
    fn dim(&self) -> usize {
        <H as HessianOperator<T>>::dim(self)
    }

    fn apply_into(&self, out: DVectorViewMut<T>, v: DVectorView<T>) {
        <H as HessianOperator<T>>::apply_into(self, out, v)
    }

    fn diagonal_into(&self, diag: DVectorViewMut<T>) {
        <H as HessianOperator<T>>::diagonal_into(self, diag)
    }
}

impl<T> HessianOperator<T> for CsrMatrix<T>
where
    T: Real,
{
    fn dim(&self) -> usize {
        self.nrows()
    }

    fn apply_into(&self, mut out: DVectorViewMut<T>, v: DVectorView<T>) {
        assert_eq!(v.len(), self.ncols(), "Input vector length inconsistent with Hessian dimension");
        assert_eq!(out.len(), self.nrows(), "Output vector length inconsistent with Hessian dimension");
        spmm_csr_dense(T::zero(), &mut out, T::one(), Op::NoOp(self), Op::NoOp(&v));
    }

    fn diagonal_into(&self, mut diag: DVectorViewMut<T>) {
        assert_eq!(diag.len(), self.nrows(), "Diagonal length inconsistent with Hessian dimension");
        diag.fill(T::zero());
        for (i, j, value) in self.triplet_iter() {
            if i == j {
                diag[i] += *value;
            }
        }
    }
}

/// Second-derivative access returned by an energy evaluation: either the
/// assembled sparse operator or a matrix-free capability object.
pub enum HessianAccess<'a, T: Real> {
    Assembled(CsrMatrix<T>),
    MatrixFree(Box<dyn HessianOperator<T> + 'a>),
}

impl<'a, T> HessianAccess<'a, T>
where
    T: Real,
{
    /// The assembled matrix, if this evaluation ran in matrix-based mode.
    pub fn assembled(&self) -> Option<&CsrMatrix<T>> {
        match self {
            Self::Assembled(matrix) => Some(matrix),
            Self::MatrixFree(_) => None,
        }
    }
}

impl<'a, T> HessianOperator<T> for HessianAccess<'a, T>
where
    T: Real,
{
    fn dim(&self) -> usize {
        match self {
            Self::Assembled(matrix) => matrix.nrows(),
            Self::MatrixFree(operator) => operator.dim(),
        }
    }

    fn apply_into(&self, out: DVectorViewMut<T>, v: DVectorView<T>) {
        match self {
            Self::Assembled(matrix) => matrix.apply_into(out, v),
            Self::MatrixFree(operator) => operator.apply_into(out, v),
        }
    }

    fn diagonal_into(&self, diag: DVectorViewMut<T>) {
        match self {
            Self::Assembled(matrix) => matrix.diagonal_into(diag),
            Self::MatrixFree(operator) => operator.diagonal_into(diag),
        }
    }
}

/// Result of one energy evaluation.
pub struct EnergyOutput<'a, T: Real> {
    pub energy: T,
    /// Present iff requested.
    pub gradient: Option<DVector<T>>,
    /// Present iff requested, in the requested representation.
    pub hessian: Option<HessianAccess<'a, T>>,
}

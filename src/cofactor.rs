//! Cofactor and determinant calculus for deformation gradients.
//!
//! The hyperelastic area and volume terms differentiate through the cofactor
//! matrix and the Jacobian determinant of the deformation gradient. Everything
//! here is per-cell small-matrix arithmetic; no global matrix is ever formed.
//!
//! No clamping is applied anywhere: for a near-degenerate cell the cofactor
//! and determinant propagate extreme (or, downstream, non-finite) values.
//! Step-size control that avoids this regime is the caller's responsibility.

use crate::Real;
use nalgebra::{Matrix2, Matrix3};

/// Cofactor matrix of a 2×2 matrix, i.e. $\partial \det F / \partial F$.
///
/// Satisfies $F : \mathrm{cof}(F) = 2 \det F$ and
/// $\det F = F_{11} \mathrm{cof}_{11} + F_{12} \mathrm{cof}_{12}$.
#[rustfmt::skip]
pub fn cofactor2<T: Real>(f: &Matrix2<T>) -> Matrix2<T> {
    Matrix2::new(
         f[(1, 1)], -f[(1, 0)],
        -f[(0, 1)],  f[(0, 0)],
    )
}

/// Cofactor matrix of a 3×3 matrix: the matrix of signed minors, so that
/// $\mathrm{cof}(F)_{ij} = \partial \det F / \partial F_{ij}$.
pub fn cofactor3<T: Real>(f: &Matrix3<T>) -> Matrix3<T> {
    let minor = |r0: usize, r1: usize, c0: usize, c1: usize| {
        f[(r0, c0)] * f[(r1, c1)] - f[(r0, c1)] * f[(r1, c0)]
    };
    #[rustfmt::skip]
    let cof = Matrix3::new(
         minor(1, 2, 1, 2), -minor(1, 2, 0, 2),  minor(1, 2, 0, 1),
        -minor(0, 2, 1, 2),  minor(0, 2, 0, 2), -minor(0, 2, 0, 1),
         minor(0, 1, 1, 2), -minor(0, 1, 0, 2),  minor(0, 1, 0, 1),
    );
    cof
}

/// Directional derivative of the 2-D cofactor map.
///
/// The cofactor entries are linear in $F$ in two dimensions, so the
/// derivative does not depend on the base point.
pub fn cofactor_directional2<T: Real>(_f: &Matrix2<T>, h: &Matrix2<T>) -> Matrix2<T> {
    cofactor2(h)
}

/// Directional derivative of the 3-D cofactor map,
/// $\frac{d}{dt} \mathrm{cof}(F + tH) \big|_{t=0}$.
///
/// Each cofactor entry is a quadratic form in $F$, so the derivative is the
/// same minor expression with the product rule applied. The linear map
/// $H \mapsto d\mathrm{cof}(F)[H]$ is self-adjoint with respect to the
/// Frobenius inner product (mixed second derivatives of the minors commute),
/// which the chain rule in the energy assembler relies on.
pub fn cofactor_directional3<T: Real>(f: &Matrix3<T>, h: &Matrix3<T>) -> Matrix3<T> {
    let dminor = |r0: usize, r1: usize, c0: usize, c1: usize| {
        h[(r0, c0)] * f[(r1, c1)] + f[(r0, c0)] * h[(r1, c1)]
            - h[(r0, c1)] * f[(r1, c0)]
            - f[(r0, c1)] * h[(r1, c0)]
    };
    #[rustfmt::skip]
    let dcof = Matrix3::new(
         dminor(1, 2, 1, 2), -dminor(1, 2, 0, 2),  dminor(1, 2, 0, 1),
        -dminor(0, 2, 1, 2),  dminor(0, 2, 0, 2), -dminor(0, 2, 0, 1),
         dminor(0, 1, 1, 2), -dminor(0, 1, 0, 2),  dminor(0, 1, 0, 1),
    );
    dcof
}

/// Directional derivative of the determinant,
/// $\frac{d}{dt} \det(F + tH)\big|_{t=0} = \mathrm{cof}(F) : H$.
pub fn det_directional2<T: Real>(f: &Matrix2<T>, h: &Matrix2<T>) -> T {
    cofactor2(f).dot(h)
}

/// See [`det_directional2`]; the 3-D determinant expands along the cofactor.
pub fn det_directional3<T: Real>(f: &Matrix3<T>, h: &Matrix3<T>) -> T {
    cofactor3(f).dot(h)
}

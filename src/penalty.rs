//! Pointwise penalty functions for the hyperelastic area and volume terms.
//!
//! Each function returns the value together with its first and second
//! derivatives, which the assembler feeds through the chain rule of the
//! cofactor/determinant maps.

use crate::Real;
use numeric_literals::replace_float_literals;

/// The double-well area penalty $\varphi(x) = \tfrac{1}{2}(x - 1)^2$.
///
/// Vanishes exactly at $x = 1$, so area-preserving deformations are free of
/// charge. Note that composed with the squared cofactor-column norm this
/// penalty is *non-convex* in the deformation; the convex one-sided variant
/// [`area_penalty_convex`] is available but never selected implicitly.
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
pub fn area_penalty<T: Real>(x: T) -> (T, T, T) {
    let r = x - 1.0;
    (0.5 * r * r, r, 1.0)
}

/// Convex one-sided variant of the area penalty: $\tfrac{1}{2}(x - 1)^2$ for
/// $x \geq 1$ and zero below, so only area growth is charged.
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
pub fn area_penalty_convex<T: Real>(x: T) -> (T, T, T) {
    if x >= 1.0 {
        area_penalty(x)
    } else {
        (0.0, 0.0, 0.0)
    }
}

/// The volume penalty $\psi(x) = \left(\frac{(x - 1)^2}{x}\right)^2$.
///
/// This exact algebraic form is what makes the regularizer avoid foldovers:
/// $\psi(1) = 0$, $\psi(x) = \psi(1/x)$ (growth and shrinkage are charged
/// symmetrically) and $\psi(x) \to \infty$ as $x \to 0^+$, so a cell cannot
/// pass through zero volume at finite energy. $\psi$ is convex on
/// $(0, \infty)$.
///
/// Implemented through $g(x) = x - 2 + 1/x$ with $\psi = g^2$, which keeps
/// the derivatives short: $\psi' = 2 g g'$ and $\psi'' = 2(g'^2 + g g'')$.
///
/// Not guarded against $x \leq 0$; a non-positive Jacobian determinant
/// produces the extreme values it deserves.
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
pub fn volume_penalty<T: Real>(x: T) -> (T, T, T) {
    let g = x - 2.0 + 1.0 / x;
    let dg = 1.0 - 1.0 / (x * x);
    let ddg = 2.0 / (x * x * x);
    (g * g, 2.0 * g * dg, 2.0 * (dg * dg + g * ddg))
}

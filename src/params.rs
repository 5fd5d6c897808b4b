//! Regularization parameter sets.
//!
//! Parameters are plain value types, immutable for the duration of one
//! energy evaluation; the outer registration loop may swap them between
//! levels. There is no dynamic name/value overriding facility — every
//! recognized option is an explicit field with an explicit default.

use crate::Real;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Parameters of the linear elastic regularizer
/// $S(u) = \tfrac{\alpha}{2} \int \mu \|\nabla u\|^2 + (\mu + \lambda)(\nabla \cdot u)^2$.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElasticParameters<T> {
    /// Overall regularization weight.
    pub alpha: T,
    /// First Lamé parameter (shear).
    pub mu: T,
    /// Second Lamé parameter (compressibility).
    pub lambda: T,
}

impl<T> Default for ElasticParameters<T>
where
    T: Real,
{
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn default() -> Self {
        Self {
            alpha: 1.0,
            mu: 1.0,
            lambda: 0.0,
        }
    }
}

/// Parameters of the hyperelastic regularizer. Each sub-term is switched off
/// entirely by a zero weight.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HyperelasticParameters<T> {
    /// Overall regularization weight multiplying all three sub-terms.
    pub alpha: T,
    /// Weight of the quadratic length (elastic) term.
    pub alpha_length: T,
    /// Weight of the area term (3-D only; the term is identically zero in
    /// 2-D by construction, which is a documented no-op rather than an
    /// error).
    pub alpha_area: T,
    /// Weight of the volume (Jacobian determinant) term.
    pub alpha_volume: T,
}

impl<T> Default for HyperelasticParameters<T>
where
    T: Real,
{
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn default() -> Self {
        Self {
            alpha: 1.0,
            alpha_length: 1.0,
            alpha_area: 1.0,
            alpha_volume: 1.0,
        }
    }
}

//! Elastic and hyperelastic regularization energies for deformable image
//! registration.
//!
//! The crate discretizes the regularization term of a registration functional
//! over a staggered grid (linear elasticity) or a simplex mesh (hyperelastic
//! length/area/volume penalties) and solves the arising linear systems with a
//! geometric multigrid V-cycle.
//!
//! The differential operator $B$ at the heart of the discretization is only
//! ever used through its action on vectors (see
//! [`DifferentialOperator`](crate::operator::DifferentialOperator)); the
//! global sparse matrix is assembled solely for the matrix-based evaluation
//! mode and for verification. Energy assemblers return the second derivative
//! either as an assembled sparse matrix or as a matrix-free capability object,
//! and both representations must agree to numerical tolerance — this is the
//! correctness contract the test suite revolves around.

use nalgebra::RealField;

pub mod cofactor;
pub mod energy;
pub mod grid;
pub mod mesh;
pub mod multigrid;
pub mod operator;
pub mod params;
pub mod penalty;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// The scalar type used throughout the crate: a real field with value
/// semantics.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

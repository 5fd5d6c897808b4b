use super::varied_vector;
use hyperreg::energy::{ElasticEnergy, EnergyRequest, HessianMode, HessianOperator};
use hyperreg::grid::StaggeredGrid;
use hyperreg::operator::{DifferentialOperator, ElasticOperator};
use hyperreg::params::ElasticParameters;
use matrixcompare::assert_matrix_eq;
use nalgebra::DVector;

#[test]
fn energy_only_request_skips_gradient_and_hessian() {
    let grid = StaggeredGrid::unit(&[4, 4]);
    let u = varied_vector(grid.num_dofs(), 1);
    let energy = ElasticEnergy::new();
    let out = energy.evaluate(&grid, (&u).into(), &ElasticParameters::default(), &EnergyRequest::energy_only());
    assert!(out.gradient.is_none());
    assert!(out.hessian.is_none());
    assert!(out.energy > 0.0);
}

#[test]
fn energy_matches_explicit_quadratic_form() {
    let grid = StaggeredGrid::unit(&[16, 12]);
    let params = ElasticParameters::default();
    let u = varied_vector(grid.num_dofs(), 2);

    let energy = ElasticEnergy::new();
    let out = energy.evaluate(&grid, (&u).into(), &params, &EnergyRequest::energy_only());

    let op = ElasticOperator::new(&grid, &params);
    let mut weights = DVector::zeros(op.range_dim());
    op.range_weights_into((&mut weights).into());
    let bu = op.apply((&u).into());
    let explicit = 0.5 * params.alpha * bu.dot(&bu.component_mul(&weights));

    assert!((out.energy - explicit).abs() < 1e-12 * explicit.abs());
}

#[test]
fn evaluation_modes_agree_end_to_end() {
    // Grid 16x12 on the unit square, alpha = 1, mu = 1, lambda = 0.
    let grid = StaggeredGrid::unit(&[16, 12]);
    let params = ElasticParameters::default();
    let u = varied_vector(grid.num_dofs(), 3);
    let v = varied_vector(grid.num_dofs(), 4);

    let energy = ElasticEnergy::new();
    let mb = energy.evaluate(&grid, (&u).into(), &params, &EnergyRequest::full(HessianMode::Assembled));
    let mf = energy.evaluate(&grid, (&u).into(), &params, &EnergyRequest::full(HessianMode::MatrixFree));

    assert!((mb.energy - mf.energy).abs() < 1e-10 * mb.energy.abs());

    let (gradient_mb, gradient_mf) = (mb.gradient.unwrap(), mf.gradient.unwrap());
    assert!((&gradient_mb - &gradient_mf).norm() < 1e-10 * gradient_mb.norm().max(1.0));

    let (hessian_mb, hessian_mf) = (mb.hessian.unwrap(), mf.hessian.unwrap());
    assert!(hessian_mb.assembled().is_some());
    assert!(hessian_mf.assembled().is_none());

    let hv_mb = hessian_mb.apply((&v).into());
    let hv_mf = hessian_mf.apply((&v).into());
    assert!((&hv_mb - &hv_mf).norm() < 1e-8 * hv_mb.norm().max(1.0));

    let diag_mb = hessian_mb.diagonal();
    let diag_mf = hessian_mf.diagonal();
    assert!((&diag_mb - &diag_mf).norm() < 1e-8 * diag_mb.norm().max(1.0));
}

#[test]
fn gradient_matches_central_finite_differences() {
    let grid = StaggeredGrid::unit(&[4, 4]);
    let params = ElasticParameters {
        alpha: 0.5,
        mu: 1.5,
        lambda: 0.25,
    };
    let u = varied_vector(grid.num_dofs(), 5);

    let energy = ElasticEnergy::new();
    let gradient = energy
        .evaluate(&grid, (&u).into(), &params, &EnergyRequest::with_gradient())
        .gradient
        .unwrap();

    let h = 1e-6;
    let value_at = |u: &DVector<f64>| {
        energy
            .evaluate(&grid, u.into(), &params, &EnergyRequest::energy_only())
            .energy
    };
    for i in 0..grid.num_dofs() {
        let mut forward = u.clone();
        forward[i] += h;
        let mut backward = u.clone();
        backward[i] -= h;
        let fd = (value_at(&forward) - value_at(&backward)) / (2.0 * h);
        assert!(
            (fd - gradient[i]).abs() < 1e-6 * (1.0 + gradient[i].abs()),
            "dof {}: finite difference {} vs gradient {}",
            i,
            fd,
            gradient[i]
        );
    }
}

#[test]
fn cached_hessian_tracks_parameter_changes() {
    let grid = StaggeredGrid::unit(&[4, 4]);
    let u = varied_vector(grid.num_dofs(), 6);
    let energy = ElasticEnergy::new();

    let base = ElasticParameters::default();
    let doubled = ElasticParameters { alpha: 2.0, ..base };

    let request = EnergyRequest::full(HessianMode::Assembled);
    let h1 = energy.evaluate(&grid, (&u).into(), &base, &request).hessian.unwrap();
    let h2 = energy.evaluate(&grid, (&u).into(), &doubled, &request).hessian.unwrap();

    // Doubling alpha must invalidate the cache and double the operator.
    let scaled = h1.assembled().unwrap() * 2.0;
    assert_matrix_eq!(scaled, h2.assembled().unwrap(), comp = abs, tol = 1e-13);
}

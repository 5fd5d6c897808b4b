use super::varied_vector;
use hyperreg::energy::{EnergyRequest, HessianMode, HessianOperator, HyperelasticEnergy};
use hyperreg::mesh::SimplexMesh;
use hyperreg::operator::{DifferentialOperator, GradientOperator};
use hyperreg::params::HyperelasticParameters;
use matrixcompare::assert_matrix_eq;
use nalgebra::DVector;

fn unit_square_mesh(cells: usize) -> SimplexMesh<f64> {
    SimplexMesh::triangulated_rectangle(&[(0.0, 1.0), (0.0, 1.0)], &[cells, cells])
}

fn unit_cube_mesh() -> SimplexMesh<f64> {
    SimplexMesh::tetrahedralized_box(&[(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)], &[1, 1, 1])
}

#[test]
fn reference_configuration_has_zero_energy_2d() {
    let mesh = unit_square_mesh(2);
    let y_ref = mesh.reference_configuration();
    let u = DVector::zeros(mesh.num_dofs());
    let energy = HyperelasticEnergy::new();
    let out = energy.evaluate(
        &mesh,
        (&u).into(),
        (&y_ref).into(),
        &HyperelasticParameters::default(),
        &EnergyRequest::with_gradient(),
    );
    // At the identity deformation every penalty sits in its well.
    assert!(out.energy.abs() < 1e-14);
    assert!(out.gradient.unwrap().norm() < 1e-13);
}

#[test]
fn reference_configuration_has_zero_energy_3d() {
    let mesh = unit_cube_mesh();
    let y_ref = mesh.reference_configuration();
    let u = DVector::zeros(mesh.num_dofs());
    let energy = HyperelasticEnergy::new();
    let out = energy.evaluate(
        &mesh,
        (&u).into(),
        (&y_ref).into(),
        &HyperelasticParameters::default(),
        &EnergyRequest::with_gradient(),
    );
    assert!(out.energy.abs() < 1e-14);
    assert!(out.gradient.unwrap().norm() < 1e-13);
}

#[test]
fn gradient_matches_central_finite_differences_2d() {
    let mesh = unit_square_mesh(2);
    gradient_finite_difference_check(&mesh, 1);
}

#[test]
fn gradient_matches_central_finite_differences_3d() {
    let mesh = unit_cube_mesh();
    gradient_finite_difference_check(&mesh, 2);
}

fn gradient_finite_difference_check(mesh: &SimplexMesh<f64>, seed: u64) {
    let y_ref = mesh.reference_configuration();
    // Small displacement so every element stays well away from degeneracy.
    let u = varied_vector(mesh.num_dofs(), seed) * 0.05;
    let params = HyperelasticParameters {
        alpha: 1.0,
        alpha_length: 0.5,
        alpha_area: 2.0,
        alpha_volume: 1.5,
    };

    let energy = HyperelasticEnergy::new();
    let gradient = energy
        .evaluate(mesh, (&u).into(), (&y_ref).into(), &params, &EnergyRequest::with_gradient())
        .gradient
        .unwrap();

    let h = 1e-6;
    let value_at = |u: &DVector<f64>| {
        energy
            .evaluate(mesh, u.into(), (&y_ref).into(), &params, &EnergyRequest::energy_only())
            .energy
    };
    for i in 0..mesh.num_dofs() {
        let mut forward = u.clone();
        forward[i] += h;
        let mut backward = u.clone();
        backward[i] -= h;
        let fd = (value_at(&forward) - value_at(&backward)) / (2.0 * h);
        assert!(
            (fd - gradient[i]).abs() < 1e-5 * (1.0 + gradient[i].abs()),
            "dof {}: finite difference {} vs gradient {}",
            i,
            fd,
            gradient[i]
        );
    }
}

#[test]
fn evaluation_modes_agree_2d() {
    evaluation_modes_check(&unit_square_mesh(3), 3);
}

#[test]
fn evaluation_modes_agree_3d() {
    evaluation_modes_check(&unit_cube_mesh(), 4);
}

fn evaluation_modes_check(mesh: &SimplexMesh<f64>, seed: u64) {
    let y_ref = mesh.reference_configuration();
    let u = varied_vector(mesh.num_dofs(), seed) * 0.05;
    let v = varied_vector(mesh.num_dofs(), seed.wrapping_add(10));
    let params = HyperelasticParameters::default();
    let energy = HyperelasticEnergy::new();

    let mb = energy.evaluate(
        mesh,
        (&u).into(),
        (&y_ref).into(),
        &params,
        &EnergyRequest::full(HessianMode::Assembled),
    );
    let mf = energy.evaluate(
        mesh,
        (&u).into(),
        (&y_ref).into(),
        &params,
        &EnergyRequest::full(HessianMode::MatrixFree),
    );

    assert!((mb.energy - mf.energy).abs() < 1e-8 * mb.energy.abs().max(1.0));

    let (gradient_mb, gradient_mf) = (mb.gradient.unwrap(), mf.gradient.unwrap());
    assert!((&gradient_mb - &gradient_mf).norm() < 1e-8 * gradient_mb.norm().max(1.0));

    let (hessian_mb, hessian_mf) = (mb.hessian.unwrap(), mf.hessian.unwrap());
    let hv_mb = hessian_mb.apply((&v).into());
    let hv_mf = hessian_mf.apply((&v).into());
    assert!((&hv_mb - &hv_mf).norm() < 1e-8 * hv_mb.norm().max(1.0));

    let diag_mb = hessian_mb.diagonal();
    let diag_mf = hessian_mf.diagonal();
    assert!((&diag_mb - &diag_mf).norm() < 1e-8 * diag_mb.norm().max(1.0));
}

#[test]
fn assembled_hessian_is_symmetric() {
    let mesh = unit_cube_mesh();
    let y_ref = mesh.reference_configuration();
    let u = varied_vector(mesh.num_dofs(), 5) * 0.05;
    let energy = HyperelasticEnergy::new();
    let out = energy.evaluate(
        &mesh,
        (&u).into(),
        (&y_ref).into(),
        &HyperelasticParameters::default(),
        &EnergyRequest::full(HessianMode::Assembled),
    );
    let hessian = out.hessian.unwrap();
    let matrix = hessian.assembled().unwrap();
    assert_matrix_eq!(matrix, matrix.transpose(), comp = abs, tol = 1e-12);
}

#[test]
fn zero_weights_reduce_to_the_length_term() {
    let mesh = unit_square_mesh(3);
    let y_ref = mesh.reference_configuration();
    let u = varied_vector(mesh.num_dofs(), 6) * 0.1;
    let params = HyperelasticParameters {
        alpha: 1.0,
        alpha_length: 0.75,
        alpha_area: 0.0,
        alpha_volume: 0.0,
    };

    let energy = HyperelasticEnergy::new();
    let out = energy.evaluate(&mesh, (&u).into(), (&y_ref).into(), &params, &EnergyRequest::energy_only());

    let op = GradientOperator::new(&mesh);
    let mut weights = DVector::zeros(op.range_dim());
    op.range_weights_into((&mut weights).into());
    let gu = op.apply((&u).into());
    let explicit = 0.5 * 0.75 * gu.dot(&gu.component_mul(&weights));

    assert!((out.energy - explicit).abs() < 1e-12 * explicit.abs().max(1.0));
}

#[test]
fn collapsed_element_energy_is_non_finite() {
    // Collapsing the (1, 0) corner onto the origin makes one triangle
    // degenerate; the volume penalty must blow up instead of being clamped.
    let mesh = unit_square_mesh(1);
    let y_ref = mesh.reference_configuration();
    let n = mesh.num_nodes();
    let mut u = DVector::zeros(mesh.num_dofs());
    let collapsed = mesh
        .node_coordinates()
        .chunks(2)
        .position(|p| p == [1.0, 0.0])
        .unwrap();
    u[collapsed] = -1.0;
    u[n + collapsed] = 0.0;

    let energy = HyperelasticEnergy::new();
    let out = energy.evaluate(
        &mesh,
        (&u).into(),
        (&y_ref).into(),
        &HyperelasticParameters::default(),
        &EnergyRequest::energy_only(),
    );
    assert!(!out.energy.is_finite());
}

//! Hyperelastic regularization energy on a simplex mesh.
//!
//! The energy decomposes into a quadratic length term, an area term (3-D
//! only) and a volume term, each switched off entirely by a zero weight:
//!
//! * length: $\tfrac{1}{2} \alpha_l \sum_e v_e \|\nabla u\|_F^2$,
//! * area: $\alpha_a \sum_e v_e \sum_{f} \varphi(\|\mathrm{cof}(F) e_f\|^2)$
//!   over the three face orientations, with the double-well
//!   $\varphi(x) = \tfrac{1}{2}(x-1)^2$,
//! * volume: $\alpha_v \sum_e v_e \psi(\det F)$ with
//!   $\psi(x) = ((x-1)^2/x)^2$,
//!
//! where $F$ is the deformation gradient of $y = y_{ref} + u$ on element
//! $e$ and $v_e$ its volume. Gradients flow through the cofactor and
//! determinant chain rules; second derivatives use the Gauss-Newton form
//! $J^T \mathrm{diag}(w\, p'') J$ per sub-term, which keeps both evaluation
//! modes positive semidefinite and identical by construction.
//!
//! Near-degenerate elements are not guarded: a Jacobian determinant near
//! zero sends $\psi$ towards infinity, which is exactly the behavior that
//! penalizes foldovers.

use crate::cofactor::{cofactor2, cofactor3, cofactor_directional3};
use crate::energy::elastic::{assemble_scaled_normal, QuadraticHessian};
use crate::energy::{EnergyOutput, EnergyRequest, HessianAccess, HessianMode, HessianOperator};
use crate::mesh::SimplexMesh;
use crate::operator::{DifferentialOperator, GradientOperator};
use crate::params::HyperelasticParameters;
use crate::penalty::{area_penalty, volume_penalty};
use crate::Real;
use log::trace;
use nalgebra::{DVector, DVectorView, DVectorViewMut, Matrix2, Matrix3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use parking_lot::Mutex;

/// Per-element curvature data retained for the Gauss-Newton second
/// derivative in two dimensions (volume term only; the area term is
/// identically zero in 2-D).
struct ElementData2<T> {
    cof: Matrix2<T>,
    volume_weight: T,
}

/// Per-element curvature data in three dimensions.
struct ElementData3<T> {
    f: Matrix3<T>,
    cof: Matrix3<T>,
    area_weights: [T; 3],
    volume_weight: T,
}

enum NonlinearData<T> {
    Dim2(Vec<ElementData2<T>>),
    Dim3(Vec<ElementData3<T>>),
}

struct NonlinearEval<T> {
    energy: T,
    gradient: Option<DVector<T>>,
    data: Option<NonlinearData<T>>,
}

#[derive(Debug)]
struct CachedLength<T> {
    weight: T,
    ndof: usize,
    matrix: CsrMatrix<T>,
}

/// Assembler for the hyperelastic regularization energy.
#[derive(Debug, Default)]
pub struct HyperelasticEnergy<T: Real> {
    length_cache: Mutex<Option<CachedLength<T>>>,
}

impl<T> HyperelasticEnergy<T>
where
    T: Real,
{
    pub fn new() -> Self {
        Self {
            length_cache: Mutex::new(None),
        }
    }

    /// Evaluate energy, and optionally gradient and Hessian access, of the
    /// hyperelastic regularizer for the displacement `u` relative to the
    /// reference configuration `y_ref`.
    ///
    /// # Panics
    ///
    /// Panics if `u` or `y_ref` have a length inconsistent with the mesh
    /// dof count.
    pub fn evaluate<'a>(
        &self,
        mesh: &'a SimplexMesh<T>,
        u: DVectorView<T>,
        y_ref: DVectorView<T>,
        params: &HyperelasticParameters<T>,
        request: &EnergyRequest,
    ) -> EnergyOutput<'a, T> {
        let ndof = mesh.num_dofs();
        assert_eq!(u.len(), ndof, "Displacement length inconsistent with mesh (expected {})", ndof);
        assert_eq!(y_ref.len(), ndof, "Reference length inconsistent with mesh (expected {})", ndof);

        let length_weight = params.alpha * params.alpha_length;
        let area_weight = params.alpha * params.alpha_area;
        let volume_weight = params.alpha * params.alpha_volume;

        let y = DVector::from_fn(ndof, |i, _| y_ref[i] + u[i]);
        let operator = GradientOperator::new(mesh);

        let mut energy = T::zero();
        let mut gradient = request.gradient.then(|| DVector::zeros(ndof));

        // Length term, evaluated through operator actions in both modes.
        if length_weight != T::zero() {
            let range = operator.apply(u);
            let mut weights = DVector::zeros(operator.range_dim());
            operator.range_weights_into((&mut weights).into());
            let mut weighted = range.clone();
            weighted.zip_apply(&weights, |r, w| *r *= w);
            let half = T::from_f64(0.5).expect("literal must fit in T");
            energy += half * length_weight * range.dot(&weighted);
            if let Some(gradient) = &mut gradient {
                let mut length_gradient = operator.apply_adjoint((&weighted).into());
                length_gradient *= length_weight;
                *gradient += length_gradient;
            }
        }

        // Area and volume terms, element by element.
        let want_data = request.hessian.is_some();
        let nonlinear = evaluate_nonlinear(mesh, &y, area_weight, volume_weight, request.gradient, want_data);
        energy += nonlinear.energy;
        if let (Some(gradient), Some(nonlinear_gradient)) = (&mut gradient, nonlinear.gradient) {
            *gradient += nonlinear_gradient;
        }

        let hessian = request.hessian.map(|mode| {
            let data = nonlinear.data.expect("nonlinear data is recorded whenever a Hessian is requested");
            match mode {
                HessianMode::MatrixFree => {
                    let length = (length_weight != T::zero())
                        .then(|| QuadraticHessian::new(operator.clone(), length_weight));
                    let handle = HyperelasticHessian {
                        mesh,
                        data,
                        length,
                    };
                    HessianAccess::MatrixFree(Box::new(handle))
                }
                HessianMode::Assembled => {
                    let mut matrix = assemble_nonlinear(mesh, &data);
                    if length_weight != T::zero() {
                        let length = self.cached_length(&operator, length_weight);
                        matrix = &matrix + &length;
                    }
                    HessianAccess::Assembled(matrix)
                }
            }
        });

        EnergyOutput {
            energy,
            gradient,
            hessian,
        }
    }

    /// The assembled length-term operator $\alpha_l B^T V B$, rebuilt only
    /// when the weight or the problem size changed. The rebuild is atomic
    /// under the lock.
    fn cached_length(&self, operator: &GradientOperator<'_, T>, weight: T) -> CsrMatrix<T> {
        let ndof = operator.domain_dim();
        let mut cache = self.length_cache.lock();
        let stale = match &*cache {
            Some(cached) => cached.weight != weight || cached.ndof != ndof,
            None => true,
        };
        if stale {
            trace!("Rebuilding cached length-term operator (ndof = {})", ndof);
            *cache = Some(CachedLength {
                weight,
                ndof,
                matrix: assemble_scaled_normal(operator, weight),
            });
        }
        cache.as_ref().map(|cached| cached.matrix.clone()).expect("cache was just filled")
    }
}

/// Deformation gradient of the element: $F_{cj} = \sum_a y_{c,a} \partial_j \varphi_a$.
fn deformation_gradient2<T: Real>(mesh: &SimplexMesh<T>, element: usize, y: &DVector<T>) -> Matrix2<T> {
    let n = mesh.num_nodes();
    let grads = mesh.shape_gradients(element);
    let mut f = Matrix2::zeros();
    for (a, &node) in mesh.element_nodes(element).iter().enumerate() {
        for c in 0..2 {
            for j in 0..2 {
                f[(c, j)] += y[c * n + node] * grads[a * 2 + j];
            }
        }
    }
    f
}

fn deformation_gradient3<T: Real>(mesh: &SimplexMesh<T>, element: usize, y: &DVector<T>) -> Matrix3<T> {
    let n = mesh.num_nodes();
    let grads = mesh.shape_gradients(element);
    let mut f = Matrix3::zeros();
    for (a, &node) in mesh.element_nodes(element).iter().enumerate() {
        for c in 0..3 {
            for j in 0..3 {
                f[(c, j)] += y[c * n + node] * grads[a * 3 + j];
            }
        }
    }
    f
}

fn evaluate_nonlinear<T: Real>(
    mesh: &SimplexMesh<T>,
    y: &DVector<T>,
    area_weight: T,
    volume_weight: T,
    want_gradient: bool,
    want_data: bool,
) -> NonlinearEval<T> {
    match mesh.dim() {
        2 => evaluate_nonlinear2(mesh, y, volume_weight, want_gradient, want_data),
        3 => evaluate_nonlinear3(mesh, y, area_weight, volume_weight, want_gradient, want_data),
        dim => unreachable!("unsupported mesh dimension {}", dim),
    }
}

/// 2-D: volume term only. The area term is identically zero in two
/// dimensions by construction (a documented no-op, not an error).
fn evaluate_nonlinear2<T: Real>(
    mesh: &SimplexMesh<T>,
    y: &DVector<T>,
    volume_weight: T,
    want_gradient: bool,
    want_data: bool,
) -> NonlinearEval<T> {
    let n = mesh.num_nodes();
    let mut energy = T::zero();
    let mut gradient = want_gradient.then(|| DVector::zeros(mesh.num_dofs()));
    let mut data = want_data.then(|| Vec::with_capacity(mesh.num_elements()));

    for e in 0..mesh.num_elements() {
        let volume = mesh.element_volume(e);
        let f = deformation_gradient2(mesh, e, y);
        let cof = cofactor2(&f);

        let mut curvature = T::zero();
        if volume_weight != T::zero() {
            let det = f.determinant();
            let (value, d1, d2) = volume_penalty(det);
            energy += volume * volume_weight * value;
            curvature = volume * volume_weight * d2;
            if let Some(gradient) = &mut gradient {
                let df = cof * (volume * volume_weight * d1);
                scatter_gradient2(mesh, e, n, &df, gradient);
            }
        }

        if let Some(data) = &mut data {
            data.push(ElementData2 {
                cof,
                volume_weight: curvature,
            });
        }
    }

    NonlinearEval {
        energy,
        gradient,
        data: data.map(NonlinearData::Dim2),
    }
}

fn evaluate_nonlinear3<T: Real>(
    mesh: &SimplexMesh<T>,
    y: &DVector<T>,
    area_weight: T,
    volume_weight: T,
    want_gradient: bool,
    want_data: bool,
) -> NonlinearEval<T> {
    let n = mesh.num_nodes();
    let two = T::from_f64(2.0).expect("literal must fit in T");
    let mut energy = T::zero();
    let mut gradient = want_gradient.then(|| DVector::zeros(mesh.num_dofs()));
    let mut data = want_data.then(|| Vec::with_capacity(mesh.num_elements()));

    for e in 0..mesh.num_elements() {
        let volume = mesh.element_volume(e);
        let f = deformation_gradient3(mesh, e, y);
        let cof = cofactor3(&f);

        let mut df = Matrix3::zeros();
        let mut area_curvatures = [T::zero(); 3];
        if area_weight != T::zero() {
            // One squared cofactor-column norm per face orientation, fed
            // through the double-well penalty; the chain rule goes through
            // the self-adjoint cofactor directional derivative.
            let mut w = Matrix3::zeros();
            for face in 0..3 {
                let area = cof.column(face).norm_squared();
                let (value, d1, d2) = area_penalty(area);
                energy += volume * area_weight * value;
                area_curvatures[face] = volume * area_weight * d2;
                let scale = two * volume * area_weight * d1;
                w.set_column(face, &(cof.column(face) * scale));
            }
            df += cofactor_directional3(&f, &w);
        }

        let mut volume_curvature = T::zero();
        if volume_weight != T::zero() {
            let det = f.determinant();
            let (value, d1, d2) = volume_penalty(det);
            energy += volume * volume_weight * value;
            volume_curvature = volume * volume_weight * d2;
            df += cof * (volume * volume_weight * d1);
        }

        if let Some(gradient) = &mut gradient {
            scatter_gradient3(mesh, e, n, &df, gradient);
        }
        if let Some(data) = &mut data {
            data.push(ElementData3 {
                f,
                cof,
                area_weights: area_curvatures,
                volume_weight: volume_curvature,
            });
        }
    }

    NonlinearEval {
        energy,
        gradient,
        data: data.map(NonlinearData::Dim3),
    }
}

/// Scatter a per-element derivative with respect to the deformation
/// gradient back to the nodal dofs: $\partial S / \partial u_{c,a} =
/// \sum_j G_{cj} \partial_j \varphi_a$.
fn scatter_gradient2<T: Real>(
    mesh: &SimplexMesh<T>,
    element: usize,
    num_nodes: usize,
    df: &Matrix2<T>,
    gradient: &mut DVector<T>,
) {
    let grads = mesh.shape_gradients(element);
    for (a, &node) in mesh.element_nodes(element).iter().enumerate() {
        for c in 0..2 {
            let mut value = T::zero();
            for j in 0..2 {
                value += df[(c, j)] * grads[a * 2 + j];
            }
            gradient[c * num_nodes + node] += value;
        }
    }
}

fn scatter_gradient3<T: Real>(
    mesh: &SimplexMesh<T>,
    element: usize,
    num_nodes: usize,
    df: &Matrix3<T>,
    gradient: &mut DVector<T>,
) {
    let grads = mesh.shape_gradients(element);
    for (a, &node) in mesh.element_nodes(element).iter().enumerate() {
        for c in 0..3 {
            let mut value = T::zero();
            for j in 0..3 {
                value += df[(c, j)] * grads[a * 3 + j];
            }
            gradient[c * num_nodes + node] += value;
        }
    }
}

/// Matrix-free Hessian of the hyperelastic energy: re-walks the elements on
/// every application, using the curvature data recorded at evaluation time.
pub struct HyperelasticHessian<'a, T: Real> {
    mesh: &'a SimplexMesh<T>,
    data: NonlinearData<T>,
    length: Option<QuadraticHessian<T, GradientOperator<'a, T>>>,
}

impl<'a, T> HessianOperator<T> for HyperelasticHessian<'a, T>
where
    T: Real,
{
    fn dim(&self) -> usize {
        self.mesh.num_dofs()
    }

    fn apply_into(&self, mut out: DVectorViewMut<T>, v: DVectorView<T>) {
        let ndof = self.mesh.num_dofs();
        assert_eq!(v.len(), ndof, "Input vector length inconsistent with Hessian dimension");
        assert_eq!(out.len(), ndof, "Output vector length inconsistent with Hessian dimension");

        let mut acc = DVector::zeros(ndof);
        if let Some(length) = &self.length {
            length.apply_into((&mut acc).into(), v);
        }

        let n = self.mesh.num_nodes();
        let two = T::from_f64(2.0).expect("literal must fit in T");
        match &self.data {
            NonlinearData::Dim2(elements) => {
                for (e, element) in elements.iter().enumerate() {
                    if element.volume_weight == T::zero() {
                        continue;
                    }
                    let dv = direction_gradient2(self.mesh, e, n, v);
                    let jv = element.cof.dot(&dv);
                    let dg = element.cof * (element.volume_weight * jv);
                    scatter_gradient2(self.mesh, e, n, &dg, &mut acc);
                }
            }
            NonlinearData::Dim3(elements) => {
                for (e, element) in elements.iter().enumerate() {
                    let dv = direction_gradient3(self.mesh, e, n, v);
                    let mut dg = Matrix3::zeros();

                    if element.area_weights.iter().any(|w| *w != T::zero()) {
                        let dcof = cofactor_directional3(&element.f, &dv);
                        let mut w = Matrix3::zeros();
                        for face in 0..3 {
                            let jv = two * element.cof.column(face).dot(&dcof.column(face));
                            let scale = two * element.area_weights[face] * jv;
                            w.set_column(face, &(element.cof.column(face) * scale));
                        }
                        dg += cofactor_directional3(&element.f, &w);
                    }

                    if element.volume_weight != T::zero() {
                        let jv = element.cof.dot(&dv);
                        dg += element.cof * (element.volume_weight * jv);
                    }

                    scatter_gradient3(self.mesh, e, n, &dg, &mut acc);
                }
            }
        }
        out.copy_from(&acc);
    }

    fn diagonal_into(&self, mut diag: DVectorViewMut<T>) {
        let ndof = self.mesh.num_dofs();
        assert_eq!(diag.len(), ndof, "Diagonal length inconsistent with Hessian dimension");

        let mut acc = DVector::zeros(ndof);
        if let Some(length) = &self.length {
            acc = length.diagonal();
        }

        let n = self.mesh.num_nodes();
        let two = T::from_f64(2.0).expect("literal must fit in T");
        match &self.data {
            NonlinearData::Dim2(elements) => {
                for (e, element) in elements.iter().enumerate() {
                    if element.volume_weight == T::zero() {
                        continue;
                    }
                    let grads = self.mesh.shape_gradients(e);
                    for (a, &node) in self.mesh.element_nodes(e).iter().enumerate() {
                        for c in 0..2 {
                            let mut j_vol = T::zero();
                            for j in 0..2 {
                                j_vol += element.cof[(c, j)] * grads[a * 2 + j];
                            }
                            acc[c * n + node] += element.volume_weight * j_vol * j_vol;
                        }
                    }
                }
            }
            NonlinearData::Dim3(elements) => {
                for (e, element) in elements.iter().enumerate() {
                    let grads = self.mesh.shape_gradients(e);
                    let has_area = element.area_weights.iter().any(|w| *w != T::zero());
                    for (a, &node) in self.mesh.element_nodes(e).iter().enumerate() {
                        for c in 0..3 {
                            let dof = c * n + node;
                            if element.volume_weight != T::zero() {
                                let mut j_vol = T::zero();
                                for j in 0..3 {
                                    j_vol += element.cof[(c, j)] * grads[a * 3 + j];
                                }
                                acc[dof] += element.volume_weight * j_vol * j_vol;
                            }
                            if has_area {
                                let mut basis = Matrix3::zeros();
                                for j in 0..3 {
                                    basis[(c, j)] = grads[a * 3 + j];
                                }
                                let dcof = cofactor_directional3(&element.f, &basis);
                                for face in 0..3 {
                                    let j_area = two * element.cof.column(face).dot(&dcof.column(face));
                                    acc[dof] += element.area_weights[face] * j_area * j_area;
                                }
                            }
                        }
                    }
                }
            }
        }
        diag.copy_from(&acc);
    }
}

/// Gradient of the perturbation direction on one element, the analogue of
/// the deformation gradient for the Hessian chain rule.
fn direction_gradient2<T: Real>(
    mesh: &SimplexMesh<T>,
    element: usize,
    num_nodes: usize,
    v: DVectorView<T>,
) -> Matrix2<T> {
    let grads = mesh.shape_gradients(element);
    let mut dv = Matrix2::zeros();
    for (a, &node) in mesh.element_nodes(element).iter().enumerate() {
        for c in 0..2 {
            for j in 0..2 {
                dv[(c, j)] += v[c * num_nodes + node] * grads[a * 2 + j];
            }
        }
    }
    dv
}

fn direction_gradient3<T: Real>(
    mesh: &SimplexMesh<T>,
    element: usize,
    num_nodes: usize,
    v: DVectorView<T>,
) -> Matrix3<T> {
    let grads = mesh.shape_gradients(element);
    let mut dv = Matrix3::zeros();
    for (a, &node) in mesh.element_nodes(element).iter().enumerate() {
        for c in 0..3 {
            for j in 0..3 {
                dv[(c, j)] += v[c * num_nodes + node] * grads[a * 3 + j];
            }
        }
    }
    dv
}

/// Assemble the Gauss-Newton Hessian of the area and volume terms into a
/// sparse matrix, element by element, exactly mirroring the matrix-free
/// application.
fn assemble_nonlinear<T: Real>(mesh: &SimplexMesh<T>, data: &NonlinearData<T>) -> CsrMatrix<T> {
    let ndof = mesh.num_dofs();
    let n = mesh.num_nodes();
    let d = mesh.dim();
    let local_dim = d * (d + 1);
    let two = T::from_f64(2.0).expect("literal must fit in T");

    let mut coo = CooMatrix::new(ndof, ndof);
    // Rank-one updates w * j j^T per penalty row, scattered to global dofs.
    let mut push_outer = |mesh: &SimplexMesh<T>, e: usize, weight: T, j_local: &[T]| {
        if weight == T::zero() {
            return;
        }
        let nodes = mesh.element_nodes(e);
        for (ai, &node_i) in nodes.iter().enumerate() {
            for ci in 0..d {
                let row = ci * n + node_i;
                let ji = j_local[ci * (d + 1) + ai];
                for (aj, &node_j) in nodes.iter().enumerate() {
                    for cj in 0..d {
                        let col = cj * n + node_j;
                        let jj = j_local[cj * (d + 1) + aj];
                        coo.push(row, col, weight * ji * jj);
                    }
                }
            }
        }
    };

    match data {
        NonlinearData::Dim2(elements) => {
            let mut j_local = vec![T::zero(); local_dim];
            for (e, element) in elements.iter().enumerate() {
                let grads = mesh.shape_gradients(e);
                for (a, _) in mesh.element_nodes(e).iter().enumerate() {
                    for c in 0..2 {
                        let mut j_vol = T::zero();
                        for j in 0..2 {
                            j_vol += element.cof[(c, j)] * grads[a * 2 + j];
                        }
                        j_local[c * 3 + a] = j_vol;
                    }
                }
                push_outer(mesh, e, element.volume_weight, &j_local);
            }
        }
        NonlinearData::Dim3(elements) => {
            let mut j_vol_local = vec![T::zero(); local_dim];
            let mut j_area_local = vec![T::zero(); 3 * local_dim];
            for (e, element) in elements.iter().enumerate() {
                let grads = mesh.shape_gradients(e);
                let has_area = element.area_weights.iter().any(|w| *w != T::zero());
                for (a, _) in mesh.element_nodes(e).iter().enumerate() {
                    for c in 0..3 {
                        let li = c * 4 + a;
                        let mut j_vol = T::zero();
                        for j in 0..3 {
                            j_vol += element.cof[(c, j)] * grads[a * 3 + j];
                        }
                        j_vol_local[li] = j_vol;

                        if has_area {
                            let mut basis = Matrix3::zeros();
                            for j in 0..3 {
                                basis[(c, j)] = grads[a * 3 + j];
                            }
                            let dcof = cofactor_directional3(&element.f, &basis);
                            for face in 0..3 {
                                j_area_local[face * local_dim + li] =
                                    two * element.cof.column(face).dot(&dcof.column(face));
                            }
                        }
                    }
                }
                push_outer(mesh, e, element.volume_weight, &j_vol_local);
                if has_area {
                    for face in 0..3 {
                        push_outer(
                            mesh,
                            e,
                            element.area_weights[face],
                            &j_area_local[face * local_dim..(face + 1) * local_dim],
                        );
                    }
                }
            }
        }
    }

    CsrMatrix::from(&coo)
}

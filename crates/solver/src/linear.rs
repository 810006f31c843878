//! Small dense Newton steps (1-D, 2×2, 3×3) with conditioning estimates.

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

use crate::solver::NewtonStep;

/// Scalar Newton step `-value / derivative`.
pub fn newton_step1(derivative: f64, value: f64) -> NewtonStep<f64> {
    if derivative == 0.0 || !derivative.is_finite() || !value.is_finite() {
        return NewtonStep::singular();
    }
    NewtonStep {
        delta: Some(-value / derivative),
        conditioning: derivative.abs(),
    }
}

/// Newton step for a 2×2 system `J * delta = -F`.
pub fn newton_step2(jacobian: &Matrix2<f64>, residual: &Vector2<f64>) -> NewtonStep<Vector2<f64>> {
    let scale = jacobian.column(0).norm() * jacobian.column(1).norm();
    let conditioning = normalized_determinant(jacobian.determinant(), scale);
    let delta = jacobian
        .lu()
        .solve(&(-*residual))
        .filter(|d| d.iter().all(|c| c.is_finite()));
    NewtonStep { delta, conditioning }
}

/// Newton step for a 3×3 system `J * delta = -F`.
pub fn newton_step3(jacobian: &Matrix3<f64>, residual: &Vector3<f64>) -> NewtonStep<Vector3<f64>> {
    let scale =
        jacobian.column(0).norm() * jacobian.column(1).norm() * jacobian.column(2).norm();
    let conditioning = normalized_determinant(jacobian.determinant(), scale);
    let delta = jacobian
        .lu()
        .solve(&(-*residual))
        .filter(|d| d.iter().all(|c| c.is_finite()));
    NewtonStep { delta, conditioning }
}

fn normalized_determinant(det: f64, column_scale: f64) -> f64 {
    if column_scale == 0.0 || !column_scale.is_finite() || !det.is_finite() {
        0.0
    } else {
        det / column_scale
    }
}

use serde::{Deserialize, Serialize};

use super::{SurfaceEvaluator, SurfaceSample, Vec3};
use crate::error::GeometryError;

/// A tensor-product Bézier patch over `[0,1]^2`.
///
/// Fields are only reachable through [`BezierPatch::new`] and friends, so the
/// control point count always matches the degrees; deserialisation goes
/// through the same check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBezierPatch")]
pub struct BezierPatch {
    degree_u: usize,
    degree_v: usize,
    /// Control points grid: `[i * (degree_v + 1) + j]`, `i` along u.
    control_points: Vec<Vec3>,
}

#[derive(Deserialize)]
struct RawBezierPatch {
    degree_u: usize,
    degree_v: usize,
    control_points: Vec<Vec3>,
}

impl TryFrom<RawBezierPatch> for BezierPatch {
    type Error = GeometryError;

    fn try_from(raw: RawBezierPatch) -> Result<Self, Self::Error> {
        Self::new(raw.degree_u, raw.degree_v, raw.control_points)
    }
}

impl BezierPatch {
    pub fn new(
        degree_u: usize,
        degree_v: usize,
        control_points: Vec<Vec3>,
    ) -> Result<Self, GeometryError> {
        let expected = (degree_u + 1) * (degree_v + 1);
        if control_points.len() != expected {
            return Err(GeometryError::TooFewControlPoints {
                degree: degree_u.max(degree_v),
                needed: expected,
                found: control_points.len(),
            });
        }
        Ok(Self {
            degree_u,
            degree_v,
            control_points,
        })
    }

    /// Build from rows indexed `[i][j]` (`i` along u).
    pub fn from_grid(rows: &[Vec<Vec3>]) -> Result<Self, GeometryError> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.len() < 2 || cols < 2 {
            return Err(GeometryError::ControlNetSize {
                rows: rows.len(),
                cols,
                degree: 1,
            });
        }
        for (row, points) in rows.iter().enumerate() {
            if points.len() != cols {
                return Err(GeometryError::RaggedControlNet {
                    row,
                    expected: cols,
                    found: points.len(),
                });
            }
        }
        let control_points = rows.iter().flatten().copied().collect();
        Self::new(rows.len() - 1, cols - 1, control_points)
    }

    /// Degree-(1,1) patch through four corners.
    pub fn bilinear(p00: Vec3, p10: Vec3, p01: Vec3, p11: Vec3) -> Self {
        Self {
            degree_u: 1,
            degree_v: 1,
            control_points: vec![p00, p01, p10, p11],
        }
    }

    pub fn degree_u(&self) -> usize {
        self.degree_u
    }

    pub fn degree_v(&self) -> usize {
        self.degree_v
    }

    /// Control points in `[i * (degree_v + 1) + j]` order.
    pub fn control_points(&self) -> &[Vec3] {
        &self.control_points
    }

    fn control_point(&self, i: usize, j: usize) -> Vec3 {
        self.control_points[i * (self.degree_v + 1) + j]
    }
}

impl SurfaceEvaluator for BezierPatch {
    fn evaluate(&self, u: f64, v: f64) -> SurfaceSample {
        let (bu, dbu) = bernstein_with_derivative(self.degree_u, u);
        let (bv, dbv) = bernstein_with_derivative(self.degree_v, v);

        let mut point = Vec3::zeros();
        let mut du = Vec3::zeros();
        let mut dv = Vec3::zeros();
        for i in 0..=self.degree_u {
            for j in 0..=self.degree_v {
                let cp = self.control_point(i, j);
                point += cp * (bu[i] * bv[j]);
                du += cp * (dbu[i] * bv[j]);
                dv += cp * (bu[i] * dbv[j]);
            }
        }
        SurfaceSample { point, du, dv }
    }
}

/// Bernstein polynomials `B_{i,n}(t)` and their derivatives
/// `n * (B_{i-1,n-1} - B_{i,n-1})`.
fn bernstein_with_derivative(degree: usize, t: f64) -> (Vec<f64>, Vec<f64>) {
    let lower = bernstein(degree.saturating_sub(1), t);
    let values = bernstein(degree, t);
    let mut derivs = vec![0.0; degree + 1];
    if degree > 0 {
        let n = degree as f64;
        for (i, d) in derivs.iter_mut().enumerate() {
            let left = if i > 0 { lower[i - 1] } else { 0.0 };
            let right = if i < degree { lower[i] } else { 0.0 };
            *d = n * (left - right);
        }
    }
    (values, derivs)
}

/// De Casteljau-style triangle of Bernstein values.
fn bernstein(degree: usize, t: f64) -> Vec<f64> {
    let mut b = vec![0.0; degree + 1];
    b[0] = 1.0;
    let s = 1.0 - t;
    for j in 1..=degree {
        let mut saved = 0.0;
        for k in 0..j {
            let temp = b[k];
            b[k] = saved + s * temp;
            saved = t * temp;
        }
        b[j] = saved;
    }
    b
}

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use super::{CurveEvaluator, CurveSample, clamp_to};
use crate::error::GeometryError;

/// A NURBS (Non-Uniform Rational B-Spline) curve in `D` dimensions.
///
/// `D = 2` curves serve as trims and global UV curves, `D = 3` as input curves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNurbsCurve<D>")]
pub struct NurbsCurve<const D: usize> {
    /// Degree of the curve.
    degree: usize,
    control_points: Vec<SVector<f64, D>>,
    /// Weights for rational curves. If empty, treated as all 1.0 (non-rational).
    weights: Vec<f64>,
    /// Knot vector (len = control_points.len() + degree + 1).
    knots: Vec<f64>,
}

#[derive(Deserialize)]
struct RawNurbsCurve<const D: usize> {
    degree: usize,
    control_points: Vec<SVector<f64, D>>,
    #[serde(default)]
    weights: Vec<f64>,
    knots: Vec<f64>,
}

impl<const D: usize> TryFrom<RawNurbsCurve<D>> for NurbsCurve<D> {
    type Error = GeometryError;

    fn try_from(raw: RawNurbsCurve<D>) -> Result<Self, Self::Error> {
        Self::new(raw.degree, raw.control_points, raw.weights, raw.knots)
    }
}

impl<const D: usize> NurbsCurve<D> {
    pub fn new(
        degree: usize,
        control_points: Vec<SVector<f64, D>>,
        weights: Vec<f64>,
        knots: Vec<f64>,
    ) -> Result<Self, GeometryError> {
        let n = control_points.len();
        if degree == 0 || n < degree + 1 {
            return Err(GeometryError::TooFewControlPoints {
                degree,
                needed: degree.max(1) + 1,
                found: n,
            });
        }
        if knots.len() != n + degree + 1 {
            return Err(GeometryError::KnotCount {
                expected: n + degree + 1,
                found: knots.len(),
            });
        }
        if let Some(index) = knots.windows(2).position(|w| !(w[1] >= w[0])) {
            return Err(GeometryError::DecreasingKnots { index: index + 1 });
        }
        if !weights.is_empty() {
            if weights.len() != n {
                return Err(GeometryError::WeightCount {
                    expected: n,
                    found: weights.len(),
                });
            }
            if let Some((index, &value)) = weights
                .iter()
                .enumerate()
                .find(|(_, w)| !(**w > 0.0 && w.is_finite()))
            {
                return Err(GeometryError::InvalidWeight { index, value });
            }
        }
        let curve = Self {
            degree,
            control_points,
            weights,
            knots,
        };
        let (start, end) = curve.domain();
        if !(end > start) {
            return Err(GeometryError::EmptyDomain { start, end });
        }
        Ok(curve)
    }

    /// Create a non-rational B-spline curve.
    pub fn bspline(
        degree: usize,
        control_points: Vec<SVector<f64, D>>,
        knots: Vec<f64>,
    ) -> Result<Self, GeometryError> {
        Self::new(degree, control_points, vec![], knots)
    }

    /// B-spline with a clamped uniform knot vector over `[0, 1]`.
    pub fn clamped(
        degree: usize,
        control_points: Vec<SVector<f64, D>>,
    ) -> Result<Self, GeometryError> {
        let knots = clamped_uniform(control_points.len(), degree);
        Self::bspline(degree, control_points, knots)
    }

    fn is_rational(&self) -> bool {
        !self.weights.is_empty()
    }

    fn weight(&self, i: usize) -> f64 {
        if self.is_rational() { self.weights[i] } else { 1.0 }
    }

    pub fn num_control_points(&self) -> usize {
        self.control_points.len()
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn control_points(&self) -> &[SVector<f64, D>] {
        &self.control_points
    }

    /// Empty for a non-rational curve.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// Find the knot span index for parameter t using binary search.
    fn find_span(&self, t: f64) -> usize {
        let n = self.num_control_points() - 1;
        let p = self.degree;

        if t >= self.knots[n + 1] {
            return n;
        }
        if t <= self.knots[p] {
            return p;
        }

        let mut low = p;
        let mut high = n + 1;
        let mut mid = (low + high) / 2;
        while t < self.knots[mid] || t >= self.knots[mid + 1] {
            if t < self.knots[mid] {
                high = mid;
            } else {
                low = mid;
            }
            mid = (low + high) / 2;
        }
        mid
    }

    /// Basis derivatives `N'_{span-p+i,p}(t)` from the degree-(p-1) basis.
    fn basis_derivatives(&self, span: usize, t: f64) -> Vec<f64> {
        let p = self.degree;
        let lower = basis_functions(&self.knots, span, t, p - 1);
        let mut derivs = vec![0.0; p + 1];
        let pf = p as f64;
        for (i, d) in derivs.iter_mut().enumerate() {
            let k = span - p + i;
            // N_{k,p-1} lives at lower[i - 1], N_{k+1,p-1} at lower[i].
            let left = if i > 0 {
                let denom = self.knots[k + p] - self.knots[k];
                if denom > 0.0 { lower[i - 1] / denom } else { 0.0 }
            } else {
                0.0
            };
            let right = if i < p {
                let denom = self.knots[k + p + 1] - self.knots[k + 1];
                if denom > 0.0 { lower[i] / denom } else { 0.0 }
            } else {
                0.0
            };
            *d = pf * (left - right);
        }
        derivs
    }
}

impl<const D: usize> CurveEvaluator<D> for NurbsCurve<D> {
    /// Parameter domain `[knots[p], knots[n+1]]`.
    fn domain(&self) -> (f64, f64) {
        (self.knots[self.degree], self.knots[self.knots.len() - self.degree - 1])
    }

    fn evaluate(&self, t: f64) -> CurveSample<D> {
        let t = clamp_to(self.domain(), t);
        let span = self.find_span(t);
        let basis = basis_functions(&self.knots, span, t, self.degree);
        let dbasis = self.basis_derivatives(span, t);
        let p = self.degree;

        let mut a = SVector::<f64, D>::zeros();
        let mut da = SVector::<f64, D>::zeros();
        let mut w = 0.0;
        let mut dw = 0.0;
        for i in 0..=p {
            let idx = span - p + i;
            let cp = self.control_points[idx];
            let wi = self.weight(idx);
            a += cp * (basis[i] * wi);
            da += cp * (dbasis[i] * wi);
            w += basis[i] * wi;
            dw += dbasis[i] * wi;
        }

        if !self.is_rational() {
            return CurveSample {
                point: a,
                derivative: da,
            };
        }
        let point = a / w;
        // C' = (A' - W' C) / W
        let derivative = (da - point * dw) / w;
        CurveSample { point, derivative }
    }
}

/// Compute B-spline basis functions `N_{span-p..=span, p}(t)`.
pub fn basis_functions(knots: &[f64], span: usize, t: f64, degree: usize) -> Vec<f64> {
    let p = degree;
    let mut n_vals = vec![0.0; p + 1];
    let mut left = vec![0.0; p + 1];
    let mut right = vec![0.0; p + 1];

    n_vals[0] = 1.0;
    for j in 1..=p {
        left[j] = t - knots[span + 1 - j];
        right[j] = knots[span + j] - t;
        let mut saved = 0.0;
        for r in 0..j {
            let temp = n_vals[r] / (right[r + 1] + left[j - r]);
            n_vals[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n_vals[j] = saved;
    }
    n_vals
}

/// Clamped uniform knot vector over `[0, 1]` for `n` control points.
pub fn clamped_uniform(n: usize, degree: usize) -> Vec<f64> {
    let interior = n.saturating_sub(degree + 1);
    let mut knots = vec![0.0; degree + 1];
    for k in 1..=interior {
        knots.push(k as f64 / (interior + 1) as f64);
    }
    knots.extend(std::iter::repeat_n(1.0, degree + 1));
    knots
}

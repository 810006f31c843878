//! Parametric evaluators: the capability traits every surface patch, input
//! curve and trim curve implements, plus the concrete shapes shipped with the
//! kernel.

pub mod bezier;
pub mod nurbs;
pub mod primitives;

use nalgebra::{SVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub use bezier::BezierPatch;
pub use nurbs::NurbsCurve;
pub use primitives::{Circle2d, FnCurve, LineCurve, PolylineCurve};

pub type Vec2 = Vector2<f64>;
pub type Vec3 = Vector3<f64>;

/// Point and first partial derivatives of a surface at `(u, v)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSample {
    pub point: Vec3,
    pub du: Vec3,
    pub dv: Vec3,
}

impl SurfaceSample {
    /// Unnormalised normal `du x dv`.
    pub fn normal(&self) -> Vec3 {
        self.du.cross(&self.dv)
    }
}

/// A surface patch parameterised over the unit square `[0,1]^2`.
///
/// Evaluation must be total over the unit square; callers clamp before
/// evaluating.
pub trait SurfaceEvaluator {
    fn evaluate(&self, u: f64, v: f64) -> SurfaceSample;

    fn point(&self, u: f64, v: f64) -> Vec3 {
        self.evaluate(u, v).point
    }
}

impl<S: SurfaceEvaluator + ?Sized> SurfaceEvaluator for &S {
    fn evaluate(&self, u: f64, v: f64) -> SurfaceSample {
        (**self).evaluate(u, v)
    }
}

impl<S: SurfaceEvaluator + ?Sized> SurfaceEvaluator for Box<S> {
    fn evaluate(&self, u: f64, v: f64) -> SurfaceSample {
        (**self).evaluate(u, v)
    }
}

/// Point and first derivative of a `D`-dimensional curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSample<const D: usize> {
    pub point: SVector<f64, D>,
    pub derivative: SVector<f64, D>,
}

/// A parametric curve in `D` dimensions over a closed parameter interval.
pub trait CurveEvaluator<const D: usize> {
    /// Parameter interval `(t_min, t_max)`, `t_min < t_max`.
    fn domain(&self) -> (f64, f64);

    /// Point and first derivative at `t`; `t` is clamped to the domain.
    fn evaluate(&self, t: f64) -> CurveSample<D>;

    fn point(&self, t: f64) -> SVector<f64, D> {
        self.evaluate(t).point
    }

    /// Whether both domain ends evaluate to the same point within `tolerance`.
    fn is_closed(&self, tolerance: f64) -> bool {
        let (t0, t1) = self.domain();
        (self.point(t1) - self.point(t0)).norm() <= tolerance
    }

    /// Chord-length estimate of the arc length.
    fn approximate_length(&self, num_samples: usize) -> f64 {
        let (t0, t1) = self.domain();
        let n = num_samples.max(1);
        let mut length = 0.0;
        let mut prev = self.point(t0);
        for i in 1..=n {
            let t = t0 + (t1 - t0) * (i as f64 / n as f64);
            let curr = self.point(t);
            length += (curr - prev).norm();
            prev = curr;
        }
        length
    }
}

impl<const D: usize, C: CurveEvaluator<D> + ?Sized> CurveEvaluator<D> for &C {
    fn domain(&self) -> (f64, f64) {
        (**self).domain()
    }

    fn evaluate(&self, t: f64) -> CurveSample<D> {
        (**self).evaluate(t)
    }
}

impl<const D: usize, C: CurveEvaluator<D> + ?Sized> CurveEvaluator<D> for Box<C> {
    fn domain(&self) -> (f64, f64) {
        (**self).domain()
    }

    fn evaluate(&self, t: f64) -> CurveSample<D> {
        (**self).evaluate(t)
    }
}

/// Clamp `t` into `domain`.
pub(crate) fn clamp_to(domain: (f64, f64), t: f64) -> f64 {
    t.clamp(domain.0, domain.1)
}

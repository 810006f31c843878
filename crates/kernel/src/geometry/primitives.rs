use std::f64::consts::TAU;

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use super::{CurveEvaluator, CurveSample, Vec2, clamp_to};
use crate::error::GeometryError;

/// Straight segment `a + t (b - a)`, `t` in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineCurve<const D: usize> {
    pub start: SVector<f64, D>,
    pub end: SVector<f64, D>,
}

impl<const D: usize> LineCurve<D> {
    pub fn new(start: SVector<f64, D>, end: SVector<f64, D>) -> Self {
        Self { start, end }
    }
}

impl<const D: usize> CurveEvaluator<D> for LineCurve<D> {
    fn domain(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn evaluate(&self, t: f64) -> CurveSample<D> {
        let t = clamp_to(self.domain(), t);
        let direction = self.end - self.start;
        CurveSample {
            point: self.start + direction * t,
            derivative: direction,
        }
    }
}

/// A circle in the UV plane, parameterised by angle over `[0, 2π]`,
/// counter-clockwise from the +U axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle2d {
    pub center: Vec2,
    pub radius: f64,
}

impl Circle2d {
    pub fn new(center: Vec2, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn circumference(&self) -> f64 {
        TAU * self.radius
    }
}

impl CurveEvaluator<2> for Circle2d {
    fn domain(&self) -> (f64, f64) {
        (0.0, TAU)
    }

    fn evaluate(&self, t: f64) -> CurveSample<2> {
        let (sin, cos) = t.sin_cos();
        CurveSample {
            point: self.center + Vec2::new(cos, sin) * self.radius,
            derivative: Vec2::new(-sin, cos) * self.radius,
        }
    }
}

/// Piecewise-linear curve through `points`; vertex `k` sits at `t = k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylineCurve<const D: usize> {
    points: Vec<SVector<f64, D>>,
}

impl<const D: usize> PolylineCurve<D> {
    pub fn new(points: Vec<SVector<f64, D>>) -> Result<Self, GeometryError> {
        if points.len() < 2 {
            return Err(GeometryError::TooFewPoints(points.len()));
        }
        Ok(Self { points })
    }

    /// Polyline with the first point appended again, so `is_closed` holds.
    pub fn closed(mut points: Vec<SVector<f64, D>>) -> Result<Self, GeometryError> {
        if let Some(&first) = points.first() {
            if points.last() != Some(&first) || points.len() == 1 {
                points.push(first);
            }
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[SVector<f64, D>] {
        &self.points
    }
}

impl<const D: usize> CurveEvaluator<D> for PolylineCurve<D> {
    fn domain(&self) -> (f64, f64) {
        (0.0, (self.points.len() - 1) as f64)
    }

    fn evaluate(&self, t: f64) -> CurveSample<D> {
        let t = clamp_to(self.domain(), t);
        let k = (t.floor() as usize).min(self.points.len() - 2);
        let local = t - k as f64;
        let direction = self.points[k + 1] - self.points[k];
        CurveSample {
            point: self.points[k] + direction * local,
            derivative: direction,
        }
    }
}

/// Curve backed by a closure returning `(point, derivative)`.
pub struct FnCurve<const D: usize, F> {
    domain: (f64, f64),
    f: F,
}

impl<const D: usize, F> FnCurve<D, F>
where
    F: Fn(f64) -> (SVector<f64, D>, SVector<f64, D>),
{
    pub fn new(domain: (f64, f64), f: F) -> Result<Self, GeometryError> {
        if !(domain.1 > domain.0) {
            return Err(GeometryError::EmptyDomain {
                start: domain.0,
                end: domain.1,
            });
        }
        Ok(Self { domain, f })
    }
}

impl<const D: usize, F> CurveEvaluator<D> for FnCurve<D, F>
where
    F: Fn(f64) -> (SVector<f64, D>, SVector<f64, D>),
{
    fn domain(&self) -> (f64, f64) {
        self.domain
    }

    fn evaluate(&self, t: f64) -> CurveSample<D> {
        let (point, derivative) = (self.f)(clamp_to(self.domain, t));
        CurveSample { point, derivative }
    }
}

//! Continuous global UV curve through the merged projection samples.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{GeometryError, PipelineError};
use crate::geometry::{CurveEvaluator, CurveSample, Vec2, clamp_to};
use crate::projector::Projection;

/// Piecewise cubic Hermite curve in global UV, C¹ through its samples.
///
/// Tangents are weighted three-point estimates (exact for straight samples).
/// Outside the sampled range, up to the domain ends, the curve continues
/// linearly along the end tangents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvSpline {
    params: Vec<f64>,
    points: Vec<Vec2>,
    tangents: Vec<Vec2>,
    domain: (f64, f64),
}

impl UvSpline {
    /// Interpolate `points` at strictly increasing `params`.
    pub fn new(params: Vec<f64>, points: Vec<Vec2>) -> Result<Self, GeometryError> {
        let domain = match (params.first(), params.last()) {
            (Some(&a), Some(&b)) => (a, b),
            _ => return Err(GeometryError::TooFewPoints(0)),
        };
        Self::with_domain(params, points, domain)
    }

    /// Like [`UvSpline::new`] but defined over `domain`, which may extend
    /// past the first and last sample.
    pub fn with_domain(
        params: Vec<f64>,
        points: Vec<Vec2>,
        domain: (f64, f64),
    ) -> Result<Self, GeometryError> {
        if params.len() < 2 || points.len() != params.len() {
            return Err(GeometryError::TooFewPoints(params.len().min(points.len())));
        }
        if let Some(index) = params.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(GeometryError::NonIncreasingParameters { index: index + 1 });
        }
        let domain = (domain.0.min(params[0]), domain.1.max(params[params.len() - 1]));
        let tangents = estimate_tangents(&params, &points);
        Ok(Self {
            params,
            points,
            tangents,
            domain,
        })
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    /// Largest distance between the curve and its own samples.
    pub fn max_deviation(&self) -> f64 {
        self.params
            .iter()
            .zip(&self.points)
            .map(|(&t, p)| (self.point(t) - p).norm())
            .fold(0.0, f64::max)
    }
}

fn estimate_tangents(params: &[f64], points: &[Vec2]) -> Vec<Vec2> {
    let n = params.len();
    let secant = |k: usize| (points[k + 1] - points[k]) / (params[k + 1] - params[k]);
    if n == 2 {
        let d = secant(0);
        return vec![d, d];
    }
    let mut tangents = Vec::with_capacity(n);
    let h = |k: usize| params[k + 1] - params[k];
    // Three-point one-sided estimate at the ends.
    let (h0, h1) = (h(0), h(1));
    tangents.push(((2.0 * h0 + h1) * secant(0) - h0 * secant(1)) / (h0 + h1));
    for k in 1..n - 1 {
        let (h0, h1) = (h(k - 1), h(k));
        tangents.push((h1 * secant(k - 1) + h0 * secant(k)) / (h0 + h1));
    }
    let (h0, h1) = (h(n - 3), h(n - 2));
    tangents.push(((2.0 * h1 + h0) * secant(n - 2) - h1 * secant(n - 3)) / (h0 + h1));
    tangents
}

impl CurveEvaluator<2> for UvSpline {
    fn domain(&self) -> (f64, f64) {
        self.domain
    }

    fn evaluate(&self, t: f64) -> CurveSample<2> {
        if t.is_nan() {
            return CurveSample {
                point: Vec2::repeat(f64::NAN),
                derivative: Vec2::repeat(f64::NAN),
            };
        }
        let t = clamp_to(self.domain, t);
        let last = self.params.len() - 1;
        if t <= self.params[0] {
            let m = self.tangents[0];
            return CurveSample {
                point: self.points[0] + m * (t - self.params[0]),
                derivative: m,
            };
        }
        if t >= self.params[last] {
            let m = self.tangents[last];
            return CurveSample {
                point: self.points[last] + m * (t - self.params[last]),
                derivative: m,
            };
        }

        let k = (self.params.partition_point(|&x| x <= t) - 1).min(last - 1);
        let h = self.params[k + 1] - self.params[k];
        let s = (t - self.params[k]) / h;
        let (s2, s3) = (s * s, s * s * s);
        let (p0, p1) = (self.points[k], self.points[k + 1]);
        let (m0, m1) = (self.tangents[k] * h, self.tangents[k + 1] * h);

        let point = p0 * (2.0 * s3 - 3.0 * s2 + 1.0)
            + m0 * (s3 - 2.0 * s2 + s)
            + p1 * (-2.0 * s3 + 3.0 * s2)
            + m1 * (s3 - s2);
        let derivative = (p0 * (6.0 * s2 - 6.0 * s)
            + m0 * (3.0 * s2 - 4.0 * s + 1.0)
            + p1 * (-6.0 * s2 + 6.0 * s)
            + m1 * (3.0 * s2 - 2.0 * s))
            / h;
        CurveSample { point, derivative }
    }
}

/// Fitted curve plus what the fitter had to bridge.
#[derive(Debug, Clone)]
pub struct FittedCurve {
    pub spline: UvSpline,
    pub max_deviation: f64,
    /// Bridged runs of unprojected samples as `(t_start, t_end)`.
    pub gaps: Vec<(f64, f64)>,
}

/// Fit one curve over `domain` through the accepted projection samples.
///
/// Runs of unprojected samples are gaps. A gap's width is the distance
/// between the accepted samples that bracket it, or to the domain end for
/// leading and trailing runs. Gaps wider than `config.max_gap` are fatal.
#[instrument(skip_all, fields(samples = projection.hits.len()))]
pub fn fit_uv_curve(
    projection: &Projection,
    domain: (f64, f64),
    config: &PipelineConfig,
) -> Result<FittedCurve, PipelineError> {
    let (params, points): (Vec<f64>, Vec<Vec2>) =
        projection.accepted().map(|s| (s.t, s.global)).unzip();
    if params.len() < 2 {
        return Err(PipelineError::ProjectionIncomplete {
            t_start: domain.0,
            t_end: domain.1,
            width: domain.1 - domain.0,
            max_gap: config.max_gap,
        });
    }

    let gaps = find_gaps(projection, domain);
    if let Some(&(t_start, t_end)) = gaps.iter().find(|(a, b)| b - a > config.max_gap) {
        return Err(PipelineError::ProjectionIncomplete {
            t_start,
            t_end,
            width: t_end - t_start,
            max_gap: config.max_gap,
        });
    }

    let spline = UvSpline::with_domain(params, points, domain)?;
    let max_deviation = spline.max_deviation();
    if max_deviation > config.fit_tolerance {
        warn!(max_deviation, tolerance = config.fit_tolerance, "fit deviates from samples");
    }
    info!(
        knots = spline.params().len(),
        gaps = gaps.len(),
        max_deviation,
        "uv curve fitted"
    );
    Ok(FittedCurve {
        spline,
        max_deviation,
        gaps,
    })
}

fn find_gaps(projection: &Projection, domain: (f64, f64)) -> Vec<(f64, f64)> {
    let mut gaps = Vec::new();
    // Parameter of the last accepted sample, or the domain start.
    let mut anchor = domain.0;
    let mut in_gap = false;
    for (&t, hit) in projection.parameters.iter().zip(&projection.hits) {
        match hit {
            Some(_) => {
                if in_gap {
                    gaps.push((anchor, t));
                    in_gap = false;
                }
                anchor = t;
            }
            None => in_gap = true,
        }
    }
    if in_gap {
        gaps.push((anchor, domain.1));
    }
    gaps
}

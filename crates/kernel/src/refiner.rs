//! Intersections between the global UV curve and trim curves.
//!
//! Seeds come from polyline/polyline segment tests; each seed `(t0, s0)` is
//! polished on `F(t, s) = C(t) - T(s)` by the root-finding state machine.

use std::cmp::Ordering;

use nalgebra::Matrix2;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uvclip_solver::{NewtonStep, RootPhase, RootProblem, SolverConfig, find_root, newton_step2};

use crate::config::{PipelineConfig, SeedConfig};
use crate::geometry::{CurveEvaluator, LineCurve, Vec2};
use crate::report::Warning;

// ─── Polylines ──────────────────────────────────────────────────────────────

/// A curve sampled at increasing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub params: Vec<f64>,
    pub points: Vec<Vec2>,
}

impl Polyline {
    /// Sample `curve` with a resolution scaled by its length and total turning.
    ///
    /// `n = clamp(ceil(L * segments_per_unit + Θ / max_turn), min, max)` where
    /// `L` and `Θ` are measured on a coarse `min_segments` polyline.
    pub fn discretize<C: CurveEvaluator<2> + ?Sized>(curve: &C, seed: &SeedConfig) -> Self {
        Self::discretize_range(curve, curve.domain(), seed)
    }

    /// [`Polyline::discretize`] restricted to the parameter range `(t0, t1)`.
    pub fn discretize_range<C: CurveEvaluator<2> + ?Sized>(
        curve: &C,
        range: (f64, f64),
        seed: &SeedConfig,
    ) -> Self {
        let coarse = Self::uniform_range(curve, range, seed.min_segments);
        let (length, turning) = coarse.length_and_turning();
        let wanted = (length * seed.segments_per_unit + turning / seed.max_turn).ceil();
        let n = if wanted.is_finite() {
            (wanted as usize).clamp(seed.min_segments, seed.max_segments)
        } else {
            seed.max_segments
        };
        if n == seed.min_segments {
            coarse
        } else {
            Self::uniform_range(curve, range, n)
        }
    }

    /// `segments + 1` points at uniform parameters over the curve domain.
    pub fn uniform<C: CurveEvaluator<2> + ?Sized>(curve: &C, segments: usize) -> Self {
        Self::uniform_range(curve, curve.domain(), segments)
    }

    pub fn uniform_range<C: CurveEvaluator<2> + ?Sized>(
        curve: &C,
        (t0, t1): (f64, f64),
        segments: usize,
    ) -> Self {
        let n = segments.max(1);
        let params: Vec<f64> = (0..=n)
            .map(|i| if i == n { t1 } else { t0 + (t1 - t0) * (i as f64 / n as f64) })
            .collect();
        let points = params.iter().map(|&t| curve.point(t)).collect();
        Self { params, points }
    }

    pub fn segment_count(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    fn length_and_turning(&self) -> (f64, f64) {
        let mut length = 0.0;
        let mut turning = 0.0;
        let mut previous: Option<Vec2> = None;
        for w in self.points.windows(2) {
            let chord = w[1] - w[0];
            let len = chord.norm();
            length += len;
            if len <= f64::EPSILON {
                continue;
            }
            if let Some(prev) = previous {
                turning += cross(&prev, &chord).atan2(prev.dot(&chord)).abs();
            }
            previous = Some(chord);
        }
        (length, turning)
    }

    fn segment_bounds(&self, i: usize) -> (Vec2, Vec2) {
        let (a, b) = (self.points[i], self.points[i + 1]);
        (a.inf(&b), a.sup(&b))
    }

    /// Even-odd crossing test of `p` against this polyline, implicitly closed.
    pub fn contains(&self, p: &Vec2) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (pi, pj) = (self.points[i], self.points[j]);
            if ((pi.y > p.y) != (pj.y > p.y))
                && (p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x)
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// z-component of the 2-D cross product.
pub(crate) fn cross(a: &Vec2, b: &Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Intersection of segments `p0p1` and `q0q1` as fractions `(a, b)` along each,
/// end points included. Parallel segments give `None`.
pub fn segment_intersection(p0: &Vec2, p1: &Vec2, q0: &Vec2, q1: &Vec2) -> Option<(f64, f64)> {
    let r = p1 - p0;
    let s = q1 - q0;
    let denom = cross(&r, &s);
    if denom.abs() <= 1e-12 * r.norm() * s.norm() || denom == 0.0 {
        return None;
    }
    let qp = q0 - p0;
    let a = cross(&qp, &s) / denom;
    let b = cross(&qp, &r) / denom;
    const EPS: f64 = 1e-12;
    let on = |x: f64| (-EPS..=1.0 + EPS).contains(&x);
    (on(a) && on(b)).then(|| (a.clamp(0.0, 1.0), b.clamp(0.0, 1.0)))
}

// ─── Seeds and refinement ───────────────────────────────────────────────────

/// Starting point for one refinement, with the curve segment it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seed {
    pub t: f64,
    pub s: f64,
    /// Parameters of the curve polyline segment containing the seed.
    pub bracket: (f64, f64),
}

/// Segment/segment crossings of two polylines with bounding-box prefilter.
pub fn find_seeds(curve: &Polyline, trim: &Polyline) -> Vec<Seed> {
    let trim_bounds: Vec<(Vec2, Vec2)> = (0..trim.segment_count())
        .map(|j| trim.segment_bounds(j))
        .collect();
    let mut seeds = Vec::new();
    for i in 0..curve.segment_count() {
        let (lo, hi) = curve.segment_bounds(i);
        for (j, (tlo, thi)) in trim_bounds.iter().enumerate() {
            if hi.x < tlo.x || thi.x < lo.x || hi.y < tlo.y || thi.y < lo.y {
                continue;
            }
            let hit = segment_intersection(
                &curve.points[i],
                &curve.points[i + 1],
                &trim.points[j],
                &trim.points[j + 1],
            );
            if let Some((a, b)) = hit {
                let bracket = (curve.params[i], curve.params[i + 1]);
                seeds.push(Seed {
                    t: bracket.0 + a * (bracket.1 - bracket.0),
                    s: trim.params[j] + b * (trim.params[j + 1] - trim.params[j]),
                    bracket,
                });
            }
        }
    }
    seeds
}

/// A refined crossing of the UV curve with one trim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    /// Parameter on the UV curve.
    pub t: f64,
    /// Parameter on the trim.
    pub s: f64,
    /// Index of the trim in the input slice.
    pub trim: usize,
    pub point: Vec2,
    pub residual: f64,
    /// Sign of `C'(t) x T'(s)`: which way the curve crosses the trim.
    pub crossing: f64,
    pub resolved_by: RootPhase,
    /// The crossing is with the chord closing an open trim; `s` is then the
    /// chord parameter in `[0, 1]` from the trim's end back to its start.
    #[serde(default)]
    pub closing_chord: bool,
}

impl Intersection {
    fn same_orientation(&self, other: &Intersection) -> bool {
        self.crossing.signum() == other.crossing.signum()
    }
}

struct IntersectionProblem<'a, C: ?Sized, T: ?Sized> {
    curve: &'a C,
    trim: &'a T,
    trim_closed: bool,
    seed: Seed,
}

impl<C, T> IntersectionProblem<'_, C, T>
where
    C: CurveEvaluator<2> + ?Sized,
    T: CurveEvaluator<2> + ?Sized,
{
    fn normalize_s(&self, s: f64) -> f64 {
        let (s0, s1) = self.trim.domain();
        if self.trim_closed {
            s0 + (s - s0).rem_euclid(s1 - s0)
        } else {
            s.clamp(s0, s1)
        }
    }

    /// Closest trim parameter to `p`, by Gauss-Newton from the seed.
    fn closest_s(&self, p: &Vec2) -> f64 {
        let mut s = self.seed.s;
        for _ in 0..16 {
            let sample = self.trim.evaluate(s);
            let d2 = sample.derivative.norm_squared();
            if d2 == 0.0 {
                break;
            }
            let step = (sample.point - p).dot(&sample.derivative) / d2;
            s = self.normalize_s(s - step);
            if step.abs() < 1e-15 {
                break;
            }
        }
        s
    }
}

impl<C, T> RootProblem for IntersectionProblem<'_, C, T>
where
    C: CurveEvaluator<2> + ?Sized,
    T: CurveEvaluator<2> + ?Sized,
{
    /// `(t, s)`
    type Point = Vec2;

    fn residual(&self, x: &Vec2) -> f64 {
        (self.curve.point(x.x) - self.trim.point(x.y)).norm()
    }

    fn newton_step(&self, x: &Vec2) -> NewtonStep<Vec2> {
        let c = self.curve.evaluate(x.x);
        let t = self.trim.evaluate(x.y);
        let jacobian = Matrix2::from_columns(&[c.derivative, -t.derivative]);
        newton_step2(&jacobian, &(c.point - t.point))
    }

    fn advance(&self, x: &Vec2, delta: &Vec2, scale: f64) -> Vec2 {
        let (t0, t1) = self.curve.domain();
        let next = x + delta * scale;
        Vec2::new(next.x.clamp(t0, t1), self.normalize_s(next.y))
    }

    fn bracket(&self) -> Option<(f64, f64)> {
        Some(self.seed.bracket)
    }

    /// Signed side of `C(t)` relative to its closest trim point.
    fn bracket_value(&self, t: f64) -> f64 {
        let p = self.curve.point(t);
        let s = self.closest_s(&p);
        let sample = self.trim.evaluate(s);
        cross(&sample.derivative, &(p - sample.point))
    }

    fn point_at(&self, t: f64) -> Option<Vec2> {
        let s = self.closest_s(&self.curve.point(t));
        Some(Vec2::new(t, s))
    }
}

/// Intersections of one UV curve with all trims, plus the seeding counts.
#[derive(Debug, Clone, Default)]
pub struct RefineOutcome {
    /// Ascending by `t`, ties by trim index.
    pub intersections: Vec<Intersection>,
    pub seed_count: usize,
    pub unresolved_count: usize,
    pub warnings: Vec<Warning>,
}

/// Refine every curve/trim crossing. `trim_polylines[k]` must be the
/// discretisation of `trims[k]`.
#[instrument(skip_all, fields(trims = trims.len()))]
pub fn find_intersections<C, T>(
    curve: &C,
    trims: &[T],
    trim_polylines: &[Polyline],
    config: &PipelineConfig,
) -> RefineOutcome
where
    C: CurveEvaluator<2> + Sync + ?Sized,
    T: CurveEvaluator<2> + Sync,
{
    let curve_polyline = Polyline::discretize(curve, &config.seed);
    let solver = config.intersection_solver();
    let per_trim = refine_trims(curve, &curve_polyline, trims, trim_polylines, &solver, config);

    let mut outcome = RefineOutcome::default();
    for trim in per_trim {
        outcome.seed_count += trim.seed_count;
        outcome.unresolved_count += trim.unresolved_count;
        outcome.intersections.extend(trim.intersections);
        outcome.warnings.extend(trim.warnings);
    }
    outcome.intersections.sort_by(|a, b| {
        a.t.partial_cmp(&b.t)
            .unwrap_or(Ordering::Equal)
            .then(a.trim.cmp(&b.trim))
    });
    info!(
        seeds = outcome.seed_count,
        intersections = outcome.intersections.len(),
        unresolved = outcome.unresolved_count,
        "intersections refined"
    );
    outcome
}

#[cfg(feature = "parallel")]
fn refine_trims<C, T>(
    curve: &C,
    curve_polyline: &Polyline,
    trims: &[T],
    trim_polylines: &[Polyline],
    solver: &SolverConfig,
    config: &PipelineConfig,
) -> Vec<RefineOutcome>
where
    C: CurveEvaluator<2> + Sync + ?Sized,
    T: CurveEvaluator<2> + Sync,
{
    trims
        .par_iter()
        .zip(trim_polylines.par_iter())
        .enumerate()
        .map(|(k, (trim, polyline))| {
            refine_trim(curve, curve_polyline, k, trim, polyline, solver, config)
        })
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn refine_trims<C, T>(
    curve: &C,
    curve_polyline: &Polyline,
    trims: &[T],
    trim_polylines: &[Polyline],
    solver: &SolverConfig,
    config: &PipelineConfig,
) -> Vec<RefineOutcome>
where
    C: CurveEvaluator<2> + Sync + ?Sized,
    T: CurveEvaluator<2> + Sync,
{
    trims
        .iter()
        .zip(trim_polylines)
        .enumerate()
        .map(|(k, (trim, polyline))| {
            refine_trim(curve, curve_polyline, k, trim, polyline, solver, config)
        })
        .collect()
}

fn refine_trim<C, T>(
    curve: &C,
    curve_polyline: &Polyline,
    index: usize,
    trim: &T,
    trim_polyline: &Polyline,
    solver: &SolverConfig,
    config: &PipelineConfig,
) -> RefineOutcome
where
    C: CurveEvaluator<2> + ?Sized,
    T: CurveEvaluator<2>,
{
    let trim_closed = trim.is_closed(config.boundary_tolerance);
    let mut refined = refine_against(curve, curve_polyline, index, trim, trim_polyline, trim_closed, solver);

    // The inside test closes an open trim with a straight chord; crossings
    // of that chord toggle parity just like crossings of the trim itself.
    if !trim_closed {
        let (s0, s1) = trim.domain();
        let chord = LineCurve::new(trim.point(s1), trim.point(s0));
        let chord_polyline = Polyline::uniform(&chord, 1);
        let mut on_chord =
            refine_against(curve, curve_polyline, index, &chord, &chord_polyline, false, solver);
        for root in &mut on_chord.roots {
            root.closing_chord = true;
        }
        debug!(trim = index, roots = on_chord.roots.len(), "closing chord refined");
        refined.seed_count += on_chord.seed_count;
        refined.roots.extend(on_chord.roots);
        refined.failures.extend(on_chord.failures);
    }

    let intersections = dedup_roots(refined.roots, config.parameter_tolerance);

    // A failed seed is only a problem if no root was found for its segment.
    let mut warnings = Vec::new();
    for (seed, residual) in refined.failures {
        let (a, b) = seed.bracket;
        let tol = config.parameter_tolerance;
        if intersections.iter().any(|r| r.t >= a - tol && r.t <= b + tol) {
            continue;
        }
        warn!(trim = index, t = seed.t, s = seed.s, residual, "unresolved intersection dropped");
        warnings.push(Warning::UnresolvedIntersection {
            trim: index,
            t_seed: seed.t,
            s_seed: seed.s,
            residual,
        });
    }

    RefineOutcome {
        seed_count: refined.seed_count,
        unresolved_count: warnings.len(),
        intersections,
        warnings,
    }
}

/// Converged roots and failed seeds of one curve/boundary pair.
struct Refined {
    seed_count: usize,
    roots: Vec<Intersection>,
    failures: Vec<(Seed, f64)>,
}

fn refine_against<C, T>(
    curve: &C,
    curve_polyline: &Polyline,
    index: usize,
    trim: &T,
    trim_polyline: &Polyline,
    trim_closed: bool,
    solver: &SolverConfig,
) -> Refined
where
    C: CurveEvaluator<2> + ?Sized,
    T: CurveEvaluator<2> + ?Sized,
{
    let seeds = find_seeds(curve_polyline, trim_polyline);
    let mut roots: Vec<Intersection> = Vec::with_capacity(seeds.len());
    let mut failures: Vec<(Seed, f64)> = Vec::new();
    for seed in &seeds {
        let problem = IntersectionProblem {
            curve,
            trim,
            trim_closed,
            seed: *seed,
        };
        let result = find_root(&problem, Vec2::new(seed.t, seed.s), solver);
        if !result.converged {
            debug!(trim = index, t = seed.t, s = seed.s, residual = result.final_residual, "seed failed");
            failures.push((*seed, result.final_residual));
            continue;
        }
        let (t, s) = (result.point.x, result.point.y);
        let c = curve.evaluate(t);
        let tr = trim.evaluate(s);
        roots.push(Intersection {
            t,
            s,
            trim: index,
            point: c.point,
            residual: result.final_residual,
            crossing: cross(&c.derivative, &tr.derivative),
            resolved_by: result.phase,
            closing_chord: false,
        });
    }
    Refined {
        seed_count: seeds.len(),
        roots,
        failures,
    }
}

/// Merge roots closer than `tolerance` in `t` that cross the same way,
/// keeping the lowest residual. Output is ascending by `t`.
fn dedup_roots(mut roots: Vec<Intersection>, tolerance: f64) -> Vec<Intersection> {
    roots.sort_by(|a, b| a.t.partial_cmp(&b.t).unwrap_or(Ordering::Equal));
    let mut kept: Vec<Intersection> = Vec::with_capacity(roots.len());
    for root in roots {
        let duplicate = kept
            .iter_mut()
            .rev()
            .take_while(|k| root.t - k.t < tolerance)
            .find(|k| k.same_orientation(&root));
        match duplicate {
            Some(k) => {
                if root.residual < k.residual {
                    *k = root;
                }
            }
            None => kept.push(root),
        }
    }
    kept
}

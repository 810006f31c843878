//! Splitting retained intervals where the UV curve crosses patch seams.

use approx::abs_diff_eq;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uvclip_solver::{NewtonStep, RootProblem, SolverConfig, find_root, newton_step1};

use crate::clipper::RetainedInterval;
use crate::config::{PipelineConfig, SeedConfig};
use crate::geometry::{CurveEvaluator, SurfaceEvaluator};
use crate::grid::{PatchGrid, PatchId};
use crate::projector::sample_parameters;
use crate::refiner::Polyline;
use crate::report::Warning;

/// A piece of a retained interval that lies within one patch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatchSegment {
    pub patch: PatchId,
    pub t_start: f64,
    pub t_end: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SplitOutcome {
    pub segments: Vec<PatchSegment>,
    pub warnings: Vec<Warning>,
}

/// Root of `C_axis(t) = line` inside one scan step.
struct SeamProblem<'a, C: ?Sized> {
    curve: &'a C,
    axis: usize,
    line: f64,
    bracket: (f64, f64),
}

impl<C: CurveEvaluator<2> + ?Sized> SeamProblem<'_, C> {
    fn value(&self, t: f64) -> f64 {
        self.curve.point(t)[self.axis] - self.line
    }

    /// Solve from the secant guess between `(ta, ca)` and `(tb, cb)`.
    fn solve(&self, ca: f64, cb: f64, solver: &SolverConfig) -> f64 {
        let (ta, tb) = self.bracket;
        let guess = ta + (tb - ta) * (self.line - ca) / (cb - ca);
        let result = find_root(self, guess, solver);
        if result.converged {
            result.point
        } else {
            // Bracketed sign change: the secant guess is still the best estimate.
            debug!(axis = self.axis, line = self.line, t = guess, "seam crossing not converged");
            guess
        }
    }
}

impl<C: CurveEvaluator<2> + ?Sized> RootProblem for SeamProblem<'_, C> {
    type Point = f64;

    fn residual(&self, t: &f64) -> f64 {
        self.value(*t).abs()
    }

    fn newton_step(&self, t: &f64) -> NewtonStep<f64> {
        let sample = self.curve.evaluate(*t);
        newton_step1(sample.derivative[self.axis], sample.point[self.axis] - self.line)
    }

    fn advance(&self, t: &f64, delta: &f64, scale: f64) -> f64 {
        (t + scale * delta).clamp(self.bracket.0, self.bracket.1)
    }

    fn bracket(&self) -> Option<(f64, f64)> {
        Some(self.bracket)
    }

    fn bracket_value(&self, t: f64) -> f64 {
        self.value(t)
    }

    fn point_at(&self, t: f64) -> Option<f64> {
        Some(t)
    }
}

/// Turning point of `C_axis` inside a scan step whose end derivatives
/// have opposite signs: root of `C_axis'(t)`.
struct ExtremumProblem<'a, C: ?Sized> {
    curve: &'a C,
    axis: usize,
    bracket: (f64, f64),
}

impl<C: CurveEvaluator<2> + ?Sized> ExtremumProblem<'_, C> {
    fn slope(&self, t: f64) -> f64 {
        self.curve.evaluate(t).derivative[self.axis]
    }
}

impl<C: CurveEvaluator<2> + ?Sized> RootProblem for ExtremumProblem<'_, C> {
    type Point = f64;

    fn residual(&self, t: &f64) -> f64 {
        self.slope(*t).abs()
    }

    fn newton_step(&self, t: &f64) -> NewtonStep<f64> {
        let (a, b) = self.bracket;
        let h = 1e-6 * (b - a);
        let lo = (t - h).max(a);
        let hi = (t + h).min(b);
        if !(hi > lo) {
            return NewtonStep::singular();
        }
        let curvature = (self.slope(hi) - self.slope(lo)) / (hi - lo);
        newton_step1(curvature, self.slope(*t))
    }

    fn advance(&self, t: &f64, delta: &f64, scale: f64) -> f64 {
        (t + scale * delta).clamp(self.bracket.0, self.bracket.1)
    }

    fn bracket(&self) -> Option<(f64, f64)> {
        Some(self.bracket)
    }

    fn bracket_value(&self, t: f64) -> f64 {
        self.slope(t)
    }

    fn point_at(&self, t: f64) -> Option<f64> {
        Some(t)
    }
}

/// Scan parameters over `[a, b]`: a curvature-scaled polyline plus every
/// turning point of `U(t)` or `V(t)` between its vertices, so a curve that
/// pokes across a seam and returns within one step still changes sign
/// between two scan points.
fn scan_parameters<C>(curve: &C, a: f64, b: f64, config: &PipelineConfig) -> Vec<f64>
where
    C: CurveEvaluator<2> + ?Sized,
{
    let seed = SeedConfig {
        min_segments: config.seam_scan_samples,
        max_segments: config.seed.max_segments.max(config.seam_scan_samples),
        ..config.seed
    };
    let polyline = Polyline::discretize_range(curve, (a, b), &seed);
    let solver = config.intersection_solver();
    let slopes: Vec<_> = polyline
        .params
        .iter()
        .map(|&t| curve.evaluate(t).derivative)
        .collect();

    let mut params = Vec::with_capacity(polyline.params.len());
    for i in 0..polyline.segment_count() {
        let (ta, tb) = (polyline.params[i], polyline.params[i + 1]);
        params.push(ta);
        let mut turns: Vec<f64> = (0..2)
            .filter(|&axis| slopes[i][axis] * slopes[i + 1][axis] < 0.0)
            .map(|axis| {
                let (da, db) = (slopes[i][axis], slopes[i + 1][axis]);
                let problem = ExtremumProblem {
                    curve,
                    axis,
                    bracket: (ta, tb),
                };
                let guess = ta + (tb - ta) * da / (da - db);
                find_root(&problem, guess, &solver).point
            })
            .filter(|&t| t > ta && t < tb)
            .collect();
        turns.sort_by(|x, y| x.total_cmp(y));
        params.extend(turns);
    }
    params.push(b);
    params
}

/// Parameters in `[a, b]` where the curve crosses an integer `U` or `V` line.
fn seam_crossings<C>(curve: &C, a: f64, b: f64, config: &PipelineConfig) -> Vec<f64>
where
    C: CurveEvaluator<2> + ?Sized,
{
    let solver = config.intersection_solver();
    let ts = scan_parameters(curve, a, b, config);
    let points: Vec<_> = ts.iter().map(|&t| curve.point(t)).collect();

    let mut splits = Vec::new();
    for i in 0..ts.len() - 1 {
        let (ta, tb) = (ts[i], ts[i + 1]);
        for axis in 0..2 {
            let (ca, cb) = (points[i][axis], points[i + 1][axis]);
            let (lo, hi) = (ca.min(cb), ca.max(cb));
            for line in (lo.ceil() as i64)..=(hi.floor() as i64) {
                let line = line as f64;
                if ca == line {
                    splits.push(ta);
                    continue;
                }
                if cb == line {
                    splits.push(tb);
                    continue;
                }
                let problem = SeamProblem {
                    curve,
                    axis,
                    line,
                    bracket: (ta, tb),
                };
                splits.push(problem.solve(ca, cb, &solver));
            }
        }
    }
    splits.sort_by(|x, y| x.total_cmp(y));
    splits.dedup_by(|x, y| abs_diff_eq!(*x, *y, epsilon = config.parameter_tolerance));
    splits
}

/// Parameters where the curve leaves `patch` between the points the mapper
/// will sample on `[t_start, t_end]`.
///
/// Each place where a sampled point lies on the patch and its neighbour
/// does not brackets a crossing of the patch edge widened by the boundary
/// tolerance.
fn escape_crossings<C, S>(
    curve: &C,
    grid: &PatchGrid<S>,
    patch: PatchId,
    t_start: f64,
    t_end: f64,
    config: &PipelineConfig,
) -> Vec<f64>
where
    C: CurveEvaluator<2> + ?Sized,
    S: SurfaceEvaluator,
{
    let Some(corner) = grid.to_global(patch, 0.0, 0.0) else {
        return Vec::new();
    };
    let tol = config.boundary_tolerance;
    let mut ts = sample_parameters((t_start, t_end), config.samples_per_segment);
    ts.push(0.5 * (t_start + t_end));
    ts.sort_by(|x, y| x.total_cmp(y));
    let points: Vec<_> = ts.iter().map(|&t| curve.point(t)).collect();
    let on_patch: Vec<bool> = points
        .iter()
        .map(|&p| grid.to_local_in(p, patch, tol).is_some())
        .collect();

    let solver = config.intersection_solver();
    let mut splits = Vec::new();
    for i in 0..ts.len() - 1 {
        if on_patch[i] == on_patch[i + 1] {
            continue;
        }
        let (inside, outside) = if on_patch[i] {
            (points[i], points[i + 1])
        } else {
            (points[i + 1], points[i])
        };
        for axis in 0..2 {
            let lines = [corner[axis] - tol, corner[axis] + 1.0 + tol];
            for line in lines {
                if (inside[axis] - line) * (outside[axis] - line) >= 0.0 {
                    continue;
                }
                let problem = SeamProblem {
                    curve,
                    axis,
                    line,
                    bracket: (ts[i], ts[i + 1]),
                };
                splits.push(problem.solve(points[i][axis], points[i + 1][axis], &solver));
            }
        }
    }
    splits.sort_by(|x, y| x.total_cmp(y));
    splits.dedup_by(|x, y| abs_diff_eq!(*x, *y, epsilon = config.parameter_tolerance));
    splits
}

/// Nested re-splits allowed when a piece still leaves its owner.
const MAX_RESPLITS: usize = 4;

/// Assign every piece between consecutive `breaks` to a patch, splitting
/// again wherever a piece leaves its owner between mapped samples.
fn assign_pieces<C, S>(
    curve: &C,
    grid: &PatchGrid<S>,
    breaks: &[f64],
    depth: usize,
    config: &PipelineConfig,
    outcome: &mut SplitOutcome,
) where
    C: CurveEvaluator<2> + ?Sized,
    S: SurfaceEvaluator,
{
    let tol = config.parameter_tolerance;
    for w in breaks.windows(2) {
        let (t_start, t_end) = (w[0], w[1]);
        let mid = curve.point(0.5 * (t_start + t_end));
        let Some(local) = grid.to_local(mid, config.seam_policy, config.boundary_tolerance) else {
            warn!(t_start, t_end, "piece outside patch grid dropped");
            outcome.warnings.push(Warning::OutsideGrid { t_start, t_end });
            continue;
        };

        if depth < MAX_RESPLITS {
            let extra: Vec<f64> =
                escape_crossings(curve, grid, local.patch, t_start, t_end, config)
                    .into_iter()
                    .filter(|&t| t > t_start + tol && t < t_end - tol)
                    .collect();
            if !extra.is_empty() {
                debug!(patch = %local.patch, t_start, t_end, splits = extra.len(), "piece leaves its patch, splitting again");
                let mut sub = Vec::with_capacity(extra.len() + 2);
                sub.push(t_start);
                sub.extend(extra);
                sub.push(t_end);
                assign_pieces(curve, grid, &sub, depth + 1, config, outcome);
                continue;
            }
        }

        match outcome.segments.last_mut() {
            Some(last) if last.patch == local.patch && last.t_end == t_start => {
                last.t_end = t_end;
            }
            _ => outcome.segments.push(PatchSegment {
                patch: local.patch,
                t_start,
                t_end,
            }),
        }
    }
}

/// Split each retained interval at seam crossings and assign every piece to
/// the patch owning its midpoint.
///
/// Adjacent pieces with the same owner are merged. Pieces outside the grid
/// are dropped with an [`Warning::OutsideGrid`].
#[instrument(skip_all, fields(intervals = intervals.len()))]
pub fn split_by_patch<C, S>(
    curve: &C,
    grid: &PatchGrid<S>,
    intervals: &[RetainedInterval],
    config: &PipelineConfig,
) -> SplitOutcome
where
    C: CurveEvaluator<2> + ?Sized,
    S: SurfaceEvaluator,
{
    let tol = config.parameter_tolerance;
    let mut outcome = SplitOutcome::default();
    for interval in intervals {
        let (a, b) = (interval.t_start, interval.t_end);
        let mut breaks = vec![a];
        breaks.extend(
            seam_crossings(curve, a, b, config)
                .into_iter()
                .filter(|&t| t > a + tol && t < b - tol),
        );
        breaks.push(b);
        assign_pieces(curve, grid, &breaks, 0, config, &mut outcome);
    }
    info!(segments = outcome.segments.len(), "intervals split at seams");
    outcome
}

//! Parity clipping of the UV curve against the trim loops.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::geometry::{CurveEvaluator, Vec2};
use crate::refiner::{Intersection, Polyline};
use crate::report::Warning;

/// A parameter range of the UV curve that lies inside the trimmed region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetainedInterval {
    pub t_start: f64,
    pub t_end: f64,
}

impl RetainedInterval {
    pub fn length(&self) -> f64 {
        self.t_end - self.t_start
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.t_start + self.t_end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClipOutcome {
    /// Ascending and non-overlapping.
    pub intervals: Vec<RetainedInterval>,
    pub warnings: Vec<Warning>,
}

/// Even-odd classification of `p` against all loops together.
pub fn is_inside(loops: &[Polyline], p: &Vec2) -> bool {
    loops.iter().filter(|l| l.contains(p)).count() % 2 == 1
}

/// Parameters at which the inside/outside state flips.
///
/// Intersections within `tolerance` of their neighbour form one cluster: an
/// odd cluster flips once at its mean, an even one cancels out.
pub fn toggle_parameters(intersections: &[Intersection], tolerance: f64) -> Vec<f64> {
    let mut toggles = Vec::new();
    let mut cluster: Vec<f64> = Vec::new();
    let mut flush = |cluster: &mut Vec<f64>| {
        if cluster.len() % 2 == 1 {
            toggles.push(cluster.iter().sum::<f64>() / cluster.len() as f64);
        } else if !cluster.is_empty() {
            debug!(at = cluster[0], size = cluster.len(), "even crossing cluster cancelled");
        }
        cluster.clear();
    };
    for hit in intersections {
        if let Some(&last) = cluster.last() {
            if hit.t - last > tolerance {
                flush(&mut cluster);
            }
        }
        cluster.push(hit.t);
    }
    flush(&mut cluster);
    toggles
}

/// Split the curve domain at the toggles and keep the inside pieces.
///
/// The state of the first piece comes from a point test at its midpoint;
/// every later piece alternates. With no trim loops at all the surface is
/// untrimmed and the whole curve is kept.
#[instrument(skip_all, fields(intersections = intersections.len(), loops = loops.len()))]
pub fn clip_intervals<C>(
    curve: &C,
    intersections: &[Intersection],
    loops: &[Polyline],
    config: &PipelineConfig,
) -> ClipOutcome
where
    C: CurveEvaluator<2> + ?Sized,
{
    let (t0, t1) = curve.domain();
    if loops.is_empty() {
        return ClipOutcome {
            intervals: vec![RetainedInterval {
                t_start: t0,
                t_end: t1,
            }],
            warnings: Vec::new(),
        };
    }

    let end_tolerance = config.toggle_tolerance;
    let mut breaks = vec![t0];
    breaks.extend(
        toggle_parameters(intersections, config.toggle_tolerance)
            .into_iter()
            .filter(|&t| t > t0 + end_tolerance && t < t1 - end_tolerance),
    );
    breaks.push(t1);

    let classify = |a: f64, b: f64| is_inside(loops, &curve.point(0.5 * (a + b)));
    let first_inside = classify(breaks[0], breaks[1]);

    let mut outcome = ClipOutcome::default();
    for (k, w) in breaks.windows(2).enumerate() {
        let (a, b) = (w[0], w[1]);
        let inside = first_inside ^ (k % 2 == 1);
        if b - a < config.parameter_tolerance {
            continue;
        }
        if k > 0 && classify(a, b) != inside {
            warn!(t_start = a, t_end = b, expected_inside = inside, "parity mismatch");
            outcome.warnings.push(Warning::ParityMismatch {
                t_start: a,
                t_end: b,
                expected_inside: inside,
            });
        }
        if inside {
            outcome.intervals.push(RetainedInterval {
                t_start: a,
                t_end: b,
            });
        }
    }
    info!(
        pieces = breaks.len() - 1,
        retained = outcome.intervals.len(),
        "curve clipped"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Circle2d, LineCurve};
    use uvclip_solver::RootPhase;

    fn hit(t: f64) -> Intersection {
        Intersection {
            t,
            s: 0.0,
            trim: 0,
            point: Vec2::zeros(),
            residual: 0.0,
            crossing: 1.0,
            resolved_by: RootPhase::Newton,
            closing_chord: false,
        }
    }

    fn circle_loop() -> Vec<Polyline> {
        let circle = Circle2d::new(Vec2::new(1.0, 0.5), 0.3);
        vec![Polyline::discretize(&circle, &PipelineConfig::default().seed)]
    }

    #[test]
    fn test_toggle_clusters() {
        let hits = [hit(0.2), hit(0.5), hit(0.5 + 1e-7), hit(0.7), hit(0.7 + 1e-7), hit(0.7 + 2e-7)];
        let toggles = toggle_parameters(&hits, 1e-6);
        assert_eq!(toggles.len(), 2);
        assert_eq!(toggles[0], 0.2);
        assert!((toggles[1] - (0.7 + 1e-7)).abs() < 1e-12);
    }

    #[test]
    fn test_line_through_circle_keeps_chord() {
        let curve = LineCurve::new(Vec2::new(0.1, 0.5), Vec2::new(1.9, 0.5));
        let hits = [hit(0.6 / 1.8), hit(1.2 / 1.8)];
        let out = clip_intervals(&curve, &hits, &circle_loop(), &PipelineConfig::default());
        assert_eq!(out.intervals.len(), 1);
        assert!((out.intervals[0].t_start - 0.6 / 1.8).abs() < 1e-12);
        assert!((out.intervals[0].t_end - 1.2 / 1.8).abs() < 1e-12);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_no_intersections_whole_or_nothing() {
        let config = PipelineConfig::default();
        let inside = LineCurve::new(Vec2::new(0.9, 0.5), Vec2::new(1.1, 0.5));
        let out = clip_intervals(&inside, &[], &circle_loop(), &config);
        assert_eq!(out.intervals, vec![RetainedInterval { t_start: 0.0, t_end: 1.0 }]);

        let outside = LineCurve::new(Vec2::new(0.1, 0.95), Vec2::new(1.9, 0.95));
        let out = clip_intervals(&outside, &[], &circle_loop(), &config);
        assert!(out.intervals.is_empty());
    }

    #[test]
    fn test_no_trims_keeps_everything() {
        let curve = LineCurve::new(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0));
        let out = clip_intervals(&curve, &[], &[], &PipelineConfig::default());
        assert_eq!(out.intervals.len(), 1);
        assert_eq!(out.intervals[0].length(), 1.0);
    }

    #[test]
    fn test_crossing_at_domain_start_is_consumed() {
        // Starts exactly on the circle and runs inward.
        let curve = LineCurve::new(Vec2::new(0.7, 0.5), Vec2::new(1.0, 0.5));
        let out = clip_intervals(&curve, &[hit(0.0)], &circle_loop(), &PipelineConfig::default());
        assert_eq!(out.intervals, vec![RetainedInterval { t_start: 0.0, t_end: 1.0 }]);
    }

    #[test]
    fn test_spurious_crossing_reports_parity_mismatch() {
        let curve = LineCurve::new(Vec2::new(0.9, 0.5), Vec2::new(1.1, 0.5));
        let out = clip_intervals(&curve, &[hit(0.5)], &circle_loop(), &PipelineConfig::default());
        // The result follows parity; the point test flags the second half.
        assert_eq!(out.intervals.len(), 1);
        assert_eq!(out.intervals[0].t_end, 0.5);
        assert_eq!(out.warnings.len(), 1);
        assert!(matches!(
            out.warnings[0],
            Warning::ParityMismatch { expected_inside: false, .. }
        ));
    }

    #[test]
    fn test_nested_loops_even_odd() {
        let outer = Circle2d::new(Vec2::new(0.0, 0.0), 1.0);
        let hole = Circle2d::new(Vec2::new(0.0, 0.0), 0.4);
        let seed = PipelineConfig::default().seed;
        let loops = vec![Polyline::discretize(&outer, &seed), Polyline::discretize(&hole, &seed)];
        assert!(is_inside(&loops, &Vec2::new(0.7, 0.0)));
        assert!(!is_inside(&loops, &Vec2::new(0.0, 0.0)));
        assert!(!is_inside(&loops, &Vec2::new(1.5, 0.0)));
    }
}

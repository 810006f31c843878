//! Pipeline entry points.
//!
//! `project → fit → refine → clip → split → map`, each stage consuming the
//! previous stage's output. Recoverable problems end up in the
//! [`RunReport`]; anything fatal is a [`PipelineError`].

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::clipper::{RetainedInterval, clip_intervals};
use crate::config::PipelineConfig;
use crate::error::{GeometryError, PipelineError};
use crate::fitter::{UvSpline, fit_uv_curve};
use crate::geometry::{CurveEvaluator, SurfaceEvaluator};
use crate::grid::PatchGrid;
use crate::mapper::{ClippedSegment, map_segments};
use crate::projector::{DirectionField, project_curve, sample_parameters};
use crate::refiner::{Intersection, Polyline, find_intersections};
use crate::report::{RunReport, Warning};
use crate::splitter::split_by_patch;

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipOutput {
    /// Retained pieces, ascending by `t`, each on a single patch.
    pub segments: Vec<ClippedSegment>,
    pub intersections: Vec<Intersection>,
    pub intervals: Vec<RetainedInterval>,
    pub report: RunReport,
    /// The fitted global UV curve (`None` when the caller supplied it).
    pub uv_curve: Option<UvSpline>,
}

/// Project a 3-D curve onto the grid along `direction`, then clip it to the
/// trims and map the retained pieces back to 3-D.
#[instrument(skip_all, fields(patches = grid.len(), trims = trims.len()))]
pub fn project_and_clip<C, S, T, D>(
    input: &C,
    grid: &PatchGrid<S>,
    trims: &[T],
    direction: &D,
    config: &PipelineConfig,
) -> Result<ClipOutput, PipelineError>
where
    C: CurveEvaluator<3> + Sync + ?Sized,
    S: SurfaceEvaluator + Sync,
    T: CurveEvaluator<2> + Sync,
    D: DirectionField + Sync + ?Sized,
{
    config.validate()?;
    grid.validate()?;
    let domain = checked_domain(input.domain())?;

    let parameters = sample_parameters(domain, config.projection_samples);
    let projection = project_curve(input, grid, direction, &parameters, config);

    let mut report = RunReport {
        samples: parameters.len(),
        ..RunReport::default()
    };
    if let Some((t_first, t_last)) = projection.unprojected_range() {
        let count = projection.unprojected_count();
        warn!(count, t_first, t_last, "samples could not be projected");
        report.unprojected_count = count;
        report.unprojected_range = Some((t_first, t_last));
        report.push(Warning::UnprojectableSample {
            count,
            t_first,
            t_last,
        });
    }

    let fitted = fit_uv_curve(&projection, domain, config)?;
    report.fit_deviation = fitted.max_deviation;

    let mut output = clip_stages(&fitted.spline, grid, trims, config, report)?;
    output.uv_curve = Some(fitted.spline);
    Ok(output)
}

/// Clip a curve already given in global UV and map it to 3-D.
#[instrument(skip_all, fields(patches = grid.len(), trims = trims.len()))]
pub fn clip_uv_curve<C, S, T>(
    uv_curve: &C,
    grid: &PatchGrid<S>,
    trims: &[T],
    config: &PipelineConfig,
) -> Result<ClipOutput, PipelineError>
where
    C: CurveEvaluator<2> + Sync + ?Sized,
    S: SurfaceEvaluator + Sync,
    T: CurveEvaluator<2> + Sync,
{
    config.validate()?;
    grid.validate()?;
    checked_domain(uv_curve.domain())?;
    clip_stages(uv_curve, grid, trims, config, RunReport::default())
}

fn checked_domain(domain: (f64, f64)) -> Result<(f64, f64), PipelineError> {
    if domain.1 > domain.0 && domain.0.is_finite() && domain.1.is_finite() {
        Ok(domain)
    } else {
        Err(GeometryError::EmptyDomain {
            start: domain.0,
            end: domain.1,
        }
        .into())
    }
}

fn clip_stages<C, S, T>(
    curve: &C,
    grid: &PatchGrid<S>,
    trims: &[T],
    config: &PipelineConfig,
    mut report: RunReport,
) -> Result<ClipOutput, PipelineError>
where
    C: CurveEvaluator<2> + Sync + ?Sized,
    S: SurfaceEvaluator + Sync,
    T: CurveEvaluator<2> + Sync,
{
    let loops: Vec<Polyline> = trims
        .iter()
        .map(|trim| Polyline::discretize(trim, &config.seed))
        .collect();

    let refined = find_intersections(curve, trims, &loops, config);
    report.seed_count = refined.seed_count;
    report.intersection_count = refined.intersections.len();
    report.unresolved_count = refined.unresolved_count;
    report.extend(refined.warnings);

    let clipped = clip_intervals(curve, &refined.intersections, &loops, config);
    report.interval_count = clipped.intervals.len();
    report.extend(clipped.warnings);

    let split = split_by_patch(curve, grid, &clipped.intervals, config);
    report.extend(split.warnings);

    let segments = map_segments(curve, grid, &split.segments, config)?;
    report.segment_count = segments.len();

    info!(
        intersections = report.intersection_count,
        intervals = report.interval_count,
        segments = report.segment_count,
        warnings = report.warnings.len(),
        "pipeline complete"
    );
    Ok(ClipOutput {
        segments,
        intersections: refined.intersections,
        intervals: clipped.intervals,
        report,
        uv_curve: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BezierPatch, Circle2d, LineCurve, Vec2, Vec3};
    use crate::grid::GridOffset;

    fn unit_grid() -> PatchGrid<BezierPatch> {
        PatchGrid::new(vec![(
            GridOffset::new(0, 0),
            BezierPatch::bilinear(
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
            ),
        )])
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected_before_work() {
        let config = PipelineConfig {
            samples_per_segment: 1,
            ..PipelineConfig::default()
        };
        let curve = LineCurve::new(Vec2::new(0.1, 0.5), Vec2::new(0.9, 0.5));
        let err = clip_uv_curve(&curve, &unit_grid(), &[] as &[Circle2d], &config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_clip_uv_curve_without_trims() {
        let curve = LineCurve::new(Vec2::new(0.1, 0.5), Vec2::new(0.9, 0.5));
        let out = clip_uv_curve(
            &curve,
            &unit_grid(),
            &[] as &[Circle2d],
            &PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.segments.len(), 1);
        assert_eq!(out.intervals.len(), 1);
        assert!(out.intersections.is_empty());
        assert!(!out.report.has_warnings());
        assert!(out.uv_curve.is_none());
    }

    #[test]
    fn test_project_and_clip_reports_fit() {
        let curve = LineCurve::new(Vec3::new(0.1, 0.5, 2.0), Vec3::new(0.9, 0.5, 2.0));
        let trims = [Circle2d::new(Vec2::new(0.5, 0.5), 0.2)];
        let out = project_and_clip(
            &curve,
            &unit_grid(),
            &trims,
            &Vec3::new(0.0, 0.0, -1.0),
            &PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.report.samples, 200);
        assert!(out.report.fit_deviation < 1e-8);
        assert_eq!(out.intersections.len(), 2);
        assert_eq!(out.segments.len(), 1);
        let seg = &out.segments[0];
        assert!((seg.t_start - 0.25).abs() < 1e-7);
        assert!((seg.t_end - 0.75).abs() < 1e-7);
        assert!(out.uv_curve.is_some());
    }
}

//! Mapping patch-split segments back to 3-D.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::geometry::{CurveEvaluator, SurfaceEvaluator, Vec2, Vec3};
use crate::grid::{LocalUv, PatchGrid, PatchId};
use crate::projector::sample_parameters;
use crate::splitter::PatchSegment;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvSample {
    pub t: f64,
    pub global: Vec2,
    pub local: LocalUv,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpaceSample {
    pub t: f64,
    pub point: Vec3,
    /// `dS/dt = Su u'(t) + Sv v'(t)`
    pub tangent: Vec3,
}

/// One retained piece of the curve on one patch, sampled in UV and 3-D.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClippedSegment {
    pub patch: PatchId,
    pub t_start: f64,
    pub t_end: f64,
    pub uv: Vec<UvSample>,
    pub xyz: Vec<SpaceSample>,
}

/// Evaluate the UV curve at `t` on `patch`.
///
/// The point must lie within `tolerance` of the patch's domain; anything
/// else means the splitter assigned the wrong owner.
pub fn map_point<C, S>(
    curve: &C,
    grid: &PatchGrid<S>,
    patch: PatchId,
    t: f64,
    tolerance: f64,
) -> Result<(UvSample, SpaceSample), PipelineError>
where
    C: CurveEvaluator<2> + ?Sized,
    S: SurfaceEvaluator,
{
    let (Some(offset), Some(surface)) = (grid.to_global(patch, 0.0, 0.0), grid.surface(patch))
    else {
        return Err(PipelineError::grid(format!("patch {patch} is not in the grid")));
    };
    let sample = curve.evaluate(t);
    let global = sample.point;
    let Some(local) = grid.to_local_in(global, patch, tolerance) else {
        let raw = global - offset;
        return Err(PipelineError::DomainViolation {
            patch,
            t,
            u: raw.x,
            v: raw.y,
        });
    };

    let s = surface.evaluate(local.u, local.v);
    let tangent = s.du * sample.derivative.x + s.dv * sample.derivative.y;
    Ok((
        UvSample { t, global, local },
        SpaceSample {
            t,
            point: s.point,
            tangent,
        },
    ))
}

/// Sample every segment at `samples_per_segment` uniform parameters (end
/// points included) and map them to 3-D.
#[instrument(skip_all, fields(segments = segments.len()))]
pub fn map_segments<C, S>(
    curve: &C,
    grid: &PatchGrid<S>,
    segments: &[PatchSegment],
    config: &PipelineConfig,
) -> Result<Vec<ClippedSegment>, PipelineError>
where
    C: CurveEvaluator<2> + ?Sized,
    S: SurfaceEvaluator,
{
    let mapped = segments
        .iter()
        .map(|segment| -> Result<ClippedSegment, PipelineError> {
            let (uv, xyz) = sample_parameters(
                (segment.t_start, segment.t_end),
                config.samples_per_segment,
            )
            .into_iter()
            .map(|t| map_point(curve, grid, segment.patch, t, config.boundary_tolerance))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unzip();
            Ok(ClippedSegment {
                patch: segment.patch,
                t_start: segment.t_start,
                t_end: segment.t_end,
                uv,
                xyz,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        samples = mapped.iter().map(|s| s.xyz.len()).sum::<usize>(),
        "segments mapped to 3d"
    );
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BezierPatch, LineCurve};
    use crate::grid::GridOffset;

    fn tilted_grid() -> PatchGrid<BezierPatch> {
        // z = x on both patches.
        let patch = |x: f64| {
            BezierPatch::bilinear(
                Vec3::new(x, 0.0, x),
                Vec3::new(x + 1.0, 0.0, x + 1.0),
                Vec3::new(x, 1.0, x),
                Vec3::new(x + 1.0, 1.0, x + 1.0),
            )
        };
        PatchGrid::new(vec![
            (GridOffset::new(0, 0), patch(0.0)),
            (GridOffset::new(1, 0), patch(1.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_map_point_chain_rule() {
        let grid = tilted_grid();
        let curve = LineCurve::new(Vec2::new(1.2, 0.1), Vec2::new(1.6, 0.9));
        let (uv, xyz) = map_point(&curve, &grid, PatchId(1), 0.5, 1e-6).unwrap();
        assert!((uv.local.u - 0.4).abs() < 1e-12);
        assert!((uv.local.v - 0.5).abs() < 1e-12);
        assert!((xyz.point - Vec3::new(1.4, 0.5, 1.4)).norm() < 1e-12);
        // C'(t) = (0.4, 0.8), Su = (1, 0, 1), Sv = (0, 1, 0)
        assert!((xyz.tangent - Vec3::new(0.4, 0.8, 0.4)).norm() < 1e-12);
    }

    #[test]
    fn test_domain_violation() {
        let grid = tilted_grid();
        let curve = LineCurve::new(Vec2::new(1.2, 0.1), Vec2::new(1.6, 0.9));
        let err = map_point(&curve, &grid, PatchId(0), 0.5, 1e-6).unwrap_err();
        match err {
            PipelineError::DomainViolation { patch, u, .. } => {
                assert_eq!(patch, PatchId(0));
                assert!((u - 1.4).abs() < 1e-12);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_map_segments_samples_end_points() {
        let grid = tilted_grid();
        let curve = LineCurve::new(Vec2::new(0.5, 0.5), Vec2::new(1.5, 0.5));
        let segments = [
            PatchSegment {
                patch: PatchId(0),
                t_start: 0.0,
                t_end: 0.5,
            },
            PatchSegment {
                patch: PatchId(1),
                t_start: 0.5,
                t_end: 1.0,
            },
        ];
        let config = PipelineConfig::default();
        let mapped = map_segments(&curve, &grid, &segments, &config).unwrap();
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].xyz.len(), config.samples_per_segment);
        assert_eq!(mapped[0].uv[0].t, 0.0);
        assert_eq!(mapped[0].uv.last().unwrap().t, 0.5);
        let seam_left = mapped[0].xyz.last().unwrap().point;
        let seam_right = mapped[1].xyz[0].point;
        assert!((seam_left - seam_right).norm() < 1e-12);
    }
}

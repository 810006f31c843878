//! End-to-end tests of the projection and clipping pipeline.

use approx::assert_relative_eq;

use uvclip_kernel::geometry::nurbs::NurbsCurve;
use uvclip_kernel::mapper::map_point;
use uvclip_kernel::{
    BezierPatch, Circle2d, CurveEvaluator, DirectionFn, FnCurve, GridOffset, LineCurve, PatchGrid, PatchId,
    PipelineConfig, PipelineError, SeamPolicy, Vec2, Vec3, Warning, clip_uv_curve,
    project_and_clip,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Two flat patches: S0(u,v) = (u, v, 0), S1(u,v) = (1 + u, v, 0).
fn flat_pair() -> PatchGrid<BezierPatch> {
    let patch = |x: f64| {
        BezierPatch::bilinear(
            Vec3::new(x, 0.0, 0.0),
            Vec3::new(x + 1.0, 0.0, 0.0),
            Vec3::new(x, 1.0, 0.0),
            Vec3::new(x + 1.0, 1.0, 0.0),
        )
    };
    PatchGrid::new(vec![
        (GridOffset::new(0, 0), patch(0.0)),
        (GridOffset::new(1, 0), patch(1.0)),
    ])
    .unwrap()
}

/// 13 x 4 cubic control net: four Bézier patches along U over a wavy sheet.
/// Control point x/y are evenly spaced, so global U = x / 3 and V = y / 3.
fn wavy_net() -> PatchGrid<BezierPatch> {
    let net: Vec<Vec<Vec3>> = (0..13)
        .map(|i| {
            (0..4)
                .map(|j| {
                    let z = 0.25
                        * (std::f64::consts::PI * i as f64 / 12.0).sin()
                        * (std::f64::consts::PI * j as f64 / 3.0).cos();
                    Vec3::new(i as f64, j as f64, z)
                })
                .collect()
        })
        .collect();
    PatchGrid::from_control_net(&net, 3).unwrap()
}

fn trim_circle() -> Circle2d {
    Circle2d::new(Vec2::new(1.0, 0.5), 0.3)
}

fn uv_line(a: (f64, f64), b: (f64, f64)) -> LineCurve<2> {
    LineCurve::new(Vec2::new(a.0, a.1), Vec2::new(b.0, b.1))
}

// ---------------------------------------------------------------------------
// Parity clipping
// ---------------------------------------------------------------------------

#[test]
fn line_through_circle_keeps_the_chord_split_at_the_seam() {
    let curve = uv_line((0.1, 0.55), (1.9, 0.55));
    let out = clip_uv_curve(&curve, &flat_pair(), &[trim_circle()], &PipelineConfig::default())
        .unwrap();

    let dx = (0.09f64 - 0.0025).sqrt();
    let t_in = (1.0 - dx - 0.1) / 1.8;
    let t_out = (1.0 + dx - 0.1) / 1.8;

    assert_eq!(out.intersections.len(), 2);
    assert_eq!(out.intervals.len(), 1);
    assert!((out.intervals[0].t_start - t_in).abs() < 1e-8);
    assert!((out.intervals[0].t_end - t_out).abs() < 1e-8);

    assert_eq!(out.segments.len(), 2);
    assert_eq!(out.segments[0].patch, PatchId(0));
    assert_eq!(out.segments[1].patch, PatchId(1));
    assert!((out.segments[0].t_end - 0.5).abs() < 1e-9);
    assert!(!out.report.has_warnings(), "{:?}", out.report.warnings);

    // Seam continuity in 3-D.
    let left = out.segments[0].xyz.last().unwrap();
    let right = out.segments[1].xyz.first().unwrap();
    assert!((left.point - right.point).norm() < 1e-9);
    assert_relative_eq!(left.point, Vec3::new(1.0, 0.55, 0.0), epsilon = 1e-9);
}

#[test]
fn curve_inside_without_crossings_is_kept_whole() {
    let curve = uv_line((0.9, 0.5), (1.1, 0.5));
    let out = clip_uv_curve(&curve, &flat_pair(), &[trim_circle()], &PipelineConfig::default())
        .unwrap();
    assert!(out.intersections.is_empty());
    assert_eq!(out.intervals.len(), 1);
    assert_eq!((out.intervals[0].t_start, out.intervals[0].t_end), (0.0, 1.0));
    // Still split where it crosses U = 1.
    assert_eq!(out.segments.len(), 2);
}

#[test]
fn curve_outside_without_crossings_is_dropped() {
    let curve = uv_line((0.1, 0.95), (1.9, 0.95));
    let out = clip_uv_curve(&curve, &flat_pair(), &[trim_circle()], &PipelineConfig::default())
        .unwrap();
    assert!(out.intersections.is_empty());
    assert!(out.intervals.is_empty());
    assert!(out.segments.is_empty());
}

#[test]
fn near_tangent_line_produces_no_spurious_interval() {
    let curve = uv_line((0.1, 0.8 + 1e-9), (1.9, 0.8 + 1e-9));
    let out = clip_uv_curve(&curve, &flat_pair(), &[trim_circle()], &PipelineConfig::default())
        .unwrap();
    assert!(out.intersections.len() <= 1);
    let retained: f64 = out.intervals.iter().map(|i| i.length()).sum();
    assert!(retained < 1e-6, "retained {retained}");
}

#[test]
fn annulus_keeps_both_rings() {
    let trims = [
        Circle2d::new(Vec2::new(1.0, 0.5), 0.45),
        Circle2d::new(Vec2::new(1.0, 0.5), 0.15),
    ];
    let curve = uv_line((0.2, 0.5), (1.8, 0.5));
    let out = clip_uv_curve(&curve, &flat_pair(), &trims, &PipelineConfig::default()).unwrap();

    assert_eq!(out.intersections.len(), 4);
    let expected = [(0.21875, 0.40625), (0.59375, 0.78125)];
    assert_eq!(out.intervals.len(), 2);
    for (interval, (a, b)) in out.intervals.iter().zip(expected) {
        assert!((interval.t_start - a).abs() < 1e-8);
        assert!((interval.t_end - b).abs() < 1e-8);
    }
    let owners: Vec<PatchId> = out.segments.iter().map(|s| s.patch).collect();
    assert_eq!(owners, vec![PatchId(0), PatchId(1)]);
}

#[test]
fn no_trims_keeps_the_whole_curve() {
    let curve = uv_line((0.1, 0.1), (1.9, 0.9));
    let out = clip_uv_curve(&curve, &flat_pair(), &[] as &[Circle2d], &PipelineConfig::default())
        .unwrap();
    assert_eq!(out.intervals.len(), 1);
    assert_eq!(out.segments.len(), 2);
}

#[test]
fn open_trim_is_closed_by_a_chord_on_both_sides_of_the_clip() {
    // Upper half of the trim circle, ending on the line y = 0.5.
    let arc = FnCurve::new((0.0, std::f64::consts::PI), |s: f64| {
        (
            Vec2::new(1.0 + 0.3 * s.cos(), 0.5 + 0.3 * s.sin()),
            Vec2::new(-0.3 * s.sin(), 0.3 * s.cos()),
        )
    })
    .unwrap();
    let curve = uv_line((0.9, 0.1), (0.9, 0.9));
    let out = clip_uv_curve(&curve, &flat_pair(), &[arc], &PipelineConfig::default()).unwrap();

    let top = 0.5 + (0.09f64 - 0.01).sqrt();
    assert_eq!(out.intervals.len(), 1);
    assert!((out.intervals[0].t_start - 0.5).abs() < 1e-8);
    assert!((out.intervals[0].t_end - (top - 0.1) / 0.8).abs() < 1e-8);
    assert_eq!(
        out.report.count(|w| matches!(w, Warning::ParityMismatch { .. })),
        0
    );
    assert!(out.intersections.iter().any(|i| i.closing_chord));
}

// ---------------------------------------------------------------------------
// Seams and the grid boundary
// ---------------------------------------------------------------------------

#[test]
fn seam_policy_decides_owner_of_curve_on_seam() {
    let curve = uv_line((1.0, 0.1), (1.0, 0.9));
    let low = clip_uv_curve(&curve, &flat_pair(), &[] as &[Circle2d], &PipelineConfig::default())
        .unwrap();
    assert_eq!(low.segments.len(), 1);
    assert_eq!(low.segments[0].patch, PatchId(0));
    assert_eq!(low.segments[0].uv[0].local.u, 1.0);

    let config = PipelineConfig::default().with_seam_policy(SeamPolicy::HighestIndex);
    let high = clip_uv_curve(&curve, &flat_pair(), &[] as &[Circle2d], &config).unwrap();
    assert_eq!(high.segments.len(), 1);
    assert_eq!(high.segments[0].patch, PatchId(1));
    assert_eq!(high.segments[0].uv[0].local.u, 0.0);
}

#[test]
fn piece_leaving_the_grid_is_dropped_with_warning() {
    let curve = uv_line((1.5, 0.5), (2.5, 0.5));
    let out = clip_uv_curve(&curve, &flat_pair(), &[] as &[Circle2d], &PipelineConfig::default())
        .unwrap();
    assert_eq!(out.segments.len(), 1);
    assert_eq!(out.segments[0].patch, PatchId(1));
    assert!((out.segments[0].t_end - 0.5).abs() < 1e-9);
    assert_eq!(
        out.report.count(|w| matches!(w, Warning::OutsideGrid { .. })),
        1
    );
}

#[test]
fn narrow_excursion_across_a_seam_gets_its_own_segment() {
    // Reaches U = 1.1 around t = 15/31 and is back at U = 0.5 well within
    // one scan step on either side.
    let center = 15.0 / 31.0;
    let width = 2e-4;
    let curve = FnCurve::new((0.0, 1.0), move |t: f64| {
        let x = (t - center) / width;
        let g = 0.6 * (-x * x).exp();
        (Vec2::new(0.5 + g, 0.5), Vec2::new(-2.0 * x / width * g, 0.0))
    })
    .unwrap();
    let out = clip_uv_curve(&curve, &flat_pair(), &[] as &[Circle2d], &PipelineConfig::default())
        .unwrap();
    let owners: Vec<PatchId> = out.segments.iter().map(|s| s.patch).collect();
    assert_eq!(owners, vec![PatchId(0), PatchId(1), PatchId(0)]);
    let peak = &out.segments[1];
    assert!(peak.t_start < center && center < peak.t_end);
    for sample in &peak.uv {
        assert!(sample.global.x >= 1.0 - 1e-6);
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

#[test]
fn projected_line_lands_on_its_shadow() {
    let input = LineCurve::new(Vec3::new(0.6, 0.3, 2.0), Vec3::new(11.4, 2.7, 2.0));
    let out = project_and_clip(
        &input,
        &wavy_net(),
        &[] as &[Circle2d],
        &Vec3::new(0.0, 0.0, -1.0),
        &PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(out.report.unprojected_count, 0);
    // U crosses 1, 2 and 3.
    assert_eq!(out.segments.len(), 4);
    for segment in &out.segments {
        for (uv, xyz) in segment.uv.iter().zip(&segment.xyz) {
            let shadow = input.point(uv.t);
            assert!((uv.global - Vec2::new(shadow.x / 3.0, shadow.y / 3.0)).norm() < 1e-7);
            assert!((xyz.point.xy() - shadow.xy()).norm() < 1e-6);
        }
    }
}

#[test]
fn narrow_projection_gap_is_bridged() {
    let input = LineCurve::new(Vec3::new(0.1, 0.5, 1.0), Vec3::new(1.9, 0.5, 1.0));
    // Sideways (parallel to the patches) around the middle of the curve.
    let direction = DirectionFn(|t: f64, _p: &Vec3| {
        if t > 0.49 && t < 0.51 {
            Vec3::new(1.0, 0.0, 0.0)
        } else {
            Vec3::new(0.0, 0.0, -1.0)
        }
    });
    let out = project_and_clip(
        &input,
        &flat_pair(),
        &[trim_circle()],
        &direction,
        &PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(out.report.unprojected_count, 4);
    assert!(matches!(
        out.report.warnings[0],
        Warning::UnprojectableSample { count: 4, .. }
    ));
    let spline = out.uv_curve.as_ref().unwrap();
    assert!((spline.point(0.5) - Vec2::new(1.0, 0.5)).norm() < 1e-9);
    assert_eq!(out.intervals.len(), 1);
}

#[test]
fn wide_projection_gap_fails() {
    let input = LineCurve::new(Vec3::new(0.1, 0.5, 1.0), Vec3::new(1.9, 0.5, 1.0));
    let direction = DirectionFn(|t: f64, _p: &Vec3| {
        if t > 0.3 && t < 0.7 {
            Vec3::new(1.0, 0.0, 0.0)
        } else {
            Vec3::new(0.0, 0.0, -1.0)
        }
    });
    let err = project_and_clip(
        &input,
        &flat_pair(),
        &[trim_circle()],
        &direction,
        &PipelineConfig::default(),
    )
    .unwrap_err();
    match err {
        PipelineError::ProjectionIncomplete { width, max_gap, .. } => {
            assert!(width > 0.4);
            assert_eq!(max_gap, 0.05);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn curve_missing_the_grid_entirely_fails() {
    let input = LineCurve::new(Vec3::new(5.0, 5.0, 1.0), Vec3::new(6.0, 5.0, 1.0));
    let err = project_and_clip(
        &input,
        &flat_pair(),
        &[] as &[Circle2d],
        &Vec3::new(0.0, 0.0, -1.0),
        &PipelineConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::ProjectionIncomplete { .. }));
}

// ---------------------------------------------------------------------------
// 3-D mapping
// ---------------------------------------------------------------------------

#[test]
fn tangents_match_finite_differences_on_wavy_net() {
    let grid = wavy_net();
    let curve = NurbsCurve::clamped(
        3,
        vec![
            Vec2::new(0.2, 0.2),
            Vec2::new(0.9, 0.4),
            Vec2::new(1.6, 0.3),
            Vec2::new(2.8, 0.6),
            Vec2::new(3.2, 0.7),
        ],
    )
    .unwrap();
    let config = PipelineConfig::default();
    let out = clip_uv_curve(&curve, &grid, &[] as &[Circle2d], &config).unwrap();
    assert_eq!(out.segments.len(), 4);

    let h = 1e-6;
    let mut checked = 0;
    for segment in &out.segments {
        for sample in &segment.xyz[1..segment.xyz.len() - 1] {
            let t = sample.t;
            if t - h <= segment.t_start || t + h >= segment.t_end {
                continue;
            }
            let (_, ahead) = map_point(&curve, &grid, segment.patch, t + h, 1e-6).unwrap();
            let (_, behind) = map_point(&curve, &grid, segment.patch, t - h, 1e-6).unwrap();
            let fd = (ahead.point - behind.point) / (2.0 * h);
            let scale = sample.tangent.norm().max(1e-3);
            assert!(
                (sample.tangent - fd).norm() <= 1e-4 * scale,
                "t={t}: analytic {:?} vs fd {:?}",
                sample.tangent,
                fd
            );
            checked += 1;
        }
    }
    assert!(checked >= 5);
}

#[test]
fn output_serializes_to_json() {
    let curve = uv_line((0.1, 0.55), (1.9, 0.55));
    let out = clip_uv_curve(&curve, &flat_pair(), &[trim_circle()], &PipelineConfig::default())
        .unwrap();
    let json = serde_json::to_string(&out).unwrap();
    let back: uvclip_kernel::ClipOutput = serde_json::from_str(&json).unwrap();
    assert_eq!(back.segments.len(), out.segments.len());
    for (a, b) in back.segments.iter().zip(&out.segments) {
        assert_eq!(a.patch, b.patch);
        assert_eq!(a.xyz.len(), b.xyz.len());
        assert!((a.t_start - b.t_start).abs() < 1e-15);
    }
    assert_eq!(back.report.intersection_count, out.report.intersection_count);
}

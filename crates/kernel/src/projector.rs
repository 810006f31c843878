//! Projection of a 3-D curve onto every patch of a grid.
//!
//! For a curve sample `C(t)` and direction `d(t)` each patch solves
//! `S(u, v) = C(t) + λ d(t)` for `(u, v, λ)` with Jacobian `[Su, Sv, -d]`.

use nalgebra::Matrix3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info, instrument};
use uvclip_solver::{NewtonStep, RootProblem, SolverConfig, find_root, newton_step3};

use crate::config::PipelineConfig;
use crate::geometry::{CurveEvaluator, SurfaceEvaluator, Vec2, Vec3};
use crate::grid::{PatchGrid, PatchId};

/// Projection direction along the curve.
pub trait DirectionField {
    fn direction(&self, t: f64, point: &Vec3) -> Vec3;
}

/// A fixed direction.
impl DirectionField for Vec3 {
    fn direction(&self, _t: f64, _point: &Vec3) -> Vec3 {
        *self
    }
}

/// Direction computed by a closure of `(t, C(t))`.
pub struct DirectionFn<F>(pub F);

impl<F: Fn(f64, &Vec3) -> Vec3> DirectionField for DirectionFn<F> {
    fn direction(&self, t: f64, point: &Vec3) -> Vec3 {
        (self.0)(t, point)
    }
}

/// One accepted projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedSample {
    pub t: f64,
    pub patch: PatchId,
    pub u: f64,
    pub v: f64,
    pub lambda: f64,
    /// `(u, v)` in global UV.
    pub global: Vec2,
}

/// Projection results in sample order; `None` marks an unprojected sample.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub parameters: Vec<f64>,
    pub hits: Vec<Option<ProjectedSample>>,
}

impl Projection {
    pub fn accepted(&self) -> impl Iterator<Item = &ProjectedSample> + '_ {
        self.hits.iter().flatten()
    }

    pub fn unprojected_count(&self) -> usize {
        self.hits.iter().filter(|h| h.is_none()).count()
    }

    /// Parameters of the first and last unprojected sample.
    pub fn unprojected_range(&self) -> Option<(f64, f64)> {
        let mut missing = self
            .parameters
            .iter()
            .zip(&self.hits)
            .filter(|(_, h)| h.is_none())
            .map(|(t, _)| *t);
        let first = missing.next()?;
        Some((first, missing.last().unwrap_or(first)))
    }
}

/// `count` uniform parameters over `domain`, both ends included.
pub fn sample_parameters(domain: (f64, f64), count: usize) -> Vec<f64> {
    let (t0, t1) = domain;
    let n = count.max(2) - 1;
    (0..=n)
        .map(|i| if i == n { t1 } else { t0 + (t1 - t0) * (i as f64 / n as f64) })
        .collect()
}

struct ProjectionProblem<'a, S> {
    surface: &'a S,
    target: Vec3,
    direction: Vec3,
}

impl<S: SurfaceEvaluator> ProjectionProblem<'_, S> {
    fn residual_vector(&self, x: &Vec3) -> (Vec3, Matrix3<f64>) {
        let s = self.surface.evaluate(x.x, x.y);
        let f = s.point - self.target - self.direction * x.z;
        let jacobian = Matrix3::from_columns(&[s.du, s.dv, -self.direction]);
        (f, jacobian)
    }
}

impl<S: SurfaceEvaluator> RootProblem for ProjectionProblem<'_, S> {
    /// `(u, v, λ)`
    type Point = Vec3;

    fn residual(&self, x: &Vec3) -> f64 {
        self.residual_vector(x).0.norm()
    }

    fn newton_step(&self, x: &Vec3) -> NewtonStep<Vec3> {
        let (f, jacobian) = self.residual_vector(x);
        newton_step3(&jacobian, &f)
    }

    fn advance(&self, x: &Vec3, delta: &Vec3, scale: f64) -> Vec3 {
        // Keep iterates near the patch; Bézier extrapolation far outside is meaningless.
        let next = x + delta * scale;
        Vec3::new(next.x.clamp(-0.5, 1.5), next.y.clamp(-0.5, 1.5), next.z)
    }
}

/// Project `curve` sampled at `parameters` along `direction` onto `grid`.
///
/// Never fails: samples no patch accepts are left unprojected.
#[instrument(skip_all, fields(samples = parameters.len(), patches = grid.len()))]
pub fn project_curve<C, S, D>(
    curve: &C,
    grid: &PatchGrid<S>,
    direction: &D,
    parameters: &[f64],
    config: &PipelineConfig,
) -> Projection
where
    C: CurveEvaluator<3> + Sync + ?Sized,
    S: SurfaceEvaluator + Sync,
    D: DirectionField + Sync + ?Sized,
{
    let targets: Vec<(Vec3, Vec3)> = parameters
        .iter()
        .map(|&t| {
            let point = curve.point(t);
            (point, direction.direction(t, &point))
        })
        .collect();
    let ids: Vec<PatchId> = grid.ids().collect();
    let per_patch = project_patches(&ids, grid, &targets, config);

    let policy = config.seam_policy;
    let hits: Vec<Option<ProjectedSample>> = parameters
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let chosen = policy.pick(
                per_patch
                    .iter()
                    .filter_map(|(id, row)| row[i].map(|_| *id)),
            )?;
            let (_, row) = per_patch.iter().find(|(id, _)| *id == chosen)?;
            let x = row[i]?;
            let global = grid.to_global(chosen, x.x, x.y)?;
            Some(ProjectedSample {
                t,
                patch: chosen,
                u: x.x,
                v: x.y,
                lambda: x.z,
                global,
            })
        })
        .collect();

    let projection = Projection {
        parameters: parameters.to_vec(),
        hits,
    };
    info!(
        accepted = parameters.len() - projection.unprojected_count(),
        unprojected = projection.unprojected_count(),
        "projection complete"
    );
    projection
}

type PatchRow = (PatchId, Vec<Option<Vec3>>);

#[cfg(feature = "parallel")]
fn project_patches<S: SurfaceEvaluator + Sync>(
    ids: &[PatchId],
    grid: &PatchGrid<S>,
    targets: &[(Vec3, Vec3)],
    config: &PipelineConfig,
) -> Vec<PatchRow> {
    ids.par_iter()
        .filter_map(|&id| Some((id, project_on_patch(grid.surface(id)?, targets, config))))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn project_patches<S: SurfaceEvaluator + Sync>(
    ids: &[PatchId],
    grid: &PatchGrid<S>,
    targets: &[(Vec3, Vec3)],
    config: &PipelineConfig,
) -> Vec<PatchRow> {
    ids.iter()
        .filter_map(|&id| Some((id, project_on_patch(grid.surface(id)?, targets, config))))
        .collect()
}

/// Accepted `(u, v, λ)` per target on one patch, clamped to the unit square.
fn project_on_patch<S: SurfaceEvaluator>(
    surface: &S,
    targets: &[(Vec3, Vec3)],
    config: &PipelineConfig,
) -> Vec<Option<Vec3>> {
    let solver = config.projection_solver();
    let n = config.projection_seed_grid;
    let grid_seeds: Vec<(f64, f64)> = (0..n)
        .flat_map(|i| (0..n).map(move |j| ((i as f64 + 0.5) / n as f64, (j as f64 + 0.5) / n as f64)))
        .collect();

    let mut previous: Option<Vec3> = None;
    let mut accepted = 0usize;
    let hits: Vec<Option<Vec3>> = targets
        .iter()
        .map(|&(target, direction)| {
            let hit = project_point(surface, target, direction, previous, &grid_seeds, &solver, config);
            previous = hit;
            accepted += usize::from(hit.is_some());
            hit
        })
        .collect();
    debug!(accepted, samples = targets.len(), "patch projected");
    hits
}

fn project_point<S: SurfaceEvaluator>(
    surface: &S,
    target: Vec3,
    direction: Vec3,
    continuation: Option<Vec3>,
    grid_seeds: &[(f64, f64)],
    solver: &SolverConfig,
    config: &PipelineConfig,
) -> Option<Vec3> {
    let d2 = direction.norm_squared();
    if !(d2 > 0.0 && d2.is_finite()) {
        return None;
    }
    let problem = ProjectionProblem {
        surface,
        target,
        direction,
    };
    let seed_at = |u: f64, v: f64| {
        let lambda = (surface.point(u, v) - target).dot(&direction) / d2;
        Vec3::new(u, v, lambda)
    };
    let tol = config.boundary_tolerance;
    let inside = |c: f64| c >= -tol && c <= 1.0 + tol;

    continuation
        .into_iter()
        .chain(grid_seeds.iter().map(|&(u, v)| seed_at(u, v)))
        .find_map(|seed| {
            let result = find_root(&problem, seed, solver);
            let x = result.point;
            (result.converged && inside(x.x) && inside(x.y))
                .then(|| Vec3::new(x.x.clamp(0.0, 1.0), x.y.clamp(0.0, 1.0), x.z))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BezierPatch, LineCurve};
    use crate::grid::GridOffset;

    fn plane(offset: i32, z: f64) -> (GridOffset, BezierPatch) {
        let x = offset as f64;
        (
            GridOffset::new(offset, 0),
            BezierPatch::bilinear(
                Vec3::new(x, 0.0, z),
                Vec3::new(x + 1.0, 0.0, z),
                Vec3::new(x, 1.0, z),
                Vec3::new(x + 1.0, 1.0, z),
            ),
        )
    }

    #[test]
    fn test_sample_parameters_include_ends() {
        let ts = sample_parameters((0.0, 2.0), 5);
        assert_eq!(ts, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_projects_line_onto_two_patches() {
        let grid = PatchGrid::new(vec![plane(0, 0.0), plane(1, 0.0)]).unwrap();
        let curve = LineCurve::new(Vec3::new(0.1, 0.4, 1.0), Vec3::new(1.9, 0.6, 1.0));
        let config = PipelineConfig::default();
        let params = sample_parameters(curve.domain(), 41);
        let projection = project_curve(&curve, &grid, &Vec3::new(0.0, 0.0, -1.0), &params, &config);

        assert_eq!(projection.unprojected_count(), 0);
        for hit in projection.accepted() {
            let expected = curve.point(hit.t);
            assert!((hit.global - Vec2::new(expected.x, expected.y)).norm() < 1e-8);
            assert!((hit.lambda - 1.0).abs() < 1e-8);
            // Seam samples go to the lowest index.
            let owner = if expected.x <= 1.0 + 1e-6 { PatchId(0) } else { PatchId(1) };
            assert_eq!(hit.patch, owner, "t = {}", hit.t);
        }
    }

    #[test]
    fn test_misses_are_unprojected() {
        let grid = PatchGrid::new(vec![plane(0, 0.0)]).unwrap();
        // Leaves the patch halfway.
        let curve = LineCurve::new(Vec3::new(0.5, 0.5, 1.0), Vec3::new(1.5, 0.5, 1.0));
        let params = sample_parameters(curve.domain(), 11);
        let projection = project_curve(
            &curve,
            &grid,
            &Vec3::new(0.0, 0.0, -1.0),
            &params,
            &PipelineConfig::default(),
        );
        assert_eq!(projection.unprojected_count(), 5);
        assert_eq!(projection.unprojected_range(), Some((0.6, 1.0)));
    }

    #[test]
    fn test_direction_parallel_to_surface_is_unprojected() {
        let grid = PatchGrid::new(vec![plane(0, 0.0)]).unwrap();
        let curve = LineCurve::new(Vec3::new(0.2, 0.5, 1.0), Vec3::new(0.8, 0.5, 1.0));
        let params = sample_parameters(curve.domain(), 5);
        let sideways = DirectionFn(|_t: f64, _p: &Vec3| Vec3::new(1.0, 0.0, 0.0));
        let projection =
            project_curve(&curve, &grid, &sideways, &params, &PipelineConfig::default());
        assert_eq!(projection.unprojected_count(), 5);
    }
}

pub mod clipper;
pub mod config;
pub mod error;
pub mod fitter;
pub mod geometry;
pub mod grid;
pub mod mapper;
pub mod pipeline;
pub mod projector;
pub mod refiner;
pub mod report;
pub mod splitter;

// Re-export the pipeline surface at crate root for convenience.
pub use clipper::RetainedInterval;
pub use config::{PipelineConfig, SeedConfig};
pub use error::{GeometryError, PipelineError};
pub use fitter::UvSpline;
pub use geometry::{
    BezierPatch, Circle2d, CurveEvaluator, CurveSample, FnCurve, LineCurve, NurbsCurve,
    PolylineCurve, SurfaceEvaluator, SurfaceSample, Vec2, Vec3,
};
pub use grid::{GridOffset, LocalUv, PatchGrid, PatchId, SeamPolicy};
pub use mapper::{ClippedSegment, SpaceSample, UvSample};
pub use pipeline::{ClipOutput, clip_uv_curve, project_and_clip};
pub use projector::{DirectionField, DirectionFn};
pub use refiner::Intersection;
pub use report::{RunReport, Warning};
pub use splitter::PatchSegment;

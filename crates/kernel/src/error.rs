use thiserror::Error;
use uvclip_solver::SolverError;

use crate::grid::PatchId;

/// Invalid evaluator construction input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Control net {rows}x{cols} cannot be split into degree-{degree} patches")]
    ControlNetSize {
        rows: usize,
        cols: usize,
        degree: usize,
    },

    #[error("Control net row {row} has {found} points, expected {expected}")]
    RaggedControlNet {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Knot vector has {found} entries, expected {expected}")]
    KnotCount { expected: usize, found: usize },

    #[error("Knot vector decreases at index {index}")]
    DecreasingKnots { index: usize },

    #[error("Got {found} weights for {expected} control points")]
    WeightCount { expected: usize, found: usize },

    #[error("Weight {index} must be positive and finite, got {value}")]
    InvalidWeight { index: usize, value: f64 },

    #[error("Degree {degree} needs at least {needed} control points, got {found}")]
    TooFewControlPoints {
        degree: usize,
        needed: usize,
        found: usize,
    },

    #[error("A polyline needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error("Parameters must increase strictly, index {index} does not")]
    NonIncreasingParameters { index: usize },

    #[error("Parameter domain [{start}, {end}] is empty")]
    EmptyDomain { start: f64, end: f64 },
}

/// Fatal pipeline failure. Recoverable problems are reported as
/// [`Warning`](crate::report::Warning)s instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid patch grid: {reason}")]
    InvalidPatchGrid { reason: String },

    #[error(
        "Projection incomplete: no usable samples for t in [{t_start}, {t_end}] \
         (width {width}, max gap {max_gap})"
    )]
    ProjectionIncomplete {
        t_start: f64,
        t_end: f64,
        width: f64,
        max_gap: f64,
    },

    #[error("Point at t={t} maps to ({u}, {v}) outside the domain of patch {patch}")]
    DomainViolation { patch: PatchId, t: f64, u: f64, v: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl PipelineError {
    pub(crate) fn grid(reason: impl Into<String>) -> Self {
        Self::InvalidPatchGrid {
            reason: reason.into(),
        }
    }
}

//! Run report: counters and recoverable warnings gathered by one pipeline call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A recoverable problem. The pipeline carries on and returns the warning
/// alongside its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    /// Samples no patch could project; bridged by the fitter.
    UnprojectableSample {
        count: usize,
        t_first: f64,
        t_last: f64,
    },
    /// A seed the root finder could not resolve; the candidate was dropped.
    UnresolvedIntersection {
        trim: usize,
        t_seed: f64,
        s_seed: f64,
        residual: f64,
    },
    /// The midpoint of a produced sub-interval disagrees with the parity state.
    ParityMismatch {
        t_start: f64,
        t_end: f64,
        expected_inside: bool,
    },
    /// A retained piece whose midpoint lies in no patch of the grid.
    OutsideGrid { t_start: f64, t_end: f64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnprojectableSample {
                count,
                t_first,
                t_last,
            } => write!(f, "{count} samples unprojectable in t [{t_first}, {t_last}]"),
            Warning::UnresolvedIntersection {
                trim,
                t_seed,
                s_seed,
                residual,
            } => write!(
                f,
                "unresolved intersection with trim {trim} near (t={t_seed}, s={s_seed}), residual {residual:e}"
            ),
            Warning::ParityMismatch {
                t_start,
                t_end,
                expected_inside,
            } => {
                let state = if *expected_inside { "inside" } else { "outside" };
                write!(f, "parity says [{t_start}, {t_end}] is {state}, point test disagrees")
            }
            Warning::OutsideGrid { t_start, t_end } => {
                write!(f, "piece [{t_start}, {t_end}] lies outside the patch grid")
            }
        }
    }
}

/// Counters and warnings of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Samples handed to the projector (0 when the UV curve was supplied).
    pub samples: usize,
    pub unprojected_count: usize,
    pub unprojected_range: Option<(f64, f64)>,
    /// Largest distance between the fitted curve and an accepted sample.
    pub fit_deviation: f64,
    pub seed_count: usize,
    pub intersection_count: usize,
    pub unresolved_count: usize,
    pub interval_count: usize,
    pub segment_count: usize,
    pub warnings: Vec<Warning>,
}

impl RunReport {
    pub fn push(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        self.warnings.extend(warnings);
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Warnings of one kind, e.g. `report.count(|w| matches!(w, Warning::OutsideGrid { .. }))`.
    pub fn count(&self, predicate: impl Fn(&Warning) -> bool) -> usize {
        self.warnings.iter().filter(|w| predicate(w)).count()
    }
}

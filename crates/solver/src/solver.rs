//! Root-finding state machine shared by every Newton solve in the kernel.
//!
//! A solve starts in [`RootPhase::Newton`] and only ever escalates:
//!
//! - `Newton -> Damped` when the Jacobian is near-singular or a full step does
//!   not decrease the residual.
//! - `Damped -> Bisection` when the damping factor falls below
//!   `min_damping`, the Jacobian cannot be inverted, or the iteration cap is
//!   reached.
//! - `Bisection -> Failed` when the problem has no scalar bracket, the
//!   bracket shows no sign change, or the bisected root is not accurate enough.
//!
//! Every transition is recorded in [`SolverResult::transitions`] so callers
//! and tests can see how a root was (or was not) obtained.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Phase of the root-finding state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RootPhase {
    /// Full Newton steps.
    Newton,
    /// Newton direction scaled by a shrinking factor.
    Damped,
    /// Scalar bisection inside a caller-supplied bracket.
    Bisection,
    /// Every fallback was exhausted.
    Failed,
}

/// Reason recorded for a phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Escalation {
    /// The Jacobian conditioning fell below `singular_threshold` or it could not be inverted.
    SingularJacobian,
    /// A full Newton step did not lower the residual.
    ResidualNotDecreasing,
    /// `max_iterations` Newton/damped iterations were spent.
    IterationCap,
    /// No damped step lowered the residual before reaching `min_damping`.
    DampingStalled,
    /// The problem offers no scalar bracket to bisect.
    NoBracket,
    /// The bracket end values share a sign.
    NoSignChange,
    /// The bisected root's residual exceeded `bisection_acceptance`.
    BisectionResidual,
}

/// One recorded phase change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RootPhase,
    pub to: RootPhase,
    pub reason: Escalation,
    /// Iteration count at the moment of the transition.
    pub iteration: usize,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("Invalid solver configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Configuration for one root-finding call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    /// Converged once the residual norm drops below this value.
    pub tolerance: f64,
    /// Hard cap on Newton plus damped iterations.
    pub max_iterations: usize,
    /// Conditioning below this escalates from Newton to damped steps.
    pub singular_threshold: f64,
    /// First scale tried in the damped phase.
    pub damping_initial: f64,
    /// Factor applied to the scale after each rejected damped step.
    pub damping_shrink: f64,
    /// Damping below this is considered stalled.
    pub min_damping: f64,
    /// Hard cap on bisection halvings.
    pub bisection_iterations: usize,
    /// Bisection stops once the bracket is narrower than this.
    pub bisection_width: f64,
    /// Residual a bisected root must reach to count as converged.
    pub bisection_acceptance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 20,
            singular_threshold: 1e-9,
            damping_initial: 0.5,
            damping_shrink: 0.5,
            min_damping: 1e-4,
            bisection_iterations: 64,
            bisection_width: 1e-14,
            bisection_acceptance: 1e-6,
        }
    }
}

impl SolverConfig {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Reject configurations the state machine cannot run with.
    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.tolerance > 0.0) {
            return Err(SolverError::InvalidConfig("tolerance must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(SolverError::InvalidConfig("max_iterations must be at least 1"));
        }
        if !(self.singular_threshold >= 0.0) {
            return Err(SolverError::InvalidConfig("singular_threshold must not be negative"));
        }
        if !(self.damping_initial > 0.0 && self.damping_initial < 1.0) {
            return Err(SolverError::InvalidConfig("damping_initial must lie in (0, 1)"));
        }
        if !(self.damping_shrink > 0.0 && self.damping_shrink < 1.0) {
            return Err(SolverError::InvalidConfig("damping_shrink must lie in (0, 1)"));
        }
        if !(self.min_damping > 0.0 && self.min_damping <= self.damping_initial) {
            return Err(SolverError::InvalidConfig("min_damping must lie in (0, damping_initial]"));
        }
        if !(self.bisection_width >= 0.0) {
            return Err(SolverError::InvalidConfig("bisection_width must not be negative"));
        }
        if !(self.bisection_acceptance > 0.0) {
            return Err(SolverError::InvalidConfig("bisection_acceptance must be positive"));
        }
        Ok(())
    }
}

/// Newton update `delta = -J^-1 F` together with the conditioning of `J`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonStep<P> {
    /// `None` when the linear system could not be solved.
    pub delta: Option<P>,
    /// Determinant of the column-normalised Jacobian.
    pub conditioning: f64,
}

impl<P> NewtonStep<P> {
    pub fn singular() -> Self {
        Self {
            delta: None,
            conditioning: 0.0,
        }
    }
}

/// A non-linear system the state machine can drive.
///
/// The bisection fallback is optional: problems that can reduce themselves
/// to a sign change of a scalar function over a bracket implement
/// `bracket`, `bracket_value` and `point_at`.
pub trait RootProblem {
    type Point: Copy + Debug;

    /// Norm of the residual at `x`.
    fn residual(&self, x: &Self::Point) -> f64;

    fn newton_step(&self, x: &Self::Point) -> NewtonStep<Self::Point>;

    /// `x + scale * delta`, with any domain clamping or wrapping applied.
    fn advance(&self, x: &Self::Point, delta: &Self::Point, scale: f64) -> Self::Point;

    fn bracket(&self) -> Option<(f64, f64)> {
        None
    }

    fn bracket_value(&self, _param: f64) -> f64 {
        f64::NAN
    }

    fn point_at(&self, _param: f64) -> Option<Self::Point> {
        None
    }
}

/// Outcome of [`find_root`].
#[derive(Debug, Clone)]
pub struct SolverResult<P> {
    pub converged: bool,
    pub iterations: usize,
    pub final_residual: f64,
    /// Best point reached (the root when `converged`).
    pub point: P,
    /// Phase that produced the result; `Failed` when not converged.
    pub phase: RootPhase,
    pub transitions: Vec<Transition>,
}

impl<P> SolverResult<P> {
    /// Whether the machine passed through `phase` at any point.
    pub fn escalated_to(&self, phase: RootPhase) -> bool {
        self.transitions.iter().any(|tr| tr.to == phase)
    }
}

/// Drive `problem` from `start` through the Newton/Damped/Bisection chain.
pub fn find_root<R: RootProblem>(
    problem: &R,
    start: R::Point,
    config: &SolverConfig,
) -> SolverResult<R::Point> {
    RootMachine::new(problem, start, config).run()
}

struct RootMachine<'a, R: RootProblem> {
    problem: &'a R,
    config: &'a SolverConfig,
    point: R::Point,
    residual: f64,
    phase: RootPhase,
    iterations: usize,
    damping: f64,
    transitions: Vec<Transition>,
}

impl<'a, R: RootProblem> RootMachine<'a, R> {
    fn new(problem: &'a R, start: R::Point, config: &'a SolverConfig) -> Self {
        Self {
            problem,
            config,
            point: start,
            residual: problem.residual(&start),
            phase: RootPhase::Newton,
            iterations: 0,
            damping: config.damping_initial,
            transitions: Vec::new(),
        }
    }

    fn run(mut self) -> SolverResult<R::Point> {
        loop {
            if self.residual < self.config.tolerance {
                return self.finish(true);
            }
            match self.phase {
                RootPhase::Newton | RootPhase::Damped
                    if self.iterations >= self.config.max_iterations =>
                {
                    self.escalate(RootPhase::Bisection, Escalation::IterationCap);
                }
                RootPhase::Newton => self.newton_iteration(),
                RootPhase::Damped => self.damped_iteration(),
                RootPhase::Bisection => return self.bisect(),
                RootPhase::Failed => return self.finish(false),
            }
        }
    }

    fn newton_iteration(&mut self) {
        self.iterations += 1;
        let step = self.problem.newton_step(&self.point);
        let delta = match step.delta {
            Some(delta) if step.conditioning.abs() >= self.config.singular_threshold => delta,
            _ => {
                self.escalate(RootPhase::Damped, Escalation::SingularJacobian);
                return;
            }
        };

        let candidate = self.problem.advance(&self.point, &delta, 1.0);
        let residual = self.problem.residual(&candidate);
        if residual < self.residual {
            self.point = candidate;
            self.residual = residual;
        } else {
            self.escalate(RootPhase::Damped, Escalation::ResidualNotDecreasing);
        }
    }

    fn damped_iteration(&mut self) {
        self.iterations += 1;
        let Some(delta) = self.problem.newton_step(&self.point).delta else {
            self.escalate(RootPhase::Bisection, Escalation::SingularJacobian);
            return;
        };

        let mut scale = self.damping;
        while scale >= self.config.min_damping {
            let candidate = self.problem.advance(&self.point, &delta, scale);
            let residual = self.problem.residual(&candidate);
            if residual < self.residual {
                self.point = candidate;
                self.residual = residual;
                // Let the step grow back towards a full Newton step.
                self.damping = (scale / self.config.damping_shrink).min(1.0);
                return;
            }
            scale *= self.config.damping_shrink;
        }
        self.escalate(RootPhase::Bisection, Escalation::DampingStalled);
    }

    fn bisect(mut self) -> SolverResult<R::Point> {
        let Some((mut lo, mut hi)) = self.problem.bracket() else {
            self.escalate(RootPhase::Failed, Escalation::NoBracket);
            return self.finish(false);
        };

        let mut f_lo = self.problem.bracket_value(lo);
        let f_hi = self.problem.bracket_value(hi);
        if !(f_lo * f_hi <= 0.0) {
            self.escalate(RootPhase::Failed, Escalation::NoSignChange);
            return self.finish(false);
        }

        let root = if f_lo == 0.0 {
            lo
        } else if f_hi == 0.0 {
            hi
        } else {
            for _ in 0..self.config.bisection_iterations {
                if (hi - lo).abs() <= self.config.bisection_width {
                    break;
                }
                self.iterations += 1;
                let mid = 0.5 * (lo + hi);
                let f_mid = self.problem.bracket_value(mid);
                if f_mid == 0.0 {
                    lo = mid;
                    hi = mid;
                    break;
                }
                if (f_lo < 0.0) == (f_mid < 0.0) {
                    lo = mid;
                    f_lo = f_mid;
                } else {
                    hi = mid;
                }
            }
            0.5 * (lo + hi)
        };

        let Some(point) = self.problem.point_at(root) else {
            self.escalate(RootPhase::Failed, Escalation::NoBracket);
            return self.finish(false);
        };
        let residual = self.problem.residual(&point);
        if residual < self.config.bisection_acceptance {
            self.point = point;
            self.residual = residual;
            return self.finish(true);
        }

        trace!(root, residual, "bisected root rejected");
        if residual < self.residual {
            self.point = point;
            self.residual = residual;
        }
        self.escalate(RootPhase::Failed, Escalation::BisectionResidual);
        self.finish(false)
    }

    fn escalate(&mut self, to: RootPhase, reason: Escalation) {
        trace!(
            from = ?self.phase,
            to = ?to,
            ?reason,
            iteration = self.iterations,
            residual = self.residual,
            "root finder escalated"
        );
        self.transitions.push(Transition {
            from: self.phase,
            to,
            reason,
            iteration: self.iterations,
        });
        self.phase = to;
    }

    fn finish(self, converged: bool) -> SolverResult<R::Point> {
        SolverResult {
            converged,
            iterations: self.iterations,
            final_residual: self.residual,
            point: self.point,
            phase: if converged { self.phase } else { RootPhase::Failed },
            transitions: self.transitions,
        }
    }
}

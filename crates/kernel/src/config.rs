//! Configuration threaded through every pipeline stage.
//!
//! Nothing in the kernel reads global defaults: each call receives a
//! [`PipelineConfig`], so independent pipelines may run concurrently with
//! different tolerances.

use serde::{Deserialize, Serialize};
use uvclip_solver::SolverConfig;

use crate::error::PipelineError;
use crate::grid::SeamPolicy;

/// Polyline resolution used to seed intersections and classify points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Lower bound on polyline segments per curve.
    pub min_segments: usize,
    /// Upper bound on polyline segments per curve.
    pub max_segments: usize,
    /// Segments per unit of estimated arc length in global UV.
    pub segments_per_unit: f64,
    /// Largest turning angle (radians) one segment may cover.
    pub max_turn: f64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            min_segments: 64,
            max_segments: 4096,
            segments_per_unit: 32.0,
            max_turn: 0.1,
        }
    }
}

/// Tolerances, iteration caps and resolutions for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Residual norm at which a Newton solve counts as converged (working units).
    pub newton_tolerance: f64,
    /// Iteration cap for the per-patch projection solve.
    pub projection_max_iterations: usize,
    /// Iteration cap for intersection and seam refinement.
    pub intersection_max_iterations: usize,
    /// Slack admitted around the unit square of a patch (seam points).
    pub boundary_tolerance: f64,
    /// Widest run of unprojected samples (in curve parameter) the fitter may bridge.
    pub max_gap: f64,
    /// Allowed deviation of the fitted UV curve from its samples.
    pub fit_tolerance: f64,
    /// Number of input curve samples projected onto the grid.
    pub projection_samples: usize,
    /// Seeds per axis of the regular starting grid on each patch.
    pub projection_seed_grid: usize,
    pub seed: SeedConfig,
    /// Parameter distance under which two roots of one trim are the same root.
    pub parameter_tolerance: f64,
    /// Parameter distance under which crossings collapse into one toggle cluster.
    pub toggle_tolerance: f64,
    /// Sub-steps scanned per retained interval when looking for seam crossings.
    pub seam_scan_samples: usize,
    /// Output samples per patch-split segment, end points included.
    pub samples_per_segment: usize,
    pub seam_policy: SeamPolicy,
    /// Jacobian conditioning below which Newton escalates to damped steps.
    pub singular_threshold: f64,
    pub damping_factor: f64,
    pub min_damping: f64,
    pub bisection_iterations: usize,
    /// Residual a bisected root must reach to be accepted.
    pub bisection_acceptance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            newton_tolerance: 1e-8,
            projection_max_iterations: 30,
            intersection_max_iterations: 20,
            boundary_tolerance: 1e-6,
            max_gap: 0.05,
            fit_tolerance: 1e-8,
            projection_samples: 200,
            projection_seed_grid: 4,
            seed: SeedConfig::default(),
            parameter_tolerance: 1e-7,
            toggle_tolerance: 1e-6,
            seam_scan_samples: 64,
            samples_per_segment: 32,
            seam_policy: SeamPolicy::LowestIndex,
            singular_threshold: 1e-9,
            damping_factor: 0.5,
            min_damping: 1e-4,
            bisection_iterations: 64,
            bisection_acceptance: 1e-6,
        }
    }
}

impl PipelineConfig {
    /// Fewer samples everywhere; for previews and interactive use.
    pub fn coarse() -> Self {
        Self {
            projection_samples: 64,
            projection_seed_grid: 3,
            seed: SeedConfig {
                min_segments: 32,
                max_segments: 1024,
                segments_per_unit: 16.0,
                max_turn: 0.2,
            },
            seam_scan_samples: 32,
            samples_per_segment: 16,
            max_gap: 0.1,
            ..Self::default()
        }
    }

    /// Tighter tolerances and denser sampling.
    pub fn precise() -> Self {
        Self {
            newton_tolerance: 1e-10,
            fit_tolerance: 1e-10,
            projection_samples: 800,
            projection_seed_grid: 6,
            seed: SeedConfig {
                min_segments: 256,
                max_segments: 16384,
                segments_per_unit: 128.0,
                max_turn: 0.025,
            },
            parameter_tolerance: 1e-9,
            toggle_tolerance: 1e-8,
            seam_scan_samples: 256,
            samples_per_segment: 128,
            max_gap: 0.02,
            ..Self::default()
        }
    }

    pub fn with_seam_policy(mut self, policy: SeamPolicy) -> Self {
        self.seam_policy = policy;
        self
    }

    pub fn with_max_gap(mut self, max_gap: f64) -> Self {
        self.max_gap = max_gap;
        self
    }

    /// Check every field before any computation starts.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let positive = [
            ("newton_tolerance", self.newton_tolerance),
            ("boundary_tolerance", self.boundary_tolerance),
            ("fit_tolerance", self.fit_tolerance),
            ("parameter_tolerance", self.parameter_tolerance),
            ("toggle_tolerance", self.toggle_tolerance),
            ("seed.segments_per_unit", self.seed.segments_per_unit),
            ("seed.max_turn", self.seed.max_turn),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !(self.max_gap >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "max_gap must not be negative, got {}",
                self.max_gap
            )));
        }
        if self.projection_samples < 2 {
            return Err(PipelineError::InvalidConfig(
                "projection_samples must be at least 2".into(),
            ));
        }
        if self.samples_per_segment < 2 {
            return Err(PipelineError::InvalidConfig(
                "samples_per_segment must be at least 2".into(),
            ));
        }
        if self.projection_seed_grid == 0 || self.seam_scan_samples == 0 {
            return Err(PipelineError::InvalidConfig(
                "projection_seed_grid and seam_scan_samples must be at least 1".into(),
            ));
        }
        if self.seed.min_segments == 0 || self.seed.min_segments > self.seed.max_segments {
            return Err(PipelineError::InvalidConfig(format!(
                "seed segment bounds [{}, {}] are empty",
                self.seed.min_segments, self.seed.max_segments
            )));
        }
        self.projection_solver().validate()?;
        self.intersection_solver().validate()?;
        Ok(())
    }

    fn solver(&self, max_iterations: usize) -> SolverConfig {
        SolverConfig {
            tolerance: self.newton_tolerance,
            max_iterations,
            singular_threshold: self.singular_threshold,
            damping_initial: self.damping_factor,
            damping_shrink: 0.5,
            min_damping: self.min_damping,
            bisection_iterations: self.bisection_iterations,
            bisection_width: 1e-14,
            bisection_acceptance: self.bisection_acceptance,
        }
    }

    /// Root-finder settings for the `S(u,v) = C(t) + λd` projection solve.
    pub fn projection_solver(&self) -> SolverConfig {
        self.solver(self.projection_max_iterations)
    }

    /// Root-finder settings for curve/trim and curve/seam refinement.
    pub fn intersection_solver(&self) -> SolverConfig {
        self.solver(self.intersection_max_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(PipelineConfig::coarse().validate().is_ok());
        assert!(PipelineConfig::precise().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_tolerance() {
        let config = PipelineConfig {
            newton_tolerance: 0.0,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(err.to_string().contains("newton_tolerance"));
    }

    #[test]
    fn test_rejects_bad_damping_through_solver() {
        let config = PipelineConfig {
            damping_factor: 2.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Solver(_))));
    }

    #[test]
    fn test_solver_configs_follow_pipeline_values() {
        let config = PipelineConfig::default();
        let projection = config.projection_solver();
        assert_eq!(projection.max_iterations, 30);
        assert_eq!(projection.tolerance, 1e-8);
        assert_eq!(config.intersection_solver().max_iterations, 20);
    }

    #[test]
    fn test_json_round_trip_and_defaults() {
        let config = PipelineConfig::precise().with_seam_policy(SeamPolicy::HighestIndex);
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);

        // Missing fields fall back to defaults.
        let partial: PipelineConfig = serde_json::from_str(r#"{"max_gap": 0.2}"#).unwrap();
        assert_eq!(partial.max_gap, 0.2);
        assert_eq!(partial.projection_samples, 200);
    }
}

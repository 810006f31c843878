//! Patch grid and the global UV mapping.
//!
//! Patch `p` at integer offset `(i_u, i_v)` owns the global square
//! `[i_u, i_u + 1] x [i_v, i_v + 1]`; global `(U, V) = (i_u + u, i_v + v)`.
//! Points on a seam belong to several patches and are assigned by a
//! [`SeamPolicy`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GeometryError, PipelineError};
use crate::geometry::{BezierPatch, SurfaceEvaluator, Vec2, Vec3};

/// Index of a patch in its grid (insertion order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchId(pub usize);

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Integer offset of a patch in global UV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridOffset {
    pub i_u: i32,
    pub i_v: i32,
}

impl GridOffset {
    pub fn new(i_u: i32, i_v: i32) -> Self {
        Self { i_u, i_v }
    }

    fn as_vec(self) -> Vec2 {
        Vec2::new(self.i_u as f64, self.i_v as f64)
    }
}

/// A point in the local domain of one patch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalUv {
    pub patch: PatchId,
    pub u: f64,
    pub v: f64,
}

/// Which patch owns a point shared by several patches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeamPolicy {
    #[default]
    LowestIndex,
    HighestIndex,
}

impl SeamPolicy {
    pub(crate) fn pick(self, candidates: impl Iterator<Item = PatchId>) -> Option<PatchId> {
        match self {
            SeamPolicy::LowestIndex => candidates.min(),
            SeamPolicy::HighestIndex => candidates.max(),
        }
    }
}

/// Arena of patches laid out on an integer grid.
#[derive(Debug, Clone)]
pub struct PatchGrid<S> {
    patches: Vec<(GridOffset, S)>,
    by_offset: HashMap<GridOffset, PatchId>,
}

impl<S: SurfaceEvaluator> PatchGrid<S> {
    /// Build a grid; offsets must tile a full rectangle without repeats.
    pub fn new(entries: Vec<(GridOffset, S)>) -> Result<Self, PipelineError> {
        let mut by_offset = HashMap::with_capacity(entries.len());
        for (k, (offset, _)) in entries.iter().enumerate() {
            if let Some(prev) = by_offset.insert(*offset, PatchId(k)) {
                return Err(PipelineError::grid(format!(
                    "patches {prev} and {} overlap at offset ({}, {})",
                    PatchId(k),
                    offset.i_u,
                    offset.i_v
                )));
            }
        }
        let grid = Self {
            patches: entries,
            by_offset,
        };
        grid.validate()?;
        debug!(patches = grid.len(), "patch grid built");
        Ok(grid)
    }

    /// Check the grid is non-empty and rectangular.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let Some((lo, hi)) = self.offset_range() else {
            return Err(PipelineError::grid("grid has no patches"));
        };
        if self.by_offset.len() != self.patches.len() {
            return Err(PipelineError::grid("grid contains overlapping patches"));
        }
        for i_u in lo.i_u..=hi.i_u {
            for i_v in lo.i_v..=hi.i_v {
                if !self.by_offset.contains_key(&GridOffset { i_u, i_v }) {
                    return Err(PipelineError::grid(format!(
                        "grid has a gap at offset ({i_u}, {i_v})"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = PatchId> + '_ {
        (0..self.patches.len()).map(PatchId)
    }

    pub fn surface(&self, patch: PatchId) -> Option<&S> {
        self.patches.get(patch.0).map(|(_, s)| s)
    }

    pub fn offset(&self, patch: PatchId) -> Option<GridOffset> {
        self.patches.get(patch.0).map(|(o, _)| *o)
    }

    pub fn patch_at(&self, offset: GridOffset) -> Option<PatchId> {
        self.by_offset.get(&offset).copied()
    }

    fn offset_range(&self) -> Option<(GridOffset, GridOffset)> {
        let mut iter = self.patches.iter().map(|(o, _)| *o);
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), o| {
            (
                GridOffset::new(lo.i_u.min(o.i_u), lo.i_v.min(o.i_v)),
                GridOffset::new(hi.i_u.max(o.i_u), hi.i_v.max(o.i_v)),
            )
        }))
    }

    /// Global UV rectangle covered by the grid.
    pub fn bounds(&self) -> Option<(Vec2, Vec2)> {
        self.offset_range()
            .map(|(lo, hi)| (lo.as_vec(), hi.as_vec() + Vec2::new(1.0, 1.0)))
    }

    pub fn to_global(&self, patch: PatchId, u: f64, v: f64) -> Option<Vec2> {
        self.offset(patch).map(|o| o.as_vec() + Vec2::new(u, v))
    }

    /// Patch and local coordinates of a global point.
    ///
    /// Every patch whose closed square contains `uv` within `tolerance` is a
    /// candidate; `policy` picks one. Local coordinates are clamped to `[0,1]`.
    pub fn to_local(&self, uv: Vec2, policy: SeamPolicy, tolerance: f64) -> Option<LocalUv> {
        if !uv.iter().all(|c| c.is_finite()) {
            return None;
        }
        let u_range = (uv.x - tolerance).floor() as i32..=(uv.x + tolerance).floor() as i32;
        let v_range = (uv.y - tolerance).floor() as i32..=(uv.y + tolerance).floor() as i32;
        let candidates = u_range.flat_map(|i_u| {
            v_range
                .clone()
                .filter_map(move |i_v| self.patch_at(GridOffset { i_u, i_v }))
        });
        let patch = policy.pick(candidates)?;
        self.to_local_in(uv, patch, tolerance)
    }

    /// Local coordinates of `uv` in a specific patch, if it lies within
    /// `tolerance` of that patch's square.
    pub fn to_local_in(&self, uv: Vec2, patch: PatchId, tolerance: f64) -> Option<LocalUv> {
        let local = uv - self.offset(patch)?.as_vec();
        let inside = |c: f64| c >= -tolerance && c <= 1.0 + tolerance;
        if !(inside(local.x) && inside(local.y)) {
            return None;
        }
        Some(LocalUv {
            patch,
            u: local.x.clamp(0.0, 1.0),
            v: local.y.clamp(0.0, 1.0),
        })
    }
}

impl PatchGrid<BezierPatch> {
    /// Split one control net into Bézier patches of `degree` that share
    /// their boundary rows.
    ///
    /// `net[i][j]` has `i` along U. A net of `(k * degree + 1) x (l * degree + 1)`
    /// points yields `k x l` patches; patch `(pi, pj)` gets offset `(pi, pj)`
    /// and index `pi * l + pj`.
    pub fn from_control_net(net: &[Vec<Vec3>], degree: usize) -> Result<Self, PipelineError> {
        let rows = net.len();
        let cols = net.first().map_or(0, Vec::len);
        if let Some((row, points)) = net.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(GeometryError::RaggedControlNet {
                row,
                expected: cols,
                found: points.len(),
            }
            .into());
        }
        let fits = |n: usize| degree > 0 && n > degree && (n - 1) % degree == 0;
        if !(fits(rows) && fits(cols)) {
            return Err(GeometryError::ControlNetSize { rows, cols, degree }.into());
        }

        let (k, l) = ((rows - 1) / degree, (cols - 1) / degree);
        let mut entries = Vec::with_capacity(k * l);
        for pi in 0..k {
            for pj in 0..l {
                let mut control_points = Vec::with_capacity((degree + 1) * (degree + 1));
                for a in 0..=degree {
                    for b in 0..=degree {
                        control_points.push(net[pi * degree + a][pj * degree + b]);
                    }
                }
                let patch = BezierPatch::new(degree, degree, control_points)?;
                entries.push((GridOffset::new(pi as i32, pj as i32), patch));
            }
        }
        Self::new(entries)
    }
}

// src/config.rs

use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::error::{SolverError, SolverResult};
use crate::stencil::StencilOrder;

/// Solver shape and iteration knobs, fixed for the lifetime of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct SolverConfig {
    /// Finest-level extents.
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,

    /// Coarsest and finest depth labels; the hierarchy spans
    /// `max_depth - min_depth + 1` levels.
    pub min_depth: usize,
    pub max_depth: usize,

    /// Physical domain length (grid spacing is `h_len / nx` at each level).
    pub h_len: f64,

    /// Finite-difference order.
    pub order: StencilOrder,

    /// Outer Newton iterations per smoothing call.
    pub max_relax_iters: usize,

    /// Residual tolerance at the finest level; coarser levels use
    /// `tol / 4^(max_depth - depth)`.
    pub tol: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            nx: 32,
            ny: 32,
            nz: 32,
            min_depth: 2,
            max_depth: 5,
            h_len: 1.0,
            order: StencilOrder::Fourth,
            max_relax_iters: 50,
            tol: 1e-6,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> SolverResult<()> {
        if self.nx == 0 || self.ny == 0 || self.nz == 0 {
            return Err(SolverError::InvalidConfig(format!(
                "grid extents must be positive, got {}x{}x{}",
                self.nx, self.ny, self.nz
            )));
        }
        if self.max_depth <= self.min_depth {
            return Err(SolverError::InvalidConfig(format!(
                "need at least two levels, got depths {}..{}",
                self.min_depth, self.max_depth
            )));
        }
        if !(self.h_len > 0.0) {
            return Err(SolverError::InvalidConfig(format!(
                "domain length must be positive, got {}",
                self.h_len
            )));
        }
        if !(self.tol > 0.0) {
            return Err(SolverError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tol
            )));
        }
        if self.max_relax_iters == 0 {
            return Err(SolverError::InvalidConfig(
                "max_relax_iters must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Number of levels in the hierarchy.
    pub fn total_depths(&self) -> usize {
        self.max_depth - self.min_depth + 1
    }

    /// Write the configuration as `solver_config.json` for provenance.
    pub fn write_to_dir(&self, out_dir: &Path) -> SolverResult<()> {
        let path = out_dir.join("solver_config.json");
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

// src/relax.rs
//
// Damped inexact-Newton smoother.
//
// One relaxation call runs up to `max_iters` Newton steps at a fixed depth.
// Each step builds the defect r = F(u) - coarse_src, solves the linear
// Jacobian system J(u) v = -r approximately with point-Jacobi sweeps, then
// damps the step with a line search over lambda in (0, 1].
//
// The Jacobi sweep is a true simultaneous update: every point reads the
// direction field as of the start of the sweep and writes into a shared
// scratch grid, which is swapped in afterwards. Equations are processed in
// order, so within one sweep equation e+1 already sees equation e's updated
// direction.

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{SolverError, SolverResult};
use crate::multigrid::{decode, grid_views, rho_views, FasMultigrid, RelaxReport};

/// Why a relaxation call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelaxStop {
    /// Residual dropped below the depth-scaled tolerance.
    Converged,
    /// Ran the full iteration budget.
    MaxIters,
    /// The inner Jacobi loop stalled; the Newton step was abandoned.
    InnerStalled,
}

impl FasMultigrid {
    /// Relax the solution at `depth` for at most `max_iters` Newton steps.
    pub(crate) fn relax(&mut self, depth: usize, max_iters: usize) -> SolverResult<RelaxReport> {
        // Coarser levels get a loosened tolerance: tol / 4^(max_depth - depth).
        let delta = (self.cfg.max_depth - depth) as i32;
        let tol_here = self.cfg.tol / 4f64.powi(delta);

        let initial_residual = self.max_residual_all(depth);
        let mut residual = initial_residual;
        let mut newton_iters = 0;
        let mut stop = RelaxStop::MaxIters;

        for _ in 0..max_iters {
            // Checked up front so a perfect guess never enters the inner loop.
            if residual < tol_here {
                stop = RelaxStop::Converged;
                break;
            }

            let norm = self.build_jacobian_rhs(depth);
            if !self.jacobian_relax(depth, norm, 1.0, 0) {
                // The step was abandoned; the solution (and residual) are
                // unchanged.
                stop = RelaxStop::InnerStalled;
                break;
            }
            self.apply_damped_step(depth, norm)?;

            newton_iters += 1;
            residual = self.max_residual_all(depth);
        }

        Ok(RelaxReport {
            newton_iters,
            stop,
            initial_residual,
            final_residual: residual,
        })
    }

    /// Fill `jac_rhs = -(F(u) - coarse_src)` for every equation and return
    /// the squared defect norm `sum_e sum_x (F - src)²`.
    fn build_jacobian_rhs(&mut self, depth: usize) -> f64 {
        let di = self.depth_idx(depth);
        let mut norm = 0.0;

        for eqn in 0..self.system.field_count() {
            let us = grid_views(&self.u_h, depth);
            let rhos = rho_views(&self.rho_h[eqn], di);
            let eq = &self.system.eqns[eqn];
            let st = &self.stencil;
            let src = self.coarse_src_h[eqn].grid(depth);
            let out = self.jac_rhs_h[eqn].grid_mut(depth);
            let (ny, nz) = (out.ny, out.nz);

            norm += out
                .data
                .par_chunks_mut(nz)
                .enumerate()
                .map(|(row, line)| {
                    let i = row / ny;
                    let j = row % ny;
                    let mut part = 0.0;
                    for (k, o) in line.iter_mut().enumerate() {
                        let t = eq.eval_pt(&us, &rhos, st, i, j, k) - src[row * nz + k];
                        part += t * t;
                        *o = -t;
                    }
                    part
                })
                .sum::<f64>();
        }
        norm
    }

    /// One point-Jacobi sweep for equation `eqn`, writing the updated
    /// direction into the shared scratch grid.
    fn jacobi_sweep(&mut self, eqn: usize, depth: usize) {
        let di = self.depth_idx(depth);
        let us = grid_views(&self.u_h, depth);
        let vs = grid_views(&self.damping_v_h, depth);
        let rhos = rho_views(&self.rho_h[eqn], di);
        let eq = &self.system.eqns[eqn];
        let st = &self.stencil;
        let rhs = self.jac_rhs_h[eqn].grid(depth);
        let out = self.jac_tmp_h.grid_mut(depth);
        let (ny, nz) = (out.ny, out.nz);
        let nfields = vs.len();

        out.data
            .par_chunks_mut(nz)
            .enumerate()
            .for_each(|(row, line)| {
                let i = row / ny;
                let j = row % ny;
                for (k, o) in line.iter_mut().enumerate() {
                    let (a, b) = eq.jacobian_split_pt(&us, &rhos, vs[eqn], eqn, st, i, j, k);
                    let mut cross = 0.0;
                    for q in 0..nfields {
                        if q != eqn {
                            cross += eq.dir_deriv_pt(&us, &rhos, vs[q], q, st, i, j, k);
                        }
                    }
                    *o = (a - rhs[row * nz + k] + cross) / (-b);
                }
            });
    }

    /// Squared residual of the linear system, `sum_e sum_x (J v - rhs)²`.
    fn linear_residual_sq(&self, depth: usize) -> f64 {
        let di = self.depth_idx(depth);
        let us = grid_views(&self.u_h, depth);
        let vs = grid_views(&self.damping_v_h, depth);
        let st = &self.stencil;
        let nfields = vs.len();

        let mut total = 0.0;
        for (eqn, eq) in self.system.eqns.iter().enumerate() {
            let rhos = rho_views(&self.rho_h[eqn], di);
            let rhs = self.jac_rhs_h[eqn].grid(depth);
            let (ny, nz) = (rhs.ny, rhs.nz);
            total += (0..rhs.pts())
                .into_par_iter()
                .map(|idx| {
                    let (i, j, k) = decode(idx, ny, nz);
                    let mut t = 0.0;
                    for q in 0..nfields {
                        t += eq.dir_deriv_pt(&us, &rhos, vs[q], q, st, i, j, k);
                    }
                    t -= rhs[idx];
                    t * t
                })
                .sum::<f64>();
        }
        total
    }

    /// Solve `J v = jac_rhs` with point-Jacobi sweeps until the squared
    /// linear residual drops below `min(c * norm^(p+1), norm)`.
    ///
    /// Returns `false` ("stalled") when, from iteration 500 on, the linear
    /// residual fails to strictly decrease.
    fn jacobian_relax(&mut self, depth: usize, norm: f64, c: f64, p: i32) -> bool {
        let n = self.system.field_count();
        for eqn in 0..n {
            self.damping_v_h[eqn].grid_mut(depth).fill(0.0);
        }

        let target = (norm.powi(p + 1) * c).min(norm);
        let mut norm_r = f64::INFINITY;
        let mut norm_prev = f64::INFINITY;
        let mut iters = 0usize;

        while norm_r >= target {
            for eqn in 0..n {
                self.jacobi_sweep(eqn, depth);
                std::mem::swap(
                    self.damping_v_h[eqn].grid_mut(depth),
                    self.jac_tmp_h.grid_mut(depth),
                );
            }
            norm_r = self.linear_residual_sq(depth);

            iters += 1;
            if iters >= 500 && norm_r >= norm_prev {
                println!(
                    "    Unable to solve the Jacobian system to the precision needed within {iters} iterations."
                );
                return false;
            }
            norm_prev = norm_r;
        }
        true
    }

    /// Take the damped step `u += lambda * v`, trying lambda = 1, 0.99, ...,
    /// 0.01 until `|F(u + lambda v) - src|² <= |F(u) - src|²`.
    ///
    /// On failure the step has been rolled back and the solve cannot
    /// continue from this guess.
    fn apply_damped_step(&mut self, depth: usize, norm: f64) -> SolverResult<()> {
        let n = self.system.field_count();
        for eqn in 0..n {
            self.u_h[eqn]
                .grid_mut(depth)
                .add_scaled(self.damping_v_h[eqn].grid(depth), 1.0);
        }

        for _ in 0..100 {
            if self.f_norm_sq(depth) <= norm {
                return Ok(());
            }
            for eqn in 0..n {
                self.u_h[eqn]
                    .grid_mut(depth)
                    .add_scaled(self.damping_v_h[eqn].grid(depth), -0.01);
            }
        }

        Err(SolverError::LineSearchFailed { depth })
    }
}

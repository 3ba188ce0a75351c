// src/multigrid.rs
//
// Full Approximation Storage (FAS) nonlinear multigrid driver.
//
// One instance owns a hierarchy of grids per unknown field plus the work
// hierarchies the smoother needs. A V-cycle smooths at the finest level,
// restricts the solution and residual downward while rebuilding the coarse
// source term (the FAS tau correction), solves coarsely, then prolongs
// corrections back up, smoothing at every level on the way.
//
// The caller builds the equation schema with `add_atom` /
// `set_molecule_coef`, installs per-molecule densities point by point with
// `set_poly_src_at`, restricts them once with `init_rho_hierarchy`, writes an
// initial guess through `field_mut`, and runs `v_cycles`.

use rayon::prelude::*;
use serde::Serialize;

use crate::config::SolverConfig;
use crate::equation::{Atom, EquationSystem};
use crate::error::{SolverError, SolverResult};
use crate::grid::Grid3D;
use crate::hierarchy::Hierarchy;
use crate::relax::RelaxStop;
use crate::stencil::Stencil;
use crate::transfer;

/// Per-field summary statistics at the finest level.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Residuals bracketing one V-cycle.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CycleReport {
    pub initial_max_residual: f64,
    pub final_max_residual: f64,
}

/// Outcome of one smoothing call at a single depth.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RelaxReport {
    /// Newton steps actually taken.
    pub newton_iters: usize,
    pub stop: RelaxStop,
    /// Max-norm residual on entry.
    pub initial_residual: f64,
    /// Max-norm residual after the last accepted step.
    pub final_residual: f64,
}

/// Outcome of a full `v_cycles` run.
#[derive(Debug, Clone, Serialize)]
pub struct SolveReport {
    pub cycles: usize,
    pub final_max_residual: f64,
    pub fields: Vec<FieldStats>,
}

pub struct FasMultigrid {
    pub(crate) cfg: SolverConfig,
    pub(crate) stencil: Stencil,
    pub(crate) system: EquationSystem,

    /// Unknown fields, one hierarchy per equation.
    pub(crate) u_h: Vec<Hierarchy>,
    /// FAS source term per depth (zero at the finest level).
    pub(crate) coarse_src_h: Vec<Hierarchy>,
    /// Current Newton correction direction.
    pub(crate) damping_v_h: Vec<Hierarchy>,
    /// Right-hand side of the inner linear Jacobian system.
    pub(crate) jac_rhs_h: Vec<Hierarchy>,
    /// Scratch for restriction snapshots and prolonged corrections.
    pub(crate) tmp_h: Vec<Hierarchy>,
    /// Double buffer for the point-Jacobi sweep (shared across equations).
    pub(crate) jac_tmp_h: Hierarchy,

    /// Densities per (equation, molecule, depth); `None` marks a
    /// constant-coefficient molecule.
    pub(crate) rho_h: Vec<Vec<Vec<Option<Grid3D>>>>,

    pub(crate) rho_initialized: bool,
    pub(crate) solve_started: bool,
}

/// Borrow the grid at `depth` from every hierarchy.
pub(crate) fn grid_views(hs: &[Hierarchy], depth: usize) -> Vec<&Grid3D> {
    hs.iter().map(|h| h.grid(depth)).collect()
}

/// Borrow one equation's per-molecule density grids at `depth_idx`.
pub(crate) fn rho_views(mols: &[Vec<Option<Grid3D>>], depth_idx: usize) -> Vec<Option<&Grid3D>> {
    mols.iter().map(|slots| slots[depth_idx].as_ref()).collect()
}

/// Split a flat index back into `(i, j, k)`.
#[inline]
pub(crate) fn decode(idx: usize, ny: usize, nz: usize) -> (usize, usize, usize) {
    (idx / (ny * nz), (idx / nz) % ny, idx % nz)
}

impl FasMultigrid {
    /// Allocate all hierarchies for `molecules_per_eqn.len()` coupled
    /// equations, with the given number of molecules in each.
    pub fn new(cfg: SolverConfig, molecules_per_eqn: &[usize]) -> SolverResult<Self> {
        cfg.validate()?;
        if molecules_per_eqn.is_empty() {
            return Err(SolverError::InvalidConfig(
                "need at least one equation".into(),
            ));
        }
        if molecules_per_eqn.iter().any(|&n| n == 0) {
            return Err(SolverError::InvalidConfig(
                "every equation needs at least one molecule".into(),
            ));
        }

        let n = molecules_per_eqn.len();
        let (nx, ny, nz) = (cfg.nx, cfg.ny, cfg.nz);
        let (min_d, max_d) = (cfg.min_depth, cfg.max_depth);
        let depths = cfg.total_depths();
        let mk = move || Hierarchy::new(nx, ny, nz, min_d, max_d);

        let rho_h = molecules_per_eqn
            .iter()
            .map(|&mols| (0..mols).map(|_| vec![None; depths]).collect())
            .collect();

        Ok(Self {
            stencil: Stencil::new(cfg.order, cfg.h_len),
            system: EquationSystem::with_shape(molecules_per_eqn),
            u_h: (0..n).map(|_| mk()).collect(),
            coarse_src_h: (0..n).map(|_| mk()).collect(),
            damping_v_h: (0..n).map(|_| mk()).collect(),
            jac_rhs_h: (0..n).map(|_| mk()).collect(),
            tmp_h: (0..n).map(|_| mk()).collect(),
            jac_tmp_h: mk(),
            rho_h,
            rho_initialized: false,
            solve_started: false,
            cfg,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.cfg
    }

    #[inline]
    pub(crate) fn depth_idx(&self, depth: usize) -> usize {
        depth - self.cfg.min_depth
    }

    fn check_slot(&self, eqn: usize, mol: usize) -> SolverResult<()> {
        if eqn >= self.system.field_count() {
            return Err(SolverError::Schema(format!(
                "equation index {eqn} out of range (have {})",
                self.system.field_count()
            )));
        }
        if mol >= self.system.eqns[eqn].molecules.len() {
            return Err(SolverError::Schema(format!(
                "molecule index {mol} out of range for equation {eqn} (have {})",
                self.system.eqns[eqn].molecules.len()
            )));
        }
        Ok(())
    }

    /// Append one atom to a molecule. Only permitted before the first solve
    /// step.
    pub fn add_atom(&mut self, eqn: usize, mol: usize, atom: Atom) -> SolverResult<()> {
        if self.solve_started {
            return Err(SolverError::Schema(
                "cannot extend the equation schema after solving has started".into(),
            ));
        }
        self.check_slot(eqn, mol)?;
        if atom.field() >= self.system.field_count() {
            return Err(SolverError::Schema(format!(
                "atom references field {} but the system has {} unknowns",
                atom.field(),
                self.system.field_count()
            )));
        }
        if let Atom::Poly { exponent, .. } = atom {
            if !exponent.is_finite() {
                return Err(SolverError::Schema(format!(
                    "polynomial exponent must be finite, got {exponent}"
                )));
            }
        }
        self.system.eqns[eqn].molecules[mol].atoms.push(atom);
        Ok(())
    }

    /// Set a molecule's constant coefficient (default 1).
    pub fn set_molecule_coef(&mut self, eqn: usize, mol: usize, coef: f64) -> SolverResult<()> {
        if self.solve_started {
            return Err(SolverError::Schema(
                "cannot change the equation schema after solving has started".into(),
            ));
        }
        self.check_slot(eqn, mol)?;
        self.system.eqns[eqn].molecules[mol].const_coef = coef;
        Ok(())
    }

    /// Set one finest-level density value for a molecule, allocating the
    /// density grid on first write.
    pub fn set_poly_src_at(
        &mut self,
        eqn: usize,
        mol: usize,
        i: usize,
        j: usize,
        k: usize,
        value: f64,
    ) -> SolverResult<()> {
        self.check_slot(eqn, mol)?;
        if self.rho_initialized {
            return Err(SolverError::Schema(
                "densities are frozen once init_rho_hierarchy() has run".into(),
            ));
        }
        if i >= self.cfg.nx || j >= self.cfg.ny || k >= self.cfg.nz {
            return Err(SolverError::Schema(format!(
                "density point ({i},{j},{k}) outside the {}x{}x{} finest grid",
                self.cfg.nx, self.cfg.ny, self.cfg.nz
            )));
        }

        let finest = self.cfg.total_depths() - 1;
        let (nx, ny, nz) = (self.cfg.nx, self.cfg.ny, self.cfg.nz);
        let slot = &mut self.rho_h[eqn][mol][finest];
        let grid = slot.get_or_insert_with(|| Grid3D::new(nx, ny, nz));
        let idx = grid.idx(i, j, k);
        grid[idx] = value;
        Ok(())
    }

    /// Restrict every installed finest-level density to all coarser depths.
    /// Must be called exactly once, after all `set_poly_src_at` writes.
    pub fn init_rho_hierarchy(&mut self) -> SolverResult<()> {
        if self.rho_initialized {
            return Err(SolverError::Schema(
                "init_rho_hierarchy() may only be called once".into(),
            ));
        }

        let (min_d, max_d) = (self.cfg.min_depth, self.cfg.max_depth);
        for eqn in 0..self.rho_h.len() {
            for mol in 0..self.rho_h[eqn].len() {
                if self.rho_h[eqn][mol].last().and_then(|s| s.as_ref()).is_none() {
                    continue; // constant-coefficient molecule
                }

                for depth in min_d..max_d {
                    let di = depth - min_d;
                    if self.rho_h[eqn][mol][di].is_none() {
                        let g = self.u_h[0].grid(depth);
                        self.rho_h[eqn][mol][di] = Some(Grid3D::new(g.nx, g.ny, g.nz));
                    }
                }

                let slots = &mut self.rho_h[eqn][mol];
                for depth in ((min_d + 1)..=max_d).rev() {
                    let di = depth - min_d;
                    let (coarser, finer) = slots.split_at_mut(di);
                    let Some(fine) = finer[0].as_ref() else { continue };
                    let Some(coarse) = coarser[di - 1].as_mut() else { continue };
                    transfer::restrict(fine, coarse);
                }
            }
        }

        self.rho_initialized = true;
        Ok(())
    }

    /// The finest-level unknown for equation `eqn` (the solution after
    /// solving; write the initial guess here before).
    pub fn field(&self, eqn: usize) -> &Grid3D {
        self.u_h[eqn].grid(self.cfg.max_depth)
    }

    pub fn field_mut(&mut self, eqn: usize) -> &mut Grid3D {
        self.u_h[eqn].grid_mut(self.cfg.max_depth)
    }

    pub fn field_stats(&self, eqn: usize) -> FieldStats {
        let g = self.field(eqn);
        FieldStats {
            avg: g.avg(),
            min: g.min(),
            max: g.max(),
        }
    }

    /// Max-norm residual `max |coarse_src - F_e(u)|` for one equation.
    pub fn max_residual(&self, eqn: usize, depth: usize) -> f64 {
        let di = self.depth_idx(depth);
        let us = grid_views(&self.u_h, depth);
        let rhos = rho_views(&self.rho_h[eqn], di);
        let eq = &self.system.eqns[eqn];
        let st = &self.stencil;
        let src = self.coarse_src_h[eqn].grid(depth);
        let (ny, nz) = (src.ny, src.nz);

        (0..src.pts())
            .into_par_iter()
            .map(|idx| {
                let (i, j, k) = decode(idx, ny, nz);
                (src[idx] - eq.eval_pt(&us, &rhos, st, i, j, k)).abs()
            })
            .reduce(|| 0.0, f64::max)
    }

    /// Max-norm residual over all equations.
    pub fn max_residual_all(&self, depth: usize) -> f64 {
        (0..self.system.field_count())
            .map(|e| self.max_residual(e, depth))
            .fold(0.0, f64::max)
    }

    /// `sum_e sum_x (F_e(u) - coarse_src_e)²` at one depth.
    pub(crate) fn f_norm_sq(&self, depth: usize) -> f64 {
        let us = grid_views(&self.u_h, depth);
        let st = &self.stencil;
        let di = self.depth_idx(depth);

        let mut total = 0.0;
        for (eqn, eq) in self.system.eqns.iter().enumerate() {
            let rhos = rho_views(&self.rho_h[eqn], di);
            let src = self.coarse_src_h[eqn].grid(depth);
            let (ny, nz) = (src.ny, src.nz);
            total += (0..src.pts())
                .into_par_iter()
                .map(|idx| {
                    let (i, j, k) = decode(idx, ny, nz);
                    let t = eq.eval_pt(&us, &rhos, st, i, j, k) - src[idx];
                    t * t
                })
                .sum::<f64>();
        }
        total
    }

    /// One FAS restriction step for equation `eqn`: fine solution and
    /// residual move to the next coarser level, where the source becomes
    /// `F(restricted u) + restricted residual`.
    fn restrict_level(&mut self, eqn: usize, fine_depth: usize) {
        let coarse_depth = fine_depth - 1;

        {
            let (fine, coarse) = self.u_h[eqn].fine_coarse_mut(fine_depth);
            transfer::restrict(fine, coarse);
        }

        // residual on the fine grid, into tmp
        {
            let di = self.depth_idx(fine_depth);
            let us = grid_views(&self.u_h, fine_depth);
            let rhos = rho_views(&self.rho_h[eqn], di);
            let eq = &self.system.eqns[eqn];
            let st = &self.stencil;
            let src = self.coarse_src_h[eqn].grid(fine_depth);
            let out = self.tmp_h[eqn].grid_mut(fine_depth);
            let (ny, nz) = (out.ny, out.nz);
            out.data
                .par_chunks_mut(nz)
                .enumerate()
                .for_each(|(row, line)| {
                    let i = row / ny;
                    let j = row % ny;
                    for (k, o) in line.iter_mut().enumerate() {
                        *o = src[row * nz + k] - eq.eval_pt(&us, &rhos, st, i, j, k);
                    }
                });
        }

        {
            let (fine, coarse) = self.tmp_h[eqn].fine_coarse_mut(fine_depth);
            transfer::restrict(fine, coarse);
        }

        // coarse source = F(restricted u) + restricted residual
        {
            let di = self.depth_idx(coarse_depth);
            let us = grid_views(&self.u_h, coarse_depth);
            let rhos = rho_views(&self.rho_h[eqn], di);
            let eq = &self.system.eqns[eqn];
            let st = &self.stencil;
            let out = self.coarse_src_h[eqn].grid_mut(coarse_depth);
            let (ny, nz) = (out.ny, out.nz);
            out.data
                .par_chunks_mut(nz)
                .enumerate()
                .for_each(|(row, line)| {
                    let i = row / ny;
                    let j = row % ny;
                    for (k, o) in line.iter_mut().enumerate() {
                        *o = eq.eval_pt(&us, &rhos, st, i, j, k);
                    }
                });
        }
        self.coarse_src_h[eqn]
            .grid_mut(coarse_depth)
            .add_scaled(self.tmp_h[eqn].grid(coarse_depth), 1.0);
    }

    /// Turn the pre-smoothing snapshot in tmp into the correction
    /// `err = u - snapshot`.
    fn solution_to_error(&mut self, eqn: usize, depth: usize) {
        let u = self.u_h[eqn].grid(depth);
        let tmp = self.tmp_h[eqn].grid_mut(depth);
        for (t, uv) in tmp.data.iter_mut().zip(u.data.iter()) {
            *t = uv - *t;
        }
    }

    /// Prolong the correction in tmp up one level, add it to the finer
    /// solution, and leave the pre-correction solution in tmp there (the
    /// snapshot for the next upward stroke).
    fn correct_from_coarse(&mut self, eqn: usize, coarse_depth: usize) {
        {
            let (coarse, fine) = self.tmp_h[eqn].coarse_fine_mut(coarse_depth);
            transfer::prolong(coarse, fine);
        }

        let fine_depth = coarse_depth + 1;
        let u = self.u_h[eqn].grid_mut(fine_depth);
        let tmp = self.tmp_h[eqn].grid_mut(fine_depth);
        let nz = u.nz;
        u.data
            .par_chunks_mut(nz)
            .zip(tmp.data.par_chunks_mut(nz))
            .for_each(|(ur, tr)| {
                for (uv, tv) in ur.iter_mut().zip(tr.iter_mut()) {
                    let appx = *uv;
                    *uv += *tv;
                    *tv = appx;
                }
            });
    }

    fn begin_solve(&mut self) -> SolverResult<()> {
        if self.solve_started {
            return Ok(());
        }
        if !self.rho_initialized {
            let any_density = self
                .rho_h
                .iter()
                .flatten()
                .any(|slots| slots.last().and_then(|s| s.as_ref()).is_some());
            if any_density {
                return Err(SolverError::Schema(
                    "densities were installed but init_rho_hierarchy() was never called".into(),
                ));
            }
        }
        self.solve_started = true;
        Ok(())
    }

    /// One V-cycle: smooth, descend with FAS source updates, solve coarsely,
    /// ascend with prolonged corrections, smooth again.
    pub fn v_cycle(&mut self) -> SolverResult<CycleReport> {
        self.begin_solve()?;
        let (min_d, max_d) = (self.cfg.min_depth, self.cfg.max_depth);
        let n = self.system.field_count();

        let pre = self.relax(max_d, self.cfg.max_relax_iters)?;
        let initial = pre.final_residual;
        println!("  Initial max. residual on fine grid is: {initial:.6e}");

        for eqn in 0..n {
            for depth in ((min_d + 1)..=max_d).rev() {
                self.restrict_level(eqn, depth);
            }
            // snapshot the coarsest solution before it is smoothed
            self.tmp_h[eqn]
                .grid_mut(min_d)
                .copy_from(self.u_h[eqn].grid(min_d));
        }

        for coarse_depth in min_d..max_d {
            let relaxed = self.relax(coarse_depth, self.cfg.max_relax_iters)?;
            println!(
                "    Working on upward stroke at depth {coarse_depth}; residual after solving is: {:.6e}",
                relaxed.final_residual
            );

            for eqn in 0..n {
                self.solution_to_error(eqn, coarse_depth);
            }
            for eqn in 0..n {
                self.correct_from_coarse(eqn, coarse_depth);
            }
        }

        let post = self.relax(max_d, self.cfg.max_relax_iters)?;
        let final_r = post.final_residual;
        println!("  Final max. residual on fine grid is: {final_r:.6e}");

        Ok(CycleReport {
            initial_max_residual: initial,
            final_max_residual: final_r,
        })
    }

    /// Run `num_cycles` V-cycles, a final polish sweep, and print per-field
    /// summary statistics.
    pub fn v_cycles(&mut self, num_cycles: usize) -> SolverResult<SolveReport> {
        for _ in 0..num_cycles {
            self.v_cycle()?;
        }

        let polish = self.relax(self.cfg.max_depth, 10)?;
        let final_r = polish.final_residual;
        println!("  Final solution residual is: {final_r:.6e}");

        let fields: Vec<FieldStats> = (0..self.system.field_count())
            .map(|e| self.field_stats(e))
            .collect();
        for (e, s) in fields.iter().enumerate() {
            println!(
                "  Solution for variable {e} has average / min / max value: {:.6e} / {:.6e} / {:.6e}",
                s.avg, s.min, s.max
            );
        }

        Ok(SolveReport {
            cycles: num_cycles,
            final_max_residual: final_r,
            fields,
        })
    }

    /// Print one x-strip of the first unknown at `(j, k) = (ny/4, nz/4)`.
    pub fn print_solution_strip(&self, depth: usize) {
        let g = self.u_h[0].grid(depth);
        let mut line = String::from("Values: { ");
        for i in 0..g.nx {
            line.push_str(&format!("{:.15}, ", g[g.idx(i, g.ny / 4, g.nz / 4)]));
        }
        line.push('}');
        println!("{line}");
    }
}

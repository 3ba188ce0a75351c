// src/transfer.rs
//
// Inter-grid transfer operators.
//
// Restriction is the standard 27-point weighted average: each coarse point
// collects its co-located fine point (1/8), the six face neighbours (1/16),
// the twelve edge neighbours (1/32) and the eight corners (1/64), with
// periodic wrap.
//
// Prolongation distributes each coarse value over the 27 fine cells around
// the co-located fine point with inverse-distance weights 2^-(|di|+|dj|+|dk|).
// It is implemented as a gather: every fine point sums its per-axis coarse
// sources (weight 1 from the aligned coarse point on even coordinates, 1/2
// from each flanking coarse point on odd ones), which needs no atomics and
// parallelises over fine rows. When a fine extent is odd the nominal
// coarse-offset position past the end falls on no fine point and that
// contribution is skipped; the wrap-around contribution onto the last fine
// point exists only when the fine extent is exactly twice the coarse one.

use rayon::prelude::*;

use crate::grid::Grid3D;

/// Restrict `fine` onto `coarse` (next coarser level, extents `ceil(n/2)`).
pub fn restrict(fine: &Grid3D, coarse: &mut Grid3D) {
    let (ncy, ncz) = (coarse.ny, coarse.nz);

    let fine_ref = &*fine;
    coarse
        .data
        .par_chunks_mut(ncz)
        .enumerate()
        .for_each(|(row, out)| {
            let i = row / ncy;
            let j = row % ncy;
            let fi = (i * 2) as isize;
            let fj = (j * 2) as isize;

            for (k, o) in out.iter_mut().enumerate() {
                let fk = (k * 2) as isize;

                let mut sum = 0.0;
                for di in -1isize..=1 {
                    for dj in -1isize..=1 {
                        for dk in -1isize..=1 {
                            let w = 0.125 * 0.5f64.powi((di.abs() + dj.abs() + dk.abs()) as i32);
                            sum += w * fine_ref[fine_ref.idx_p(fi + di, fj + dj, fk + dk)];
                        }
                    }
                }
                *o = sum;
            }
        });
}

/// Coarse sources of one fine coordinate along one axis: up to two
/// `(coarse index, weight)` pairs.
#[inline]
fn axis_sources(f: usize, nc: usize, nf: usize) -> ([(usize, f64); 2], usize) {
    if f % 2 == 0 {
        return ([(f / 2, 1.0), (0, 0.0)], 1);
    }
    let lo = ((f - 1) / 2, 0.5);
    let hi = (f + 1) / 2;
    if hi < nc {
        ([lo, (hi, 0.5)], 2)
    } else if nf == 2 * nc {
        // Periodic wrap: the -1 offset of coarse cell 0 lands on the last
        // fine point only when the extents halve exactly.
        ([lo, (0, 0.5)], 2)
    } else {
        ([lo, (0, 0.0)], 1)
    }
}

/// Interpolate `coarse` onto `fine` (next finer level), overwriting `fine`.
pub fn prolong(coarse: &Grid3D, fine: &mut Grid3D) {
    let (nfy, nfz) = (fine.ny, fine.nz);
    let (ncx, ncy, ncz) = (coarse.nx, coarse.ny, coarse.nz);
    let nfx = fine.nx;

    let coarse_ref = &*coarse;
    fine.data
        .par_chunks_mut(nfz)
        .enumerate()
        .for_each(|(row, out)| {
            let i = row / nfy;
            let j = row % nfy;
            let (si, ni) = axis_sources(i, ncx, nfx);
            let (sj, nj) = axis_sources(j, ncy, nfy);

            for (k, o) in out.iter_mut().enumerate() {
                let (sk, nk) = axis_sources(k, ncz, nfz);

                let mut sum = 0.0;
                for &(ci, wi) in &si[..ni] {
                    for &(cj, wj) in &sj[..nj] {
                        for &(ck, wk) in &sk[..nk] {
                            sum += wi * wj * wk * coarse_ref[coarse_ref.idx(ci, cj, ck)];
                        }
                    }
                }
                *o = sum;
            }
        });
}

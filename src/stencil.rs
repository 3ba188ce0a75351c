// src/stencil.rs
//
// Central finite-difference evaluator on periodic grids.
//
// All three operations are pointwise and pure: given a grid and indices they
// return one derivative value, wrapping neighbour access periodically. The
// spacing is taken as h = h_len / nx at whatever resolution the grid has, so
// the same evaluator serves every level of a hierarchy (equal spacing in all
// axes is assumed throughout).

use serde::Serialize;

use crate::grid::Grid3D;

/// Coordinate axis of the 3D grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Shift `(i, j, k)` by `d` cells along this axis.
    #[inline]
    pub fn offset(self, i: isize, j: isize, k: isize, d: isize) -> (isize, isize, isize) {
        match self {
            Axis::X => (i + d, j, k),
            Axis::Y => (i, j + d, k),
            Axis::Z => (i, j, k + d),
        }
    }
}

// Stencil tables, offsets -r..=r inclusive.
const D1_O2: [f64; 3] = [-0.5, 0.0, 0.5];
const D1_O4: [f64; 5] = [1.0 / 12.0, -2.0 / 3.0, 0.0, 2.0 / 3.0, -1.0 / 12.0];
const D1_O6: [f64; 7] = [
    -1.0 / 60.0,
    3.0 / 20.0,
    -0.75,
    0.0,
    0.75,
    -3.0 / 20.0,
    1.0 / 60.0,
];
const D1_O8: [f64; 9] = [
    1.0 / 280.0,
    -4.0 / 105.0,
    0.2,
    -0.8,
    0.0,
    0.8,
    -0.2,
    4.0 / 105.0,
    -1.0 / 280.0,
];

const D2_O2: [f64; 3] = [1.0, -2.0, 1.0];
const D2_O4: [f64; 5] = [-1.0 / 12.0, 4.0 / 3.0, -2.5, 4.0 / 3.0, -1.0 / 12.0];
const D2_O6: [f64; 7] = [
    1.0 / 90.0,
    -3.0 / 20.0,
    1.5,
    -49.0 / 18.0,
    1.5,
    -3.0 / 20.0,
    1.0 / 90.0,
];
const D2_O8: [f64; 9] = [
    -1.0 / 560.0,
    8.0 / 315.0,
    -0.2,
    1.6,
    -205.0 / 72.0,
    1.6,
    -0.2,
    8.0 / 315.0,
    -1.0 / 560.0,
];

/// Accuracy order of the central-difference stencils.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StencilOrder {
    Second,
    Fourth,
    Sixth,
    Eighth,
}

impl StencilOrder {
    /// Half-width of the stencil.
    pub fn radius(self) -> usize {
        match self {
            StencilOrder::Second => 1,
            StencilOrder::Fourth => 2,
            StencilOrder::Sixth => 3,
            StencilOrder::Eighth => 4,
        }
    }

    fn d1_coefs(self) -> &'static [f64] {
        match self {
            StencilOrder::Second => &D1_O2,
            StencilOrder::Fourth => &D1_O4,
            StencilOrder::Sixth => &D1_O6,
            StencilOrder::Eighth => &D1_O8,
        }
    }

    fn d2_coefs(self) -> &'static [f64] {
        match self {
            StencilOrder::Second => &D2_O2,
            StencilOrder::Fourth => &D2_O4,
            StencilOrder::Sixth => &D2_O6,
            StencilOrder::Eighth => &D2_O8,
        }
    }

    /// Magnitude of the central coefficient of the second-derivative stencil.
    ///
    /// The Jacobi update needs this diagonal weight on its own, separate from
    /// the full stencil application.
    pub fn double_der_center(self) -> f64 {
        match self {
            StencilOrder::Second => 2.0,
            StencilOrder::Fourth => 2.5,
            StencilOrder::Sixth => 49.0 / 18.0,
            StencilOrder::Eighth => 205.0 / 72.0,
        }
    }
}

/// Finite-difference evaluator: stencil order plus physical domain length.
#[derive(Debug, Clone, Copy)]
pub struct Stencil {
    pub order: StencilOrder,
    pub h_len: f64,
}

impl Stencil {
    pub fn new(order: StencilOrder, h_len: f64) -> Self {
        Self { order, h_len }
    }

    /// Grid spacing at the resolution of `g`.
    #[inline]
    pub fn spacing(&self, g: &Grid3D) -> f64 {
        self.h_len / g.nx as f64
    }

    /// First derivative along `axis` at `(i, j, k)`.
    pub fn derivative(&self, g: &Grid3D, i: usize, j: usize, k: usize, axis: Axis) -> f64 {
        let r = self.order.radius() as isize;
        let coefs = self.order.d1_coefs();
        let (i, j, k) = (i as isize, j as isize, k as isize);

        let mut sum = 0.0;
        for (t, &w) in coefs.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            let (ii, jj, kk) = axis.offset(i, j, k, t as isize - r);
            sum += w * g[g.idx_p(ii, jj, kk)];
        }
        sum / self.spacing(g)
    }

    /// Pure second derivative along one axis (helper for the mixed form and
    /// the Laplacian).
    fn pure_second(&self, g: &Grid3D, i: isize, j: isize, k: isize, axis: Axis) -> f64 {
        let r = self.order.radius() as isize;
        let coefs = self.order.d2_coefs();

        let mut sum = 0.0;
        for (t, &w) in coefs.iter().enumerate() {
            let (ii, jj, kk) = axis.offset(i, j, k, t as isize - r);
            sum += w * g[g.idx_p(ii, jj, kk)];
        }
        let h = self.spacing(g);
        sum / (h * h)
    }

    /// Second derivative `d²u / dx_a dx_b` at `(i, j, k)`; pure when `a == b`,
    /// mixed (nested first differences) otherwise.
    pub fn double_derivative(
        &self,
        g: &Grid3D,
        i: usize,
        j: usize,
        k: usize,
        a: Axis,
        b: Axis,
    ) -> f64 {
        let (i, j, k) = (i as isize, j as isize, k as isize);
        if a == b {
            return self.pure_second(g, i, j, k, a);
        }

        let r = self.order.radius() as isize;
        let coefs = self.order.d1_coefs();

        let mut sum = 0.0;
        for (ta, &wa) in coefs.iter().enumerate() {
            if wa == 0.0 {
                continue;
            }
            let (ia, ja, ka) = a.offset(i, j, k, ta as isize - r);
            for (tb, &wb) in coefs.iter().enumerate() {
                if wb == 0.0 {
                    continue;
                }
                let (ii, jj, kk) = b.offset(ia, ja, ka, tb as isize - r);
                sum += wa * wb * g[g.idx_p(ii, jj, kk)];
            }
        }
        let h = self.spacing(g);
        sum / (h * h)
    }

    /// Laplacian at `(i, j, k)`: sum of the three pure second derivatives.
    pub fn laplacian(&self, g: &Grid3D, i: usize, j: usize, k: usize) -> f64 {
        let (i, j, k) = (i as isize, j as isize, k as isize);
        self.pure_second(g, i, j, k, Axis::X)
            + self.pure_second(g, i, j, k, Axis::Y)
            + self.pure_second(g, i, j, k, Axis::Z)
    }
}

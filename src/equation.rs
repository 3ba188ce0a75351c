// src/equation.rs
//
// Symbolic form of a system of elliptic equations.
//
// An equation is a sum of molecules; a molecule is a constant coefficient,
// an optional per-point density, and a product of atoms; an atom is one
// polynomial or differential factor acting on one unknown field. Everything
// here is pointwise: the driver runs these evaluators over whole grids.
//
// Three forms are needed per equation:
//   eval_pt           F_e(u) at a point
//   dir_deriv_pt      directional derivative (dF_e/du_q) · v_q at a point
//   jacobian_split_pt the (A, B) coefficients of the point-Jacobi update
//                     with respect to the equation's own field
//
// The derivative forms walk the molecule's atoms with a running
// "non-differentiated product" accumulator, applying the product rule one
// atom at a time. For second-derivative and Laplacian atoms the stencil
// splits into the central (diagonal) weight and the rest; only the pure
// second derivatives and the Laplacian carry a diagonal, mixed ones do not.

use crate::grid::Grid3D;
use crate::stencil::{Axis, Stencil};

/// One factor in a product term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Atom {
    /// `u_field ^ exponent`
    Poly { field: usize, exponent: f64 },
    /// `d u_field / d x_axis`
    D1 { field: usize, axis: Axis },
    /// `d² u_field / d x_a d x_b`
    D2 { field: usize, axes: (Axis, Axis) },
    /// `∇² u_field`
    Lap { field: usize },
}

impl Atom {
    /// The unknown field this atom acts on.
    pub fn field(&self) -> usize {
        match *self {
            Atom::Poly { field, .. }
            | Atom::D1 { field, .. }
            | Atom::D2 { field, .. }
            | Atom::Lap { field } => field,
        }
    }

    /// Value of the atom at `(i, j, k)` given all unknown fields at one depth.
    fn eval(&self, us: &[&Grid3D], st: &Stencil, i: usize, j: usize, k: usize) -> f64 {
        match *self {
            Atom::Poly { field, exponent } => {
                let u = us[field];
                u[u.idx(i, j, k)].powf(exponent)
            }
            Atom::D1 { field, axis } => st.derivative(us[field], i, j, k, axis),
            Atom::D2 { field, axes } => st.double_derivative(us[field], i, j, k, axes.0, axes.1),
            Atom::Lap { field } => st.laplacian(us[field], i, j, k),
        }
    }

    /// The atom's derivative applied to a direction grid `v` (same field).
    ///
    /// For a polynomial this is `exponent * u^(exponent-1) * v`; for the
    /// differential atoms it is the same stencil applied to `v`.
    fn apply_direction(
        &self,
        us: &[&Grid3D],
        v: &Grid3D,
        st: &Stencil,
        i: usize,
        j: usize,
        k: usize,
    ) -> f64 {
        match *self {
            Atom::Poly { field, exponent } => {
                let u = us[field];
                exponent * u[u.idx(i, j, k)].powf(exponent - 1.0) * v[v.idx(i, j, k)]
            }
            Atom::D1 { axis, .. } => st.derivative(v, i, j, k, axis),
            Atom::D2 { axes, .. } => st.double_derivative(v, i, j, k, axes.0, axes.1),
            Atom::Lap { .. } => st.laplacian(v, i, j, k),
        }
    }
}

/// Product of atoms with a constant coefficient and an optional density.
#[derive(Debug, Clone)]
pub struct Molecule {
    pub const_coef: f64,
    pub atoms: Vec<Atom>,
}

impl Molecule {
    pub fn new(const_coef: f64) -> Self {
        Self {
            const_coef,
            atoms: Vec::new(),
        }
    }
}

/// Sum of molecules; one equation per unknown field.
#[derive(Debug, Clone)]
pub struct Equation {
    pub molecules: Vec<Molecule>,
}

/// The whole coupled system, one equation per unknown.
#[derive(Debug, Clone)]
pub struct EquationSystem {
    pub eqns: Vec<Equation>,
}

impl EquationSystem {
    /// Empty schema with the given number of molecules per equation. Each
    /// molecule starts with coefficient 1 and no atoms.
    pub fn with_shape(molecules_per_eqn: &[usize]) -> Self {
        let eqns = molecules_per_eqn
            .iter()
            .map(|&n| Equation {
                molecules: (0..n).map(|_| Molecule::new(1.0)).collect(),
            })
            .collect();
        Self { eqns }
    }

    pub fn field_count(&self) -> usize {
        self.eqns.len()
    }
}

impl Equation {
    /// F_e(u) at `(i, j, k)`.
    ///
    /// `rhos` holds the per-molecule density grid at this depth, `None` for
    /// constant-coefficient molecules.
    pub fn eval_pt(
        &self,
        us: &[&Grid3D],
        rhos: &[Option<&Grid3D>],
        st: &Stencil,
        i: usize,
        j: usize,
        k: usize,
    ) -> f64 {
        let mut res = 0.0;
        for (mol, rho) in self.molecules.iter().zip(rhos) {
            let mut val = mol.const_coef;
            if let Some(r) = rho {
                val *= r[r.idx(i, j, k)];
            }
            for atom in &mol.atoms {
                val *= atom.eval(us, st, i, j, k);
            }
            res += val;
        }
        res
    }

    /// Directional derivative `(dF_e/du_q) · v` at `(i, j, k)`, where `v` is
    /// the direction grid for field `q`. Atoms acting on other fields only
    /// contribute their plain value.
    pub fn dir_deriv_pt(
        &self,
        us: &[&Grid3D],
        rhos: &[Option<&Grid3D>],
        v: &Grid3D,
        q: usize,
        st: &Stencil,
        i: usize,
        j: usize,
        k: usize,
    ) -> f64 {
        let mut res = 0.0;
        for (mol, rho) in self.molecules.iter().zip(rhos) {
            let mut non_der = mol.const_coef;
            if let Some(r) = rho {
                non_der *= r[r.idx(i, j, k)];
            }
            let mut der = 0.0;

            for atom in &mol.atoms {
                let val = atom.eval(us, st, i, j, k);
                if atom.field() == q {
                    der = non_der * atom.apply_direction(us, v, st, i, j, k) + der * val;
                    non_der *= val;
                } else {
                    der *= val;
                    non_der *= val;
                }
            }
            res += der;
        }
        res
    }

    /// Coefficients `(A, B)` of the point-Jacobi update for this equation
    /// with respect to its own field `own`, direction grid `v`.
    ///
    /// `A` carries every off-diagonal derivative contribution applied to `v`
    /// (plus, for pure second derivatives and the Laplacian, the diagonal
    /// weight times `v` at the point itself, cancelling the diagonal buried
    /// in the full stencil value); `B` is the coefficient of `v` at the point
    /// in the linearised molecule: polynomial diagonals enter with `+`, the
    /// stencil diagonal `double_der_center / h²` (times 3 for the Laplacian,
    /// absent for mixed derivatives) with `-`.
    pub fn jacobian_split_pt(
        &self,
        us: &[&Grid3D],
        rhos: &[Option<&Grid3D>],
        v: &Grid3D,
        own: usize,
        st: &Stencil,
        i: usize,
        j: usize,
        k: usize,
    ) -> (f64, f64) {
        let h = st.spacing(v);
        let inv_h2 = 1.0 / (h * h);
        let dd = st.order.double_der_center();

        let mut coef_a = 0.0;
        let mut coef_b = 0.0;

        for (mol, rho) in self.molecules.iter().zip(rhos) {
            let mut mol_a = 0.0;
            let mut mol_b = 0.0;
            let mut non_der = mol.const_coef;
            if let Some(r) = rho {
                non_der *= r[r.idx(i, j, k)];
            }

            for atom in &mol.atoms {
                let val = atom.eval(us, st, i, j, k);
                if atom.field() != own {
                    mol_a *= val;
                    mol_b *= val;
                    non_der *= val;
                    continue;
                }

                match *atom {
                    Atom::Poly { field, exponent } => {
                        let u = us[field];
                        let du = exponent * u[u.idx(i, j, k)].powf(exponent - 1.0);
                        mol_b = mol_b * val + non_der * du;
                        mol_a *= val;
                    }
                    Atom::D1 { axis, .. } => {
                        mol_a = mol_a * val + non_der * st.derivative(v, i, j, k, axis);
                        mol_b *= val;
                    }
                    Atom::D2 { axes, .. } => {
                        let dv = st.double_derivative(v, i, j, k, axes.0, axes.1);
                        let diag = if axes.0 == axes.1 { dd * inv_h2 } else { 0.0 };
                        mol_a = mol_a * val + non_der * (dv + diag * v[v.idx(i, j, k)]);
                        mol_b = mol_b * val - non_der * diag;
                    }
                    Atom::Lap { .. } => {
                        let dv = st.laplacian(v, i, j, k);
                        let diag = 3.0 * dd * inv_h2;
                        mol_a = mol_a * val + non_der * (dv + diag * v[v.idx(i, j, k)]);
                        mol_b = mol_b * val - non_der * diag;
                    }
                }
                non_der *= val;
            }

            coef_a += mol_a;
            coef_b += mol_b;
        }

        (coef_a, coef_b)
    }
}

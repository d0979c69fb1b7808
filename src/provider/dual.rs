//! Forward-mode automatic differentiation via vector-valued dual numbers.
//!
//! Each [`Dual`] carries a primal value and one partial derivative per input direction, so a
//! single evaluation of the primal at all inputs seeded simultaneously produces the full
//! dense Jacobian in one forward sweep over all `n` inputs.

use super::{Numeric, Primal};

#[derive(Debug, Clone)]
pub struct Dual {
    re: f64,
    du: Vec<f64>,
}

impl Dual {
    fn constant(re: f64, n: usize) -> Self {
        Self { re, du: vec![0.0; n] }
    }

    fn seed(re: f64, n: usize, index: usize) -> Self {
        let mut du = vec![0.0; n];
        du[index] = 1.0;
        Self { re, du }
    }
}

/// `Dual::from_f64` produces an empty `du` (arity isn't known yet); every arithmetic op
/// therefore treats a missing entry as an implicit zero rather than zipping to the shorter
/// length, so constants combine correctly with seeded operands of any arity.
fn zip_du(a: &[f64], b: &[f64]) -> Vec<(f64, f64)> {
    let n = a.len().max(b.len());
    (0..n)
        .map(|i| (a.get(i).copied().unwrap_or(0.0), b.get(i).copied().unwrap_or(0.0)))
        .collect()
}

impl std::ops::Add for Dual {
    type Output = Dual;
    fn add(self, rhs: Self) -> Dual {
        Dual {
            re: self.re + rhs.re,
            du: zip_du(&self.du, &rhs.du).into_iter().map(|(a, b)| a + b).collect(),
        }
    }
}

impl std::ops::Sub for Dual {
    type Output = Dual;
    fn sub(self, rhs: Self) -> Dual {
        Dual {
            re: self.re - rhs.re,
            du: zip_du(&self.du, &rhs.du).into_iter().map(|(a, b)| a - b).collect(),
        }
    }
}

impl std::ops::Mul for Dual {
    type Output = Dual;
    fn mul(self, rhs: Self) -> Dual {
        Dual {
            re: self.re * rhs.re,
            du: zip_du(&self.du, &rhs.du)
                .into_iter()
                .map(|(a, b)| a * rhs.re + b * self.re)
                .collect(),
        }
    }
}

impl std::ops::Div for Dual {
    type Output = Dual;
    fn div(self, rhs: Self) -> Dual {
        let re = self.re / rhs.re;
        Dual {
            re,
            du: zip_du(&self.du, &rhs.du)
                .into_iter()
                .map(|(a, b)| (a - re * b) / rhs.re)
                .collect(),
        }
    }
}

impl std::ops::Neg for Dual {
    type Output = Dual;
    fn neg(self) -> Dual {
        Dual {
            re: -self.re,
            du: self.du.iter().map(|a| -a).collect(),
        }
    }
}

impl Numeric for Dual {
    fn from_f64(v: f64) -> Self {
        Dual { re: v, du: Vec::new() }
    }

    fn value(&self) -> f64 {
        self.re
    }

    fn sqrt(self) -> Self {
        let re = self.re.sqrt();
        Dual {
            re,
            du: self.du.iter().map(|a| a / (2.0 * re)).collect(),
        }
    }

    fn exp(self) -> Self {
        let re = self.re.exp();
        Dual {
            re,
            du: self.du.iter().map(|a| a * re).collect(),
        }
    }

    fn sin(self) -> Self {
        let re = self.re.sin();
        let c = self.re.cos();
        Dual {
            re,
            du: self.du.iter().map(|a| a * c).collect(),
        }
    }

    fn cos(self) -> Self {
        let re = self.re.cos();
        let s = self.re.sin();
        Dual {
            re,
            du: self.du.iter().map(|a| -a * s).collect(),
        }
    }

    fn powi(self, n: i32) -> Self {
        let re = self.re.powi(n);
        let factor = n as f64 * self.re.powi(n - 1);
        Dual {
            re,
            du: self.du.iter().map(|a| a * factor).collect(),
        }
    }
}

/// `from_f64` above leaves `du` empty so constants don't need to know `n` up front; any
/// arithmetic with a seeded operand broadcasts against its length. This helper pads a
/// freshly-constructed constant once `n` is known, used only when seeding the input vector.
fn constants_with_arity(x: &[f64], n: usize) -> Vec<Dual> {
    (0..x.len()).map(|i| Dual::seed(x[i], n, i)).collect()
}

/// Compute `(y, J)` for a primal generic over [`Numeric`], seeding all `nx` input directions
/// in one pass.
pub fn forward_jacobian<P: Primal>(primal: &P, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = x.len();
    let duals = constants_with_arity(x, n);
    let out = primal.eval(&duals);
    let y = out.iter().map(Dual::value).collect();
    let mut j = Vec::with_capacity(out.len() * n);
    for o in &out {
        if o.du.is_empty() {
            j.extend(std::iter::repeat(0.0).take(n));
        } else {
            j.extend_from_slice(&o.du);
        }
    }
    (y, j)
}

//! Reverse-mode automatic differentiation via an operation tape.
//!
//! [`Var`] records every arithmetic operation it takes part in onto a shared [`Tape`]; after
//! the primal runs once, a backward pass from each output produces one row of the Jacobian,
//! one sweep over all `m` outputs. The tape is reference-counted so a generic
//! `Primal::eval<T: Numeric>` can be instantiated at `T = Var` without threading a lifetime
//! through the trait. A bare constant built via `Numeric::from_f64` carries no tape at all
//! (`Var::Constant`) and only gains one the moment it meets a tape-attached operand.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Numeric, Primal};

#[derive(Debug, Clone, Copy)]
struct Node {
    /// Up to two parent tape indices and the local partial derivative with respect to each.
    parents: [(usize, f64); 2],
}

#[derive(Debug, Default)]
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
}

const NONE: usize = usize::MAX;

impl Tape {
    fn push(&self, parents: [(usize, f64); 2]) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node { parents });
        nodes.len() - 1
    }

    fn leaf(&self) -> usize {
        self.push([(NONE, 0.0), (NONE, 0.0)])
    }

    /// Backpropagate from `output`, returning the gradient with respect to every tape node.
    fn backward(&self, output: usize) -> Vec<f64> {
        let nodes = self.nodes.borrow();
        let mut adj = vec![0.0; nodes.len()];
        adj[output] = 1.0;
        for i in (0..nodes.len()).rev() {
            let a = adj[i];
            if a == 0.0 {
                continue;
            }
            for &(parent, weight) in &nodes[i].parents {
                if parent != NONE {
                    adj[parent] += a * weight;
                }
            }
        }
        adj
    }
}

/// A value participating in a reverse-mode sweep: either a tape-attached node or a bare
/// constant that has not yet touched the tape.
#[derive(Debug, Clone)]
pub enum Var {
    Constant(f64),
    Tracked { tape: Rc<Tape>, idx: usize, val: f64 },
}

impl Var {
    fn leaf(tape: &Rc<Tape>, val: f64) -> Self {
        Var::Tracked { tape: tape.clone(), idx: tape.leaf(), val }
    }

    fn val(&self) -> f64 {
        match self {
            Var::Constant(v) => *v,
            Var::Tracked { val, .. } => *val,
        }
    }

    fn tape(&self) -> Option<&Rc<Tape>> {
        match self {
            Var::Constant(_) => None,
            Var::Tracked { tape, .. } => Some(tape),
        }
    }

    fn idx(&self) -> usize {
        match self {
            Var::Constant(_) => NONE,
            Var::Tracked { idx, .. } => *idx,
        }
    }

    fn combine(self, rhs: Self, val: f64, da: f64, db: f64) -> Self {
        match self.tape().or_else(|| rhs.tape()).cloned() {
            Some(tape) => {
                let idx = tape.push([(self.idx(), da), (rhs.idx(), db)]);
                Var::Tracked { tape, idx, val }
            }
            None => Var::Constant(val),
        }
    }

    fn map(self, val: f64, d: f64) -> Self {
        match self.tape().cloned() {
            Some(tape) => {
                let idx = tape.push([(self.idx(), d), (NONE, 0.0)]);
                Var::Tracked { tape, idx, val }
            }
            None => Var::Constant(val),
        }
    }
}

impl std::ops::Add for Var {
    type Output = Var;
    fn add(self, rhs: Self) -> Var {
        let val = self.val() + rhs.val();
        self.combine(rhs, val, 1.0, 1.0)
    }
}

impl std::ops::Sub for Var {
    type Output = Var;
    fn sub(self, rhs: Self) -> Var {
        let val = self.val() - rhs.val();
        self.combine(rhs, val, 1.0, -1.0)
    }
}

impl std::ops::Mul for Var {
    type Output = Var;
    fn mul(self, rhs: Self) -> Var {
        let val = self.val() * rhs.val();
        let (a, b) = (self.val(), rhs.val());
        self.combine(rhs, val, b, a)
    }
}

impl std::ops::Div for Var {
    type Output = Var;
    fn div(self, rhs: Self) -> Var {
        let val = self.val() / rhs.val();
        let r = rhs.val();
        self.combine(rhs, val, 1.0 / r, -val / r)
    }
}

impl std::ops::Neg for Var {
    type Output = Var;
    fn neg(self) -> Var {
        let val = -self.val();
        self.map(val, -1.0)
    }
}

impl Numeric for Var {
    fn from_f64(v: f64) -> Self {
        Var::Constant(v)
    }

    fn value(&self) -> f64 {
        self.val()
    }

    fn sqrt(self) -> Self {
        let val = self.val().sqrt();
        let d = 1.0 / (2.0 * val);
        self.map(val, d)
    }

    fn exp(self) -> Self {
        let val = self.val().exp();
        self.map(val, val)
    }

    fn sin(self) -> Self {
        let d = self.val().cos();
        let val = self.val().sin();
        self.map(val, d)
    }

    fn cos(self) -> Self {
        let d = -self.val().sin();
        let val = self.val().cos();
        self.map(val, d)
    }

    fn powi(self, n: i32) -> Self {
        let d = n as f64 * self.val().powi(n - 1);
        let val = self.val().powi(n);
        self.map(val, d)
    }
}

/// Compute `(y, J)` for a primal generic over [`Numeric`] by recording one forward pass onto
/// a tape, then backpropagating once per output.
pub fn reverse_jacobian<P: Primal>(primal: &P, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let tape = Rc::new(Tape::default());
    let vars: Vec<Var> = x.iter().map(|&v| Var::leaf(&tape, v)).collect();
    let out = primal.eval(&vars);
    let y: Vec<f64> = out.iter().map(Var::value).collect();
    let mut j = Vec::with_capacity(out.len() * x.len());
    for o in &out {
        match o {
            Var::Constant(_) => j.extend(std::iter::repeat(0.0).take(vars.len())),
            Var::Tracked { idx, .. } => {
                let adj = tape.backward(*idx);
                for v in &vars {
                    j.push(adj[v.idx()]);
                }
            }
        }
    }
    (y, j)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Paraboloid;
    impl Primal for Paraboloid {
        fn eval<T: Numeric>(&self, x: &[T]) -> Vec<T> {
            let (x0, y0) = (x[0].clone(), x[1].clone());
            let a = x0.clone() - T::from_f64(3.0);
            let b = y0.clone() + T::from_f64(4.0);
            vec![a.clone() * a + x0 * y0.clone() + b.clone() * b - T::from_f64(3.0)]
        }
    }

    #[test]
    fn matches_hand_derived_jacobian_at_origin() {
        let (y, j) = reverse_jacobian(&Paraboloid, &[0.0, 0.0]);
        assert_eq!(y, vec![22.0]);
        assert_eq!(j, vec![-6.0, 8.0]);
    }

    #[test]
    fn constant_output_has_zero_gradient() {
        struct Constant;
        impl Primal for Constant {
            fn eval<T: Numeric>(&self, _x: &[T]) -> Vec<T> {
                vec![T::from_f64(5.0)]
            }
        }
        let (y, j) = reverse_jacobian(&Constant, &[1.0, 2.0]);
        assert_eq!(y, vec![5.0]);
        assert_eq!(j, vec![0.0, 0.0]);
    }
}

//! Finite-difference and complex-step derivative providers.
//!
//! Grounded on the perturbation pattern of `argmin`'s `finitediff` vector Jacobians: probe
//! one input direction at a time, form the difference quotient, and assemble rows into a
//! flattened `ny x nx` Jacobian. Complex-step differentiation reuses the same probing loop
//! but perturbs along the imaginary axis of a [`Complex64`] evaluation instead of a real
//! step, which avoids subtractive cancellation entirely (`step.complex` defaults to `1e-20`).

use num_complex::Complex64;

use super::Primal;

/// One-sided forward difference: `(f(x + h eⱼ) − f(x)) / h`.
pub fn forward_fd<P: Primal>(primal: &P, x: &[f64], h: f64) -> (Vec<f64>, Vec<f64>) {
    let y = primal.eval::<f64>(x);
    let ny = y.len();
    let mut j = vec![0.0; ny * x.len()];
    let mut probe = x.to_vec();
    for col in 0..x.len() {
        probe[col] = x[col] + h;
        let y_plus = primal.eval::<f64>(&probe);
        probe[col] = x[col];
        for row in 0..ny {
            j[row * x.len() + col] = (y_plus[row] - y[row]) / h;
        }
    }
    (y, j)
}

/// Central difference: `(f(x + h eⱼ) − f(x − h eⱼ)) / (2h)`.
pub fn central_fd<P: Primal>(primal: &P, x: &[f64], h: f64) -> (Vec<f64>, Vec<f64>) {
    let y = primal.eval::<f64>(x);
    let ny = y.len();
    let mut j = vec![0.0; ny * x.len()];
    let mut probe = x.to_vec();
    for col in 0..x.len() {
        probe[col] = x[col] + h;
        let y_plus = primal.eval::<f64>(&probe);
        probe[col] = x[col] - h;
        let y_minus = primal.eval::<f64>(&probe);
        probe[col] = x[col];
        for row in 0..ny {
            j[row * x.len() + col] = (y_plus[row] - y_minus[row]) / (2.0 * h);
        }
    }
    (y, j)
}

/// Complex-step differentiation: `Im(f(x + i h eⱼ)) / h`.
pub fn complex_fd<P: Primal>(primal: &P, x: &[f64], h: f64) -> (Vec<f64>, Vec<f64>) {
    let y = primal.eval::<f64>(x);
    let ny = y.len();
    let mut j = vec![0.0; ny * x.len()];
    let mut probe: Vec<Complex64> = x.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    for col in 0..x.len() {
        probe[col] = Complex64::new(x[col], h);
        let y_probe = primal.eval::<Complex64>(&probe);
        probe[col] = Complex64::new(x[col], 0.0);
        for row in 0..ny {
            j[row * x.len() + col] = y_probe[row].im / h;
        }
    }
    (y, j)
}

//! Derivative providers: the pluggable strategies that turn a user's *primal* routine into
//! a Jacobian.
//!
//! A primal is a function generic over [`Numeric`], so the same code path produces the
//! value (`T = f64`), a forward-mode sweep (`T = `[`dual::Dual`]), a reverse-mode sweep
//! (`T = `[`tape::Var`]), or a complex-step probe (`T = num_complex::Complex<f64>`). Finite
//! differences never need genericity at all and call the primal only at `T = f64`.
//!
//! [`evaluate`] implements the fallback policy: an analytic routine, when supplied, always
//! wins; a combined `fdf` is preferred for combined value-and-Jacobian queries, `f` and `df`
//! for split ones; otherwise the configured AD/FD provider is used, and a combined provider
//! silently discards the half a query didn't ask for.

pub mod dual;
pub mod fd;
pub mod tape;

use num_complex::Complex64;

use crate::error::Error;

/// The element type a primal must be generic over so the same code serves every provider.
pub trait Numeric:
    Clone
    + std::fmt::Debug
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
    + std::ops::Div<Output = Self>
    + std::ops::Neg<Output = Self>
{
    /// Lift a plain constant into this element type (no derivative information).
    fn from_f64(v: f64) -> Self;
    /// The primal (real) value, discarding any derivative information.
    fn value(&self) -> f64;
    fn sqrt(self) -> Self;
    fn exp(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn powi(self, n: i32) -> Self;
}

impl Numeric for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }
    fn value(&self) -> f64 {
        *self
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn sin(self) -> Self {
        f64::sin(self)
    }
    fn cos(self) -> Self {
        f64::cos(self)
    }
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }
}

impl Numeric for Complex64 {
    fn from_f64(v: f64) -> Self {
        Complex64::new(v, 0.0)
    }
    fn value(&self) -> f64 {
        self.re
    }
    fn sqrt(self) -> Self {
        Complex64::sqrt(&self)
    }
    fn exp(self) -> Self {
        Complex64::exp(&self)
    }
    fn sin(self) -> Self {
        Complex64::sin(&self)
    }
    fn cos(self) -> Self {
        Complex64::cos(&self)
    }
    fn powi(self, n: i32) -> Self {
        Complex64::powi(&self, n)
    }
}

/// A user-supplied computation, generic over the element type it is evaluated at.
///
/// `x.len() == nx`; the returned vector has length `ny`. Implementors hold no state beyond
/// what closures capture — the wrapping component owns the caches.
pub trait Primal {
    fn eval<T: Numeric>(&self, x: &[T]) -> Vec<T>;
}

/// Which derivative strategy to use when no analytic Jacobian routine applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Analytic,
    ForwardAD,
    ReverseAD,
    ForwardFD,
    CentralFD,
    ComplexFD,
}

/// Finite-difference step sizes, overridable per provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FdStep {
    pub forward: f64,
    pub central: f64,
    pub complex: f64,
}

impl Default for FdStep {
    fn default() -> Self {
        Self {
            forward: f64::EPSILON.sqrt(),
            central: f64::EPSILON.cbrt(),
            complex: 1e-20,
        }
    }
}

/// User-supplied analytic routines. Any subset may be `None`; [`evaluate`] falls back to
/// the configured AD/FD provider for whatever is missing.
#[derive(Default)]
pub struct Analytic {
    /// `f(x) -> y`, used only when a combined `fdf` wasn't given but pure output is needed
    /// alongside an analytic Jacobian.
    pub f: Option<Box<dyn Fn(&[f64]) -> Vec<f64>>>,
    /// `df(x) -> J` flattened row-major, `ny` rows by `nx` columns.
    pub df: Option<Box<dyn Fn(&[f64]) -> Vec<f64>>>,
    /// Combined `fdf(x) -> (y, J)`, preferred over `f`+`df` for combined queries; `f`/`df`
    /// win split queries.
    pub fdf: Option<Box<dyn Fn(&[f64]) -> (Vec<f64>, Vec<f64>)>>,
}

/// The configured derivative provider for one component slot (`deriv`/`xderiv`/`yderiv`).
#[derive(Debug, Clone, Copy)]
pub struct DerivativeProvider {
    pub kind: ProviderKind,
    pub step: FdStep,
}

impl DerivativeProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind, step: FdStep::default() }
    }

    pub fn with_step(mut self, step: FdStep) -> Self {
        self.step = step;
        self
    }
}

/// What a caller is asking [`evaluate`] to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    ValueOnly,
    JacobianOnly,
    Both,
}

/// Evaluate a primal's value and/or Jacobian following the analytic-first fallback policy.
pub fn evaluate<P: Primal>(
    primal: &P,
    analytic: &Analytic,
    provider: &DerivativeProvider,
    x: &[f64],
    query: Query,
) -> Result<(Option<Vec<f64>>, Option<Vec<f64>>), Error> {
    match query {
        Query::Both => {
            if let Some(fdf) = &analytic.fdf {
                let (y, j) = fdf(x);
                return Ok((Some(y), Some(j)));
            }
            let y = analytic.f.as_ref().map(|f| f(x));
            let j = analytic.df.as_ref().map(|df| df(x));
            match (y, j) {
                (Some(y), Some(j)) => Ok((Some(y), Some(j))),
                (y_opt, None) if matches!(provider.kind, ProviderKind::Analytic) => {
                    let _ = y_opt;
                    Err(Error::ProviderUnavailable)
                }
                (y_opt, j_opt) => {
                    let (y, j) = dispatch_combined(primal, provider, x)?;
                    Ok((Some(y_opt.unwrap_or(y.clone())), Some(j_opt.unwrap_or(j))))
                }
            }
        }
        Query::ValueOnly => {
            if let Some(fdf) = &analytic.fdf {
                return Ok((Some(fdf(x).0), None));
            }
            if let Some(f) = &analytic.f {
                return Ok((Some(f(x)), None));
            }
            if matches!(provider.kind, ProviderKind::Analytic) {
                return Err(Error::ProviderUnavailable);
            }
            Ok((Some(primal.eval(x)), None))
        }
        Query::JacobianOnly => {
            if let Some(df) = &analytic.df {
                return Ok((None, Some(df(x))));
            }
            if let Some(fdf) = &analytic.fdf {
                return Ok((None, Some(fdf(x).1)));
            }
            if matches!(provider.kind, ProviderKind::Analytic) {
                return Err(Error::ProviderUnavailable);
            }
            let (_, j) = dispatch_combined(primal, provider, x)?;
            Ok((None, Some(j)))
        }
    }
}

/// Route to the configured AD/FD provider for a combined value-and-Jacobian computation.
///
/// Exposed at `pub(crate)` visibility so [`crate::component::implicit`] can reuse it for the
/// joint `[x; y]` sweep that produces both `∂r/∂x` and `∂r/∂y` in one pass.
pub(crate) fn dispatch_combined<P: Primal>(
    primal: &P,
    provider: &DerivativeProvider,
    x: &[f64],
) -> Result<(Vec<f64>, Vec<f64>), Error> {
    match provider.kind {
        ProviderKind::Analytic => Err(Error::ProviderUnavailable),
        ProviderKind::ForwardAD => Ok(dual::forward_jacobian(primal, x)),
        ProviderKind::ReverseAD => Ok(tape::reverse_jacobian(primal, x)),
        ProviderKind::ForwardFD => Ok(fd::forward_fd(primal, x, provider.step.forward)),
        ProviderKind::CentralFD => Ok(fd::central_fd(primal, x, provider.step.central)),
        ProviderKind::ComplexFD => Ok(fd::complex_fd(primal, x, provider.step.complex)),
    }
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
    fn analytic_fdf_wins_combined_query() {
        let primal = Paraboloid;
        let analytic = Analytic {
            fdf: Some(Box::new(|x| (vec![x[0] + x[1]], vec![1.0, 1.0]))),
            ..Default::default()
        };
        let provider = DerivativeProvider::new(ProviderKind::ForwardAD);
        let (y, j) = evaluate(&primal, &analytic, &provider, &[0.0, 0.0], Query::Both).unwrap();
        assert_eq!(y.unwrap(), vec![0.0]);
        assert_eq!(j.unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn falls_back_to_configured_provider_without_analytic() {
        let primal = Paraboloid;
        let analytic = Analytic::default();
        let provider = DerivativeProvider::new(ProviderKind::ForwardAD);
        let (y, j) = evaluate(&primal, &analytic, &provider, &[0.0, 0.0], Query::Both).unwrap();
        assert_eq!(y.unwrap(), vec![22.0]);
        assert_eq!(j.unwrap(), vec![-6.0, 8.0]);
    }

    #[test]
    fn analytic_only_kind_without_routines_is_unavailable() {
        let primal = Paraboloid;
        let analytic = Analytic::default();
        let provider = DerivativeProvider::new(ProviderKind::Analytic);
        assert!(matches!(
            evaluate(&primal, &analytic, &provider, &[0.0, 0.0], Query::Both),
            Err(Error::ProviderUnavailable)
        ));
    }
}

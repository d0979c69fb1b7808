//! Explicit component: `y = f(x)` plus its Jacobian and cache.

use crate::component::Cache;
use crate::error::Error;
use crate::provider::{evaluate, Analytic, DerivativeProvider, Primal, Query};
use crate::variable::VarLayout;

/// Wraps a user [`Primal`] with its declared input/output layout, derivative provider, and
/// evaluation cache.
///
/// The flat output is the concatenation of `out_vars` (returned by the user function) then
/// `out_mut` (populated in place), in that order. Both are folded into a single `out_layout`
/// here: the distinction only ever mattered for a dynamic calling convention, and a primal
/// generic over [`crate::provider::Numeric`] has no notion of "in place" — it simply returns
/// the full concatenated vector.
pub struct ExplicitComponent<P: Primal> {
    in_vars: VarLayout,
    out_layout: VarLayout,
    primal: P,
    analytic: Analytic,
    provider: DerivativeProvider,
    cache: Cache,
}

impl<P: Primal> ExplicitComponent<P> {
    pub fn new(
        primal: P,
        in_vars: VarLayout,
        out_layout: VarLayout,
        analytic: Analytic,
        provider: DerivativeProvider,
    ) -> Self {
        let cache = Cache::new(in_vars.combine(), out_layout.combine());
        Self {
            in_vars,
            out_layout,
            primal,
            analytic,
            provider,
            cache,
        }
    }

    pub fn nx(&self) -> usize {
        self.in_vars.width()
    }

    pub fn ny(&self) -> usize {
        self.out_layout.width()
    }

    pub fn in_vars(&self) -> &VarLayout {
        &self.in_vars
    }

    pub fn out_vars(&self) -> &VarLayout {
        &self.out_layout
    }

    fn check_nx(&self, x: &[f64]) -> Result<(), Error> {
        if x.len() != self.nx() {
            return Err(Error::SizeMismatch { expected: self.nx(), actual: x.len() });
        }
        Ok(())
    }

    fn recompute(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<f64>), Error> {
        let (y, j) = evaluate(&self.primal, &self.analytic, &self.provider, x, Query::Both)?;
        Ok((y.expect("Query::Both always returns a value"), j.expect("Query::Both always returns a Jacobian")))
    }

    fn ensure_current(&mut self, x: &[f64], force: bool) -> Result<(), Error> {
        self.check_nx(x)?;
        if force || !self.cache.is_current(x) {
            let (y, jac) = self.recompute(x)?;
            self.cache.x.copy_from_slice(x);
            self.cache.y = y;
            self.cache.jac = jac;
            self.cache.valid = true;
        }
        Ok(())
    }

    // --- query: fresh allocation, no cache mutation ---

    pub fn outputs(&self, x: &[f64]) -> Result<Vec<f64>, Error> {
        self.check_nx(x)?;
        Ok(self.recompute(x)?.0)
    }

    pub fn jacobian(&self, x: &[f64]) -> Result<Vec<f64>, Error> {
        self.check_nx(x)?;
        Ok(self.recompute(x)?.1)
    }

    pub fn outputs_and_jacobian(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<f64>), Error> {
        self.check_nx(x)?;
        self.recompute(x)
    }

    // --- `!` with buffers: write into caller's buffers, mutate cache ---

    pub fn outputs_write(&mut self, out: &mut [f64], x: &[f64]) -> Result<(), Error> {
        self.ensure_current(x, false)?;
        if out.len() != self.ny() {
            return Err(Error::SizeMismatch { expected: self.ny(), actual: out.len() });
        }
        out.copy_from_slice(&self.cache.y);
        Ok(())
    }

    pub fn jacobian_write(&mut self, out: &mut [f64], x: &[f64]) -> Result<(), Error> {
        self.ensure_current(x, false)?;
        if out.len() != self.cache.jac.len() {
            return Err(Error::SizeMismatch { expected: self.cache.jac.len(), actual: out.len() });
        }
        out.copy_from_slice(&self.cache.jac);
        Ok(())
    }

    pub fn outputs_and_jacobian_write(&mut self, y_out: &mut [f64], j_out: &mut [f64], x: &[f64]) -> Result<(), Error> {
        self.outputs_write(y_out, x)?;
        j_out.copy_from_slice(&self.cache.jac);
        Ok(())
    }

    // --- `!` without buffers: write cache, return a reference ---

    pub fn outputs_update(&mut self, x: &[f64]) -> Result<&[f64], Error> {
        self.ensure_current(x, false)?;
        Ok(&self.cache.y)
    }

    pub fn jacobian_update(&mut self, x: &[f64]) -> Result<&[f64], Error> {
        self.ensure_current(x, false)?;
        Ok(&self.cache.jac)
    }

    pub fn outputs_and_jacobian_update(&mut self, x: &[f64]) -> Result<(&[f64], &[f64]), Error> {
        self.ensure_current(x, false)?;
        Ok((&self.cache.y, &self.cache.jac))
    }

    // --- `!!`: force recomputation even if x == x* ---

    pub fn outputs_force(&mut self, x: &[f64]) -> Result<&[f64], Error> {
        self.ensure_current(x, true)?;
        Ok(&self.cache.y)
    }

    pub fn jacobian_force(&mut self, x: &[f64]) -> Result<&[f64], Error> {
        self.ensure_current(x, true)?;
        Ok(&self.cache.jac)
    }

    pub fn outputs_and_jacobian_force(&mut self, x: &[f64]) -> Result<(&[f64], &[f64]), Error> {
        self.ensure_current(x, true)?;
        Ok((&self.cache.y, &self.cache.jac))
    }

    // --- no-args query: return cached result without recomputation ---

    pub fn outputs_cached(&self) -> &[f64] {
        &self.cache.y
    }

    pub fn jacobian_cached(&self) -> &[f64] {
        &self.cache.jac
    }

    pub fn cached_input(&self) -> &[f64] {
        &self.cache.x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Numeric, ProviderKind};
    use crate::variable::Variable;

    struct Paraboloid;
    impl Primal for Paraboloid {
        fn eval<T: Numeric>(&self, x: &[T]) -> Vec<T> {
            let (x0, y0) = (x[0].clone(), x[1].clone());
            let a = x0.clone() - T::from_f64(3.0);
            let b = y0.clone() + T::from_f64(4.0);
            vec![a.clone() * a + x0 * y0.clone() + b.clone() * b - T::from_f64(3.0)]
        }
    }

    fn comp() -> ExplicitComponent<Paraboloid> {
        let in_vars = VarLayout::new(vec![Variable::scalar("x", 0.0), Variable::scalar("y", 0.0)]);
        let out_vars = VarLayout::new(vec![Variable::scalar("f", 0.0)]);
        ExplicitComponent::new(
            Paraboloid,
            in_vars,
            out_vars,
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        )
    }

    #[test]
    fn paraboloid_output_and_jacobian_at_origin() {
        let c = comp();
        let (y, j) = c.outputs_and_jacobian(&[0.0, 0.0]).unwrap();
        assert_eq!(y, vec![22.0]);
        assert_eq!(j, vec![-6.0, 8.0]);
    }

    #[test]
    fn analytic_provider_matches_known_values_at_origin() {
        let in_vars = VarLayout::new(vec![Variable::scalar("x", 0.0), Variable::scalar("y", 0.0)]);
        let out_vars = VarLayout::new(vec![Variable::scalar("f", 0.0)]);
        let analytic = Analytic {
            f: Some(Box::new(|x: &[f64]| {
                let (x0, y0) = (x[0], x[1]);
                vec![(x0 - 3.0).powi(2) + x0 * y0 + (y0 + 4.0).powi(2) - 3.0]
            })),
            df: Some(Box::new(|x: &[f64]| {
                let (x0, y0) = (x[0], x[1]);
                vec![2.0 * (x0 - 3.0) + y0, x0 + 2.0 * (y0 + 4.0)]
            })),
            fdf: None,
        };
        let c = ExplicitComponent::new(
            Paraboloid,
            in_vars,
            out_vars,
            analytic,
            DerivativeProvider::new(ProviderKind::Analytic),
        );
        let (y, j) = c.outputs_and_jacobian(&[0.0, 0.0]).unwrap();
        assert_eq!(y, vec![22.0]);
        assert_eq!(j, vec![-6.0, 8.0]);
    }

    #[test]
    fn four_suffix_equivalence() {
        let mut c = comp();
        let x = [1.0, 2.0];
        let query = c.outputs(&x).unwrap();

        let mut buf = vec![0.0; 1];
        c.outputs_write(&mut buf, &x).unwrap();

        let updated = c.outputs_update(&x).unwrap().to_vec();
        let forced = c.outputs_force(&x).unwrap().to_vec();
        let cached = c.outputs_cached().to_vec();

        assert_eq!(query, buf);
        assert_eq!(query, updated);
        assert_eq!(query, forced);
        assert_eq!(query, cached);
    }

    #[test]
    fn size_mismatch_is_reported() {
        let c = comp();
        assert!(matches!(c.outputs(&[0.0]), Err(Error::SizeMismatch { .. })));
    }
}

//! Implicit component: `r(x, y) = 0` plus its two Jacobian blocks and cache.

use crate::component::explicit::ExplicitComponent;
use crate::error::Error;
use crate::provider::{dispatch_combined, DerivativeProvider, Primal, ProviderKind};
use crate::variable::VarLayout;

/// The minimal surface an [`crate::system::ImplicitSystem`] needs from one of its inner
/// components: residuals plus both Jacobian blocks, keyed on a declared input/state layout.
/// Implemented by [`ImplicitComponent`] directly, and by [`Lifted`] for an explicit component
/// wrapped via the `r = y − f(x)` rule.
pub trait Residual {
    fn nx(&self) -> usize;
    fn ny(&self) -> usize;
    fn in_vars(&self) -> &VarLayout;
    fn out_vars(&self) -> &VarLayout;
    /// Evaluate `(r, ∂r/∂x, ∂r/∂y)` at `(x, y)`; `force` selects the `!!` suffix over `!`.
    fn eval(&mut self, x: &[f64], y: &[f64], force: bool) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error>;
}

impl<P: Primal> Residual for ImplicitComponent<P> {
    fn nx(&self) -> usize {
        ImplicitComponent::nx(self)
    }
    fn ny(&self) -> usize {
        ImplicitComponent::ny(self)
    }
    fn in_vars(&self) -> &VarLayout {
        ImplicitComponent::in_vars(self)
    }
    fn out_vars(&self) -> &VarLayout {
        ImplicitComponent::state_vars(self)
    }
    fn eval(&mut self, x: &[f64], y: &[f64], force: bool) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error> {
        if force {
            self.residuals_force(x, y)?;
        } else {
            self.residuals_update(x, y)?;
            self.residual_input_jacobian_update(x, y)?;
            self.residual_output_jacobian_update(x, y)?;
        }
        Ok((
            self.residuals_cached().to_vec(),
            self.residual_input_jacobian_cached().to_vec(),
            self.residual_output_jacobian_cached().to_vec(),
        ))
    }
}

/// An explicit component lifted into a residual `r = y − f(x)`, `∂r/∂x = −J_f`, `∂r/∂y = I`.
/// The way to fold an explicit discipline into an implicit system's residual stack (e.g. one
/// side of a Sellar-style coupled pair).
pub struct Lifted<P: Primal> {
    inner: ExplicitComponent<P>,
}

impl<P: Primal> From<ExplicitComponent<P>> for Lifted<P> {
    fn from(inner: ExplicitComponent<P>) -> Self {
        Self { inner }
    }
}

impl<P: Primal> Residual for Lifted<P> {
    fn nx(&self) -> usize {
        self.inner.nx()
    }
    fn ny(&self) -> usize {
        self.inner.ny()
    }
    fn in_vars(&self) -> &VarLayout {
        self.inner.in_vars()
    }
    fn out_vars(&self) -> &VarLayout {
        self.inner.out_vars()
    }
    fn eval(&mut self, x: &[f64], y: &[f64], force: bool) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error> {
        let (f, j) = if force {
            self.inner.outputs_and_jacobian_force(x)?
        } else {
            self.inner.outputs_and_jacobian_update(x)?
        };
        let ny = f.len();
        let r: Vec<f64> = y.iter().zip(f.iter()).map(|(yi, fi)| yi - fi).collect();
        let dr_dx: Vec<f64> = j.iter().map(|v| -v).collect();
        let mut dr_dy = vec![0.0; ny * ny];
        for i in 0..ny {
            dr_dy[i * ny + i] = 1.0;
        }
        Ok((r, dr_dx, dr_dy))
    }
}

/// User-supplied analytic routines for a residual. Any subset may be `None`; whichever
/// pieces are missing fall back to the configured `xprovider`/`yprovider`.
#[derive(Default)]
pub struct ImplicitAnalytic {
    /// `r(x, y)`.
    pub r: Option<Box<dyn Fn(&[f64], &[f64]) -> Vec<f64>>>,
    /// `∂r/∂x`, flattened row-major `nr x nx`.
    pub dr_dx: Option<Box<dyn Fn(&[f64], &[f64]) -> Vec<f64>>>,
    /// `∂r/∂y`, flattened row-major `nr x ny`.
    pub dr_dy: Option<Box<dyn Fn(&[f64], &[f64]) -> Vec<f64>>>,
    /// Combined `(r, ∂r/∂x)`, preferred over `r` + `dr_dx` when both are given.
    pub r_and_dr_dx: Option<Box<dyn Fn(&[f64], &[f64]) -> (Vec<f64>, Vec<f64>)>>,
    /// Combined `(r, ∂r/∂y)`, preferred over `r` + `dr_dy` when both are given.
    pub r_and_dr_dy: Option<Box<dyn Fn(&[f64], &[f64]) -> (Vec<f64>, Vec<f64>)>>,
}

#[derive(Debug, Clone)]
struct Cache {
    x: Vec<f64>,
    y: Vec<f64>,
    r: Vec<f64>,
    dr_dx: Vec<f64>,
    dr_dy: Vec<f64>,
    valid: bool,
}

impl Cache {
    /// Seeds `x`/`y` from the declared variables' defaults; the residual/Jacobian blocks
    /// start zeroed since no residual has been computed yet.
    fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        let (nx, ny) = (x.len(), y.len());
        Self {
            x,
            y,
            r: vec![0.0; ny],
            dr_dx: vec![0.0; ny * nx],
            dr_dy: vec![0.0; ny * ny],
            valid: false,
        }
    }

    fn is_current(&self, x: &[f64], y: &[f64]) -> bool {
        self.valid && self.x == x && self.y == y
    }
}

/// Wraps a residual `r(x, y)`, generic over [`crate::provider::Numeric`] through its primal,
/// over a flat `[x; y]` input. `nr == ny` by construction.
pub struct ImplicitComponent<P: Primal> {
    in_vars: VarLayout,
    state_vars: VarLayout,
    primal: P,
    analytic: ImplicitAnalytic,
    xprovider: DerivativeProvider,
    yprovider: DerivativeProvider,
    cache: Cache,
}

impl<P: Primal> ImplicitComponent<P> {
    pub fn new(
        primal: P,
        in_vars: VarLayout,
        state_vars: VarLayout,
        analytic: ImplicitAnalytic,
        xprovider: DerivativeProvider,
        yprovider: DerivativeProvider,
    ) -> Self {
        let cache = Cache::new(in_vars.combine(), state_vars.combine());
        Self {
            in_vars,
            state_vars,
            primal,
            analytic,
            xprovider,
            yprovider,
            cache,
        }
    }

    pub fn nx(&self) -> usize {
        self.in_vars.width()
    }

    pub fn ny(&self) -> usize {
        self.state_vars.width()
    }

    pub fn nr(&self) -> usize {
        self.ny()
    }

    pub fn in_vars(&self) -> &VarLayout {
        &self.in_vars
    }

    pub fn state_vars(&self) -> &VarLayout {
        &self.state_vars
    }

    fn check_sizes(&self, x: &[f64], y: &[f64]) -> Result<(), Error> {
        if x.len() != self.nx() {
            return Err(Error::SizeMismatch { expected: self.nx(), actual: x.len() });
        }
        if y.len() != self.ny() {
            return Err(Error::SizeMismatch { expected: self.ny(), actual: y.len() });
        }
        Ok(())
    }

    /// Joint `[x; y]` AD/FD sweep, used whenever a block has no analytic routine. Reused for
    /// whichever of `∂r/∂x`/`∂r/∂y` needs it, rather than one sweep per block, since a single
    /// forward/reverse/FD pass over the concatenated input already yields both halves.
    fn generic_blocks(&self, x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error> {
        let x_is_analytic = matches!(self.xprovider.kind, ProviderKind::Analytic);
        let y_is_analytic = matches!(self.yprovider.kind, ProviderKind::Analytic);
        if x_is_analytic && y_is_analytic {
            return Err(Error::ProviderUnavailable);
        }
        let provider = if !x_is_analytic { &self.xprovider } else { &self.yprovider };

        let mut xy = Vec::with_capacity(x.len() + y.len());
        xy.extend_from_slice(x);
        xy.extend_from_slice(y);
        let (r, j) = dispatch_combined(&self.primal, provider, &xy)?;

        let (nx, ny) = (x.len(), y.len());
        let width = nx + ny;
        let nr = r.len();
        let mut dr_dx = vec![0.0; nr * nx];
        let mut dr_dy = vec![0.0; nr * ny];
        for row in 0..nr {
            dr_dx[row * nx..(row + 1) * nx].copy_from_slice(&j[row * width..row * width + nx]);
            dr_dy[row * ny..(row + 1) * ny].copy_from_slice(&j[row * width + nx..(row + 1) * width]);
        }
        Ok((r, dr_dx, dr_dy))
    }

    fn recompute(&self, x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error> {
        if let Some(combined) = &self.analytic.r_and_dr_dx {
            let (r, dr_dx) = combined(x, y);
            let dr_dy = if let Some(c) = &self.analytic.r_and_dr_dy {
                c(x, y).1
            } else if let Some(f) = &self.analytic.dr_dy {
                f(x, y)
            } else {
                self.generic_blocks(x, y)?.2
            };
            return Ok((r, dr_dx, dr_dy));
        }
        if let Some(combined) = &self.analytic.r_and_dr_dy {
            let (r, dr_dy) = combined(x, y);
            let dr_dx = if let Some(f) = &self.analytic.dr_dx {
                f(x, y)
            } else {
                self.generic_blocks(x, y)?.1
            };
            return Ok((r, dr_dx, dr_dy));
        }

        let r = if let Some(f) = &self.analytic.r {
            f(x, y)
        } else {
            self.generic_blocks(x, y)?.0
        };
        let dr_dx = if let Some(f) = &self.analytic.dr_dx {
            f(x, y)
        } else if matches!(self.xprovider.kind, ProviderKind::Analytic) {
            return Err(Error::ProviderUnavailable);
        } else {
            self.generic_blocks(x, y)?.1
        };
        let dr_dy = if let Some(f) = &self.analytic.dr_dy {
            f(x, y)
        } else if matches!(self.yprovider.kind, ProviderKind::Analytic) {
            return Err(Error::ProviderUnavailable);
        } else {
            self.generic_blocks(x, y)?.2
        };
        Ok((r, dr_dx, dr_dy))
    }

    fn ensure_current(&mut self, x: &[f64], y: &[f64], force: bool) -> Result<(), Error> {
        self.check_sizes(x, y)?;
        if force || !self.cache.is_current(x, y) {
            let (r, dr_dx, dr_dy) = self.recompute(x, y)?;
            self.cache.x.copy_from_slice(x);
            self.cache.y.copy_from_slice(y);
            self.cache.r = r;
            self.cache.dr_dx = dr_dx;
            self.cache.dr_dy = dr_dy;
            self.cache.valid = true;
        }
        Ok(())
    }

    // --- query ---

    pub fn residuals(&self, x: &[f64], y: &[f64]) -> Result<Vec<f64>, Error> {
        self.check_sizes(x, y)?;
        Ok(self.recompute(x, y)?.0)
    }

    pub fn residual_input_jacobian(&self, x: &[f64], y: &[f64]) -> Result<Vec<f64>, Error> {
        self.check_sizes(x, y)?;
        Ok(self.recompute(x, y)?.1)
    }

    pub fn residual_output_jacobian(&self, x: &[f64], y: &[f64]) -> Result<Vec<f64>, Error> {
        self.check_sizes(x, y)?;
        Ok(self.recompute(x, y)?.2)
    }

    pub fn residuals_and_input_jacobian(&self, x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>), Error> {
        self.check_sizes(x, y)?;
        let (r, dr_dx, _) = self.recompute(x, y)?;
        Ok((r, dr_dx))
    }

    pub fn residuals_and_output_jacobian(&self, x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>), Error> {
        self.check_sizes(x, y)?;
        let (r, _, dr_dy) = self.recompute(x, y)?;
        Ok((r, dr_dy))
    }

    pub fn residuals_and_jacobians(&self, x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error> {
        self.check_sizes(x, y)?;
        self.recompute(x, y)
    }

    // --- `!` without buffers: write cache, return reference ---

    pub fn residuals_update(&mut self, x: &[f64], y: &[f64]) -> Result<&[f64], Error> {
        self.ensure_current(x, y, false)?;
        Ok(&self.cache.r)
    }

    pub fn residual_input_jacobian_update(&mut self, x: &[f64], y: &[f64]) -> Result<&[f64], Error> {
        self.ensure_current(x, y, false)?;
        Ok(&self.cache.dr_dx)
    }

    pub fn residual_output_jacobian_update(&mut self, x: &[f64], y: &[f64]) -> Result<&[f64], Error> {
        self.ensure_current(x, y, false)?;
        Ok(&self.cache.dr_dy)
    }

    pub fn residuals_and_input_jacobian_update(&mut self, x: &[f64], y: &[f64]) -> Result<(&[f64], &[f64]), Error> {
        self.ensure_current(x, y, false)?;
        Ok((&self.cache.r, &self.cache.dr_dx))
    }

    pub fn residuals_and_output_jacobian_update(&mut self, x: &[f64], y: &[f64]) -> Result<(&[f64], &[f64]), Error> {
        self.ensure_current(x, y, false)?;
        Ok((&self.cache.r, &self.cache.dr_dy))
    }

    pub fn residuals_and_jacobians_update(
        &mut self,
        x: &[f64],
        y: &[f64],
    ) -> Result<(&[f64], &[f64], &[f64]), Error> {
        self.ensure_current(x, y, false)?;
        Ok((&self.cache.r, &self.cache.dr_dx, &self.cache.dr_dy))
    }

    // --- `!!`: force recomputation ---

    pub fn residuals_force(&mut self, x: &[f64], y: &[f64]) -> Result<&[f64], Error> {
        self.ensure_current(x, y, true)?;
        Ok(&self.cache.r)
    }

    pub fn residuals_and_input_jacobian_force(&mut self, x: &[f64], y: &[f64]) -> Result<(&[f64], &[f64]), Error> {
        self.ensure_current(x, y, true)?;
        Ok((&self.cache.r, &self.cache.dr_dx))
    }

    pub fn residuals_and_output_jacobian_force(&mut self, x: &[f64], y: &[f64]) -> Result<(&[f64], &[f64]), Error> {
        self.ensure_current(x, y, true)?;
        Ok((&self.cache.r, &self.cache.dr_dy))
    }

    pub fn residuals_and_jacobians_force(
        &mut self,
        x: &[f64],
        y: &[f64],
    ) -> Result<(&[f64], &[f64], &[f64]), Error> {
        self.ensure_current(x, y, true)?;
        Ok((&self.cache.r, &self.cache.dr_dx, &self.cache.dr_dy))
    }

    // --- no-args query ---

    pub fn residuals_cached(&self) -> &[f64] {
        &self.cache.r
    }

    pub fn residual_input_jacobian_cached(&self) -> &[f64] {
        &self.cache.dr_dx
    }

    pub fn residual_output_jacobian_cached(&self) -> &[f64] {
        &self.cache.dr_dy
    }

    pub fn residuals_and_jacobians_cached(&self) -> (&[f64], &[f64], &[f64]) {
        (&self.cache.r, &self.cache.dr_dx, &self.cache.dr_dy)
    }

    pub fn cached_state(&self) -> &[f64] {
        &self.cache.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Numeric, ProviderKind};
    use crate::variable::Variable;

    struct Paraboloid;
    impl Primal for Paraboloid {
        fn eval<T: Numeric>(&self, xy: &[T]) -> Vec<T> {
            let (x0, y0, r) = (xy[0].clone(), xy[1].clone(), xy[2].clone());
            let a = x0.clone() - T::from_f64(3.0);
            let b = y0.clone() + T::from_f64(4.0);
            let f = a.clone() * a + x0 * y0.clone() + b.clone() * b - T::from_f64(3.0);
            vec![r - f]
        }
    }

    fn comp() -> ImplicitComponent<Paraboloid> {
        let in_vars = VarLayout::new(vec![Variable::scalar("x", 0.0), Variable::scalar("y", 0.0)]);
        let state_vars = VarLayout::new(vec![Variable::scalar("r_state", 0.0)]);
        ImplicitComponent::new(
            Paraboloid,
            in_vars,
            state_vars,
            ImplicitAnalytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        )
    }

    #[test]
    fn paraboloid_residual_and_jacobians_at_a_given_state() {
        let c = comp();
        let (r, dr_dx, dr_dy) = c.residuals_and_jacobians(&[1.0, 2.0], &[9.0]).unwrap();
        assert_eq!(r, vec![-30.0]);
        assert_eq!(dr_dx, vec![2.0, -13.0]);
        assert_eq!(dr_dy, vec![1.0]);
    }
}

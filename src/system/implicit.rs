//! Implicit system: residual stack over shared outputs and block Jacobians.

use crate::component::implicit::Residual;
use crate::error::Error;
use crate::system::{Matrix, Source};
use crate::variable::VarLayout;

/// Resolve each inner component's input variables against `argin` or *any* other component's
/// output (order does not matter — feedback between inner components is exactly what the
/// Newton solve over the residual stack is for; only an explicit system bans cycles).
fn route_inputs(
    argin: &VarLayout,
    components: &[Box<dyn Residual>],
    index: usize,
) -> Result<Vec<(Source, usize)>, Error> {
    let mut routes = Vec::new();
    for var in components[index].in_vars().vars() {
        if let Some(slot) = argin.slot_of(var.name()) {
            routes.push((Source::ArgIn { offset: slot.offset }, slot.size));
            continue;
        }
        let mut resolved = None;
        for (j, comp) in components.iter().enumerate() {
            if let Some(slot) = comp.out_vars().slot_of(var.name()) {
                resolved = Some((Source::Output { component: j, offset: slot.offset }, slot.size));
            }
        }
        match resolved {
            Some(r) => routes.push(r),
            None => return Err(Error::UnresolvedInput(var.name().to_string())),
        }
    }
    Ok(routes)
}

/// A tuple of inner components (each [`crate::component::ImplicitComponent`] or an explicit
/// component lifted via [`crate::component::implicit::Lifted`]) whose output variables are the
/// concatenation of every inner component's output variables — there is no elimination. The
/// system residual is the stack of per-component residuals.
pub struct ImplicitSystem {
    argin: VarLayout,
    out_vars: VarLayout,
    components: Vec<Box<dyn Residual>>,
    routes: Vec<Vec<(Source, usize)>>,
    out_offsets: Vec<usize>,
    cache_x: Vec<f64>,
    cache_y: Vec<f64>,
    cache_r: Vec<f64>,
    cache_dr_dx: Vec<f64>,
    cache_dr_dy: Vec<f64>,
    cache_valid: bool,
}

impl ImplicitSystem {
    /// Build the system. The external `out_vars` is always the declaration-order concatenation
    /// of every inner component's own output/state variables — the caller does not declare it
    /// separately.
    #[tracing::instrument(level = "debug", skip_all, fields(n_components = components.len()))]
    pub fn new(components: Vec<Box<dyn Residual>>, argin: VarLayout) -> Result<Self, Error> {
        let mut routes = Vec::with_capacity(components.len());
        for k in 0..components.len() {
            routes.push(route_inputs(&argin, &components, k)?);
        }

        let mut out_offsets = Vec::with_capacity(components.len());
        let mut out_vars = Vec::new();
        let mut offset = 0;
        for c in &components {
            out_offsets.push(offset);
            offset += c.ny();
            out_vars.extend(c.out_vars().vars().iter().cloned());
        }
        let out_vars = VarLayout::new(out_vars);

        let nx = argin.width();
        let ny = out_vars.width();
        tracing::debug!(nx, ny, "implicit system routed");
        Ok(Self {
            argin,
            out_vars,
            components,
            routes,
            out_offsets,
            cache_x: vec![0.0; nx],
            cache_y: vec![0.0; ny],
            cache_r: vec![0.0; ny],
            cache_dr_dx: vec![0.0; ny * nx],
            cache_dr_dy: vec![0.0; ny * ny],
            cache_valid: false,
        })
    }

    pub fn argin(&self) -> &VarLayout {
        &self.argin
    }

    pub fn out_vars(&self) -> &VarLayout {
        &self.out_vars
    }

    fn nx(&self) -> usize {
        self.argin.width()
    }

    fn ny(&self) -> usize {
        self.out_vars.width()
    }

    fn gather(&self, routes: &[(Source, usize)], x: &[f64], y: &[f64]) -> Vec<f64> {
        let mut out = Vec::new();
        for (source, size) in routes {
            match source {
                Source::ArgIn { offset } => out.extend_from_slice(&x[*offset..*offset + size]),
                Source::Output { component, offset } => {
                    let base = self.out_offsets[*component];
                    out.extend_from_slice(&y[base + offset..base + offset + size]);
                }
            }
        }
        out
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

    /// Assemble `(r, ∂r/∂x, ∂r/∂y)`: block `(k, k)` is inner `∂rₖ/∂yₖ`; block `(k, j≠k)` is
    /// `∂rₖ/∂xₖ · Pₖⱼ`, the portion of `xₖ` sourced from `yⱼ`; `∂r/∂x` is `∂rₖ/∂xₖ · Pₖ,argin`
    /// per block row.
    fn recompute(&mut self, x: &[f64], y: &[f64], force: bool) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error> {
        let nx = self.nx();
        let ny = self.ny();
        let mut r = vec![0.0; ny];
        let mut dr_dx = Matrix::zeros(ny, nx);
        let mut dr_dy = Matrix::zeros(ny, ny);

        for k in 0..self.components.len() {
            let routes = self.routes[k].clone();
            let xk = self.gather(&routes, x, y);
            let base = self.out_offsets[k];
            let nyk = self.components[k].ny();
            let yk = y[base..base + nyk].to_vec();
            let (rk, drk_dxk, drk_dyk) = self.components[k].eval(&xk, &yk, force)?;
            r[base..base + nyk].copy_from_slice(&rk);

            let nxk = self.components[k].nx();
            for row in 0..nyk {
                let mut col = 0;
                for (source, size) in &routes {
                    match source {
                        Source::ArgIn { offset } => {
                            for s in 0..*size {
                                dr_dx.set(base + row, offset + s, drk_dxk[row * nxk + col + s]);
                            }
                        }
                        Source::Output { component, offset } => {
                            let jbase = self.out_offsets[*component];
                            for s in 0..*size {
                                dr_dy.add(base + row, jbase + offset + s, drk_dxk[row * nxk + col + s]);
                            }
                        }
                    }
                    col += size;
                }
            }
            for row in 0..nyk {
                for col in 0..nyk {
                    dr_dy.set(base + row, base + col, drk_dyk[row * nyk + col]);
                }
            }
        }

        Ok((r, dr_dx.data, dr_dy.data))
    }

    // --- query: fresh allocation, no cache mutation ---

    pub fn residuals_and_jacobians(&mut self, x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error> {
        self.check_sizes(x, y)?;
        self.recompute(x, y, true)
    }

    // --- `!` without buffers / `!!`: write cache, return references ---

    fn ensure_current(&mut self, x: &[f64], y: &[f64], force: bool) -> Result<(), Error> {
        self.check_sizes(x, y)?;
        if force || !(self.cache_valid && self.cache_x == x && self.cache_y == y) {
            let (r, dr_dx, dr_dy) = self.recompute(x, y, force)?;
            self.cache_x.copy_from_slice(x);
            self.cache_y.copy_from_slice(y);
            self.cache_r = r;
            self.cache_dr_dx = dr_dx;
            self.cache_dr_dy = dr_dy;
            self.cache_valid = true;
        }
        Ok(())
    }

    pub fn residuals_and_jacobians_update(
        &mut self,
        x: &[f64],
        y: &[f64],
    ) -> Result<(&[f64], &[f64], &[f64]), Error> {
        self.ensure_current(x, y, false)?;
        Ok((&self.cache_r, &self.cache_dr_dx, &self.cache_dr_dy))
    }

    pub fn residuals_and_jacobians_force(
        &mut self,
        x: &[f64],
        y: &[f64],
    ) -> Result<(&[f64], &[f64], &[f64]), Error> {
        self.ensure_current(x, y, true)?;
        Ok((&self.cache_r, &self.cache_dr_dx, &self.cache_dr_dy))
    }

    // --- no-args query ---

    pub fn residuals_cached(&self) -> &[f64] {
        &self.cache_r
    }
}

impl Residual for ImplicitSystem {
    fn nx(&self) -> usize {
        ImplicitSystem::nx(self)
    }
    fn ny(&self) -> usize {
        ImplicitSystem::ny(self)
    }
    fn in_vars(&self) -> &VarLayout {
        &self.argin
    }
    fn out_vars(&self) -> &VarLayout {
        &self.out_vars
    }
    fn eval(&mut self, x: &[f64], y: &[f64], force: bool) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), Error> {
        self.check_sizes(x, y)?;
        self.recompute(x, y, force)
    }
}

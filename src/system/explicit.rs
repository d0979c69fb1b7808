//! Explicit system: a DAG of components evaluated by a forward sweep, with forward- or
//! reverse-mode chain-rule Jacobian assembly.

use crate::error::Error;
use crate::system::{route_inputs, Component, Matrix, Mode, Source};
use crate::variable::VarLayout;

/// A tuple of inner components plus the routing table computed at construction. Satisfies
/// [`Component`] itself, so an `ExplicitSystem` nests as an inner component of an enclosing
/// system without any special-casing.
pub struct ExplicitSystem {
    argin: VarLayout,
    argout: VarLayout,
    components: Vec<Box<dyn Component>>,
    routes: Vec<Vec<(Source, usize)>>,
    out_offsets: Vec<usize>,
    published_width: usize,
    argout_routes: Vec<(usize, usize, usize)>, // (component, offset, size)
    mode_override: Option<Mode>,
    cache_x: Vec<f64>,
    cache_y: Vec<f64>,
    cache_jac: Vec<f64>,
    cache_valid: bool,
}

impl ExplicitSystem {
    /// Build the system, validating routing: every inner input must resolve to `argin` or
    /// an earlier component's output, every `argout` must be reachable.
    #[tracing::instrument(level = "debug", skip_all, fields(n_components = components.len()))]
    pub fn new(
        components: Vec<Box<dyn Component>>,
        argin: VarLayout,
        argout: VarLayout,
        mode_override: Option<Mode>,
    ) -> Result<Self, Error> {
        let mut routes = Vec::with_capacity(components.len());
        for k in 0..components.len() {
            let r = route_inputs(&argin, &components, k)?;
            tracing::debug!(component = k, n_routes = r.len(), "routed inner component");
            routes.push(r);
        }

        let mut out_offsets = Vec::with_capacity(components.len());
        let mut published_width = 0;
        for c in &components {
            out_offsets.push(published_width);
            published_width += c.ny();
        }

        let mut argout_routes = Vec::with_capacity(argout.vars().len());
        for var in argout.vars() {
            let mut found = None;
            for (k, c) in components.iter().enumerate() {
                if let Some(slot) = c.out_vars().slot_of(var.name()) {
                    found = Some((k, slot.offset, slot.size));
                }
            }
            match found {
                Some(f) => argout_routes.push(f),
                None => return Err(Error::UnresolvedOutput(var.name().to_string())),
            }
        }

        let nx = argin.width();
        let ny = argout.width();
        Ok(Self {
            argin,
            argout,
            components,
            routes,
            out_offsets,
            published_width,
            argout_routes,
            mode_override,
            cache_x: vec![0.0; nx],
            cache_y: vec![0.0; ny],
            cache_jac: vec![0.0; ny * nx],
            cache_valid: false,
        })
    }

    pub fn argin(&self) -> &VarLayout {
        &self.argin
    }

    pub fn argout(&self) -> &VarLayout {
        &self.argout
    }

    fn nx(&self) -> usize {
        self.argin.width()
    }

    fn ny(&self) -> usize {
        self.argout.width()
    }

    fn gather(&self, routes: &[(Source, usize)], x: &[f64], published_y: &[f64]) -> Vec<f64> {
        let mut out = Vec::new();
        for (source, size) in routes {
            match source {
                Source::ArgIn { offset } => out.extend_from_slice(&x[*offset..*offset + size]),
                Source::Output { component, offset } => {
                    let base = self.out_offsets[*component];
                    out.extend_from_slice(&published_y[base + offset..base + offset + size]);
                }
            }
        }
        out
    }

    /// Forward sweep: publish every inner component's output, in declaration order, and
    /// gather the `argout` slices from the published buffer.
    #[tracing::instrument(level = "trace", skip_all)]
    fn forward_sweep(&mut self, x: &[f64], force: bool) -> Result<(Vec<f64>, Vec<Vec<f64>>), Error> {
        let mut published_y = vec![0.0; self.published_width];
        let mut jacobians = Vec::with_capacity(self.components.len());
        for k in 0..self.components.len() {
            let xk = self.gather(&self.routes[k], x, &published_y);
            let (yk, jk) = self.components[k].eval(&xk, force)?;
            tracing::trace!(component = k, "evaluated inner component");
            let base = self.out_offsets[k];
            published_y[base..base + yk.len()].copy_from_slice(&yk);
            jacobians.push(jk);
        }
        let mut y = Vec::with_capacity(self.ny());
        for (component, offset, size) in &self.argout_routes {
            let base = self.out_offsets[*component];
            y.extend_from_slice(&published_y[base + offset..base + offset + size]);
        }
        Ok((y, jacobians))
    }

    /// Forward-mode assembly: `D` has `nx` identity rows for `argin` followed by each
    /// component's published output rows, `Dₖ = Jₖ · Pₖ · D`.
    fn forward_jacobian(&self, x: &[f64], jacobians: &[Vec<f64>]) -> Vec<f64> {
        let nx = self.nx();
        let mut d = Matrix::zeros(nx + self.published_width, nx);
        for i in 0..nx {
            d.set(i, i, 1.0);
        }
        let _ = x;
        for k in 0..self.components.len() {
            let nxk = self.components[k].nx();
            let nyk = self.components[k].ny();
            let pk_d = self.gather_rows(&self.routes[k], &d, nxk, nx);
            let jk = &jacobians[k];
            let base = nx + self.out_offsets[k];
            for row in 0..nyk {
                for col in 0..nx {
                    let mut acc = 0.0;
                    for i in 0..nxk {
                        acc += jk[row * nxk + i] * pk_d[i * nx + col];
                    }
                    d.set(base + row, col, acc);
                }
            }
        }
        let mut jac = vec![0.0; self.ny() * nx];
        let mut row = 0;
        for (component, offset, size) in &self.argout_routes {
            let base = nx + self.out_offsets[*component] + offset;
            for i in 0..*size {
                jac[row * nx..(row + 1) * nx].copy_from_slice(d.row(base + i));
                row += 1;
            }
        }
        jac
    }

    fn gather_rows(&self, routes: &[(Source, usize)], d: &Matrix, _nxk: usize, nx: usize) -> Vec<f64> {
        let mut out = Vec::new();
        for (source, size) in routes {
            let base_row = match source {
                Source::ArgIn { offset } => *offset,
                Source::Output { component, offset } => nx + self.out_offsets[*component] + offset,
            };
            for i in 0..*size {
                out.extend_from_slice(d.row(base_row + i));
            }
        }
        out
    }

    /// Reverse-mode assembly: `adj` has shape `(ny, nx + published_width)`, initialized to
    /// the row-selector of `argout`, swept in reverse component order.
    fn reverse_jacobian(&self, jacobians: &[Vec<f64>]) -> Vec<f64> {
        let nx = self.nx();
        let ny = self.ny();
        let width = nx + self.published_width;
        let mut adj = Matrix::zeros(ny, width);
        let mut row = 0;
        for (component, offset, size) in &self.argout_routes {
            let base = nx + self.out_offsets[*component] + offset;
            for i in 0..*size {
                adj.set(row, base + i, 1.0);
                row += 1;
            }
        }

        for k in (0..self.components.len()).rev() {
            let nxk = self.components[k].nx();
            let nyk = self.components[k].ny();
            let jk = &jacobians[k];
            let out_base = nx + self.out_offsets[k];

            // adj_block: ny x nyk, the columns of adj belonging to component k's outputs.
            for r in 0..ny {
                let mut contrib = vec![0.0; nxk];
                for o in 0..nyk {
                    let a = adj.get(r, out_base + o);
                    if a == 0.0 {
                        continue;
                    }
                    for i in 0..nxk {
                        contrib[i] += a * jk[o * nxk + i];
                    }
                }
                // scatter contrib into the source columns for each input slot.
                let mut i = 0;
                for (source, size) in &self.routes[k] {
                    let base_col = match source {
                        Source::ArgIn { offset } => *offset,
                        Source::Output { component, offset } => nx + self.out_offsets[*component] + offset,
                    };
                    for s in 0..*size {
                        adj.add(r, base_col + s, contrib[i]);
                        i += 1;
                    }
                }
            }
        }

        let mut jac = vec![0.0; ny * nx];
        for r in 0..ny {
            jac[r * nx..(r + 1) * nx].copy_from_slice(&adj.row(r)[0..nx]);
        }
        jac
    }

    /// Evaluate `(y, J)` at `x`, choosing forward or reverse assembly by the cheaper-sweep
    /// policy unless overridden at construction.
    pub fn outputs_and_jacobian(&mut self, x: &[f64], force: bool) -> Result<(Vec<f64>, Vec<f64>), Error> {
        if x.len() != self.nx() {
            return Err(Error::SizeMismatch { expected: self.nx(), actual: x.len() });
        }
        if !force && self.cache_valid && self.cache_x == x {
            return Ok((self.cache_y.clone(), self.cache_jac.clone()));
        }
        let (y, jacobians) = self.forward_sweep(x, force)?;
        let mode = self.mode_override.unwrap_or_else(|| Mode::preferred(self.nx(), self.ny()));
        let jac = match mode {
            Mode::Forward => self.forward_jacobian(x, &jacobians),
            Mode::Reverse => self.reverse_jacobian(&jacobians),
        };
        self.cache_x.copy_from_slice(x);
        self.cache_y = y.clone();
        self.cache_jac = jac.clone();
        self.cache_valid = true;
        Ok((y, jac))
    }

    pub fn cached_output(&self) -> &[f64] {
        &self.cache_y
    }

    pub fn cached_jacobian(&self) -> &[f64] {
        &self.cache_jac
    }
}

impl Component for ExplicitSystem {
    fn nx(&self) -> usize {
        ExplicitSystem::nx(self)
    }
    fn ny(&self) -> usize {
        ExplicitSystem::ny(self)
    }
    fn in_vars(&self) -> &VarLayout {
        &self.argin
    }
    fn out_vars(&self) -> &VarLayout {
        &self.argout
    }
    fn eval(&mut self, x: &[f64], force: bool) -> Result<(Vec<f64>, Vec<f64>), Error> {
        self.outputs_and_jacobian(x, force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::explicit::ExplicitComponent;
    use crate::component::implicit::Lifted;
    use crate::provider::{Analytic, DerivativeProvider, Numeric, Primal, ProviderKind};
    use crate::solver::{NewtonConfig, NewtonSolver};
    use crate::system::implicit::ImplicitSystem;
    use crate::variable::Variable;

    // Paraboloid feeds Quadratic feeds Trig, argin = (x, y, a, b, c).
    struct ParaboloidP;
    impl Primal for ParaboloidP {
        fn eval<T: Numeric>(&self, xy: &[T]) -> Vec<T> {
            let (x, y) = (xy[0].clone(), xy[1].clone());
            let a = x.clone() - T::from_f64(3.0);
            let b = y.clone() + T::from_f64(4.0);
            vec![a.clone() * a + x * y.clone() + b.clone() * b - T::from_f64(3.0)]
        }
    }

    struct QuadraticP;
    impl Primal for QuadraticP {
        fn eval<T: Numeric>(&self, v: &[T]) -> Vec<T> {
            let (fp, a, b, c) = (v[0].clone(), v[1].clone(), v[2].clone(), v[3].clone());
            let fp2 = fp.clone() * fp.clone();
            vec![a * fp2 + (b + c) * fp + T::from_f64(1.0)]
        }
    }

    struct TrigP;
    impl Primal for TrigP {
        fn eval<T: Numeric>(&self, v: &[T]) -> Vec<T> {
            let (fp, fq) = (v[0].clone(), v[1].clone());
            vec![fp.sin(), fq.cos()]
        }
    }

    fn three_component_dag_components() -> Vec<Box<dyn Component>> {
        let paraboloid = ExplicitComponent::new(
            ParaboloidP,
            VarLayout::new(vec![Variable::scalar("x", 0.0), Variable::scalar("y", 0.0)]),
            VarLayout::new(vec![Variable::scalar("f_p", 0.0)]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        );
        let quadratic = ExplicitComponent::new(
            QuadraticP,
            VarLayout::new(vec![
                Variable::scalar("f_p", 0.0),
                Variable::scalar("a", 0.0),
                Variable::scalar("b", 0.0),
                Variable::scalar("c", 0.0),
            ]),
            VarLayout::new(vec![Variable::scalar("f_q", 0.0)]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        );
        let trig = ExplicitComponent::new(
            TrigP,
            VarLayout::new(vec![Variable::scalar("f_p", 0.0), Variable::scalar("f_q", 0.0)]),
            VarLayout::new(vec![Variable::scalar("s", 0.0), Variable::scalar("c_out", 0.0)]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        );
        vec![Box::new(paraboloid), Box::new(quadratic), Box::new(trig)]
    }

    fn three_component_dag_argin() -> VarLayout {
        VarLayout::new(vec![
            Variable::scalar("x", 0.0),
            Variable::scalar("y", 0.0),
            Variable::scalar("a", 0.0),
            Variable::scalar("b", 0.0),
            Variable::scalar("c", 0.0),
        ])
    }

    fn three_component_dag_argout() -> VarLayout {
        VarLayout::new(vec![Variable::scalar("s", 0.0), Variable::scalar("c_out", 0.0)])
    }

    #[test]
    fn forward_and_reverse_jacobians_agree_on_three_component_dag() {
        let mut fwd = ExplicitSystem::new(
            three_component_dag_components(),
            three_component_dag_argin(),
            three_component_dag_argout(),
            Some(Mode::Forward),
        )
        .unwrap();
        let mut rev = ExplicitSystem::new(
            three_component_dag_components(),
            three_component_dag_argin(),
            three_component_dag_argout(),
            Some(Mode::Reverse),
        )
        .unwrap();

        let x = [0.5, -0.3, 1.2, 0.4, -0.6];
        let (y_fwd, j_fwd) = fwd.outputs_and_jacobian(&x, true).unwrap();
        let (y_rev, j_rev) = rev.outputs_and_jacobian(&x, true).unwrap();

        assert_eq!(y_fwd.len(), 2);
        for (a, b) in y_fwd.iter().zip(&y_rev) {
            assert!((a - b).abs() < 1e-9);
        }
        assert_eq!(j_fwd.len(), j_rev.len());
        for (a, b) in j_fwd.iter().zip(&j_rev) {
            assert!((a - b).abs() < 1e-8, "forward/reverse Jacobian mismatch: {a} vs {b}");
        }
    }

    #[test]
    fn unresolved_input_fails_construction() {
        let argin = VarLayout::new(vec![Variable::scalar("x", 0.0)]);
        let comp: Box<dyn Component> = Box::new(ExplicitComponent::new(
            ParaboloidP,
            VarLayout::new(vec![Variable::scalar("x", 0.0), Variable::scalar("y", 0.0)]),
            VarLayout::new(vec![Variable::scalar("f_p", 0.0)]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        ));
        let argout = VarLayout::new(vec![Variable::scalar("f_p", 0.0)]);
        let result = ExplicitSystem::new(vec![comp], argin, argout, None);
        assert!(matches!(result, Err(Error::UnresolvedInput(_))));
    }

    #[test]
    fn cycle_between_explicit_components_fails_construction() {
        struct IdentityP;
        impl Primal for IdentityP {
            fn eval<T: Numeric>(&self, x: &[T]) -> Vec<T> {
                vec![x[0].clone()]
            }
        }
        let argin = VarLayout::new(vec![Variable::scalar("seed", 0.0)]);
        let a: Box<dyn Component> = Box::new(ExplicitComponent::new(
            IdentityP,
            VarLayout::new(vec![Variable::scalar("b_out", 0.0)]),
            VarLayout::new(vec![Variable::scalar("a_out", 0.0)]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        ));
        let b: Box<dyn Component> = Box::new(ExplicitComponent::new(
            IdentityP,
            VarLayout::new(vec![Variable::scalar("a_out", 0.0)]),
            VarLayout::new(vec![Variable::scalar("b_out", 0.0)]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        ));
        let argout = VarLayout::new(vec![Variable::scalar("a_out", 0.0)]);
        let result = ExplicitSystem::new(vec![a, b], argin, argout, None);
        assert!(matches!(result, Err(Error::Cycle(_))));
    }

    // Sellar MDA, solved by Newton, nested inside an outer explicit system that adds the
    // objective/constraint discipline on top of the converged coupling variables.
    struct SellarDisc1;
    impl Primal for SellarDisc1 {
        fn eval<T: Numeric>(&self, v: &[T]) -> Vec<T> {
            let (x, z1, z2, y2) = (v[0].clone(), v[1].clone(), v[2].clone(), v[3].clone());
            vec![z1.clone() * z1 + z2 + x - T::from_f64(0.2) * y2]
        }
    }
    struct SellarDisc2;
    impl Primal for SellarDisc2 {
        fn eval<T: Numeric>(&self, v: &[T]) -> Vec<T> {
            let (z1, z2, y1) = (v[0].clone(), v[1].clone(), v[2].clone());
            vec![y1.sqrt() + z1 + z2]
        }
    }
    struct SellarObjectives;
    impl Primal for SellarObjectives {
        fn eval<T: Numeric>(&self, v: &[T]) -> Vec<T> {
            let (x, z1, y1, y2) = (v[0].clone(), v[1].clone(), v[2].clone(), v[3].clone());
            let f = x.clone() * x + z1.clone() + y1.clone() + (-y2.clone()).exp();
            let g1 = T::from_f64(3.16) - y1;
            let g2 = y2 - T::from_f64(24.0);
            vec![f, g1, g2]
        }
    }

    fn sellar_mda() -> NewtonSolver<ImplicitSystem> {
        let argin = VarLayout::new(vec![
            Variable::scalar("x", 0.29),
            Variable::scalar("z1", 0.78),
            Variable::scalar("z2", 0.60),
        ]);
        let disc1 = ExplicitComponent::new(
            SellarDisc1,
            VarLayout::new(vec![
                Variable::scalar("x", 0.0),
                Variable::scalar("z1", 0.0),
                Variable::scalar("z2", 0.0),
                Variable::scalar("y2", 1.0),
            ]),
            VarLayout::new(vec![Variable::scalar("y1", 1.0)]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        );
        let disc2 = ExplicitComponent::new(
            SellarDisc2,
            VarLayout::new(vec![
                Variable::scalar("z1", 0.0),
                Variable::scalar("z2", 0.0),
                Variable::scalar("y1", 1.0),
            ]),
            VarLayout::new(vec![Variable::scalar("y2", 1.0)]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        );
        let components: Vec<Box<dyn crate::component::implicit::Residual>> =
            vec![Box::new(Lifted::from(disc1)), Box::new(Lifted::from(disc2))];
        let mda = ImplicitSystem::new(components, argin).unwrap();
        NewtonSolver::new(mda, NewtonConfig::default())
    }

    #[test]
    fn sellar_mda_jacobian_matches_known_values() {
        let mda: Box<dyn Component> = Box::new(sellar_mda());
        let objectives = ExplicitComponent::new(
            SellarObjectives,
            VarLayout::new(vec![
                Variable::scalar("x", 0.0),
                Variable::scalar("z1", 0.0),
                Variable::scalar("y1", 1.0),
                Variable::scalar("y2", 1.0),
            ]),
            VarLayout::new(vec![
                Variable::scalar("f", 0.0),
                Variable::scalar("g1", 0.0),
                Variable::scalar("g2", 0.0),
            ]),
            Analytic::default(),
            DerivativeProvider::new(ProviderKind::ForwardAD),
        );

        let argin = VarLayout::new(vec![
            Variable::scalar("x", 0.29),
            Variable::scalar("z1", 0.78),
            Variable::scalar("z2", 0.60),
        ]);
        let argout = VarLayout::new(vec![
            Variable::scalar("f", 0.0),
            Variable::scalar("g1", 0.0),
            Variable::scalar("g2", 0.0),
        ]);

        let components: Vec<Box<dyn Component>> = vec![mda, Box::new(objectives)];
        let mut sys = ExplicitSystem::new(components, argin, argout, Some(Mode::Forward)).unwrap();
        let (_, j) = sys.outputs_and_jacobian(&[0.29, 0.78, 0.60], true).unwrap();

        #[rustfmt::skip]
        let expected = [
             1.44865684668,  2.08975601036,  0.60330817622,
            -0.90992087775, -1.23749239485, -0.72793670331,
             0.45039561123,  1.61253802570,  1.36031648341,
        ];
        for (got, want) in j.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }
}

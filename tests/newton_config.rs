//! Integration tests for the Newton solver's configuration surface (§4.8, §6 `solver` option)
//! and for the crate's tracing instrumentation being safe to call without a subscriber
//! installed (§4.11: subscriber setup is an application concern, not this library's).

use dagrad::component::implicit::ImplicitComponent;
use dagrad::provider::{DerivativeProvider, Numeric, Primal, ProviderKind};
use dagrad::variable::{VarLayout, Variable};
use dagrad::{NewtonConfig, NewtonSolver};

// r(x, y) = y^2 - x, so the converged output is y = sqrt(x).
struct SquareResidual;
impl Primal for SquareResidual {
    fn eval<T: Numeric>(&self, xy: &[T]) -> Vec<T> {
        let (x, y) = (xy[0].clone(), xy[1].clone());
        vec![y.clone() * y - x]
    }
}

// r(x, y) = 0*y - x: a structurally singular ∂r/∂y everywhere.
struct SingularResidual;
impl Primal for SingularResidual {
    fn eval<T: Numeric>(&self, xy: &[T]) -> Vec<T> {
        let (x, y) = (xy[0].clone(), xy[1].clone());
        vec![y * T::from_f64(0.0) - x]
    }
}

fn square_root_solver(config: NewtonConfig) -> NewtonSolver<ImplicitComponent<SquareResidual>> {
    let in_vars = VarLayout::new(vec![Variable::scalar("x", 4.0)]);
    let state_vars = VarLayout::new(vec![Variable::scalar("y", 1.0)]);
    let comp = ImplicitComponent::new(
        SquareResidual,
        in_vars,
        state_vars,
        Default::default(),
        DerivativeProvider::new(ProviderKind::ForwardAD),
        DerivativeProvider::new(ProviderKind::ForwardAD),
    );
    NewtonSolver::new(comp, config)
}

#[test]
fn max_iter_too_small_reports_solve_diverged() {
    let mut solver = square_root_solver(NewtonConfig { max_iter: 1, ..Default::default() });
    let err = solver.outputs_and_jacobian(&[4.0]).unwrap_err();
    assert!(matches!(err, dagrad::Error::SolveDiverged { .. }));
}

#[test]
fn structurally_singular_jacobian_is_reported() {
    let in_vars = VarLayout::new(vec![Variable::scalar("x", 4.0)]);
    let state_vars = VarLayout::new(vec![Variable::scalar("y", 1.0)]);
    let comp = ImplicitComponent::new(
        SingularResidual,
        in_vars,
        state_vars,
        Default::default(),
        DerivativeProvider::new(ProviderKind::ForwardAD),
        DerivativeProvider::new(ProviderKind::ForwardAD),
    );
    let mut solver = NewtonSolver::new(comp, NewtonConfig::default());
    let err = solver.outputs_and_jacobian(&[4.0]).unwrap_err();
    assert!(matches!(err, dagrad::Error::SingularJacobian | dagrad::Error::SolveDiverged { .. }));
}

#[test]
fn evaluation_does_not_panic_without_a_tracing_subscriber() {
    // No subscriber is installed anywhere in this binary; the `#[instrument]`/`debug!`/`warn!`
    // calls inside system construction and the Newton loop must be no-ops, not panics.
    let mut solver = square_root_solver(NewtonConfig::default());
    let (y, _) = solver.outputs_and_jacobian(&[9.0]).unwrap();
    assert!((y[0] - 3.0).abs() < 1e-6);
}

#[test_log::test]
fn newton_config_damping_still_converges() {
    let mut solver = square_root_solver(NewtonConfig { damping: 0.8, ..Default::default() });
    let (y, jac) = solver.outputs_and_jacobian(&[4.0]).unwrap();
    assert!((y[0] - 2.0).abs() < 1e-6);
    assert!((jac[0] - 0.25).abs() < 1e-6);
}

//! Error type shared by every public entry point in this crate.

/// All errors that can occur while building or evaluating a component/system graph.
///
/// Every fallible public function returns `Result<T, Error>`; nothing here is recovered
/// automatically, and caches are not rolled back on a failed `!`/`!!` call (see the
/// module docs on the four-suffix contract).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A supplied buffer was too small for the declared layout, or a user function
    /// returned a value whose flattened length differs from the declared outputs.
    #[error("size mismatch: expected a buffer of length {expected}, got {actual}")]
    SizeMismatch {
        /// Length required by the layout.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// An inner component's input variable could not be matched against `argin` or
    /// an earlier component's outputs.
    #[error("input variable `{0}` is not routed to `argin` or any earlier component's output")]
    UnresolvedInput(String),

    /// A declared system output variable is not produced by any inner component.
    #[error("output variable `{0}` is not produced by any inner component")]
    UnresolvedOutput(String),

    /// An inner component's input variable is only satisfiable by a component that comes
    /// later (or itself) in declaration order, i.e. the graph is not a DAG.
    #[error("component `{0}` would require a forward reference: cycles are not allowed in an explicit system")]
    Cycle(String),

    /// A requested Jacobian could not be produced: no analytic provider was supplied where
    /// one was required, or the configured provider does not apply.
    #[error("no derivative provider is available to compute this Jacobian")]
    ProviderUnavailable,

    /// The damped Newton solve used to convert an implicit component/system to an explicit
    /// one failed to converge.
    #[error(
        "Newton solve did not converge after {iterations} iteration(s): residual inf-norm {residual_inf_norm:e}"
    )]
    SolveDiverged {
        /// Number of iterations performed before giving up.
        iterations: usize,
        /// `‖r‖∞` at the point the solve gave up.
        residual_inf_norm: f64,
    },

    /// The linear solve for a Newton step, or for the implicit-function-theorem Jacobian
    /// recovery, hit a singular or non-finite `∂r/∂y`.
    #[error("the Jacobian ∂r/∂y is singular or contains non-finite entries")]
    SingularJacobian,
}

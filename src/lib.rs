//! ## About
//!
//! A framework for composing multidisciplinary numerical models as a directed graph of
//! **components** and computing both their outputs and analytic **Jacobians** with respect to
//! declared inputs.
//!
//! Each component is either *explicit* ([`component::ExplicitComponent`], an output mapping
//! `y = f(x)`) or *implicit* ([`component::ImplicitComponent`], a residual relation
//! `r(x, y) = 0`). Components aggregate into [`system::ExplicitSystem`] (a DAG evaluated by a
//! forward sweep, with forward- or reverse-mode chain-rule Jacobian assembly) or
//! [`system::ImplicitSystem`] (a residual stack with block Jacobians), which themselves satisfy
//! the component interface and so nest arbitrarily. [`solver::NewtonSolver`] converts an
//! implicit component or system into an explicit one by damped Newton iteration, recovering the
//! output Jacobian via the implicit function theorem.
//!
//! Jacobians are produced by [`provider`]'s pluggable derivative strategies: analytic
//! user code, forward-/reverse-mode automatic differentiation, or forward/central/complex-step
//! finite differences, selected independently per component (or per residual block, for
//! implicit components) and falling back transparently when a combined routine only covers
//! part of a query.
//!
//! See the [`component`] and [`system`] module docs to get started.

pub mod component;
pub mod error;
pub mod linalg;
pub mod provider;
pub mod solver;
pub mod system;
pub mod variable;

pub use component::{ExplicitComponent, ImplicitComponent};
pub use error::Error;
pub use solver::{NewtonConfig, NewtonSolver};
pub use system::{ExplicitSystem, ImplicitSystem, Mode};
pub use variable::{Shape, VarLayout, Variable};

//! Job lifecycle transition events (mechanics only).
//!
//! The job engine owns the transition machinery; this crate only defines the
//! shape of a committed transition and the callback contract handlers implement.

pub mod handler;
pub mod transition;

pub use handler::{HandlerChain, TransitionHandler};
pub use transition::StateTransition;

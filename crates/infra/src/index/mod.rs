//! Write side of the tag index.
//!
//! - [`TagMembershipStore`]: which tags a job carries, which jobs a tag has.
//! - [`StateIndexStore`]: per (tag, state) job collections.
//! - [`StateTransitionListener`]: keeps the state index in step with job transitions.
//! - [`ExpiredJobReclaimer`]: removes expired jobs from shared collections.

pub mod listener;
pub mod membership;
pub mod reclaim;
pub mod state_index;

pub use listener::StateTransitionListener;
pub use membership::TagMembershipStore;
pub use reclaim::ExpiredJobReclaimer;
pub use state_index::StateIndexStore;

//! `jobtags-core`: shared building blocks for the job tag index.
//!
//! This crate contains **pure** types (identifiers, lifecycle states, the error
//! taxonomy). Storage and the index engine live in `jobtags-infra`.

pub mod error;
pub mod id;
pub mod state;

pub use error::{TagIndexError, TagIndexResult};
pub use id::{JobId, ensure_tag, ensure_tags};
pub use state::{JobState, canonical_state};

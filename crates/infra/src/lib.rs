//! Infrastructure layer: storage adapters and the tag index engine.
//!
//! - `store`: the set/sorted-set substrate capability (in-memory, Redis)
//! - `index`: tag membership, per-state index, transition listener, reclaimer
//! - `query`: multi-tag aggregate queries and job materialization

pub mod config;
pub mod facade;
pub mod index;
pub mod keys;
pub mod query;
pub mod store;


pub use config::TagIndexConfig;
pub use facade::TagIndex;
pub use index::{ExpiredJobReclaimer, StateIndexStore, StateTransitionListener, TagMembershipStore};
pub use keys::KeySpace;
pub use query::{
    DecodedJob, FieldMap, InvocationData, InvocationDecoder, JobMaterializer, JobRecord,
    JsonInvocationDecoder, MatchingJob, PayloadError, TagQueryEngine, WeightedTag,
};
#[cfg(feature = "redis")]
pub use store::RedisTagStorage;
pub use store::{InMemoryTagStorage, SetCommands, StoreError, StoreResult, TagStorage};

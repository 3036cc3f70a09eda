//! Read side of the tag index: aggregate queries and job descriptors.

pub mod decoder;
pub mod engine;
pub mod materializer;
pub mod record;

pub use decoder::{DecodedJob, InvocationData, InvocationDecoder, JsonInvocationDecoder, PayloadError};
pub use engine::{TagQueryEngine, WeightedTag};
pub use materializer::{JobMaterializer, MatchingJob};
pub use record::{FieldMap, JobRecord};

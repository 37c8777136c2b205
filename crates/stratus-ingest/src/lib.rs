//! Stratus ingest crate - discovery event decoding and normalization.
//!
//! Turns the wire envelope produced by discovery agents into the shared
//! entity model and feeds it to the repository. The vendor payload is
//! parsed only far enough to extract identity and relationships; the whole
//! document rides along as the opaque `data` field.

pub mod consumer;
pub mod envelope;
pub mod normalize;

pub use consumer::Consumer;
pub use envelope::{DiscoveryEvent, MessageType};
pub use normalize::normalize;

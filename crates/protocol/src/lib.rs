//! Wire protocol for the Outpost sync client.
//!
//! The control plane is a request/response envelope carrying one of a small
//! set of operations (record replay, location resolution, metadata queries,
//! deletion). The data plane, the actual byte transfer against a resolved
//! location, is defined by the consuming crates; this crate only describes
//! the types both sides exchange and the retryable-vs-permanent error
//! classification every transport must surface.

pub mod backoff;
pub mod envelope;
pub mod messages;
pub mod transport;
pub mod types;

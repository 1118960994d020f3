//! Transport abstractions for cardswap.
//!
//! The discovery/transport mechanism that finds peers and moves bytes is an
//! external collaborator. This crate only defines the seam the exchange core
//! consumes (events in, `send` out) plus an in-memory loopback network used
//! by tests and the demo.

pub mod traits;
pub mod testing;

pub use traits::*;
pub use testing::*;

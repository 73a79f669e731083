//! # duplex-router
//!
//! Correlation of synchronous calls over a full-duplex channel.
//!
//! A [`Router`] hands out correlation ids, pushes each request through a
//! caller-supplied send function, and parks the caller until the matching
//! reply is fed back through [`Router::process_incoming`], the per-call timeout
//! expires, or the router is shut down.

#![deny(unsafe_code)]

pub mod errors;
pub mod router;

pub use errors::{RouterError, ShutdownReason};
pub use router::{Router, SendFn, UnknownHandler};

//! # duplex-core
//!
//! Shared vocabulary for the duplex crates:
//!
//! - **IDs**: [`ConnectionId`] and [`CorrelationId`] newtypes
//! - **Status**: [`ConnectionStatus`] transitions reported to handlers
//! - **Envelope**: [`Envelope`] request/reply/plain decoding of JSON payloads
//! - **Errors**: [`CodecError`]
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod status;

pub use envelope::Envelope;
pub use errors::CodecError;
pub use ids::{ConnectionId, CorrelationId};
pub use status::ConnectionStatus;

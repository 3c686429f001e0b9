//! # tidemark sync protocol
//!
//! Wire shapes exchanged with a remote collection, and the conflict
//! decision table.
//!
//! This crate provides:
//! - [`RemoteRecord`], the transmitted form of a record or tombstone
//! - Change pages, conditional batch operations and their responses
//! - Collection and server metadata
//! - CBOR encoding/decoding of every message
//! - [`classify`] and [`resolve`]: the pure functions deciding what an
//!   incoming change does to a local record, and what a resolution
//!   strategy does to a conflict
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod conflict;
mod error;
mod messages;
mod record;

pub use codec::{from_cbor, to_cbor};
pub use conflict::{classify, resolve, Action, Classification, Strategy};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    status, BatchBody, BatchOperation, BatchResponse, BatchResult, ChangesPage, ChangesRequest,
    CollectionInfo, Method, Precondition, ServerInfo, PROTOCOL_VERSION,
};
pub use record::RemoteRecord;

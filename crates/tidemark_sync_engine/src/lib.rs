//! # tidemark sync engine
//!
//! Synchronizes a local [`RecordStore`](tidemark_core::RecordStore) with a
//! remote collection.
//!
//! This crate provides:
//! - The [`SyncEngine`] state machine (check metadata → pull → apply →
//!   push → reconcile → settle)
//! - The [`RemoteApi`] seam to the transport, and a scripted [`MockRemote`]
//! - The [`TransformPipeline`] applied to records crossing the boundary,
//!   with encryption and id-prefix transformers
//! - The [`HookRegistry`] for the `incoming-changes` extension point
//! - The [`SyncResult`] accumulator returned by every run
//!
//! ## Architecture
//!
//! ```text
//!   RemoteApi ──pages──▶ decode ─▶ hooks ─▶ classify ─▶ RecordStore
//!       ▲                                               │
//!       └──batch◀── encode ◀── pending records ◀────────┘
//! ```
//!
//! ## Key Invariants
//!
//! - Pull always completes before push begins
//! - Each page is applied in one storage transaction
//! - The collection watermark never moves backwards and only moves to
//!   timestamps observed from the remote for committed data
//! - A failed run keeps every transaction it committed and can simply be
//!   re-run

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod config;
mod error;
mod hooks;
mod remote;
mod result;
mod server_info;
mod state;
mod transform;

pub use config::{SyncConfig, SyncOptions};
pub use error::{EngineResult, SyncError};
pub use hooks::{HookRegistry, IncomingChanges, INCOMING_CHANGES};
pub use remote::{MockRemote, RemoteApi, RequestOptions};
pub use result::{RecordError, RecordErrorKind, SyncFailure, SyncResult};
pub use server_info::ServerInfoCache;
pub use state::{SyncEngine, SyncState, SyncStats};
pub use transform::{
    EncryptionKey, EncryptionTransformer, IdPrefixTransformer, TransformPipeline, Transformer,
};
pub use tidemark_sync_protocol::Strategy;

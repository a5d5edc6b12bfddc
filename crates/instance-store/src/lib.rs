//! Durable, append-only persistence for workflow instance histories.
//!
//! Each workflow instance owns a strictly ordered log of transition
//! events, keyed by a monotonically increasing per-instance sequence
//! number. Entries are never mutated or deleted by normal operation;
//! instance state is always reconstructed by replaying the log, which is
//! what makes crash recovery a plain reload.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::InstanceId;
pub use error::{InstanceStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Sequence};
pub use memory::InMemoryInstanceStore;
pub use postgres::PostgresInstanceStore;
pub use store::{AppendOptions, InstanceStore};

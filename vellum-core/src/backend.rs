//! The storage contract: a read of the newest snapshot plus newer events,
//! and an all-or-nothing transactional write.
//!
//! Backends map the abstract per-aggregate log onto a concrete key-ordered
//! store. The log invariant: per id, records carry strictly increasing
//! contiguous versions starting at 1, with at most one record per
//! (version, record kind) pair. Conditional writes enforce the invariant
//! and surface [`VersionConflict`] to the writer that lost the race.
//!
//! This module holds the [`Backend`] and [`Transaction`] traits, the wire
//! records, and the [`memory`] reference backend.

use std::future::Future;

use thiserror::Error;

pub mod memory;

/// An event record as it travels to and from a backend.
///
/// The payload is opaque to backends; only the store's codec interprets it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedEvent {
    /// Stable event tag (see [`Event::kind`](crate::event::Event::kind)).
    pub kind: String,
    /// Version slot the event occupies in the log.
    pub version: u64,
    /// Encoded event body.
    pub data: Vec<u8>,
}

/// A snapshot record as it travels to and from a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedState {
    /// Version the snapshot materializes; shared with its newest event.
    pub version: u64,
    /// Encoded aggregate state.
    pub data: Vec<u8>,
}

/// Discriminator separating the two record shapes in storage layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// An event record.
    Event = 1,
    /// A snapshot record.
    Snapshot = 2,
}

impl RecordKind {
    /// The layout byte for this record kind.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a layout byte back into a record kind.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Event),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// A record already exists at the submitted version slot.
///
/// Raised when a concurrent writer committed first, or when the aggregate
/// being saved was loaded from state that is no longer the newest.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("version conflict at version {version} (hint: the aggregate is stale; reload and retry)")]
pub struct VersionConflict {
    /// The version slot that was already occupied.
    pub version: u64,
}

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No records exist for the requested id.
    ///
    /// Backends may equally signal this as an empty read; the store treats
    /// both identically.
    #[error("not found")]
    NotFound,
    /// A submission targeted an occupied or out-of-sequence version slot.
    #[error(transparent)]
    Conflict(#[from] VersionConflict),
    /// A stored record carried an unrecognized record-kind discriminator.
    #[error("invalid record kind {0}")]
    InvalidRecordKind(u8),
    /// The underlying storage engine failed.
    #[error("storage failure: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl BackendError {
    /// Wrap a storage-engine error.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(err))
    }
}

/// Staging handle passed to the [`Backend::write`] callback.
///
/// Submissions accumulate in the transaction and are committed atomically
/// when the callback returns `Ok`; any error aborts the whole transaction.
/// Within one transaction, submissions apply in submission order. The
/// handle is exclusively owned by the running callback and cannot outlive
/// it.
pub trait Transaction {
    /// Stage an event at `event.version`, which must extend the log by
    /// exactly one.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] when the version slot is
    /// occupied or out of sequence.
    fn event(&mut self, event: EncodedEvent) -> Result<(), BackendError>;

    /// Stage a snapshot at `state.version`, which must equal the version
    /// of the newest event in the log, counting events staged earlier in
    /// this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] when the slot already holds a
    /// snapshot or the version is out of sequence.
    fn state(&mut self, state: EncodedState) -> Result<(), BackendError>;
}

/// Storage adapter for the per-aggregate event log.
///
/// All blocking or suspending work happens inside [`read`](Backend::read)
/// and [`write`](Backend::write); the store itself performs no I/O.
/// Cancellation is cooperative: dropping an in-flight future abandons the
/// operation, and `write`'s all-or-nothing commit keeps partial state from
/// ever being observable.
pub trait Backend: Send + Sync {
    /// Aggregate identifier type.
    type Id;

    /// Read the newest snapshot (if any) and every event strictly newer
    /// than it, in ascending version order.
    ///
    /// `snapshot_hint` is advisory: the maximum number of events expected
    /// since the last snapshot (the store passes its snapshot rate).
    /// Backends may use it to bound scans but must return a correct result
    /// regardless.
    fn read(
        &self,
        id: &Self::Id,
        snapshot_hint: u64,
    ) -> impl Future<Output = Result<(Option<EncodedState>, Vec<EncodedEvent>), BackendError>> + Send;

    /// Run `f` against a staging transaction, then commit atomically.
    ///
    /// `f` is invoked exactly once. When it returns `Ok` the staged
    /// records become visible as a unit; on any error nothing is
    /// persisted.
    fn write<F, E>(&self, id: &Self::Id, f: F) -> impl Future<Output = Result<(), E>> + Send
    where
        F: FnOnce(&mut dyn Transaction) -> Result<(), E> + Send,
        E: From<BackendError> + Send;
}

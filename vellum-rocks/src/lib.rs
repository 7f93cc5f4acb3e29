//! RocksDB-backed storage for the vellum aggregate/event store.
//!
//! Records for one aggregate live in a per-id keyspace:
//!
//! ```text
//! {id} 0x1F {version: u64 big-endian} {record kind: u8} {event kind}
//! ```
//!
//! Big-endian versions make lexicographic key order equal numeric version
//! order, so the newest record for an id is the last key of its keyspace.
//! Record kind `1` is an event, `2` a snapshot; a snapshot shares its
//! version with the newest event and sorts after it at the same version.
//!
//! Writes stage into a [`rocksdb::WriteBatch`] under a process-wide writer
//! lock and commit as one atomic batch; every staged key is checked for
//! prior existence, which is what turns a stale writer into a version
//! conflict.
//!
//! Aggregate ids are strings and must not contain the `0x1F` separator
//! byte, which would alias another id's keyspace.

use std::{collections::HashSet, future::Future, path::Path, sync::Arc};

use parking_lot::Mutex;
use rocksdb::{DB, Direction, IteratorMode, WriteBatch};
use thiserror::Error;
use vellum_core::backend::{
    Backend, BackendError, EncodedEvent, EncodedState, RecordKind, Transaction, VersionConflict,
};

/// Error type for RocksDB store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Key/value access or batch commit failure.
    #[error("rocksdb error: {0}")]
    Database(#[from] rocksdb::Error),
    /// A stored key did not match the expected layout.
    #[error("malformed record key")]
    MalformedKey,
}

/// Separator between the aggregate id and the record suffix.
const SEP: u8 = 0x1F;

/// A RocksDB-backed [`Backend`] with string aggregate ids.
///
/// Wraps a shared database handle; clones share the same database and the
/// same writer lock.
#[derive(Clone)]
pub struct Rocks {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl Rocks {
    /// Wrap an already open database handle.
    #[must_use]
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] when the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self::new(Arc::new(db)))
    }
}

/// First key lexicographically above every record of `id`.
fn keyspace_end(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 1);
    key.extend_from_slice(id.as_bytes());
    key.push(SEP + 1);
    key
}

fn keyspace_prefix(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 1);
    key.extend_from_slice(id.as_bytes());
    key.push(SEP);
    key
}

fn encode_key(id: &str, version: u64, kind: RecordKind, event_kind: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 10 + event_kind.len());
    key.extend_from_slice(id.as_bytes());
    key.push(SEP);
    key.extend_from_slice(&version.to_be_bytes());
    key.push(kind.as_byte());
    key.extend_from_slice(event_kind.as_bytes());
    key
}

/// Parse the record suffix (everything after the separator) back into
/// `(version, record kind, event kind)`.
fn decode_suffix(suffix: &[u8]) -> Result<(u64, RecordKind, String), BackendError> {
    if suffix.len() < 9 {
        return Err(BackendError::storage(Error::MalformedKey));
    }
    let mut version = [0u8; 8];
    version.copy_from_slice(&suffix[..8]);
    let kind =
        RecordKind::from_byte(suffix[8]).ok_or(BackendError::InvalidRecordKind(suffix[8]))?;
    let event_kind = std::str::from_utf8(&suffix[9..])
        .map_err(|_| BackendError::storage(Error::MalformedKey))?
        .to_owned();
    Ok((u64::from_be_bytes(version), kind, event_kind))
}

struct RocksTx<'a> {
    db: &'a DB,
    id: &'a str,
    batch: WriteBatch,
    staged_keys: HashSet<Vec<u8>>,
}

impl RocksTx<'_> {
    fn put(&mut self, key: Vec<u8>, version: u64, data: &[u8]) -> Result<(), BackendError> {
        let occupied = self.staged_keys.contains(&key)
            || self
                .db
                .get(&key)
                .map_err(|e| BackendError::storage(Error::Database(e)))?
                .is_some();
        if occupied {
            return Err(VersionConflict { version }.into());
        }
        self.batch.put(&key, data);
        self.staged_keys.insert(key);
        Ok(())
    }
}

impl Transaction for RocksTx<'_> {
    fn event(&mut self, event: EncodedEvent) -> Result<(), BackendError> {
        let key = encode_key(self.id, event.version, RecordKind::Event, &event.kind);
        self.put(key, event.version, &event.data)
    }

    fn state(&mut self, state: EncodedState) -> Result<(), BackendError> {
        let key = encode_key(self.id, state.version, RecordKind::Snapshot, "");
        self.put(key, state.version, &state.data)
    }
}

impl Backend for Rocks {
    type Id = String;

    #[tracing::instrument(skip(self, id))]
    fn read(
        &self,
        id: &String,
        snapshot_hint: u64,
    ) -> impl Future<Output = Result<(Option<EncodedState>, Vec<EncodedEvent>), BackendError>> + Send
    {
        let result = (|| {
            let prefix = keyspace_prefix(id);
            let mut snapshot = None;
            let mut events = Vec::with_capacity(snapshot_hint as usize);

            let iter = self
                .db
                .iterator(IteratorMode::From(&keyspace_end(id), Direction::Reverse));
            for item in iter {
                let (key, value) = item.map_err(|e| BackendError::storage(Error::Database(e)))?;
                if !key.starts_with(&prefix) {
                    break;
                }
                let (version, kind, event_kind) = decode_suffix(&key[prefix.len()..])?;
                match kind {
                    RecordKind::Snapshot => {
                        snapshot = Some(EncodedState {
                            version,
                            data: value.into_vec(),
                        });
                        break;
                    }
                    RecordKind::Event => {
                        events.push(EncodedEvent {
                            kind: event_kind,
                            version,
                            data: value.into_vec(),
                        });
                    }
                }
            }

            events.reverse();
            tracing::trace!(
                events = events.len(),
                snapshot = snapshot.is_some(),
                "read keyspace tail"
            );
            Ok((snapshot, events))
        })();

        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, id, f))]
    fn write<F, E>(&self, id: &String, f: F) -> impl Future<Output = Result<(), E>> + Send
    where
        F: FnOnce(&mut dyn Transaction) -> Result<(), E> + Send,
        E: From<BackendError> + Send,
    {
        let result = (|| {
            // Single-writer discipline: the existence checks and the batch
            // commit must not interleave with another writer.
            let _guard = self.write_lock.lock();

            let mut tx = RocksTx {
                db: &self.db,
                id: id.as_str(),
                batch: WriteBatch::default(),
                staged_keys: HashSet::new(),
            };
            f(&mut tx)?;

            if tx.batch.is_empty() {
                return Ok(());
            }

            let staged = tx.batch.len();
            self.db
                .write(tx.batch)
                .map_err(|e| E::from(BackendError::storage(Error::Database(e))))?;
            tracing::debug!(records = staged, "write batch committed");
            Ok(())
        })();

        std::future::ready(result)
    }
}

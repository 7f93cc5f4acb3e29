//! In-memory backend for tests and examples.
//!
//! Logs live in a hash map guarded by a process-wide read-write lock.
//! Writers stage records without holding the lock and splice them in at
//! commit time; readers proceed concurrently.

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{Arc, RwLock},
};

use super::{Backend, BackendError, EncodedEvent, EncodedState, Transaction, VersionConflict};

#[derive(Clone, Debug)]
enum Record {
    Event {
        kind: String,
        version: u64,
        data: Vec<u8>,
    },
    Snapshot {
        version: u64,
        data: Vec<u8>,
    },
}

impl Record {
    const fn version(&self) -> u64 {
        match self {
            Self::Event { version, .. } | Self::Snapshot { version, .. } => *version,
        }
    }
}

/// In-memory [`Backend`] keeping every log in a hash map.
///
/// Cloning is cheap; all clones share the same map.
#[derive(Clone)]
pub struct InMemory<I> {
    inner: Arc<RwLock<HashMap<I, Vec<Record>>>>,
}

impl<I> InMemory<I> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<I> Default for InMemory<I> {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryTx {
    version: u64,
    staged: Vec<Record>,
}

impl Transaction for MemoryTx {
    fn event(&mut self, event: EncodedEvent) -> Result<(), BackendError> {
        if event.version != self.version + 1 {
            return Err(VersionConflict {
                version: event.version,
            }
            .into());
        }
        self.version += 1;
        self.staged.push(Record::Event {
            kind: event.kind,
            version: event.version,
            data: event.data,
        });
        Ok(())
    }

    fn state(&mut self, state: EncodedState) -> Result<(), BackendError> {
        // A snapshot shares the version of the newest event; advancing the
        // counter afterwards makes a duplicate snapshot at the same slot
        // conflict.
        if state.version != self.version {
            return Err(VersionConflict {
                version: state.version,
            }
            .into());
        }
        self.version += 1;
        self.staged.push(Record::Snapshot {
            version: state.version,
            data: state.data,
        });
        Ok(())
    }
}

impl<I> Backend for InMemory<I>
where
    I: Clone + Eq + Hash + Send + Sync + 'static,
{
    type Id = I;

    #[tracing::instrument(skip(self, id))]
    fn read(
        &self,
        id: &I,
        _snapshot_hint: u64,
    ) -> impl Future<Output = Result<(Option<EncodedState>, Vec<EncodedEvent>), BackendError>> + Send
    {
        let result = (|| {
            let inner = self.inner.read().expect("in-memory backend lock poisoned");
            let records = match inner.get(id) {
                Some(records) if !records.is_empty() => records,
                _ => return Err(BackendError::NotFound),
            };

            let mut snapshot = None;
            let mut events = Vec::new();
            for record in records.iter().rev() {
                match record {
                    Record::Snapshot { version, data } => {
                        snapshot = Some(EncodedState {
                            version: *version,
                            data: data.clone(),
                        });
                        break;
                    }
                    Record::Event {
                        kind,
                        version,
                        data,
                    } => {
                        events.push(EncodedEvent {
                            kind: kind.clone(),
                            version: *version,
                            data: data.clone(),
                        });
                    }
                }
            }
            events.reverse();
            tracing::trace!(
                events = events.len(),
                snapshot = snapshot.is_some(),
                "read log tail"
            );
            Ok((snapshot, events))
        })();

        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, id, f))]
    fn write<F, E>(&self, id: &I, f: F) -> impl Future<Output = Result<(), E>> + Send
    where
        F: FnOnce(&mut dyn Transaction) -> Result<(), E> + Send,
        E: From<BackendError> + Send,
    {
        let result = (|| {
            let tail = {
                let inner = self.inner.read().expect("in-memory backend lock poisoned");
                inner
                    .get(id)
                    .and_then(|records| records.last())
                    .map_or(0, Record::version)
            };

            let mut tx = MemoryTx {
                version: tail,
                staged: Vec::new(),
            };
            f(&mut tx)?;

            if tx.staged.is_empty() {
                return Ok(());
            }

            let mut inner = self.inner.write().expect("in-memory backend lock poisoned");
            let records = inner.entry(id.clone()).or_default();

            // Re-check the tail under the write lock: a concurrent writer
            // may have committed between staging and splicing.
            let committed_tail = records.last().map_or(0, Record::version);
            if committed_tail != tail {
                let version = tx.staged.first().map_or(tail, Record::version);
                return Err(E::from(BackendError::Conflict(VersionConflict { version })));
            }

            let count = tx.staged.len();
            records.extend(tx.staged);
            drop(inner);
            tracing::debug!(records = count, "transaction committed");
            Ok(())
        })();

        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, version: u64, data: &[u8]) -> EncodedEvent {
        EncodedEvent {
            kind: kind.to_owned(),
            version,
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn read_missing_id_is_not_found() {
        let backend: InMemory<String> = InMemory::new();
        let err = backend.read(&"a".to_string(), 10).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound));
    }

    #[tokio::test]
    async fn written_events_read_back_in_order() {
        let backend: InMemory<String> = InMemory::new();
        let id = "a".to_string();

        backend
            .write(&id, |tx: &mut dyn Transaction| {
                tx.event(event("credited", 1, b"{\"amount\":10}"))?;
                tx.event(event("credited", 2, b"{\"amount\":20}"))?;
                Ok::<_, BackendError>(())
            })
            .await
            .unwrap();

        let (snapshot, events) = backend.read(&id, 10).await.unwrap();
        assert!(snapshot.is_none());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, 1);
        assert_eq!(events[1].version, 2);
    }

    #[tokio::test]
    async fn read_stops_at_the_newest_snapshot() {
        let backend: InMemory<String> = InMemory::new();
        let id = "a".to_string();

        backend
            .write(&id, |tx: &mut dyn Transaction| {
                tx.event(event("credited", 1, b"10"))?;
                tx.event(event("credited", 2, b"20"))?;
                tx.state(EncodedState {
                    version: 2,
                    data: b"30".to_vec(),
                })?;
                Ok::<_, BackendError>(())
            })
            .await
            .unwrap();
        backend
            .write(&id, |tx: &mut dyn Transaction| {
                tx.event(event("credited", 3, b"40"))?;
                Ok::<_, BackendError>(())
            })
            .await
            .unwrap();

        let (snapshot, events) = backend.read(&id, 10).await.unwrap();
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.data, b"30");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version, 3);
    }

    #[tokio::test]
    async fn out_of_sequence_event_conflicts() {
        let backend: InMemory<String> = InMemory::new();
        let id = "a".to_string();

        backend
            .write(&id, |tx: &mut dyn Transaction| {
                tx.event(event("credited", 1, b"10"))?;
                Ok::<_, BackendError>(())
            })
            .await
            .unwrap();

        // A stale writer resubmitting version 1.
        let err = backend
            .write(&id, |tx: &mut dyn Transaction| {
                tx.event(event("credited", 1, b"99"))?;
                Ok::<_, BackendError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));

        let (_, events) = backend.read(&id, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, b"10");
    }

    #[tokio::test]
    async fn snapshot_version_must_match_the_newest_event() {
        let backend: InMemory<String> = InMemory::new();
        let id = "a".to_string();

        let err = backend
            .write(&id, |tx: &mut dyn Transaction| {
                tx.event(event("credited", 1, b"10"))?;
                tx.state(EncodedState {
                    version: 2,
                    data: b"10".to_vec(),
                })?;
                Ok::<_, BackendError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
    }

    #[tokio::test]
    async fn failed_transaction_persists_nothing() {
        let backend: InMemory<String> = InMemory::new();
        let id = "a".to_string();

        let err = backend
            .write(&id, |tx: &mut dyn Transaction| {
                tx.event(event("credited", 1, b"10"))?;
                Err::<(), _>(BackendError::storage(std::io::Error::other("boom")))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Storage(_)));

        let err = backend.read(&id, 10).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound));
    }

    #[tokio::test]
    async fn empty_transaction_is_a_noop() {
        let backend: InMemory<String> = InMemory::new();
        let id = "a".to_string();

        backend
            .write(&id, |_tx: &mut dyn Transaction| Ok::<_, BackendError>(()))
            .await
            .unwrap();

        let err = backend.read(&id, 10).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound));
    }
}

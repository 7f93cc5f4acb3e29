//! The store facade: reconstructs aggregates from a backend and persists
//! their uncommitted events, driving the snapshot policy.
//!
//! A [`Store`] is immutable after construction, performs no I/O of its own
//! and holds no locks; it can be shared freely between concurrent callers.
//! Per-call working state lives in the [`Aggregate`] values it hands out.

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    aggregate::Aggregate,
    backend::{Backend, BackendError, EncodedEvent, EncodedState, Transaction, VersionConflict},
    codec::{Codec, JsonCodec},
    event::{ApplyError, Event, EventResolver, NoResolver, ResolveError},
};

/// Events allowed to accumulate since the last snapshot before a save
/// writes a new one, when no rate is configured.
const DEFAULT_SNAPSHOT_RATE: u64 = 10;

/// Error returned by [`Store::get`] and [`Store::save`].
///
/// `C` is the codec's error type. Callers should match on variants rather
/// than on rendered messages.
#[derive(Debug, Error)]
pub enum StoreError<C>
where
    C: std::error::Error + 'static,
{
    /// No records exist for the requested id.
    #[error("aggregate not found")]
    NotFound,
    /// A concurrent writer committed first, or the saved aggregate was
    /// stale. Discard the aggregate and load a fresh copy before retrying.
    #[error(transparent)]
    Conflict(VersionConflict),
    /// A record could not be encoded.
    #[error("failed to encode record: {0}")]
    Encode(#[source] C),
    /// A record could not be decoded; likely schema drift.
    #[error("failed to decode record: {0}")]
    Decode(#[source] C),
    /// The resolver rejected a stored event tag; likely a missing
    /// registration.
    #[error("unknown event kind `{kind}`")]
    UnknownEventKind {
        /// The rejected tag as read from the log.
        kind: String,
    },
    /// An event's own validation failed during replay.
    #[error("event application failed: {0}")]
    Apply(#[source] ApplyError),
    /// The storage layer failed.
    #[error("backend failure: {0}")]
    Backend(#[source] BackendError),
}

impl<C> From<BackendError> for StoreError<C>
where
    C: std::error::Error + 'static,
{
    /// Normalize backend errors: a backend-raised "not found" and an empty
    /// read are the same condition, and version conflicts pass through
    /// verbatim.
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound => Self::NotFound,
            BackendError::Conflict(conflict) => Self::Conflict(conflict),
            other => Self::Backend(other),
        }
    }
}

impl<C> From<ResolveError<C>> for StoreError<C>
where
    C: std::error::Error + 'static,
{
    fn from(err: ResolveError<C>) -> Self {
        match err {
            ResolveError::UnknownKind { kind } => Self::UnknownEventKind { kind },
            ResolveError::Decode(source) => Self::Decode(source),
        }
    }
}

/// Aggregate store over a pluggable [`Backend`].
///
/// Generic over the backend `B`, the aggregate state `S`, the event
/// resolver `R` and the codec `C`.
///
/// # Example
///
/// ```ignore
/// let store = Store::new(backend)
///     .with_resolver(AccountEvents)
///     .with_snapshot_rate(5);
/// ```
#[derive(Clone, Debug)]
pub struct Store<B, S, R, C = JsonCodec> {
    backend: B,
    snapshot_rate: u64,
    codec: C,
    resolver: R,
    _state: PhantomData<fn() -> S>,
}

impl<B, S, E> Store<B, S, NoResolver<E>>
where
    B: Backend,
    E: Event<S>,
{
    /// Create a store with default options: JSON codec, snapshot rate 10,
    /// and a resolver that rejects every event tag.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            snapshot_rate: DEFAULT_SNAPSHOT_RATE,
            codec: JsonCodec,
            resolver: NoResolver::new(),
            _state: PhantomData,
        }
    }
}

impl<B, S, E, C> Store<B, S, NoResolver<E>, C> {
    /// Supply the event resolver used to decode stored events.
    ///
    /// The resolver's event type replaces the placeholder carried by the
    /// reject-all default, so the compiler can connect aggregates loaded
    /// from this store to the resolver's event set.
    #[must_use]
    pub fn with_resolver<R>(self, resolver: R) -> Store<B, S, R, C>
    where
        R: EventResolver<S, Event = E>,
    {
        Store {
            backend: self.backend,
            snapshot_rate: self.snapshot_rate,
            codec: self.codec,
            resolver,
            _state: PhantomData,
        }
    }
}

impl<B, S, R, C> Store<B, S, R, C> {
    /// Replace the codec used for both encoding and decoding.
    #[must_use]
    pub fn with_codec<C2>(self, codec: C2) -> Store<B, S, R, C2>
    where
        C2: Codec,
    {
        Store {
            backend: self.backend,
            snapshot_rate: self.snapshot_rate,
            codec,
            resolver: self.resolver,
            _state: PhantomData,
        }
    }

    /// Set the number of events allowed to accumulate since the last
    /// snapshot before a save writes a new one. Expected to be at least 1.
    #[must_use]
    pub const fn with_snapshot_rate(mut self, rate: u64) -> Self {
        self.snapshot_rate = rate;
        self
    }
}

impl<B, S, R, C> Store<B, S, R, C>
where
    B: Backend,
    B::Id: Sync,
    S: Send + Sync,
    R: EventResolver<S> + Send + Sync,
    R::Event: Send + Sync,
    C: Codec + Send + Sync,
{
    /// Load the aggregate stored under `id`.
    ///
    /// The newest snapshot (if any) seeds the state; every newer committed
    /// event is resolved, decoded and applied in order. The returned
    /// aggregate is a clean working copy: its uncommitted event run is
    /// empty and `initial == current ==` the last committed version, with
    /// `versions().state` at the snapshot's own version (0 if none).
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no records exist for `id`;
    /// [`StoreError::UnknownEventKind`], [`StoreError::Decode`] or
    /// [`StoreError::Apply`] when replay fails; [`StoreError::Backend`]
    /// when the storage layer fails.
    #[tracing::instrument(skip(self, id))]
    pub async fn get(&self, id: &B::Id) -> Result<Aggregate<S, R::Event>, StoreError<C::Error>>
    where
        S: DeserializeOwned + Default,
    {
        let (snapshot, events) = self.backend.read(id, self.snapshot_rate).await?;

        if snapshot.is_none() && events.is_empty() {
            return Err(StoreError::NotFound);
        }

        let (mut state, snapshot_version) = match snapshot {
            Some(snapshot) => (
                self.codec
                    .deserialize::<S>(&snapshot.data)
                    .map_err(StoreError::Decode)?,
                snapshot.version,
            ),
            None => (S::default(), 0),
        };

        let mut version = snapshot_version;
        for encoded in &events {
            let event = self
                .resolver
                .resolve(&self.codec, &encoded.kind, &encoded.data)?;
            state = event.apply(&state).map_err(StoreError::Apply)?;
            version += 1;
        }

        tracing::debug!(
            snapshot_version,
            replayed = events.len(),
            version,
            "aggregate loaded"
        );
        Ok(Aggregate::rehydrated(state, snapshot_version, version))
    }

    /// Persist the aggregate's uncommitted events under `id`, followed by
    /// a snapshot of the current state when more than the snapshot rate of
    /// events has accumulated since the last one.
    ///
    /// The whole save runs inside a single backend transaction: either
    /// every record commits or none does. The in-memory aggregate is not
    /// rolled back on failure; discard it and load a fresh copy.
    ///
    /// The `i`-th uncommitted event is written at version
    /// `initial + i + 1`; the snapshot (if due) shares the version of the
    /// newest event.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when another writer committed first;
    /// [`StoreError::Encode`] when a record cannot be serialized;
    /// [`StoreError::Backend`] when the storage layer fails.
    #[tracing::instrument(skip(self, id, aggregate), fields(events = aggregate.events().len()))]
    pub async fn save(
        &self,
        id: &B::Id,
        aggregate: &Aggregate<S, R::Event>,
    ) -> Result<(), StoreError<C::Error>>
    where
        S: Serialize,
    {
        let versions = aggregate.versions();
        let snapshot_due = versions.current - versions.state > self.snapshot_rate;

        self.backend
            .write(id, |tx: &mut dyn Transaction| {
                for (i, event) in aggregate.events().iter().enumerate() {
                    let data = event.encode(&self.codec).map_err(StoreError::Encode)?;
                    tx.event(EncodedEvent {
                        kind: event.kind().to_owned(),
                        version: versions.initial + i as u64 + 1,
                        data,
                    })?;
                }

                if snapshot_due {
                    let data = self
                        .codec
                        .serialize(aggregate.state())
                        .map_err(StoreError::Encode)?;
                    tx.state(EncodedState {
                        version: versions.current,
                        data,
                    })?;
                }

                Ok::<(), StoreError<C::Error>>(())
            })
            .await?;

        tracing::debug!(
            committed = versions.current,
            snapshot = snapshot_due,
            "aggregate saved"
        );
        Ok(())
    }
}

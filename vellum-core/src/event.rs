//! The event contract: typed state transitions with a stable persisted tag.
//!
//! An event is defined by two capabilities: *typing* ([`Event::kind`]) and
//! *application* ([`Event::apply`]). The tag is opaque to the store but is
//! written to the log next to the payload, so it must stay stable across
//! releases of the software. During replay an [`EventResolver`] routes a
//! stored tag back to the concrete event type.

use std::marker::PhantomData;

use thiserror::Error;

use crate::codec::Codec;

/// Error produced by an event's own validation logic during
/// [`Event::apply`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ApplyError(#[source] Box<dyn std::error::Error + Send + Sync + 'static>);

impl ApplyError {
    /// Wrap a domain error describing why the transition is invalid.
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }
}

/// Error returned when a stored event cannot be turned back into a
/// concrete type.
#[derive(Debug, Error)]
pub enum ResolveError<C>
where
    C: std::error::Error + 'static,
{
    /// The event tag was not recognized by the resolver.
    #[error("unknown event kind `{kind}`")]
    UnknownKind {
        /// The unrecognized tag as read from the log.
        kind: String,
    },
    /// The payload could not be decoded into the resolved event.
    #[error("failed to decode event payload: {0}")]
    Decode(#[source] C),
}

/// A state transition over aggregate state `S`.
///
/// Events are immutable facts. Applying one is pure: it reads the current
/// state and produces the next, or an error that leaves the caller's state
/// untouched. Events must be value-equivalent after an encode/decode
/// round-trip through the store's codec.
///
/// Closed event sets are typically expressed as an enum implementing this
/// trait, dispatching on the variant in each method.
pub trait Event<S> {
    /// Stable tag identifying the concrete event kind.
    ///
    /// Persisted next to the payload; renaming a tag orphans previously
    /// written records.
    fn kind(&self) -> &str;

    /// Produce the next state from `state`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the event's own validation rejects the
    /// transition.
    fn apply(&self, state: &S) -> Result<S, ApplyError>;

    /// Serialize the event body with the store's encoder.
    ///
    /// Only the body is encoded; the tag travels separately in the record.
    ///
    /// # Errors
    ///
    /// Propagates the codec error when the body cannot be serialized.
    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error>;
}

/// Maps a persisted event tag back to a concrete event during replay.
///
/// The resolver receives the store's configured decoder, so resolution and
/// payload decoding happen in one step. Failing to resolve a tag is a
/// fatal read error. Resolvers are supplied at store construction; there
/// is no global registry.
pub trait EventResolver<S> {
    /// The event type this resolver produces, typically an enum covering
    /// the aggregate's closed event set.
    type Event: Event<S>;

    /// Decode the event stored under `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownKind`] for an unrecognized tag, or
    /// [`ResolveError::Decode`] when the payload does not match the
    /// resolved type.
    fn resolve<C: Codec>(
        &self,
        codec: &C,
        kind: &str,
        data: &[u8],
    ) -> Result<Self::Event, ResolveError<C::Error>>;
}

/// Resolver that rejects every tag.
///
/// This is the default for stores with no resolver configured: aggregates
/// whose streams contain events cannot be loaded until a real resolver is
/// supplied, while event-free streams load normally.
pub struct NoResolver<E>(PhantomData<fn() -> E>);

impl<E> NoResolver<E> {
    /// Create a reject-all resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for NoResolver<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for NoResolver<E> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for NoResolver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NoResolver")
    }
}

impl<S, E> EventResolver<S> for NoResolver<E>
where
    E: Event<S>,
{
    type Event = E;

    fn resolve<C: Codec>(
        &self,
        _codec: &C,
        kind: &str,
        _data: &[u8],
    ) -> Result<Self::Event, ResolveError<C::Error>> {
        Err(ResolveError::UnknownKind {
            kind: kind.to_owned(),
        })
    }
}

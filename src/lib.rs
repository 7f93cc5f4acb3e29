#![doc = include_str!("../README.md")]

pub use vellum_core::{
    aggregate,
    aggregate::{Aggregate, VersionedState, Versions},
    codec,
    codec::{Codec, JsonCodec},
    event,
    event::{ApplyError, Event, EventResolver, NoResolver, ResolveError},
    store,
    store::{Store, StoreError},
};

pub mod backend {

    pub use vellum_core::backend::{
        Backend, BackendError, EncodedEvent, EncodedState, RecordKind, Transaction,
        VersionConflict, memory,
    };

    #[cfg(feature = "rocks")]
    pub mod rocks {
        pub use vellum_rocks::{Error, Rocks};
    }
}

//! Core traits and types for the vellum aggregate/event store.
//!
//! This crate provides the building blocks for event-sourced persistence:
//!
//! - [`aggregate`] - The in-memory working copy (`Aggregate`, `Versions`)
//! - [`event`] - The event contract (`Event`, `EventResolver`)
//! - [`codec`] - The byte-level seam (`Codec`, `JsonCodec`)
//! - [`store`] - The facade (`Store`) driving loads, saves and snapshots
//! - [`backend`] - The storage contract (`Backend`, `Transaction`) and the
//!   in-memory reference backend
//!
//! # Example
//!
//! ```
//! use vellum_core::backend::memory::InMemory;
//!
//! // An in-memory backend keyed by string aggregate ids.
//! let backend: InMemory<String> = InMemory::new();
//! ```
//!
//! Most users should depend on the `vellum` crate, which re-exports these
//! types with a cleaner API surface.

pub mod aggregate;
pub mod backend;
pub mod codec;
pub mod event;
pub mod store;

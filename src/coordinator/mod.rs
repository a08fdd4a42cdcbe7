//! # Coordination store gateway.
//!
//! - [`client`]: the [`Coordinator`] contract and its node/watch/session
//!   vocabulary.
//! - [`ops`]: compound helpers (recursive delete, ignore-error adapters,
//!   delete-and-create).
//! - [`memory`]: an in-memory implementation with session and fault
//!   simulation.

pub mod client;
pub mod memory;
pub mod ops;

pub use client::{
    Coordinator, CreateMode, NodeChildren, NodeData, NodeEventKind, SessionEvent, WatchedEvent,
    Watcher,
};
pub use memory::MemCoordinator;

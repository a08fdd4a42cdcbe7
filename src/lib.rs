//! # servisor
//!
//! **Servisor** mirrors the lifecycle of a locally hosted worker onto a
//! shared coordination store and provides service discovery on top of the
//! same store.
//!
//! The crate is designed as a building block for distributed application
//! containers: each instance wraps its worker in a supervisor that
//! publishes state, advertises presence, and receives commands, while the
//! discovery registry lets instances find each other.
//!
//! ## Features
//!
//! | Area              | Description                                                              | Key types / traits                         |
//! |-------------------|--------------------------------------------------------------------------|--------------------------------------------|
//! | **Supervision**   | Mirror a worker's state machine onto the store; ordered command delivery. | [`ServiceSupervisor`]                      |
//! | **Contracts**     | What a worker must provide to be supervised.                              | [`Service`], [`ServiceListener`], [`MessageCallback`] |
//! | **Discovery**     | Ephemeral endpoint registration surviving session loss; live membership.  | [`DiscoveryRegistry`], [`Cancellable`], [`ServiceView`] |
//! | **Gateway**       | The async contract required of the coordination store.                    | [`Coordinator`], [`MemCoordinator`]        |
//! | **Wire forms**    | JSON payloads written to the store.                                       | [`StateNode`], [`Message`], [`Discoverable`] |
//! | **Errors**        | Typed errors for store and discovery failures.                            | [`CoordError`], [`DiscoveryError`]         |
//! | **Configuration** | Centralize runtime settings.                                              | [`Config`]                                 |
//!
//! ## Paths
//!
//! ```text
//! /<RunId>/state                         current StateNode (persistent)
//! /<RunId>/messages/<messageId>          inbound commands, lexical order
//! /instances/<RunId>                     ephemeral presence marker
//! /discoverable/<service>/service-<seq>  ephemeral endpoint nodes
//! ```
//!
//! ```no_run
//! use std::sync::Arc;
//! use servisor::{
//!     Discoverable, DiscoveryRegistry, MemCoordinator, RunId, ServiceSupervisor,
//! };
//! # use servisor::{Service, ServiceListener};
//! # use async_trait::async_trait;
//! # struct Worker;
//! # #[async_trait]
//! # impl Service for Worker {
//! #     async fn start(&self) {}
//! #     async fn stop(&self) {}
//! #     fn add_listener(&self, _listener: Arc<dyn ServiceListener>) {}
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coord = Arc::new(MemCoordinator::new());
//!
//!     // Supervise a worker under a fresh run identity.
//!     let worker = Arc::new(Worker);
//!     let supervisor = ServiceSupervisor::new(
//!         coord.clone(),
//!         RunId::generate(),
//!         serde_json::json!({"host": "node-1"}),
//!         worker,
//!     );
//!     supervisor.start().await?;
//!
//!     // Advertise an endpoint and watch the membership.
//!     let registry = DiscoveryRegistry::new(coord);
//!     let handle = registry.register(Discoverable::new("echo", "node-1", 9000)).await?;
//!     let members = registry.discover("echo");
//!
//!     for member in &members {
//!         println!("{}:{}", member.hostname(), member.port());
//!     }
//!
//!     handle.cancel().await;
//!     supervisor.stop().await;
//!     supervisor.await_terminal().await;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod config;
mod error;
mod message;
mod run_id;
mod service;
mod state;

pub mod coordinator;
pub mod discovery;
pub mod supervisor;

// ---- Public re-exports ----

pub use config::Config;
pub use coordinator::{
    Coordinator, CreateMode, MemCoordinator, NodeChildren, NodeData, NodeEventKind, SessionEvent,
    WatchedEvent, Watcher,
};
pub use discovery::{Cancellable, Discoverable, DiscoveryRegistry, ServiceView};
pub use error::{CoordError, DiscoveryError};
pub use message::{Message, MessageType, SystemMessages};
pub use run_id::RunId;
pub use service::{Cause, MessageCallback, Service, ServiceListener};
pub use state::{ErrorInfo, StackFrame, State, StateNode};
pub use supervisor::ServiceSupervisor;

//! # Discovery registrar: publishes endpoints and survives session loss.
//!
//! [`DiscoveryRegistry::register`] creates an ephemeral sequential node
//! for the endpoint and hands back a [`Cancellable`]. Registration is
//! synchronous to the caller: the initial create is awaited and its
//! failure propagates, so a worker unable to advertise itself crashes
//! fast and gets restarted by whatever supervises it.
//!
//! ## Session expiry
//! ```text
//! session events ──► watcher task
//!     Expired            mark
//!     SyncConnected ──► re-register every live handle
//!                         ├─ ok   → handle path updated
//!                         │        (deleted at once if cancelled mid-flight)
//!                         └─ err  → handle path blanked, cancel is a no-op
//! ```
//!
//! ## Rules
//! - The multimap mutex covers bookkeeping only; it is never held across
//!   store I/O.
//! - `cancel` is idempotent and race-free against in-flight
//!   re-registration: observing a blank path defers the deletion to the
//!   re-registration completion.
//! - Abandoned paths from before an expiry are left to the server's
//!   garbage collection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::coordinator::client::{Coordinator, CreateMode, SessionEvent};
use crate::coordinator::ops;
use crate::discovery::resolver::{self, ServiceView};
use crate::discovery::Discoverable;
use crate::error::{CoordError, DiscoveryError};

/// Publishes and resolves discoverable endpoints.
pub struct DiscoveryRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    coord: Arc<dyn Coordinator>,
    namespace: String,
    /// Live registrations, for re-creation after session expiry.
    entries: Mutex<HashMap<Discoverable, Vec<Arc<HandleState>>>>,
    /// Installed per-service live views.
    views: DashMap<String, ServiceView>,
    cancel: CancellationToken,
}

struct HandleState {
    discoverable: Discoverable,
    cancelled: AtomicBool,
    path: Mutex<Option<String>>,
}

impl DiscoveryRegistry {
    /// Creates a registry under the default namespace.
    pub fn new(coord: Arc<dyn Coordinator>) -> Self {
        Self::with_namespace(coord, Config::default().discovery_namespace)
    }

    /// Creates a registry under an explicit namespace.
    pub fn with_namespace(coord: Arc<dyn Coordinator>, namespace: impl Into<String>) -> Self {
        let inner = Arc::new(RegistryInner {
            coord,
            namespace: namespace.into(),
            entries: Mutex::new(HashMap::new()),
            views: DashMap::new(),
            cancel: CancellationToken::new(),
        });
        spawn_session_watcher(Arc::clone(&inner));
        Self { inner }
    }

    /// Advertises an endpoint.
    ///
    /// Awaits the initial create; on success the endpoint stays published
    /// until [`Cancellable::cancel`] or session death (after which it is
    /// re-created on reconnect).
    pub async fn register(
        &self,
        discoverable: Discoverable,
    ) -> Result<Cancellable, DiscoveryError> {
        let path = self
            .inner
            .create_endpoint(&discoverable)
            .await
            .map_err(|source| DiscoveryError::Register {
                service: discoverable.service().to_string(),
                source,
            })?;
        debug!(service = discoverable.service(), %path, "service registered");

        let handle = Arc::new(HandleState {
            discoverable: discoverable.clone(),
            cancelled: AtomicBool::new(false),
            path: Mutex::new(Some(path)),
        });
        self.inner
            .lock_entries()
            .entry(discoverable)
            .or_default()
            .push(Arc::clone(&handle));

        Ok(Cancellable {
            registry: Arc::clone(&self.inner),
            handle,
        })
    }

    /// Returns the live membership view for a service name.
    ///
    /// The first call per name installs a child watch; later calls share
    /// the same view.
    pub fn discover(&self, service: &str) -> ServiceView {
        let inner = &self.inner;
        let entry = inner.views.entry(service.to_string()).or_insert_with(|| {
            let base = format!("{}/{}", inner.namespace, service);
            resolver::install(Arc::clone(&inner.coord), base, inner.cancel.child_token())
        });
        entry.value().clone()
    }
}

impl Drop for DiscoveryRegistry {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl RegistryInner {
    fn lock_entries(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Discoverable, Vec<Arc<HandleState>>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn create_endpoint(&self, discoverable: &Discoverable) -> Result<String, CoordError> {
        let prefix = format!("{}/{}/service-", self.namespace, discoverable.service());
        self.coord
            .create(
                &prefix,
                Some(discoverable.encode()),
                CreateMode::EphemeralSequential,
                true,
            )
            .await
    }

    /// Re-creates the endpoint of every live handle after a reconnect.
    /// Store I/O runs on spawned tasks, never under the entries lock.
    fn reregister_all(self: &Arc<Self>) {
        let live: Vec<Arc<HandleState>> = self
            .lock_entries()
            .values()
            .flatten()
            .filter(|handle| !handle.is_cancelled())
            .cloned()
            .collect();

        for handle in live {
            let registry = Arc::clone(self);
            tokio::spawn(async move {
                info!(
                    service = handle.discoverable.service(),
                    "re-registering service"
                );
                match registry.create_endpoint(&handle.discoverable).await {
                    Ok(path) => registry.complete_reregistration(&handle, Some(path)).await,
                    Err(e) => {
                        error!(
                            service = handle.discoverable.service(),
                            error = %e,
                            "failed to re-register service"
                        );
                        registry.complete_reregistration(&handle, None).await;
                    }
                }
            });
        }
    }

    /// Installs the re-created path into the handle. A cancellation that
    /// raced the re-registration left the deletion to us.
    async fn complete_reregistration(&self, handle: &Arc<HandleState>, path: Option<String>) {
        match handle.swap_path(path) {
            Some(deferred) => {
                self.remove_entry(handle);
                self.delete_endpoint(handle, &deferred).await;
            }
            None => debug!(
                service = handle.discoverable.service(),
                "service re-registered"
            ),
        }
    }

    async fn delete_endpoint(&self, handle: &Arc<HandleState>, path: &str) {
        // The node may be gone already when the session expired and it was
        // never re-created.
        match ops::ignore_no_node(self.coord.delete(path, None).await) {
            Ok(_) => debug!(
                service = handle.discoverable.service(),
                path, "service unregistered"
            ),
            Err(e) => error!(
                service = handle.discoverable.service(),
                path,
                error = %e,
                "failed to unregister service"
            ),
        }
    }

    fn remove_entry(&self, handle: &Arc<HandleState>) {
        let mut entries = self.lock_entries();
        if let Some(handles) = entries.get_mut(&handle.discoverable) {
            handles.retain(|h| !Arc::ptr_eq(h, handle));
            if handles.is_empty() {
                entries.remove(&handle.discoverable);
            }
        }
    }

    #[cfg(test)]
    fn live_handle_count(&self, discoverable: &Discoverable) -> usize {
        self.lock_entries()
            .get(discoverable)
            .map(|handles| handles.len())
            .unwrap_or(0)
    }
}

impl HandleState {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Replaces the stored path. Returns the new path back when the handle
    /// was cancelled while the re-registration was in flight, handing the
    /// deletion to the caller.
    fn swap_path(&self, new: Option<String>) -> Option<String> {
        let mut path = self
            .path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *path = new;
        if self.is_cancelled() {
            path.take()
        } else {
            None
        }
    }

    fn current_path(&self) -> Option<String> {
        self.path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Handle to one registration.
pub struct Cancellable {
    registry: Arc<RegistryInner>,
    handle: Arc<HandleState>,
}

impl Cancellable {
    /// Withdraws the registration and deletes its endpoint node.
    ///
    /// Idempotent. If a re-registration is in flight (blank path), the
    /// deletion happens when it completes.
    pub async fn cancel(&self) {
        if self.handle.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(path) = self.handle.current_path() else {
            // Deletion deferred to the re-registration completion.
            return;
        };
        self.registry.remove_entry(&self.handle);
        self.registry.delete_endpoint(&self.handle, &path).await;
    }
}

fn spawn_session_watcher(inner: Arc<RegistryInner>) {
    let mut rx = inner.coord.session_events();
    let cancel = inner.cancel.clone();
    tokio::spawn(async move {
        // Single consumer task, plain local flag.
        let mut expired = false;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                },
            };
            match event {
                SessionEvent::Expired => {
                    warn!("coordination session expired");
                    expired = true;
                }
                SessionEvent::SyncConnected if expired => {
                    info!("reconnected after expiration");
                    expired = false;
                    inner.reregister_all();
                }
                SessionEvent::SyncConnected => {}
            }
        }
    });
}

use super::observer::{ThresholdObserver, ThresholdWaiter};
use crate::connection::{ConnectionManager, Connector, RetryPolicy, ServerConnection};
use crate::error::BrokerError;
use crate::introducer::{AnnouncementHandler, IntroducerClient};
use crate::server::{
    Announcement, ConnectionState, ServerDescriptor, ServerId, StaticServer, STORAGE_SERVICE_NAME,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identity -> descriptor mapping, in registration order
#[derive(Default)]
struct Registry {
    servers: HashMap<ServerId, Arc<ServerDescriptor>>,
    order: Vec<ServerId>,
    static_server_ids: BTreeSet<ServerId>,
    connected: usize,
    stopped: bool,
}

impl Registry {
    fn insert(&mut self, descriptor: Arc<ServerDescriptor>) {
        let server_id = descriptor.get_serverid().to_string();
        self.order.push(server_id.clone());
        self.servers.insert(server_id, descriptor);
    }

    fn in_order(&self) -> impl Iterator<Item = &Arc<ServerDescriptor>> {
        self.order.iter().filter_map(|id| self.servers.get(id))
    }
}

struct BrokerInner {
    runtime: Handle,
    manager: Arc<ConnectionManager>,
    registry: RwLock<Registry>,
    connected_observer: ThresholdObserver,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerInner {
    /// Returns false if the connection was not taken
    fn connection_established(
        &self,
        descriptor: &ServerDescriptor,
        connection: Arc<dyn ServerConnection>,
    ) -> bool {
        let mut registry = self.registry.write();
        if registry.stopped || !descriptor.set_connected(connection) {
            return false;
        }
        registry.connected += 1;
        info!(
            "Connected to server {} [{}] ({} connected)",
            descriptor.get_name(),
            descriptor.get_nickname(),
            registry.connected
        );
        self.connected_observer.notify(registry.connected);
        true
    }

    fn connection_lost(&self, descriptor: &ServerDescriptor) {
        let mut registry = self.registry.write();
        if !descriptor.set_lost() {
            return;
        }
        registry.connected = registry.connected.saturating_sub(1);
        warn!(
            "Lost connection to server {} ({} connected)",
            descriptor.get_name(),
            registry.connected
        );
        self.connected_observer.notify(registry.connected);
    }
}

impl Drop for BrokerInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Registry of the storage servers a client can use.
///
/// Servers come from static configuration and from introducer announcements.
/// The first sighting of a server id is authoritative: later announcements
/// for the same id never replace its descriptor, permutation seed or
/// connection. Each new server gets its own connection task; the number of
/// connected servers drives [`when_connected_enough`] waiters.
///
/// Cloning is cheap and every clone refers to the same registry.
///
/// [`when_connected_enough`]: StorageFarmBroker::when_connected_enough
#[derive(Clone)]
pub struct StorageFarmBroker {
    inner: Arc<BrokerInner>,
}

impl StorageFarmBroker {
    /// Create a broker. Must be called inside a tokio runtime.
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        let runtime = Handle::current();
        let connected_observer = ThresholdObserver::new_in(&runtime);

        Self {
            inner: Arc::new(BrokerInner {
                runtime,
                manager: Arc::new(ConnectionManager::new(connector, policy)),
                registry: RwLock::new(Registry::default()),
                connected_observer,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register preconfigured servers and start connecting to them.
    ///
    /// Ids already known are left untouched, so calling this again only adds.
    pub fn set_static_servers<I>(&self, servers: I)
    where
        I: IntoIterator<Item = (ServerId, StaticServer)>,
    {
        let mut added = Vec::new();
        {
            let mut registry = self.inner.registry.write();
            for (server_id, server) in servers {
                registry.static_server_ids.insert(server_id.clone());
                if registry.servers.contains_key(&server_id) {
                    debug!("Static server {} is already known", server_id);
                    continue;
                }
                let descriptor = Arc::new(ServerDescriptor::new_static(&server_id, server.ann));
                registry.insert(Arc::clone(&descriptor));
                added.push(descriptor);
            }
        }

        info!("Loaded {} static server(s)", added.len());
        for descriptor in added {
            self.start_connecting(descriptor);
        }
    }

    /// Subscribe to storage announcements from the introducer
    pub fn use_introducer(&self, introducer: &dyn IntroducerClient) {
        let broker = Arc::downgrade(&self.inner);
        let handler: AnnouncementHandler = Arc::new(move |server_id, announcement| {
            if let Some(inner) = Weak::upgrade(&broker) {
                StorageFarmBroker { inner }.got_announcement(&server_id, announcement);
            }
        });
        introducer.subscribe_to(STORAGE_SERVICE_NAME, handler);
    }

    /// Handle one announcement from discovery.
    ///
    /// Non-storage announcements are dropped. An unknown id gets a new
    /// descriptor and a connection attempt; a known id keeps everything it
    /// has, only its last-seen bookkeeping moves.
    pub fn got_announcement(&self, server_id: &str, announcement: Announcement) {
        if !announcement.is_storage() {
            debug!(
                "Ignoring announcement from {} for service {:?}",
                server_id, announcement.service_name
            );
            return;
        }

        let descriptor = {
            let mut registry = self.inner.registry.write();
            if let Some(existing) = registry.servers.get(server_id) {
                existing.note_duplicate_announcement();
                if existing.announcement != announcement {
                    info!(
                        "Ignoring changed announcement for known server {}",
                        existing.get_name()
                    );
                } else {
                    debug!("Repeated announcement for server {}", existing.get_name());
                }
                return;
            }

            let descriptor = Arc::new(ServerDescriptor::new(server_id, announcement));
            registry.insert(Arc::clone(&descriptor));
            descriptor
        };

        info!(
            "New server {} [{}] announced",
            descriptor.get_name(),
            descriptor.get_nickname()
        );
        self.start_connecting(descriptor);
    }

    /// Completes once at least `threshold` servers are connected.
    ///
    /// Never completes synchronously, even when the threshold is already met.
    pub fn when_connected_enough(&self, threshold: usize) -> ThresholdWaiter {
        self.inner.connected_observer.register(threshold)
    }

    /// All known servers, in registration order
    pub fn servers(&self) -> Vec<Arc<ServerDescriptor>> {
        self.inner.registry.read().in_order().cloned().collect()
    }

    pub fn get_server(&self, server_id: &str) -> Option<Arc<ServerDescriptor>> {
        self.inner.registry.read().servers.get(server_id).cloned()
    }

    pub fn get_all_serverids(&self) -> Vec<ServerId> {
        self.inner.registry.read().order.clone()
    }

    pub fn get_connected_servers(&self) -> Vec<Arc<ServerDescriptor>> {
        self.inner
            .registry
            .read()
            .in_order()
            .filter(|s| s.is_connected())
            .cloned()
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.inner.registry.read().connected
    }

    pub fn static_server_ids(&self) -> BTreeSet<ServerId> {
        self.inner.registry.read().static_server_ids.clone()
    }

    pub fn is_static(&self, server_id: &str) -> bool {
        self.inner
            .registry
            .read()
            .static_server_ids
            .contains(server_id)
    }

    /// Abort every connection task and release the connections.
    ///
    /// Afterwards no server counts as connected and nothing new is
    /// connected to; registered servers stay queryable.
    pub fn stop(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        info!("Stopping {} connection task(s)", tasks.len());
        for task in tasks {
            task.abort();
        }

        let mut registry = self.inner.registry.write();
        registry.stopped = true;
        for descriptor in registry.servers.values() {
            descriptor.set_stopped();
        }
        registry.connected = 0;
        self.inner.connected_observer.notify(0);
    }

    fn start_connecting(&self, descriptor: Arc<ServerDescriptor>) {
        if self.inner.registry.read().stopped {
            debug!("Broker stopped, not connecting to {}", descriptor.get_name());
            return;
        }

        let Some(endpoint) = descriptor.storage_furl().map(String::from) else {
            let err = BrokerError::MissingEndpoint(descriptor.get_serverid().to_string());
            warn!("{}", err);
            descriptor.set_failed(&err.to_string());
            return;
        };

        descriptor.set_connecting();
        let manager = Arc::clone(&self.inner.manager);
        let broker = Arc::downgrade(&self.inner);

        let task = self.inner.runtime.spawn(async move {
            loop {
                let connection = match manager
                    .establish(descriptor.get_serverid(), &endpoint)
                    .await
                {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!("Giving up on server {}: {}", descriptor.get_name(), e);
                        descriptor.set_failed(&e.to_string());
                        return;
                    }
                };

                let taken = match broker.upgrade() {
                    Some(inner) => inner.connection_established(&descriptor, Arc::clone(&connection)),
                    None => false,
                };
                if !taken {
                    return;
                }

                connection.closed().await;

                match broker.upgrade() {
                    Some(inner) => inner.connection_lost(&descriptor),
                    None => return,
                }

                if !manager.policy().reconnect_on_loss {
                    return;
                }
                descriptor.set_connecting();
            }
        });

        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}

impl std::fmt::Debug for StorageFarmBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.read();
        f.debug_struct("StorageFarmBroker")
            .field("servers", &registry.order.len())
            .field("static", &registry.static_server_ids.len())
            .field("connected", &registry.connected)
            .finish()
    }
}

/// Count of descriptors in each connection state
pub fn state_counts(servers: &[Arc<ServerDescriptor>]) -> HashMap<ConnectionState, usize> {
    let mut counts = HashMap::new();
    for server in servers {
        *counts.entry(server.connection_state()).or_insert(0) += 1;
    }
    counts
}

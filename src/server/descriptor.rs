use super::announcement::{Announcement, ServerId, VersionMap};
use super::base32;
use super::version::{self, STORAGE_PROTOCOL_V1};
use crate::connection::ServerConnection;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

const SERVER_ID_PREFIX: &str = "v0-";
const SHORT_NAME_LEN: usize = 8;

/// Where a descriptor gets its capability map from
pub trait CapabilitySource: Send + Sync + fmt::Debug {
    fn version(&self) -> Option<VersionMap>;
}

/// Capabilities fixed by the announcement, used for statically configured servers
#[derive(Debug, Clone)]
pub struct AnnouncedCapabilities {
    version: Option<VersionMap>,
}

impl AnnouncedCapabilities {
    pub fn new(version: Option<VersionMap>) -> Self {
        Self { version }
    }
}

impl CapabilitySource for AnnouncedCapabilities {
    fn version(&self) -> Option<VersionMap> {
        self.version.clone()
    }
}

/// Capabilities reported by the live connection.
///
/// Empty until the broker records a connection; kept after the connection is
/// lost so capacity stays known while reconnecting.
#[derive(Debug, Default)]
pub struct LiveCapabilities {
    version: RwLock<Option<VersionMap>>,
}

impl LiveCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn update(&self, version: Option<VersionMap>) {
        *self.version.write() = version;
    }
}

impl CapabilitySource for LiveCapabilities {
    fn version(&self) -> Option<VersionMap> {
        self.version.read().clone()
    }
}

/// Connection lifecycle of a single server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.pad(name)
    }
}

/// Snapshot of a descriptor's mutable bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// When the first announcement for this server was received
    pub announcement_time: DateTime<Utc>,
    /// When any announcement for this server was last received
    pub last_announcement_seen: DateTime<Utc>,
    /// Announcements received after the first one
    pub duplicate_announcements: u64,
    pub last_connect_time: Option<DateTime<Utc>>,
    pub last_loss_time: Option<DateTime<Utc>>,
    pub remote_address: Option<String>,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            state: ConnectionState::Unconnected,
            announcement_time: now,
            last_announcement_seen: now,
            duplicate_announcements: 0,
            last_connect_time: None,
            last_loss_time: None,
            remote_address: None,
            last_error: None,
        }
    }
}

struct LiveState {
    status: ConnectionStatus,
    connection: Option<Arc<dyn ServerConnection>>,
}

/// One storage server known to the broker.
///
/// Identity, announcement, permutation seed and nickname are fixed when the
/// descriptor is built. Only the connection bookkeeping changes afterwards,
/// and only the broker changes it.
pub struct ServerDescriptor {
    server_id: ServerId,
    /// The first announcement seen for this server
    pub announcement: Announcement,
    permutation_seed: Vec<u8>,
    nickname: String,
    capabilities: Arc<dyn CapabilitySource>,
    live: Option<Arc<LiveCapabilities>>,
    state: RwLock<LiveState>,
}

impl ServerDescriptor {
    /// Descriptor for a server discovered through announcements
    pub fn new(server_id: &str, announcement: Announcement) -> Self {
        let live = Arc::new(LiveCapabilities::new());
        let capabilities: Arc<dyn CapabilitySource> = live.clone();
        Self::build(server_id, announcement, capabilities, Some(live))
    }

    /// Descriptor for a server from static configuration; capabilities come
    /// from the configured announcement and are never refreshed
    pub fn new_static(server_id: &str, announcement: Announcement) -> Self {
        let capabilities = Arc::new(AnnouncedCapabilities::new(announcement.version.clone()));
        Self::build(server_id, announcement, capabilities, None)
    }

    /// Descriptor with an explicit capability source
    pub fn with_capabilities(
        server_id: &str,
        announcement: Announcement,
        capabilities: Arc<dyn CapabilitySource>,
    ) -> Self {
        Self::build(server_id, announcement, capabilities, None)
    }

    fn build(
        server_id: &str,
        announcement: Announcement,
        capabilities: Arc<dyn CapabilitySource>,
        live: Option<Arc<LiveCapabilities>>,
    ) -> Self {
        let permutation_seed = derive_permutation_seed(server_id, &announcement);
        let nickname = announcement.nickname.clone().unwrap_or_default();

        Self {
            server_id: server_id.to_string(),
            announcement,
            permutation_seed,
            nickname,
            capabilities,
            live,
            state: RwLock::new(LiveState {
                status: ConnectionStatus::new(),
                connection: None,
            }),
        }
    }

    pub fn get_serverid(&self) -> &str {
        &self.server_id
    }

    pub fn get_longname(&self) -> &str {
        &self.server_id
    }

    /// Short display name: the id without its version prefix, truncated
    pub fn get_name(&self) -> String {
        let id = self
            .server_id
            .strip_prefix(SERVER_ID_PREFIX)
            .unwrap_or(&self.server_id);
        id.chars().take(SHORT_NAME_LEN).collect()
    }

    pub fn get_permutation_seed(&self) -> &[u8] {
        &self.permutation_seed
    }

    /// Operator-chosen label, empty when the announcement has none
    pub fn get_nickname(&self) -> &str {
        &self.nickname
    }

    pub fn get_version(&self) -> Option<VersionMap> {
        self.capabilities.version()
    }

    /// Capacity from the current capability map; `None` means unknown
    pub fn get_available_space(&self) -> Option<u64> {
        let version = self.get_version()?;
        version::available_space(&version, STORAGE_PROTOCOL_V1)
    }

    pub fn storage_furl(&self) -> Option<&str> {
        self.announcement.storage_furl.as_deref()
    }

    pub fn get_connection_status(&self) -> ConnectionStatus {
        self.state.read().status.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().status.state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// The live connection handle, if connected
    pub fn connection(&self) -> Option<Arc<dyn ServerConnection>> {
        self.state.read().connection.clone()
    }

    pub(crate) fn note_duplicate_announcement(&self) {
        let mut state = self.state.write();
        state.status.last_announcement_seen = Utc::now();
        state.status.duplicate_announcements += 1;
    }

    pub(crate) fn set_connecting(&self) {
        self.state.write().status.state = ConnectionState::Connecting;
    }

    /// Record a new connection. Returns false if already connected.
    pub(crate) fn set_connected(&self, connection: Arc<dyn ServerConnection>) -> bool {
        let mut state = self.state.write();
        if state.status.state == ConnectionState::Connected {
            return false;
        }

        if let Some(live) = &self.live {
            live.update(
                connection
                    .version()
                    .or_else(|| self.announcement.version.clone()),
            );
        }
        state.status.state = ConnectionState::Connected;
        state.status.last_connect_time = Some(Utc::now());
        state.status.remote_address = connection.remote_address();
        state.status.last_error = None;
        state.connection = Some(connection);
        true
    }

    /// Record a lost connection. Returns true if the server was connected.
    pub(crate) fn set_lost(&self) -> bool {
        let mut state = self.state.write();
        let was_connected = state.status.state == ConnectionState::Connected;
        state.status.state = ConnectionState::Unconnected;
        state.status.last_loss_time = Some(Utc::now());
        state.connection = None;
        was_connected
    }

    /// Forget the connection after the broker stopped watching it.
    /// Returns true if the server was connected.
    pub(crate) fn set_stopped(&self) -> bool {
        let mut state = self.state.write();
        let was_connected = state.status.state == ConnectionState::Connected;
        if matches!(
            state.status.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            state.status.state = ConnectionState::Unconnected;
        }
        if state.connection.take().is_some() {
            state.status.last_loss_time = Some(Utc::now());
        }
        was_connected
    }

    pub(crate) fn set_failed(&self, reason: &str) {
        let mut state = self.state.write();
        state.status.state = ConnectionState::Failed;
        state.status.last_error = Some(reason.to_string());
        state.connection = None;
    }
}

impl fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("server_id", &self.server_id)
            .field("nickname", &self.nickname)
            .field("state", &self.connection_state())
            .finish()
    }
}

/// Decode the announced seed, falling back to a hash of the server id
fn derive_permutation_seed(server_id: &str, announcement: &Announcement) -> Vec<u8> {
    if let Some(seed) = &announcement.permutation_seed_base32 {
        match base32::a2b(seed) {
            Ok(bytes) => return bytes,
            Err(e) => warn!(
                "Server {} announced an unusable permutation seed, hashing its id instead: {}",
                server_id, e
            ),
        }
    }

    Sha256::digest(server_id.as_bytes()).to_vec()
}

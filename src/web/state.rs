//! Shared state for the status API

use crate::broker::StorageFarmBroker;
use crate::introducer::LocalIntroducer;
use crate::server::{base32, ConnectionStatus, ServerDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the status API reports about one server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSummary {
    pub server_id: String,
    /// Short display name
    pub name: String,
    pub nickname: String,
    /// Permutation seed, base32
    pub permutation_seed: String,
    /// None when the server has not reported its capacity
    pub available_space: Option<u64>,
    /// Whether the server came from static configuration
    pub is_static: bool,
    pub status: ConnectionStatus,
}

impl ServerSummary {
    pub fn new(server: &ServerDescriptor, is_static: bool) -> Self {
        Self {
            server_id: server.get_serverid().to_string(),
            name: server.get_name(),
            nickname: server.get_nickname().to_string(),
            permutation_seed: base32::b2a(server.get_permutation_seed()),
            available_space: server.get_available_space(),
            is_static,
            status: server.get_connection_status(),
        }
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub grid_name: String,
    pub broker: StorageFarmBroker,
    /// Announcements posted to the API are published here
    pub introducer: Arc<LocalIntroducer>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(grid_name: &str, broker: StorageFarmBroker, introducer: Arc<LocalIntroducer>) -> Self {
        Self {
            grid_name: grid_name.to_string(),
            broker,
            introducer,
            started_at: Utc::now(),
        }
    }

    /// Summaries of every known server, in registration order
    pub fn server_summaries(&self) -> Vec<ServerSummary> {
        let static_ids = self.broker.static_server_ids();
        self.broker
            .servers()
            .iter()
            .map(|s| ServerSummary::new(s, static_ids.contains(s.get_serverid())))
            .collect()
    }

    pub fn server_summary(&self, server_id: &str) -> Option<ServerSummary> {
        let server = self.broker.get_server(server_id)?;
        Some(ServerSummary::new(&server, self.broker.is_static(server_id)))
    }
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::state::{AppState, ServerSummary};
use crate::server::{Announcement, ConnectionState};

#[derive(Debug, Deserialize)]
pub struct ListServersQuery {
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub grid: String,
    pub servers: usize,
    pub connected: usize,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct ServerListResponse {
    pub servers: Vec<ServerSummary>,
    pub total: usize,
    pub connected: usize,
    pub connecting: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
pub struct AnnounceRequest {
    pub server_id: String,
    pub announcement: Announcement,
}

#[derive(Debug, Serialize)]
pub struct AnnounceResponse {
    pub server_id: String,
    /// Whether the broker knows the server after the announcement
    pub known: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        grid: state.grid_name.clone(),
        servers: state.broker.get_all_serverids().len(),
        connected: state.broker.connected_count(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

pub async fn api_list_servers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListServersQuery>,
) -> Json<ServerListResponse> {
    let mut servers = state.server_summaries();

    let count = |servers: &[ServerSummary], wanted: ConnectionState| {
        servers.iter().filter(|s| s.status.state == wanted).count()
    };
    let total = servers.len();
    let connected = count(&servers, ConnectionState::Connected);
    let connecting = count(&servers, ConnectionState::Connecting);
    let failed = count(&servers, ConnectionState::Failed);

    if let Some(filter) = query.state {
        let filter_state = match filter.as_str() {
            "connected" => Some(ConnectionState::Connected),
            "connecting" => Some(ConnectionState::Connecting),
            "unconnected" => Some(ConnectionState::Unconnected),
            "failed" => Some(ConnectionState::Failed),
            _ => None,
        };

        if let Some(wanted) = filter_state {
            servers.retain(|s| s.status.state == wanted);
        }
    }

    Json(ServerListResponse {
        servers,
        total,
        connected,
        connecting,
        failed,
    })
}

pub async fn api_get_server(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<Json<ServerSummary>, StatusCode> {
    state
        .server_summary(&server_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Publish an announcement through the local introducer
pub async fn api_announce(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnnounceRequest>,
) -> (StatusCode, Json<AnnounceResponse>) {
    state
        .introducer
        .publish(&request.server_id, request.announcement);

    let known = state.broker.get_server(&request.server_id).is_some();
    (
        StatusCode::ACCEPTED,
        Json(AnnounceResponse {
            server_id: request.server_id,
            known,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::StorageFarmBroker;
    use crate::connection::{Connector, RetryPolicy, ServerConnection};
    use crate::error::Result;
    use crate::introducer::LocalIntroducer;
    use crate::server::StaticServer;
    use async_trait::async_trait;

    struct PendingConnector;

    #[async_trait]
    impl Connector for PendingConnector {
        async fn connect(&self, _endpoint: &str) -> Result<Arc<dyn ServerConnection>> {
            futures::future::pending().await
        }
    }

    fn app_state() -> Arc<AppState> {
        let broker = StorageFarmBroker::new(Arc::new(PendingConnector), RetryPolicy::once());
        let introducer = Arc::new(LocalIntroducer::new());
        broker.use_introducer(introducer.as_ref());
        Arc::new(AppState::new("test-grid", broker, introducer))
    }

    #[tokio::test]
    async fn test_announce_then_list() {
        let state = app_state();
        state.broker.set_static_servers([(
            "v0-static".to_string(),
            StaticServer {
                ann: Announcement::storage("pb://a@tcp:127.0.0.1:1/n"),
            },
        )]);

        let (status, Json(response)) = api_announce(
            State(state.clone()),
            Json(AnnounceRequest {
                server_id: "v0-dynamic".to_string(),
                announcement: Announcement::storage("pb://b@tcp:127.0.0.1:2/n")
                    .with_nickname("beta"),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(response.known);

        let Json(list) = api_list_servers(
            State(state.clone()),
            Query(ListServersQuery { state: None }),
        )
        .await;
        assert_eq!(list.total, 2);
        assert_eq!(list.connecting, 2);
        assert!(list.servers[0].is_static);
        assert_eq!(list.servers[1].nickname, "beta");
        assert_eq!(list.servers[1].available_space, None);

        let Json(connected) = api_list_servers(
            State(state.clone()),
            Query(ListServersQuery {
                state: Some("connected".to_string()),
            }),
        )
        .await;
        assert!(connected.servers.is_empty());
        assert_eq!(connected.total, 2);
    }

    #[tokio::test]
    async fn test_non_storage_announcement_is_not_known() {
        let state = app_state();
        let mut announcement = Announcement::storage("pb://b@tcp:127.0.0.1:2/n");
        announcement.service_name = Some("stats-gatherer".to_string());

        let (_, Json(response)) = api_announce(
            State(state.clone()),
            Json(AnnounceRequest {
                server_id: "v0-x".to_string(),
                announcement,
            }),
        )
        .await;
        assert!(!response.known);
    }

    #[tokio::test]
    async fn test_get_server() {
        let state = app_state();
        state.introducer.publish(
            "v0-abcdefghijk",
            Announcement::storage("pb://b@tcp:127.0.0.1:2/n")
                .with_permutation_seed("aaaaaaaaaaaaaaaaaaaaaaaa"),
        );

        let Json(summary) = api_get_server(State(state.clone()), Path("v0-abcdefghijk".to_string()))
            .await
            .unwrap();
        assert_eq!(summary.name, "abcdefgh");
        assert_eq!(summary.permutation_seed, "aaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(!summary.is_static);

        let missing = api_get_server(State(state.clone()), Path("v0-nope".to_string())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);

        let Json(report) = health(State(state)).await;
        assert_eq!(report.servers, 1);
        assert_eq!(report.connected, 0);
    }
}

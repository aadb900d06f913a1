//! End-to-end broker behaviour through its public interfaces
//!
//! A recording introducer captures the subscription callback and a manual
//! connector lets each test decide when a connection attempt succeeds, fails
//! or is later lost.

use async_trait::async_trait;
use grid_broker::server::{base32, ConnectionState};
use grid_broker::{
    AnnouncementHandler, Announcement, BrokerError, Connector, IntroducerClient, RetryPolicy,
    ServerConnection, StaticServer, StorageFarmBroker,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::timeout;

type ConnectResult = Result<Arc<dyn ServerConnection>, BrokerError>;

/// Records `subscribe_to` calls
#[derive(Default)]
struct RecordingIntroducer {
    subscriptions: Mutex<Vec<(String, AnnouncementHandler)>>,
}

impl IntroducerClient for RecordingIntroducer {
    fn subscribe_to(&self, service_name: &str, handler: AnnouncementHandler) {
        self.subscriptions
            .lock()
            .push((service_name.to_string(), handler));
    }
}

#[derive(Debug, Default)]
struct FakeConnection {
    lost: Notify,
}

#[async_trait]
impl ServerConnection for FakeConnection {
    fn remote_address(&self) -> Option<String> {
        Some("10.0.0.1:3457".to_string())
    }

    async fn closed(&self) {
        self.lost.notified().await
    }
}

/// Each connect waits until the test resolves it by endpoint
#[derive(Default)]
struct ManualConnector {
    pending: Mutex<HashMap<String, oneshot::Sender<ConnectResult>>>,
}

impl ManualConnector {
    async fn wait_for(&self, endpoint: &str) {
        timeout(Duration::from_secs(5), async {
            while !self.pending.lock().contains_key(endpoint) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connection attempt never started");
    }

    async fn resolve(&self, endpoint: &str, result: ConnectResult) {
        self.wait_for(endpoint).await;
        let tx = self.pending.lock().remove(endpoint).unwrap();
        let _ = tx.send(result);
    }
}

#[async_trait]
impl Connector for ManualConnector {
    async fn connect(&self, endpoint: &str) -> ConnectResult {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(endpoint.to_string(), tx);
        match rx.await {
            Ok(result) => result,
            Err(_) => futures::future::pending().await,
        }
    }
}

fn furl_for(x: &str) -> String {
    format!("pb://{}@nowhere/fake", base32::b2a(x.as_bytes()))
}

fn announcement(x: &str) -> Announcement {
    Announcement::storage(&furl_for(x)).with_permutation_seed("aaaaaaaaaaaaaaaaaaaaaaaa")
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn test_threshold_reached() {
    let connector = Arc::new(ManualConnector::default());
    let broker = StorageFarmBroker::new(connector.clone(), RetryPolicy::once());
    let mut done = broker.when_connected_enough(5);

    let introducer = RecordingIntroducer::default();
    broker.use_introducer(&introducer);

    // subscribes to "storage" to learn of new storage nodes
    let got_announcement = {
        let subscriptions = introducer.subscriptions.lock();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].0, "storage");
        Arc::clone(&subscriptions[0].1)
    };

    let mut connected = 0;
    for x in ["0", "1", "2", "3", "42"] {
        got_announcement(format!("v0-1234-{}", x), announcement(x));
        connector
            .resolve(&furl_for(x), Ok(Arc::new(FakeConnection::default())))
            .await;
        connected += 1;
        wait_until(|| broker.connected_count() == connected).await;

        if connected < 5 {
            // the first 4 must not trigger the threshold
            assert!(!done.is_fired());
        }
    }

    // ...but the 5th does, through the scheduler rather than inline
    let count = timeout(Duration::from_secs(5), done)
        .await
        .expect("threshold never fired");
    assert_eq!(count, 5);
    assert_eq!(broker.get_connected_servers().len(), 5);
}

#[tokio::test]
async fn test_static_servers_are_not_overridden() {
    let connector = Arc::new(ManualConnector::default());
    let broker = StorageFarmBroker::new(connector.clone(), RetryPolicy::once());
    let introducer = RecordingIntroducer::default();
    broker.use_introducer(&introducer);
    let got_announcement = Arc::clone(&introducer.subscriptions.lock()[0].1);

    let key_s = "v0-1234-1".to_string();
    broker.set_static_servers([(
        key_s.clone(),
        StaticServer {
            ann: announcement("1"),
        },
    )]);
    let s = broker.get_server(&key_s).unwrap();

    let mut ann2 = Announcement::storage("pb://gaaa@nowhere/fake2")
        .with_permutation_seed("bbbbbbbbbbbbbbbbbbbbbbbb");
    ann2.nickname = Some("impostor".to_string());
    got_announcement(key_s.clone(), ann2);

    let s2 = broker.get_server(&key_s).unwrap();
    assert!(Arc::ptr_eq(&s, &s2));
    assert_eq!(
        s2.get_permutation_seed(),
        base32::a2b("aaaaaaaaaaaaaaaaaaaaaaaa").unwrap().as_slice()
    );
    assert_eq!(s2.get_nickname(), "");
    assert_eq!(s2.storage_furl(), Some(furl_for("1").as_str()));
    assert!(broker.is_static(&key_s));

    // the original endpoint is still the one being connected to
    connector
        .resolve(&furl_for("1"), Ok(Arc::new(FakeConnection::default())))
        .await;
    wait_until(|| s.is_connected()).await;
    assert!(connector.pending.lock().is_empty());
}

#[tokio::test]
async fn test_failure_and_loss() {
    let connector = Arc::new(ManualConnector::default());
    let broker = StorageFarmBroker::new(connector.clone(), RetryPolicy::once());

    broker.got_announcement("v0-bad", announcement("bad"));
    broker.got_announcement("v0-good", announcement("good"));

    connector
        .resolve(
            &furl_for("bad"),
            Err(BrokerError::ConnectTimeout(furl_for("bad"))),
        )
        .await;
    let bad = broker.get_server("v0-bad").unwrap();
    wait_until(|| bad.connection_state() == ConnectionState::Failed).await;
    assert_eq!(broker.connected_count(), 0);

    let connection = Arc::new(FakeConnection::default());
    connector
        .resolve(&furl_for("good"), Ok(connection.clone()))
        .await;
    wait_until(|| broker.connected_count() == 1).await;

    let good = broker.get_server("v0-good").unwrap();
    assert_eq!(
        good.get_connection_status().remote_address.as_deref(),
        Some("10.0.0.1:3457")
    );

    connection.lost.notify_one();
    wait_until(|| broker.connected_count() == 0).await;
    assert_eq!(good.connection_state(), ConnectionState::Unconnected);
    assert!(good.connection().is_none());
}

#[tokio::test]
async fn test_reconnects_after_loss() {
    let connector = Arc::new(ManualConnector::default());
    let policy = RetryPolicy {
        reconnect_on_loss: true,
        ..RetryPolicy::once()
    };
    let broker = StorageFarmBroker::new(connector.clone(), policy);
    broker.got_announcement("v0-a", announcement("a"));

    let first = Arc::new(FakeConnection::default());
    connector.resolve(&furl_for("a"), Ok(first.clone())).await;
    wait_until(|| broker.connected_count() == 1).await;

    first.lost.notify_one();
    connector
        .resolve(&furl_for("a"), Ok(Arc::new(FakeConnection::default())))
        .await;
    wait_until(|| broker.connected_count() == 1).await;

    let server = broker.get_server("v0-a").unwrap();
    assert!(server.is_connected());
    assert!(server.get_connection_status().last_loss_time.is_some());
}

#[tokio::test]
async fn test_live_capabilities_after_connect() {
    #[derive(Debug)]
    struct VersionedConnection;

    #[async_trait]
    impl ServerConnection for VersionedConnection {
        fn remote_address(&self) -> Option<String> {
            None
        }

        fn version(&self) -> Option<grid_broker::server::VersionMap> {
            let value = serde_json::json!({
                "http://allmydata.org/tahoe/protocols/storage/v1": {
                    "maximum-immutable-share-size": 111,
                    "available-space": 222,
                }
            });
            value.as_object().cloned()
        }

        async fn closed(&self) {
            futures::future::pending::<()>().await
        }
    }

    let connector = Arc::new(ManualConnector::default());
    let broker = StorageFarmBroker::new(connector.clone(), RetryPolicy::once());
    broker.got_announcement("v0-a", announcement("a"));

    let server = broker.get_server("v0-a").unwrap();
    assert_eq!(server.get_available_space(), None);

    connector
        .resolve(&furl_for("a"), Ok(Arc::new(VersionedConnection)))
        .await;
    wait_until(|| server.is_connected()).await;
    assert_eq!(server.get_available_space(), Some(222));
}

use super::{Connector, Furl, ServerConnection};
use crate::error::{BrokerError, Result};
use async_trait::async_trait;
use futures::future::select_ok;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Connects to the TCP location hints of a storage FURL.
///
/// All hints are tried at once and the first to accept wins. The connection
/// only proves reachability; nothing is sent over it.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ServerConnection>> {
        let furl: Furl = endpoint.parse()?;
        let addresses = furl.tcp_addresses();
        if addresses.is_empty() {
            return Err(BrokerError::InvalidFurl {
                furl: endpoint.to_string(),
                reason: "no usable TCP location hints".to_string(),
            });
        }

        debug!("Trying {} location hint(s) for {}", addresses.len(), furl.tub_id);

        let attempts = addresses
            .into_iter()
            .map(|addr| Box::pin(async move { TcpStream::connect(addr).await }));

        let (stream, _) = timeout(self.connect_timeout, select_ok(attempts))
            .await
            .map_err(|_| BrokerError::ConnectTimeout(endpoint.to_string()))?
            .map_err(|source| BrokerError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(Arc::new(TcpServerConnection::new(stream)))
    }
}

/// An open TCP connection to a storage server
#[derive(Debug)]
pub struct TcpServerConnection {
    remote_address: Option<String>,
    stream: Mutex<TcpStream>,
}

impl TcpServerConnection {
    pub fn new(stream: TcpStream) -> Self {
        let remote_address = stream.peer_addr().ok().map(|a| a.to_string());
        Self {
            remote_address,
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl ServerConnection for TcpServerConnection {
    fn remote_address(&self) -> Option<String> {
        self.remote_address.clone()
    }

    async fn closed(&self) {
        let mut stream = self.stream.lock().await;
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    }
}

//! Connection establishment for storage servers
//!
//! The broker never talks the storage protocol itself. It asks a [`Connector`]
//! for a connection to an announced endpoint and treats the returned
//! [`ServerConnection`] as an opaque handle whose only observable events are
//! "established" and "lost".

mod furl;
mod manager;
mod tcp;

pub use furl::Furl;
pub use manager::{ConnectionManager, RetryPolicy};
pub use tcp::{TcpConnector, TcpServerConnection};

use crate::error::Result;
use crate::server::VersionMap;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Transport that turns an endpoint reference into a live connection
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ServerConnection>>;
}

/// A live connection to one storage server
#[async_trait]
pub trait ServerConnection: Send + Sync + fmt::Debug {
    /// Peer address for status display
    fn remote_address(&self) -> Option<String>;

    /// Capability map reported by the server during connection setup, if any
    fn version(&self) -> Option<VersionMap> {
        None
    }

    /// Resolves once the connection is gone
    async fn closed(&self);
}

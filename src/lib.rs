//! Storage server discovery and connection brokering for an erasure-coded grid.
//!
//! The [`StorageFarmBroker`] keeps a stable registry of storage servers
//! learned from static configuration and introducer announcements, connects
//! to each one, and tells waiters when enough of them are reachable.

pub mod broker;
pub mod cli;
pub mod connection;
pub mod error;
pub mod introducer;
pub mod server;
pub mod web;

pub use broker::{StorageFarmBroker, ThresholdObserver, ThresholdWaiter};
pub use connection::{ConnectionManager, Connector, RetryPolicy, ServerConnection, TcpConnector};
pub use error::BrokerError;
pub use introducer::{AnnouncementHandler, IntroducerClient, LocalIntroducer};
pub use server::{Announcement, ServerDescriptor, ServerId, StaticServer};

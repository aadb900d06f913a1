//! Status API for the broker
//!
//! Read-only views of the server registry, plus an endpoint that feeds
//! announcements into the in-process introducer.

mod handlers;
mod server;
mod state;

pub use server::{router, start_server};
pub use state::{AppState, ServerSummary};

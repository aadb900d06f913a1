//! The storage server broker and its readiness notification

mod farm;
mod observer;

pub use farm::{state_counts, StorageFarmBroker};
pub use observer::{ThresholdObserver, ThresholdWaiter};

//! Storage server descriptors and the announcement data they are built from

mod announcement;
pub mod base32;
mod descriptor;
pub mod version;

pub use announcement::{
    Announcement, ServerId, StaticServer, VersionMap, STORAGE_SERVICE_NAME,
};
pub use descriptor::{
    AnnouncedCapabilities, CapabilitySource, ConnectionState, ConnectionStatus,
    LiveCapabilities, ServerDescriptor,
};

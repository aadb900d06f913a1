use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Service name every storage announcement must carry
pub const STORAGE_SERVICE_NAME: &str = "storage";

/// Opaque server identity, stable for the life of a grid membership
pub type ServerId = String;

/// Capability/version map advertised by a server, keyed by protocol namespace
pub type VersionMap = serde_json::Map<String, serde_json::Value>;

/// A storage server announcement, from static configuration or the introducer.
///
/// Field names follow the announcement wire keys. Keys this type does not know
/// about are kept in `extra` so two announcements compare equal only when the
/// whole payload matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    /// Service category, must be "storage" for dynamic announcements
    #[serde(rename = "service-name", default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Endpoint the connection manager connects to
    #[serde(
        rename = "anonymous-storage-FURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_furl: Option<String>,

    /// Base32 permutation seed
    #[serde(
        rename = "permutation-seed-base32",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub permutation_seed_base32: Option<String>,

    /// Human-readable label chosen by the server operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,

    /// Application version string
    #[serde(rename = "my-version", default, skip_serializing_if = "Option::is_none")]
    pub my_version: Option<String>,

    /// Capability map, as announced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionMap>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Announcement {
    /// Create a storage announcement for the given endpoint
    pub fn storage(furl: &str) -> Self {
        Self {
            service_name: Some(STORAGE_SERVICE_NAME.to_string()),
            storage_furl: Some(furl.to_string()),
            ..Default::default()
        }
    }

    pub fn with_permutation_seed(mut self, seed_base32: &str) -> Self {
        self.permutation_seed_base32 = Some(seed_base32.to_string());
        self
    }

    pub fn with_nickname(mut self, nickname: &str) -> Self {
        self.nickname = Some(nickname.to_string());
        self
    }

    pub fn with_version(mut self, version: VersionMap) -> Self {
        self.version = Some(version);
        self
    }

    /// Whether this announcement is for the storage service
    pub fn is_storage(&self) -> bool {
        self.service_name.as_deref() == Some(STORAGE_SERVICE_NAME)
    }
}

/// One entry of a static server mapping: `{server_id: {"ann": Announcement}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticServer {
    pub ann: Announcement,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_keys() {
        let json = serde_json::json!({
            "service-name": "storage",
            "anonymous-storage-FURL": "pb://abc@nowhere/fake",
            "permutation-seed-base32": "aaaaaaaaaaaaaaaaaaaaaaaa",
            "oldest-supported": "1.0",
        });
        let ann: Announcement = serde_json::from_value(json).unwrap();

        assert!(ann.is_storage());
        assert_eq!(ann.storage_furl.as_deref(), Some("pb://abc@nowhere/fake"));
        assert_eq!(ann.nickname, None);
        assert_eq!(
            ann.extra.get("oldest-supported"),
            Some(&serde_json::Value::from("1.0"))
        );
    }

    #[test]
    fn test_missing_service_name_is_not_storage() {
        let ann = Announcement {
            storage_furl: Some("pb://abc@nowhere/fake".to_string()),
            ..Default::default()
        };
        assert!(!ann.is_storage());

        let mut other = Announcement::storage("pb://abc@nowhere/fake");
        other.service_name = Some("stats-gatherer".to_string());
        assert!(!other.is_storage());
    }
}

//! Capacity figures from a server's capability map.

use super::announcement::VersionMap;

/// Namespace key of the storage protocol in a capability map
pub const STORAGE_PROTOCOL_V1: &str = "http://allmydata.org/tahoe/protocols/storage/v1";

const AVAILABLE_SPACE: &str = "available-space";
const MAXIMUM_IMMUTABLE_SHARE_SIZE: &str = "maximum-immutable-share-size";

/// Usable capacity advertised under `namespace`.
///
/// Newer servers report `available-space`; older ones only report
/// `maximum-immutable-share-size`, which is used in its place. `None` means
/// the capacity is unknown, which is not the same as zero.
pub fn available_space(version: &VersionMap, namespace: &str) -> Option<u64> {
    let protocol = version.get(namespace)?.as_object()?;

    protocol
        .get(AVAILABLE_SPACE)
        .and_then(|v| v.as_u64())
        .or_else(|| {
            protocol
                .get(MAXIMUM_IMMUTABLE_SHARE_SIZE)
                .and_then(|v| v.as_u64())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn version_map(value: serde_json::Value) -> VersionMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_available_space_new() {
        let version = version_map(json!({
            STORAGE_PROTOCOL_V1: {
                "maximum-immutable-share-size": 111,
                "available-space": 222,
            }
        }));
        assert_eq!(available_space(&version, STORAGE_PROTOCOL_V1), Some(222));
    }

    #[test]
    fn test_available_space_old() {
        let version = version_map(json!({
            STORAGE_PROTOCOL_V1: {
                "maximum-immutable-share-size": 111,
            }
        }));
        assert_eq!(available_space(&version, STORAGE_PROTOCOL_V1), Some(111));
    }

    #[test]
    fn test_available_space_unknown() {
        let version = version_map(json!({
            STORAGE_PROTOCOL_V1: { "tolerates-immutable-read-overrun": true },
            "application-version": "1.11.0",
        }));
        assert_eq!(available_space(&version, STORAGE_PROTOCOL_V1), None);

        let empty = VersionMap::new();
        assert_eq!(available_space(&empty, STORAGE_PROTOCOL_V1), None);
    }

    #[test]
    fn test_available_space_zero_is_known() {
        let version = version_map(json!({
            STORAGE_PROTOCOL_V1: { "available-space": 0 }
        }));
        assert_eq!(available_space(&version, STORAGE_PROTOCOL_V1), Some(0));
    }
}

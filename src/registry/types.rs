//! Registry data model
//!
//! The persisted document is a single JSON object with one field,
//! `cameraInfoArray`, holding the ordered camera records. Field names are
//! camelCase and stable; external observers receive the same shape.

use serde::{Deserialize, Deserializer, Serialize};

/// Reachability measurement for one camera.
///
/// Serialized untagged: a measured value is a plain number (average RTT in
/// milliseconds), `Unreachable` is JSON `null`. An absent field on the
/// record means "never probed yet", which is distinct from unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reachability {
    /// Average round-trip time in milliseconds
    Ms(f64),
    /// Probed and did not respond
    Unreachable,
}

/// Field deserializer keeping present-`null` apart from absent.
///
/// A plain `Option<Reachability>` would fold JSON `null` into `None`
/// before the untagged enum is consulted, turning "probed and unreachable"
/// back into "never probed" on every file re-read. This only runs when the
/// field is present, so: absent -> `None` (via `default`), `null` ->
/// `Some(Unreachable)`, number -> `Some(Ms)`.
fn reachability_field<'de, D>(deserializer: D) -> Result<Option<Reachability>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(Some(match value {
        Some(ms) => Reachability::Ms(ms),
        None => Reachability::Unreachable,
    }))
}

/// Video resolution reported by the device's active profile
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Active media profile of a camera at last discovery time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSource {
    #[serde(default)]
    pub source_token: String,
    #[serde(default)]
    pub profile_token: String,
    /// Codec name (e.g., "H264")
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub bitrate: Option<f64>,
}

/// One registry entry per physical device, unique by `probe_address`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraRecord {
    /// Hostname reported by the device (not guaranteed unique or stable)
    pub hostname: String,
    pub active_source: ActiveSource,
    /// Stream locator resolved once at first discovery, never overwritten
    #[serde(default)]
    pub stream_address: Option<String>,
    /// Network address (host[:port]) of the device's first reported
    /// endpoint; the natural key of the registry
    pub probe_address: String,
    /// Latest reachability measurement; absent = never probed
    #[serde(
        default,
        deserialize_with = "reachability_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub reachability: Option<Reachability>,
}

/// Persisted registry document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(rename = "cameraInfoArray")]
    pub camera_info_array: Vec<CameraRecord>,
}

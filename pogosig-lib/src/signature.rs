//! Data carried by a signature: the location being signed, caller-supplied
//! fields, the device telemetry and the version-keyed `unknown25` constant.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{parse_i64_wrapping, parse_u64_wrapping};
use crate::error::SigError;

/// The position a signature is built for.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
        }
    }
}

/// One simulated GPS reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub provider: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub provider_status: u64,
    pub location_type: u64,
    pub floor: u64,
    /// Degrees, or -1 when not reported
    pub course: f64,
    /// m/s, or -1 when not reported
    pub speed: f64,
    pub vertical_accuracy: f64,
    pub horizontal_accuracy: f64,
    /// Milliseconds since session start
    pub timestamp_snapshot: i64,
}

/// One synthetic motion sensor sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub timestamp_snapshot: i64,
    pub linear_acceleration_x: f64,
    pub linear_acceleration_y: f64,
    pub linear_acceleration_z: f64,
    pub magnetic_field_x: f64,
    pub magnetic_field_y: f64,
    pub magnetic_field_z: f64,
    pub magnetic_field_accuracy: i32,
    pub attitude_pitch: f64,
    pub attitude_yaw: f64,
    pub attitude_roll: f64,
    pub rotation_rate_x: f64,
    pub rotation_rate_y: f64,
    pub rotation_rate_z: f64,
    pub gravity_x: f64,
    pub gravity_y: f64,
    pub gravity_z: f64,
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_brand: String,
    pub device_model: String,
    pub device_model_boot: String,
    pub hardware_manufacturer: String,
    pub hardware_model: String,
    pub firmware_brand: String,
    pub firmware_type: String,
}

impl DeviceInfo {
    /// An iPhone 6s on iOS 10.3.3
    pub fn iphone(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_brand: "Apple".to_string(),
            device_model: "iPhone".to_string(),
            device_model_boot: "iPhone8,1".to_string(),
            hardware_manufacturer: "Apple".to_string(),
            hardware_model: "N71AP".to_string(),
            firmware_brand: "iOS".to_string(),
            firmware_type: "10.3.3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityStatus {
    pub stationary: bool,
}

/// Fields merged into every signature.
///
/// Known fields have typed slots; anything else goes into `extra`. Merging is
/// last-write-wins per field. A set `timestamp` or `timestamp_since_start`
/// takes precedence over the value computed at build time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_since_start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_fix: Option<Vec<LocationFix>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_info: Option<Vec<SensorInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_status: Option<ActivityStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown27: Option<i32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SignatureFields {
    /// Shallow merge: every field set in `other` overwrites ours.
    pub fn merge(&mut self, other: SignatureFields) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            timestamp,
            timestamp_since_start,
            location_fix,
            sensor_info,
            device_info,
            activity_status,
            unknown27
        );
        self.extra.extend(other.extra);
    }
}

/// The signature record before serialization and encryption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub location_hash1: i64,
    pub location_hash2: i64,
    pub session_hash: Bytes,
    pub timestamp: u64,
    pub timestamp_since_start: u64,
    pub unknown25: i64,
    pub request_hash: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location_fix: Vec<LocationFix>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensor_info: Vec<SensorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_status: Option<ActivityStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown27: Option<i32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Signature {
    /// Moves entries of `extra` that name a typed field onto that field, so a
    /// caller-supplied value wins and no key is written twice.
    ///
    /// 64-bit values may be numbers or decimal strings; `session_hash` may be
    /// a byte array or base64 text.
    pub fn apply_field_overrides(&mut self) -> Result<(), SigError> {
        if let Some(v) = self.extra.remove("location_hash1") {
            self.location_hash1 = signed_field("location_hash1", &v)?;
        }
        if let Some(v) = self.extra.remove("location_hash2") {
            self.location_hash2 = signed_field("location_hash2", &v)?;
        }
        if let Some(v) = self.extra.remove("unknown25") {
            self.unknown25 = signed_field("unknown25", &v)?;
        }
        if let Some(v) = self.extra.remove("timestamp") {
            self.timestamp = unsigned_field("timestamp", &v)?;
        }
        if let Some(v) = self.extra.remove("timestamp_since_start") {
            self.timestamp_since_start = unsigned_field("timestamp_since_start", &v)?;
        }
        if let Some(v) = self.extra.remove("request_hash") {
            self.request_hash = match &v {
                Value::Array(items) => items
                    .iter()
                    .map(|item| unsigned_field("request_hash", item))
                    .collect::<Result<_, _>>()?,
                single => vec![unsigned_field("request_hash", single)?],
            };
        }
        if let Some(v) = self.extra.remove("session_hash") {
            self.session_hash = match &v {
                Value::String(text) => STANDARD
                    .decode(text)
                    .map(Bytes::from)
                    .map_err(|_| invalid_field("session_hash"))?,
                _ => typed_field::<Vec<u8>>("session_hash", v).map(Bytes::from)?,
            };
        }
        if let Some(v) = self.extra.remove("location_fix") {
            self.location_fix = typed_field("location_fix", v)?;
        }
        if let Some(v) = self.extra.remove("sensor_info") {
            self.sensor_info = typed_field("sensor_info", v)?;
        }
        if let Some(v) = self.extra.remove("device_info") {
            self.device_info = typed_field("device_info", v)?;
        }
        if let Some(v) = self.extra.remove("activity_status") {
            self.activity_status = typed_field("activity_status", v)?;
        }
        if let Some(v) = self.extra.remove("unknown27") {
            self.unknown27 = typed_field("unknown27", v)?;
        }
        Ok(())
    }
}

fn invalid_field(name: &str) -> SigError {
    SigError::Configuration(format!("Invalid value for signature field {name}"))
}

fn signed_field(name: &str, value: &Value) -> Result<i64, SigError> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_u64().map(|v| v as i64)),
        Value::String(text) => parse_i64_wrapping(text),
        _ => None,
    }
    .ok_or_else(|| invalid_field(name))
}

fn unsigned_field(name: &str, value: &Value) -> Result<u64, SigError> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_i64().map(|v| v as u64)),
        Value::String(text) => parse_u64_wrapping(text),
        _ => None,
    }
    .ok_or_else(|| invalid_field(name))
}

fn typed_field<T: DeserializeOwned>(name: &str, value: Value) -> Result<T, SigError> {
    serde_json::from_value(value).map_err(|_| invalid_field(name))
}

/// A caller-forced `unknown25` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstant {
    Value(i64),
    /// Signed decimal text, e.g. `"-960786418476827155"`
    Text(String),
}

impl VersionConstant {
    pub fn resolve(&self) -> Result<i64, SigError> {
        match self {
            VersionConstant::Value(v) => Ok(*v),
            VersionConstant::Text(text) => parse_i64_wrapping(text)
                .ok_or_else(|| SigError::Configuration(format!("Invalid unknown25 override \"{text}\""))),
        }
    }
}

impl From<i64> for VersionConstant {
    fn from(v: i64) -> Self {
        VersionConstant::Value(v)
    }
}

impl From<&str> for VersionConstant {
    fn from(text: &str) -> Self {
        VersionConstant::Text(text.to_string())
    }
}

/// Shared by every client release older than 0.63
pub const LEGACY_UNKNOWN25: i64 = -8408506833887075802;

/// `unknown25` per client version prefix.
pub const UNKNOWN25_TABLE: &[(&str, i64)] = &[
    ("0.45", LEGACY_UNKNOWN25),
    ("0.47", LEGACY_UNKNOWN25),
    ("0.49", LEGACY_UNKNOWN25),
    ("0.51", LEGACY_UNKNOWN25),
    ("0.53", LEGACY_UNKNOWN25),
    ("0.55", LEGACY_UNKNOWN25),
    ("0.57", LEGACY_UNKNOWN25),
    ("0.59", LEGACY_UNKNOWN25),
    ("0.61", LEGACY_UNKNOWN25),
    ("0.63", 5348175887752539474),
    ("0.69", 5395925083854747393),
    ("0.73", -960786418476827155),
    ("0.75", -960786418476827155),
    ("0.77", -6553495230586135539),
];

/// Lookup of `unknown25` by client version, with an optional catch-all for
/// versions missing from the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstantTable {
    entries: Vec<(String, i64)>,
    fallback: Option<i64>,
}

impl Default for VersionConstantTable {
    fn default() -> Self {
        Self {
            entries: UNKNOWN25_TABLE.iter().map(|(p, v)| (p.to_string(), *v)).collect(),
            fallback: None,
        }
    }
}

impl VersionConstantTable {
    pub fn with_fallback(mut self, fallback: Option<i64>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Adds or replaces the constant for a version prefix.
    pub fn insert(&mut self, prefix: impl Into<String>, value: i64) {
        let prefix = prefix.into();
        match self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((prefix, value)),
        }
    }

    /// Resolves `unknown25` for `version`. An override always wins.
    pub fn resolve(&self, version: &str, forced: Option<&VersionConstant>) -> Result<i64, SigError> {
        if let Some(forced) = forced {
            return forced.resolve();
        }
        self.entries
            .iter()
            .find(|(prefix, _)| version.starts_with(prefix.as_str()))
            .map(|(_, value)| *value)
            .or(self.fallback)
            .ok_or_else(|| SigError::Configuration(format!("Unsupported encryption for version {version}")))
    }
}

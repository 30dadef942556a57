//! Mapping from a compact client version (e.g. `5704`) to the version string
//! a hash service deployment understands, and from there to the hashing
//! protocol version listed in the service catalog.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::constants::VERSION_CATALOG_PATH;
use crate::error::SigError;

/// How a deployment spells client versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionDialect {
    /// `5704` -> `1.27.4`
    #[default]
    Ios,
    /// `5704` -> `0.57.4`
    Client,
}

impl VersionDialect {
    pub fn version_string(self, app_version: u32) -> String {
        match self {
            VersionDialect::Ios => format!("1.{}.{}", app_version.saturating_sub(3000) / 100, app_version % 100),
            VersionDialect::Client => format!("0.{}.{}", app_version / 100, app_version % 100),
        }
    }
}

impl fmt::Display for VersionDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionDialect::Ios => write!(f, "ios"),
            VersionDialect::Client => write!(f, "client"),
        }
    }
}

impl FromStr for VersionDialect {
    type Err = SigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(VersionDialect::Ios),
            "client" => Ok(VersionDialect::Client),
            other => Err(SigError::Configuration(format!("Unknown version dialect \"{other}\""))),
        }
    }
}

/// iOS-style version string for `app_version`.
pub fn to_ios_version(app_version: u32) -> String {
    VersionDialect::Ios.version_string(app_version)
}

/// URL of the version catalog below `base_url`.
pub fn catalog_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), VERSION_CATALOG_PATH)
}

/// Full hashing endpoint for a catalog entry. Absolute entries are used as-is.
pub fn hashing_endpoint(base_url: &str, catalog_entry: &str) -> String {
    if catalog_entry.starts_with("http://") || catalog_entry.starts_with("https://") {
        catalog_entry.to_string()
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), catalog_entry.trim_start_matches('/'))
    }
}

/// Looks up `version_string` in a raw catalog body.
pub fn lookup_catalog(body: &str, app_version: u32, version_string: &str) -> Result<String, SigError> {
    let catalog: Option<BTreeMap<String, String>> = serde_json::from_str(body)?;
    let catalog = match catalog {
        Some(catalog) if !catalog.is_empty() => catalog,
        _ => {
            return Err(SigError::Configuration(
                "Invalid initial response from hashing server".to_string(),
            ));
        }
    };
    debug!(entries = catalog.len(), "Hash service version catalog");

    catalog
        .get(version_string)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| {
            SigError::Configuration(format!(
                "Unsupported version for hashserver: {app_version}/{version_string}"
            ))
        })
}

/// Fetches the catalog from the hash service and resolves the hashing
/// protocol version for `app_version`.
pub async fn resolve_hashing_version(
    client: &reqwest::Client,
    base_url: &str,
    app_version: u32,
    dialect: VersionDialect,
) -> Result<String, SigError> {
    let version_string = dialect.version_string(app_version);
    let url = catalog_url(base_url);
    debug!(%url, %dialect, %version_string, "Fetching hash version catalog");

    let body = client.get(&url).send().await?.error_for_status()?.text().await?;
    let resolved = lookup_catalog(&body, app_version, &version_string)?;

    info!(app_version, %version_string, hashing_version = %resolved, "Resolved hashing version");
    Ok(resolved)
}

//! Synchronization configuration, loaded once at start from a TOML file.
//!
//! Geometry/tolerance values stay in the canonical unit (nanometers),
//! except `deg_to_rad_tolerance` which is a plain float (radian-to-degree
//! round-tripping noise, not a canonical-unit quantity).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default wire header length in bytes.
pub const DEFAULT_HEADER: usize = 64;
/// Default base port the Host listens on / the Peer starts connecting at.
pub const DEFAULT_PORT: u16 = 5050;
/// Default host address.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default payload character encoding.
pub const DEFAULT_FORMAT: &str = "utf-8";
/// Default port-search window, shared by listener and connector.
pub const DEFAULT_MAX_PORT_SEARCH_RANGE: u16 = 20;

/// `[network]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host to bind (listener) or connect to (connector).
    #[serde(default = "default_host")]
    pub host: String,
    /// Base TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fixed wire header length in bytes.
    #[serde(default = "default_header")]
    pub header: usize,
    /// Payload character encoding (informational; we always use UTF-8 JSON).
    #[serde(default = "default_format")]
    pub format: String,
    /// How many ports above `port` to try before giving up. Applies to
    /// both the connector's retry and the listener's bind retry.
    #[serde(default = "default_max_port_search_range")]
    pub max_port_search_range: u16,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_header() -> usize {
    DEFAULT_HEADER
}
fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}
fn default_max_port_search_range() -> u16 {
    DEFAULT_MAX_PORT_SEARCH_RANGE
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            header: default_header(),
            format: default_format(),
            max_port_search_range: default_max_port_search_range(),
        }
    }
}

/// `[freecad]` section — tolerances used by the `Differ`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreecadConfig {
    /// Named root -> filesystem path, for resolving relative 3D-model filenames.
    #[serde(default)]
    pub models_path: HashMap<String, PathBuf>,
    /// Rotation tolerance in degrees, absorbing rad<->deg conversion noise.
    #[serde(default = "default_deg_to_rad_tolerance")]
    pub deg_to_rad_tolerance: f64,
    /// Position tolerance in canonical units (nanometers).
    #[serde(default = "default_placement_tolerance")]
    pub placement_tolerance: i64,
    /// Arc-midpoint snapping tolerance in canonical units (nanometers).
    #[serde(default = "default_arc_epsilon")]
    pub arc_epsilon: i64,
}

fn default_deg_to_rad_tolerance() -> f64 {
    0.01
}
fn default_placement_tolerance() -> i64 {
    100
}
fn default_arc_epsilon() -> i64 {
    1000
}

impl Default for FreecadConfig {
    fn default() -> Self {
        Self {
            models_path: HashMap::new(),
            deg_to_rad_tolerance: default_deg_to_rad_tolerance(),
            placement_tolerance: default_placement_tolerance(),
            arc_epsilon: default_arc_epsilon(),
        }
    }
}

/// Top-level configuration, read once at process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub freecad: FreecadConfig,
}

impl Config {
    /// Load from a TOML file at `path`. Missing file or parse error falls
    /// back to defaults, with the failure logged rather than panicking —
    /// configuration-file loading is a back-end concern, so the core must stay usable without one.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str(&s) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "bad config file, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "can't read config file, using defaults");
                Self::default()
            }
        }
    }
}

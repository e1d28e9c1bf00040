//! Client configuration via `quarry.toml`
//!
//! Everything the model layer needs from its host: which environment it runs
//! in (this decides whether unsafe attribute writes fail or only warn), the
//! base URL and route table, default page size and error bag name.

use crate::error::{Error, Result};
use quarry_http::{Route, RouteTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Config file name looked up by hosts that keep one next to their data
pub const CONFIG_FILE_NAME: &str = "quarry.toml";

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Default
    #[default]
    Production,
    /// Pre-release
    Staging,
    /// Local development
    Development,
    /// Test runs
    Testing,
}

impl Environment {
    /// Production and staging fail hard on integration bugs
    pub fn is_production_like(&self) -> bool {
        matches!(self, Environment::Production | Environment::Staging)
    }
}

/// Client configuration loaded from `quarry.toml`.
///
/// # Example
///
/// ```toml
/// environment = "development"
/// base_url = "https://api.example.com"
///
/// [routes."api.posts.index"]
/// uri = "api/posts"
/// methods = ["GET", "HEAD"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,
    /// Prefix for every resolved route URI
    #[serde(default)]
    pub base_url: String,
    /// Page size when neither `limit()` nor an explicit size is given
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,
    /// Error bag written by validation failures without an explicit bag
    #[serde(default = "default_error_bag")]
    pub error_bag: String,
    /// Request timeout in milliseconds for transports that honor it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Named routes, usually generated from the server
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub routes: BTreeMap<String, Route>,
}

fn default_per_page() -> u32 {
    15
}

fn default_error_bag() -> String {
    "default".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            base_url: String::new(),
            default_per_page: default_per_page(),
            error_bag: default_error_bag(),
            timeout_ms: default_timeout_ms(),
            routes: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Config for a given environment with every other field defaulted
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    /// Build the route table described by `base_url` and `routes`
    pub fn route_table(&self) -> RouteTable {
        let mut table = RouteTable::new(self.base_url.clone());
        for (name, route) in &self.routes {
            table.insert(name.clone(), route.clone());
        }
        table
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Quarry client configuration
#
# Environment: "production" (default), "staging", "development" or "testing".
# In production and staging, writing a value that cannot be stored as JSON
# is an error. Elsewhere it is logged and ignored.
environment = "production"

# Prefix applied to every route URI.
base_url = ""

# Page size used by queries without an explicit limit.
default_per_page = 15

# Error bag that receives validation messages by default.
error_bag = "default"

# Request timeout in milliseconds.
timeout_ms = 30000

# Routes, usually exported from the server:
# [routes."api.posts.index"]
# uri = "api/posts"
# methods = ["GET", "HEAD"]
"#
    }

    /// Parse config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

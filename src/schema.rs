//! Schema definitions for the `phpunit-docker` settings file.
//!
//! Settings live in `phpunit-docker.yaml` (or `.yml`/`.toml`) at the workspace
//! root. Every key is optional except `containerName`, which a run requires.

use crate::error::ConfigError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default glob for test files, relative to the workspace root.
pub const DEFAULT_TEST_FILE_PATTERN: &str = "**/*Test.php";

/// Default glob for files never treated as tests.
pub const DEFAULT_EXCLUDE_PATTERN: &str = "**/vendor/**";

/// Default workspace root inside the container.
pub const DEFAULT_CONTAINER_PATH: &str = "/var/www";

/// Default PHPUnit entry point, relative to the container path.
pub const DEFAULT_PHPUNIT_PATH: &str = "vendor/bin/phpunit";

/// Default Xdebug 3 client port.
pub const DEFAULT_DEBUG_PORT: u16 = 9003;

/// Project settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Glob selecting test files (default: `**/*Test.php`).
    #[serde(default = "default_test_file_pattern")]
    pub test_file_pattern: String,

    /// Glob excluding files from discovery (default: `**/vendor/**`).
    #[serde(default = "default_exclude_pattern")]
    pub exclude_pattern: String,

    /// Name of the running Docker container. Required for runs.
    #[serde(default)]
    pub container_name: Option<String>,

    /// Path inside the container that maps to the workspace root (default: `/var/www`).
    #[serde(default = "default_container_path")]
    pub container_path: String,

    /// PHPUnit executable inside the container (default: `vendor/bin/phpunit`).
    #[serde(default = "default_phpunit_path")]
    pub phpunit_path: String,

    /// Debug adapter configuration used for debug runs.
    /// When absent, an Xdebug listener on port 9003 is assumed.
    #[serde(default)]
    pub debug_configuration: Option<DebugConfiguration>,

    /// Timeout in seconds for each remote PHPUnit invocation. Unbounded when unset.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Allocate a pseudo-TTY for `docker exec` (default: true).
    #[serde(default = "default_tty")]
    pub tty: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            test_file_pattern: default_test_file_pattern(),
            exclude_pattern: default_exclude_pattern(),
            container_name: None,
            container_path: default_container_path(),
            phpunit_path: default_phpunit_path(),
            debug_configuration: None,
            timeout: None,
            tty: default_tty(),
        }
    }
}

impl Settings {
    /// The configured container name, rejecting missing or blank values.
    pub fn require_container_name(&self) -> Result<&str, ConfigError> {
        self.container_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::MissingContainerName)
    }

    /// The debug configuration to start, with `${workspaceFolder}` expanded.
    pub fn resolved_debug_configuration(
        &self,
        workspace_root: &Path,
    ) -> Result<DebugConfiguration, ConfigError> {
        let workspace = workspace_root.display().to_string();
        let Some(configured) = &self.debug_configuration else {
            return Ok(DebugConfiguration::xdebug(&self.container_path, &workspace));
        };

        let vars = BTreeMap::from([("workspaceFolder".to_string(), workspace)]);
        let mut resolved = configured.clone();
        resolved.path_mappings = configured
            .path_mappings
            .iter()
            .map(|(remote, local)| {
                Ok((
                    crate::env::interpolate_env_with(remote, &vars)?,
                    crate::env::interpolate_env_with(local, &vars)?,
                ))
            })
            .collect::<Result<_, String>>()
            .map_err(ConfigError::Interpolation)?;
        Ok(resolved)
    }
}

fn default_test_file_pattern() -> String {
    DEFAULT_TEST_FILE_PATTERN.to_string()
}

fn default_exclude_pattern() -> String {
    DEFAULT_EXCLUDE_PATTERN.to_string()
}

fn default_container_path() -> String {
    DEFAULT_CONTAINER_PATH.to_string()
}

fn default_phpunit_path() -> String {
    DEFAULT_PHPUNIT_PATH.to_string()
}

fn default_tty() -> bool {
    true
}

/// A debug adapter launch configuration.
///
/// Only the fields below are interpreted; anything else is carried through
/// untouched for the debugger host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfiguration {
    /// Debug adapter type (e.g. `php`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Display name of the session.
    pub name: String,

    /// Request kind, `launch` or `attach`.
    #[serde(default = "default_request")]
    pub request: String,

    /// Port the debugger listens on.
    #[serde(default = "default_debug_port")]
    pub port: u16,

    /// Container path to local path mappings. Values may use `${workspaceFolder}`.
    #[serde(default)]
    pub path_mappings: BTreeMap<String, String>,

    /// Adapter-specific settings.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DebugConfiguration {
    /// Listen for Xdebug, mapping `container_path` to `workspace_root`.
    pub fn xdebug(container_path: &str, workspace_root: &str) -> Self {
        Self {
            kind: "php".to_string(),
            name: "Listen for Xdebug".to_string(),
            request: default_request(),
            port: DEFAULT_DEBUG_PORT,
            path_mappings: BTreeMap::from([(
                container_path.to_string(),
                workspace_root.to_string(),
            )]),
            extra: BTreeMap::new(),
        }
    }
}

fn default_request() -> String {
    "launch".to_string()
}

fn default_debug_port() -> u16 {
    DEFAULT_DEBUG_PORT
}

/// Generate the JSON Schema of the settings file.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Settings)
}

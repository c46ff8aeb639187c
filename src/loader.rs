//! Settings and workspace file loading.
//!
//! Settings come from `phpunit-docker.{yaml,yml,toml}` in the workspace root.
//! Test files are found by walking the workspace with glob overrides.

use crate::error::{ConfigError, DiscoveryError};
use crate::schema::Settings;
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::path::{Path, PathBuf};

/// Settings file names, in lookup order.
pub const SETTINGS_FILENAMES: [&str; 3] = [
    "phpunit-docker.yaml",
    "phpunit-docker.yml",
    "phpunit-docker.toml",
];

/// The settings file in `root`, if any.
pub fn find_settings_file(root: &Path) -> Option<PathBuf> {
    SETTINGS_FILENAMES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Load a settings file, picking the format from its extension.
pub fn load_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;

    match ext {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&contents)?),
        "toml" => Ok(toml::from_str(&contents)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Load the settings for the workspace at `root`.
///
/// A missing settings file yields the defaults; an invalid one is an error.
pub fn load_settings(root: &Path) -> Result<Settings, ConfigError> {
    match find_settings_file(root) {
        Some(path) => {
            tracing::debug!("Loading settings from {}", path.display());
            load_settings_file(&path)
        }
        None => Ok(Settings::default()),
    }
}

/// Files under `root` matching `include` but not `exclude`, sorted.
///
/// Globs are relative to `root`. Hidden and ignored files are not skipped
/// implicitly; only `exclude` filters.
pub fn find_files(root: &Path, include: &str, exclude: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut overrides = OverrideBuilder::new(root);
    overrides.add(include).map_err(|e| DiscoveryError::Pattern {
        pattern: include.to_string(),
        message: e.to_string(),
    })?;
    if !exclude.is_empty() {
        overrides
            .add(&format!("!{exclude}"))
            .map_err(|e| DiscoveryError::Pattern {
                pattern: exclude.to_string(),
                message: e.to_string(),
            })?;
    }
    let overrides = overrides.build().map_err(|e| DiscoveryError::Pattern {
        pattern: include.to_string(),
        message: e.to_string(),
    })?;

    if !root.is_dir() {
        return Err(DiscoveryError::Search {
            root: root.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .overrides(overrides)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| DiscoveryError::Search {
            root: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_some_and(|t| t.is_file()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "<?php\n").unwrap();
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_settings(dir.path()).unwrap();
        assert!(settings.container_name.is_none());
        assert_eq!(settings.container_path, "/var/www");
    }

    #[test]
    fn loads_yaml_settings() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("phpunit-docker.yaml"),
            "containerName: app\ncontainerPath: /srv\n",
        )
        .unwrap();

        let settings = load_settings(dir.path()).unwrap();
        assert_eq!(settings.container_name.as_deref(), Some("app"));
        assert_eq!(settings.container_path, "/srv");
    }

    #[test]
    fn loads_toml_settings() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("phpunit-docker.toml"),
            "containerName = \"app\"\ntty = false\n\n[debugConfiguration]\ntype = \"php\"\nname = \"Xdebug\"\n",
        )
        .unwrap();

        let settings = load_settings(dir.path()).unwrap();
        assert_eq!(settings.container_name.as_deref(), Some("app"));
        assert!(!settings.tty);
        assert_eq!(settings.debug_configuration.unwrap().port, 9003);
    }

    #[test]
    fn yaml_takes_precedence_over_toml() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("phpunit-docker.yaml"), "containerName: yaml\n").unwrap();
        fs::write(dir.path().join("phpunit-docker.toml"), "containerName = \"toml\"\n").unwrap();

        let settings = load_settings(dir.path()).unwrap();
        assert_eq!(settings.container_name.as_deref(), Some("yaml"));
    }

    #[test]
    fn invalid_settings_are_errors() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("phpunit-docker.yml"), "containerName: [app").unwrap();
        assert!(matches!(load_settings(dir.path()), Err(ConfigError::Yaml(_))));

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("phpunit-docker.toml"), "containerName = [").unwrap();
        assert!(matches!(load_settings(dir.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unsupported_settings_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{}").unwrap();
        assert!(matches!(
            load_settings_file(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn finds_matching_files_sorted() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "tests/Unit/ZedTest.php");
        touch(dir.path(), "tests/Unit/AlphaTest.php");
        touch(dir.path(), "tests/Feature/LoginTest.php");
        touch(dir.path(), "src/Helper.php");
        touch(dir.path(), "vendor/acme/lib/tests/VendorTest.php");

        let files = find_files(dir.path(), "**/*Test.php", "**/vendor/**").unwrap();
        let relative: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(
            relative,
            [
                "tests/Feature/LoginTest.php",
                "tests/Unit/AlphaTest.php",
                "tests/Unit/ZedTest.php",
            ]
        );
    }

    #[test]
    fn empty_exclude_keeps_everything() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "vendor/VendorTest.php");
        touch(dir.path(), ".hidden/HiddenTest.php");

        let files = find_files(dir.path(), "**/*Test.php", "").unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let dir = tempdir().unwrap();
        let result = find_files(dir.path(), "**/[Test.php", "");
        assert!(matches!(result, Err(DiscoveryError::Pattern { .. })));
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempdir().unwrap();
        let result = find_files(&dir.path().join("nope"), "**/*Test.php", "");
        assert!(matches!(result, Err(DiscoveryError::Search { .. })));
    }
}

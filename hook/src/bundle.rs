// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! OCI container state and bundle mount resolution.
//!
//! The runtime hands the hook a `State` document on stdin. Its `bundle` path
//! points at a directory holding `config.json`; only the `mounts` list of that
//! file is consumed here, to find where the Raksh bind mounts come from on the
//! host side.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::BUNDLE_CONFIG_FILE_NAME;
use crate::errors::HookError;

/// Snapshot of the OCI runtime `State` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "ociVersion", default)]
    pub oci_version: String,
    pub id: String,
    pub status: String,
    /// PID of the container init process
    #[serde(default)]
    pub pid: u32,
    #[serde(rename = "bundle")]
    pub bundle_path: PathBuf,
}

impl ContainerState {
    /// Reads exactly one `State` document.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, HookError> {
        let state: ContainerState = serde_json::from_reader(reader)
            .map_err(|err| HookError::InvalidState(err.to_string()))?;

        if state.pid == 0 {
            return Err(HookError::InvalidState(format!(
                "container {} has no pid",
                state.id
            )));
        }

        Ok(state)
    }
}

/// One entry of the bundle's `mounts` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    #[serde(default)]
    pub source: String,
    pub destination: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BundleConfig {
    #[serde(default)]
    mounts: Vec<MountEntry>,
}

/// Reads the ordered mount list of `<bundle>/config.json`.
pub fn read_mounts(bundle_path: &Path) -> Result<Vec<MountEntry>, HookError> {
    let config_path = bundle_path.join(BUNDLE_CONFIG_FILE_NAME);

    tracing::info!("[hook] config.json location: {}", config_path.display());

    let data = fs::read(&config_path)
        .map_err(|err| HookError::ConfigReadError(format!("{}: {err}", config_path.display())))?;

    let config: BundleConfig = serde_json::from_slice(&data).map_err(|err| {
        HookError::ConfigParseError(format!("{}: {err}", config_path.display()))
    })?;

    Ok(config.mounts)
}

/// Returns the source of the first mount whose destination contains
/// `destination_prefix`.
///
/// # Errors
///
/// - [`HookError::ConfigReadError`] if `config.json` cannot be read
/// - [`HookError::ConfigParseError`] if it is not a valid document
/// - [`HookError::MountNotFound`] if no entry matches, or the match has an
///   empty source
#[tracing::instrument]
pub fn resolve_mount_source(
    bundle_path: &Path,
    destination_prefix: &str,
) -> Result<PathBuf, HookError> {
    let mounts = read_mounts(bundle_path)?;

    let entry = mounts.iter().find(|mount| {
        tracing::debug!("[hook] src: {} == dest: {}", mount.source, mount.destination);
        mount.destination.contains(destination_prefix)
    });

    match entry {
        Some(mount) if !mount.source.is_empty() => {
            tracing::info!("[hook] mount src from config.json: {}", mount.source);
            Ok(PathBuf::from(&mount.source))
        }
        _ => Err(HookError::MountNotFound(destination_prefix.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn bundle_with(config: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(BUNDLE_CONFIG_FILE_NAME), config).unwrap();
        dir
    }

    fn raksh_bundle() -> TempDir {
        let config = json!({
            "ociVersion": "1.0.2",
            "mounts": [
                {"source": "/host/a", "destination": "/etc/raksh/secrets", "type": "bind", "options": ["rbind", "ro"]},
                {"source": "/host/b", "destination": "/etc/raksh/spec", "type": "bind"}
            ]
        });
        bundle_with(&config.to_string())
    }

    #[test]
    fn test_resolve_mount_source() {
        let bundle = raksh_bundle();

        let source = resolve_mount_source(bundle.path(), "/etc/raksh/secrets").unwrap();
        assert_eq!(source, PathBuf::from("/host/a"));

        let source = resolve_mount_source(bundle.path(), "/etc/raksh/spec").unwrap();
        assert_eq!(source, PathBuf::from("/host/b"));
    }

    #[test]
    fn test_resolve_mount_not_found() {
        let bundle = raksh_bundle();
        let result = resolve_mount_source(bundle.path(), "/etc/raksh/missing");
        assert_eq!(
            result.unwrap_err(),
            HookError::MountNotFound("/etc/raksh/missing".to_string())
        );
    }

    #[test]
    fn test_resolve_first_match_wins() {
        let config = json!({
            "mounts": [
                {"source": "/proc", "destination": "/proc"},
                {"source": "/host/first", "destination": "/etc/raksh/secrets"},
                {"source": "/host/second", "destination": "/etc/raksh/secrets"}
            ]
        });
        let bundle = bundle_with(&config.to_string());

        let source = resolve_mount_source(bundle.path(), "/etc/raksh/secrets").unwrap();
        assert_eq!(source, PathBuf::from("/host/first"));
    }

    #[test]
    fn test_resolve_empty_source_is_not_found() {
        let config = json!({"mounts": [{"source": "", "destination": "/etc/raksh/spec"}]});
        let bundle = bundle_with(&config.to_string());

        let result = resolve_mount_source(bundle.path(), "/etc/raksh/spec");
        assert!(matches!(result, Err(HookError::MountNotFound(_))));
    }

    #[test]
    fn test_resolve_missing_config() {
        let dir = TempDir::new().unwrap();
        let result = resolve_mount_source(dir.path(), "/etc/raksh/spec");
        assert!(matches!(result, Err(HookError::ConfigReadError(_))));
    }

    #[test]
    fn test_resolve_malformed_config() {
        let bundle = bundle_with("{\"mounts\": [");
        let result = resolve_mount_source(bundle.path(), "/etc/raksh/spec");
        assert!(matches!(result, Err(HookError::ConfigParseError(_))));
    }

    #[test]
    fn test_config_without_mounts() {
        let bundle = bundle_with("{\"ociVersion\": \"1.0.2\"}");
        assert!(read_mounts(bundle.path()).unwrap().is_empty());
    }

    #[test]
    fn test_container_state_from_reader() {
        let input = r#"{"ociVersion":"1.0.2","id":"c1","status":"created","pid":4242,"bundle":"/run/b1"}"#;
        let state = ContainerState::from_reader(input.as_bytes()).unwrap();

        assert_eq!(state.id, "c1");
        assert_eq!(state.status, "created");
        assert_eq!(state.pid, 4242);
        assert_eq!(state.bundle_path, PathBuf::from("/run/b1"));
    }

    #[test]
    fn test_container_state_without_pid() {
        let input = r#"{"id":"c1","status":"creating","bundle":"/run/b1"}"#;
        let result = ContainerState::from_reader(input.as_bytes());
        assert!(matches!(result, Err(HookError::InvalidState(_))));
    }

    #[test]
    fn test_container_state_malformed() {
        let result = ContainerState::from_reader("not json".as_bytes());
        assert!(matches!(result, Err(HookError::InvalidState(_))));
    }
}

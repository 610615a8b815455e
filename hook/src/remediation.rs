// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Removal of the encrypted Raksh mounts from a running container.
//!
//! The hook enters the mount and pid namespaces of the container init process
//! through `nsenter` and unmounts the encrypted config map and secrets mounts,
//! leaving only the decrypted copies staged by the
//! [`SecretStore`](crate::store::SecretStore).
//!
//! Both unmounts are attempted even if the first one fails. Nothing is
//! remounted on failure.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::constants::{BUNDLE_ROOTFS_DIR, RAKSH_SECRET_MOUNT_POINT, RAKSH_SPEC_MOUNT_POINT};
use crate::errors::HookError;

/// Operations performed inside a container's mount+pid namespaces.
pub trait NamespaceExecutor {
    /// Returns the mount table as seen by `pid`.
    fn list_mounts(&self, pid: u32) -> Result<String, HookError>;

    fn unmount(&self, pid: u32, path: &Path) -> Result<(), HookError>;
}

impl<T: NamespaceExecutor + ?Sized> NamespaceExecutor for Box<T> {
    fn list_mounts(&self, pid: u32) -> Result<String, HookError> {
        (**self).list_mounts(pid)
    }

    fn unmount(&self, pid: u32, path: &Path) -> Result<(), HookError> {
        (**self).unmount(pid, path)
    }
}

/// Builds the `nsenter` argument list for `action` run inside `pid`'s
/// mount and pid namespaces.
pub fn nsenter_args(pid: u32, action: &[&str]) -> Vec<String> {
    let mut args = vec![
        "-t".to_string(),
        pid.to_string(),
        "-m".to_string(),
        "-p".to_string(),
    ];
    args.extend(action.iter().map(|arg| arg.to_string()));
    args
}

/// [`NamespaceExecutor`] backed by the `nsenter` utility.
#[derive(Debug, Clone)]
pub struct Nsenter {
    program: String,
}

impl Nsenter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, pid: u32, action: &[&str]) -> Result<String, HookError> {
        let output = Command::new(&self.program)
            .args(nsenter_args(pid, action))
            .output()
            .map_err(|err| {
                HookError::RemediationError(format!("unable to run {}: {err}", self.program))
            })?;

        let mut combined = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        combined.push_str(&String::from_utf8_lossy(output.stderr.as_slice()));

        if !output.status.success() {
            tracing::info!("[hook] out: {}", combined);
            return Err(HookError::RemediationError(format!(
                "{} {:?} exited with {:?}: {}",
                self.program,
                action,
                output.status.code(),
                combined.trim_end()
            )));
        }

        Ok(combined)
    }
}

impl NamespaceExecutor for Nsenter {
    fn list_mounts(&self, pid: u32) -> Result<String, HookError> {
        self.run(pid, &["mount"])
    }

    fn unmount(&self, pid: u32, path: &Path) -> Result<(), HookError> {
        let path = path.to_string_lossy();
        self.run(pid, &["umount", path.as_ref()]).map(|_| ())
    }
}

/// Joins an absolute in-container path onto the bundle's rootfs.
pub fn rootfs_path(bundle_path: &Path, container_path: &str) -> PathBuf {
    bundle_path
        .join(BUNDLE_ROOTFS_DIR)
        .join(container_path.trim_start_matches('/'))
}

/// Outcome of one remediation; paths are in the order they were attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediationReport {
    pub unmounted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct MountRemediator<E> {
    executor: E,
    targets: Vec<String>,
}

impl<E: NamespaceExecutor> MountRemediator<E> {
    /// Remediator for the encrypted config map and secrets mounts.
    pub fn new(executor: E) -> Self {
        Self::with_targets(
            executor,
            vec![
                RAKSH_SPEC_MOUNT_POINT.to_string(),
                RAKSH_SECRET_MOUNT_POINT.to_string(),
            ],
        )
    }

    pub fn with_targets(executor: E, targets: Vec<String>) -> Self {
        Self { executor, targets }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Unmounts every target inside the namespaces of `pid`.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::RemediationError`] if any unmount failed. Mounts
    /// removed before the failure stay removed.
    #[tracing::instrument(skip(self))]
    pub fn remediate(&self, pid: u32, bundle_path: &Path) -> Result<RemediationReport, HookError> {
        tracing::info!("[hook] modifying bind mount for process {}", pid);

        match self.executor.list_mounts(pid) {
            Ok(mounts) => tracing::debug!("[hook] existing mount list inside the container: {}", mounts),
            Err(err) => tracing::warn!("[hook] unable to list mounts: {}", err),
        }

        let mut report = RemediationReport::default();

        for target in &self.targets {
            let destination = rootfs_path(bundle_path, target);
            match self.executor.unmount(pid, &destination) {
                Ok(()) => {
                    tracing::info!("[hook] unmounted {}", destination.display());
                    report.unmounted.push(destination);
                }
                Err(err) => {
                    tracing::error!(
                        "[hook] error in executing umount for {}: {}",
                        destination.display(),
                        err
                    );
                    report.failed.push((destination, err.to_string()));
                }
            }
        }

        if !report.failed.is_empty() {
            let failed: Vec<String> = report
                .failed
                .iter()
                .map(|(path, reason)| format!("{}: {reason}", path.display()))
                .collect();
            return Err(HookError::RemediationError(failed.join("; ")));
        }

        tracing::info!("[hook] modifying bind mount complete");

        Ok(report)
    }
}

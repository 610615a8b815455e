// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Staging of decrypted artifacts in the VM's in-memory area.
//!
//! Once the encrypted mounts are removed from the container, the store root
//! is the only place the plaintext exists. It must not overlap the encrypted
//! mount sources.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Component, Path, PathBuf};

use crate::constants::SECRET_FILE_MODE;
use crate::errors::HookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCategory {
    /// The decrypted config map
    Config,
    /// Decrypted user secrets
    User,
}

impl SecretCategory {
    pub fn dir_name(&self) -> &'static str {
        match self {
            SecretCategory::Config => "config",
            SecretCategory::User => "user",
        }
    }
}

/// Canonicalizes the longest existing prefix of `path` and applies the
/// remaining components lexically.
fn resolve_path(path: &Path) -> PathBuf {
    let components: Vec<Component<'_>> = path.components().collect();

    for split in (1..=components.len()).rev() {
        let existing: PathBuf = components.iter().take(split).collect();
        let Ok(mut resolved) = existing.canonicalize() else {
            continue;
        };

        for component in components.iter().skip(split) {
            match component {
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::CurDir => {}
                other => resolved.push(other),
            }
        }
        return resolved;
    }

    path.to_path_buf()
}

#[derive(Debug, Clone)]
pub struct SecretStore {
    root: PathBuf,
}

impl SecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: SecretCategory) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// Fails if the store root and `encrypted_source` overlap once `..` and
    /// symlinks are resolved.
    pub fn ensure_distinct_from(&self, encrypted_source: &Path) -> Result<(), HookError> {
        let root = resolve_path(&self.root);
        let source = resolve_path(encrypted_source);
        tracing::debug!(
            "[hook] store root {} resolves to {}, source {} to {}",
            self.root.display(),
            root.display(),
            encrypted_source.display(),
            source.display()
        );

        if root.starts_with(&source) || source.starts_with(&root) {
            return Err(HookError::PersistError(format!(
                "store root {} overlaps encrypted source {}",
                self.root.display(),
                encrypted_source.display()
            )));
        }
        Ok(())
    }

    /// Writes `plaintext` to `<root>/<category>/<name>`, replacing any
    /// previous content, and returns the written path.
    #[tracing::instrument(skip(self, plaintext), fields(len = plaintext.len()))]
    pub fn persist(
        &self,
        category: SecretCategory,
        name: &str,
        plaintext: &[u8],
    ) -> Result<PathBuf, HookError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(HookError::PersistError(format!(
                "invalid secret name {name:?}"
            )));
        }

        let dir = self.category_dir(category);
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)
            .map_err(|err| {
                tracing::debug!("[hook] unable to create directory {}", dir.display());
                HookError::PersistError(format!("{}: {err}", dir.display()))
            })?;

        let path = dir.join(name);
        tracing::info!("[hook] write decrypted {} into {}", category.dir_name(), path.display());

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(SECRET_FILE_MODE)
            .open(&path)
            .map_err(|err| HookError::PersistError(format!("{}: {err}", path.display())))?;
        file.write_all(plaintext)
            .and_then(|_| file.sync_all())
            .map_err(|err| HookError::PersistError(format!("{}: {err}", path.display())))?;

        Ok(path)
    }

    /// Reads back a persisted artifact.
    pub fn load(&self, category: SecretCategory, name: &str) -> Result<Vec<u8>, HookError> {
        let path = self.category_dir(category).join(name);
        fs::read(&path).map_err(|err| HookError::SecretNotFound(format!("{}: {err}", path.display())))
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! In-memory stand-ins for the external utilities.
//!
//! Clones share state, so a test can hand one clone to the pipeline and keep
//! another to inspect what happened.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use data_encoding::BASE64;

use crate::errors::HookError;
use crate::remediation::NamespaceExecutor;
use crate::secrets::AttestedRetriever;

#[derive(Debug, Default)]
struct NamespaceState {
    pid: u32,
    mounts: Vec<String>,
    list_calls: usize,
    unmount_calls: Vec<PathBuf>,
}

/// Mount table of a single fake container process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNamespace {
    state: Rc<RefCell<NamespaceState>>,
}

impl InMemoryNamespace {
    pub fn with_mounts<I, S>(pid: u32, mounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Rc::new(RefCell::new(NamespaceState {
                pid,
                mounts: mounts.into_iter().map(Into::into).collect(),
                ..NamespaceState::default()
            })),
        }
    }

    pub fn mounts(&self) -> Vec<String> {
        self.state.borrow().mounts.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.borrow().list_calls
    }

    pub fn unmount_calls(&self) -> Vec<PathBuf> {
        self.state.borrow().unmount_calls.clone()
    }

    fn check_pid(&self, pid: u32) -> Result<(), HookError> {
        if self.state.borrow().pid != pid {
            return Err(HookError::RemediationError(format!(
                "cannot open namespaces of process {pid}"
            )));
        }
        Ok(())
    }
}

impl NamespaceExecutor for InMemoryNamespace {
    fn list_mounts(&self, pid: u32) -> Result<String, HookError> {
        self.check_pid(pid)?;
        let mut state = self.state.borrow_mut();
        state.list_calls += 1;

        Ok(state
            .mounts
            .iter()
            .map(|mount| format!("none on {mount} type bind (rw)\n"))
            .collect())
    }

    fn unmount(&self, pid: u32, path: &Path) -> Result<(), HookError> {
        self.check_pid(pid)?;
        let mut state = self.state.borrow_mut();
        state.unmount_calls.push(path.to_path_buf());

        let target = path.to_string_lossy();
        match state.mounts.iter().position(|mount| *mount == target) {
            Some(index) => {
                state.mounts.remove(index);
                Ok(())
            }
            None => Err(HookError::RemediationError(format!("umount: {target}: not mounted"))),
        }
    }
}

#[derive(Debug, Default)]
struct RetrieverState {
    secrets: BTreeMap<String, Vec<u8>>,
    calls: Vec<PathBuf>,
}

/// Attested channel releasing a fixed set of secrets, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    state: Rc<RefCell<RetrieverState>>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `value` for `name`, encoded the way the utility prints it.
    pub fn with_secret(self, name: &str, value: &[u8]) -> Self {
        let encoded = format!("{}\n", BASE64.encode(value));
        self.state
            .borrow_mut()
            .secrets
            .insert(name.to_string(), encoded.into_bytes());
        self
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.state.borrow().calls.clone()
    }
}

impl AttestedRetriever for StaticRetriever {
    fn fetch_secret(&self, target: &Path) -> Result<Vec<u8>, HookError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(target.to_path_buf());

        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        state.secrets.get(&name).cloned().ok_or_else(|| {
            HookError::SecretFetchUnavailable(format!("no embedded secret for {name}"))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_clones_share_state() {
        let namespace = InMemoryNamespace::with_mounts(1, ["/a", "/b"]);
        let observer = namespace.clone();

        namespace.unmount(1, Path::new("/a")).unwrap();

        assert_eq!(observer.mounts(), vec!["/b".to_string()]);
        assert_eq!(observer.unmount_calls(), vec![PathBuf::from("/a")]);
    }

    #[test]
    fn test_namespace_listing() {
        let namespace = InMemoryNamespace::with_mounts(1, ["/a"]);
        assert_eq!(namespace.list_mounts(1).unwrap(), "none on /a type bind (rw)\n");
        assert_eq!(namespace.list_calls(), 1);
        assert!(namespace.list_mounts(2).is_err());
    }

    #[test]
    fn test_static_retriever() {
        let retriever = StaticRetriever::new().with_secret("nonce", b"abc");

        let output = retriever
            .fetch_secret(Path::new("/run/raksh/secrets/nonce"))
            .unwrap();
        assert_eq!(output, b"YWJj\n");

        assert!(matches!(
            retriever.fetch_secret(Path::new("/run/raksh/secrets/imageKey")),
            Err(HookError::SecretFetchUnavailable(_))
        ));
        assert_eq!(retriever.calls().len(), 2);
    }
}

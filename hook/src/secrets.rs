// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Retrieval of raw Raksh secret material.
//!
//! Every secret file holds base64 text. Two sources exist:
//!
//! - [`FilesystemSource`] reads files from the bind-mounted secrets directory.
//! - [`AttestedTeeSource`] asks the ultravisor for each secret through an
//!   [`AttestedRetriever`], caching the answer as a file in the VM's in-memory
//!   area so a secret is never retrieved twice.
//!
//! The source is chosen once per run from the [`Platform`](crate::probe::Platform).
//!
//! # Security
//!
//! [`SecretMaterial`] is zeroized on drop and never logged.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use data_encoding::BASE64;
use zeroize::{Zeroizing, ZeroizeOnDrop};

use crate::constants::{
    CONFIG_MAP_KEY_FILE_NAME, IMAGE_KEY_FILE_NAME, NONCE_FILE_NAME, SECRET_FILE_MODE,
};
use crate::crypto;
use crate::errors::HookError;

/// Decrypted user secrets keyed by file name.
pub type UserSecretMap = BTreeMap<String, Zeroizing<Vec<u8>>>;

/// Decodes the base64 content of a secret file.
///
/// Line breaks are ignored: the retrieval utility terminates its output with a
/// newline and hand-written files usually carry one too.
pub fn decode_secret(raw: &[u8]) -> Result<Vec<u8>, HookError> {
    let encoded: Zeroizing<Vec<u8>> = Zeroizing::new(
        raw.iter()
            .copied()
            .filter(|b| *b != b'\n' && *b != b'\r')
            .collect(),
    );

    BASE64
        .decode(&encoded)
        .map_err(|err| HookError::DecodeError(format!("unable to base64 decode secret: {err}")))
}

/// Reads and decodes one secret file.
pub fn read_secret_file(path: &Path) -> Result<Vec<u8>, HookError> {
    if !path.exists() {
        tracing::error!("[hook] error looking for {}", path.display());
        return Err(HookError::SecretNotFound(path.display().to_string()));
    }

    let raw = Zeroizing::new(fs::read(path).map_err(|err| {
        tracing::error!("[hook] could not read file {}: {:?}", path.display(), err);
        HookError::SecretNotFound(format!("{}: {err}", path.display()))
    })?);

    decode_secret(&raw).map_err(|err| match err {
        HookError::DecodeError(msg) => HookError::DecodeError(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub trait SecretSource {
    /// Returns the decoded bytes of the secret called `name`.
    fn fetch_raw(&self, name: &str) -> Result<Vec<u8>, HookError>;

    fn describe(&self) -> String;
}

/// Secrets stored as files under a bind-mounted directory.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    root: PathBuf,
}

impl FilesystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SecretSource for FilesystemSource {
    fn fetch_raw(&self, name: &str) -> Result<Vec<u8>, HookError> {
        read_secret_file(&self.root.join(name))
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

/// Hardware-mediated secret release.
pub trait AttestedRetriever {
    /// Returns the raw (still base64) output of one retrieval for `target`.
    fn fetch_secret(&self, target: &Path) -> Result<Vec<u8>, HookError>;
}

/// Runs the ultravisor retrieval utility (`esmb-get-file -f <target>`) and
/// captures its stdout.
#[derive(Debug, Clone)]
pub struct UltravisorRetriever {
    program: String,
}

impl UltravisorRetriever {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl AttestedRetriever for UltravisorRetriever {
    #[tracing::instrument(skip(self))]
    fn fetch_secret(&self, target: &Path) -> Result<Vec<u8>, HookError> {
        tracing::info!("[hook] retrieve the secrets from ultravisor");

        let output = Command::new(&self.program)
            .arg("-f")
            .arg(target)
            .output()
            .map_err(|err| {
                HookError::SecretFetchUnavailable(format!("unable to run {}: {err}", self.program))
            })?;

        if !output.status.success() {
            return Err(HookError::SecretFetchUnavailable(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(output.stderr.as_slice())
            )));
        }

        Ok(output.stdout)
    }
}

/// Secrets released by the ultravisor and cached under `target_dir`.
pub struct AttestedTeeSource<'a> {
    target_dir: PathBuf,
    retriever: &'a dyn AttestedRetriever,
}

impl<'a> AttestedTeeSource<'a> {
    pub fn new(target_dir: impl Into<PathBuf>, retriever: &'a dyn AttestedRetriever) -> Self {
        Self {
            target_dir: target_dir.into(),
            retriever,
        }
    }

    /// Makes sure `target` exists, retrieving it only when absent.
    fn populate(&self, target: &Path) -> Result<(), HookError> {
        if target.exists() {
            tracing::info!("[hook] secrets file exists for {}", target.display());
            return Ok(());
        }

        fs::create_dir_all(&self.target_dir).map_err(|err| {
            HookError::SecretFetchUnavailable(format!(
                "unable to create {}: {err}",
                self.target_dir.display()
            ))
        })?;

        let contents = Zeroizing::new(self.retriever.fetch_secret(target)?);

        // only created once retrieval succeeded
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(SECRET_FILE_MODE)
            .open(target)
            .map_err(|err| {
                HookError::SecretFetchUnavailable(format!(
                    "unable to create {}: {err}",
                    target.display()
                ))
            })?;
        file.write_all(&contents).map_err(|err| {
            HookError::SecretFetchUnavailable(format!("unable to write {}: {err}", target.display()))
        })?;

        Ok(())
    }
}

impl SecretSource for AttestedTeeSource<'_> {
    fn fetch_raw(&self, name: &str) -> Result<Vec<u8>, HookError> {
        let target = self.target_dir.join(name);
        self.populate(&target)?;
        read_secret_file(&target)
    }

    fn describe(&self) -> String {
        format!("attested:{}", self.target_dir.display())
    }
}

/// The three secrets every Raksh container carries.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretMaterial {
    pub config_map_key: Vec<u8>,
    pub image_key: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("config_map_key", &format_args!("<{} bytes>", self.config_map_key.len()))
            .field("image_key", &format_args!("<{} bytes>", self.image_key.len()))
            .field("nonce", &format_args!("<{} bytes>", self.nonce.len()))
            .finish()
    }
}

impl SecretMaterial {
    /// Fetches `configMapKey`, `imageKey` and `nonce`; any failure aborts.
    #[tracing::instrument(skip(source), fields(kind = %source.describe()))]
    pub fn fetch(source: &dyn SecretSource) -> Result<Self, HookError> {
        tracing::info!("[hook] read Raksh secrets");

        let config_map_key = source.fetch_raw(CONFIG_MAP_KEY_FILE_NAME)?;
        let image_key = source.fetch_raw(IMAGE_KEY_FILE_NAME)?;
        let nonce = source.fetch_raw(NONCE_FILE_NAME)?;

        Ok(Self {
            config_map_key,
            image_key,
            nonce,
        })
    }
}

/// Lists the secret files of `dir` in name order.
///
/// Symlinks are followed, so a projected volume (`name -> ..data/name`) lists
/// its keys. Dot-prefixed entries such as `..data` are skipped.
fn list_secret_names(dir: &Path) -> Result<Vec<String>, HookError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| HookError::SecretNotFound(format!("{}: {err}", dir.display())))?;

    let mut names = Vec::new();
    for entry in entries.filter_map(|entry| entry.ok()) {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        match fs::metadata(entry.path()) {
            Ok(metadata) if metadata.is_file() => names.push(name),
            Ok(_) => tracing::debug!("[hook] skipping non-file user secret entry {}", name),
            Err(err) => tracing::error!("[hook] unable to stat user secret {}: {}", name, err),
        }
    }
    names.sort();

    Ok(names)
}

/// Reads and decrypts every user secret under `dir`.
///
/// Each entry is handled on its own: an entry that cannot be read, decoded or
/// decrypted is logged and left out of the map. A missing directory yields an
/// empty map.
#[tracing::instrument(skip(key, nonce))]
pub fn read_user_secrets(
    dir: &Path,
    key: &[u8],
    nonce: &[u8],
) -> Result<UserSecretMap, HookError> {
    tracing::info!("[hook] read Raksh user secrets");

    let mut user_secrets = UserSecretMap::new();

    if !dir.is_dir() {
        tracing::info!("[hook] no user secrets at {}", dir.display());
        return Ok(user_secrets);
    }

    let source = FilesystemSource::new(dir);

    for name in list_secret_names(dir)? {
        tracing::debug!("[hook] user secret key {}", name);

        let value = match source.fetch_raw(&name) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("[hook] reading the value for {} resulted in error {}", name, err);
                continue;
            }
        };

        match crypto::decrypt(&value, key, nonce) {
            Ok(plaintext) => {
                user_secrets.insert(name, plaintext);
            }
            Err(err) => {
                tracing::error!("[hook] error in decrypting user secret {}: {}", name, err);
            }
        }
    }

    tracing::debug!("[hook] decrypted {} user secrets", user_secrets.len());

    Ok(user_secrets)
}

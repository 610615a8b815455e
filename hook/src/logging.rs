// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Log bootstrap for the hook process.
//!
//! The runtime owns the hook's stdout and stderr, so logs go to
//! `<log dir>/hook.log`. The directory comes from `RAKSH_HOOK_LOG_DIR` and
//! defaults to `<tmp>/raksh-hook`. If the file cannot be opened, logging falls
//! back to stderr.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::constants::{LOG_DIR_ENV, LOG_DIR_NAME, LOG_FILE_NAME};

pub fn log_dir() -> PathBuf {
    env::var_os(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join(LOG_DIR_NAME))
}

/// Opens `<dir>/hook.log` for appending, creating the directory if needed.
pub fn open_log_file(dir: &Path) -> Result<(PathBuf, File)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("unable to create log directory {}", dir.display()))?;

    let path = dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("unable to open log file {}", path.display()))?;

    Ok((path, file))
}

/// Installs the global JSON subscriber. Returns the log file path, or `None`
/// when logging to stderr.
pub fn init(dir: &Path) -> Result<Option<PathBuf>> {
    let (writer, log_path) = match open_log_file(dir) {
        Ok((path, file)) => (BoxMakeWriter::new(Mutex::new(file)), Some(path)),
        Err(err) => {
            eprintln!("[hook] failed to log to file, using stderr: {err:?}");
            (BoxMakeWriter::new(std::io::stderr), None)
        }
    };

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with_current_span(false)
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer)
        .try_init()
        .map_err(|err| anyhow::anyhow!("unable to install subscriber: {err}"))?;

    Ok(log_path)
}

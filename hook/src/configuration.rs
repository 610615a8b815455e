// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::constants::{
    ATTESTED_RETRIEVAL_PROGRAM, NSENTER_PROGRAM, RAKSH_EPHEMERAL_ROOT, RAKSH_SECRET_MOUNT_POINT,
    RAKSH_SPEC_MOUNT_POINT, RAKSH_USER_SECRETS_DIR, SVM_INDICATOR_PATH,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "raksh-hook", about = "Raksh OCI pre-start hook", disable_version_flag = true)]
pub struct HookOptions {
    /// Start the hook
    #[arg(
        short = 's',
        action = ArgAction::Set,
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true",
        require_equals = true
    )]
    pub start: bool,
    /// Print the hook's version
    #[arg(long = "version", action = ArgAction::SetTrue)]
    pub version: bool,
}

impl Default for HookOptions {
    fn default() -> Self {
        HookOptions {
            start: true,
            version: false,
        }
    }
}

impl HookOptions {
    /// Parses the hook flags, accepting Go-style spellings (`-version`, `--s`).
    pub fn parse_normalized<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        HookOptions::parse_from(normalize_args(args))
    }
}

/// Rewrites single-dash long flags and double-dash short flags into the
/// forms clap understands.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-version") => OsString::from("--version"),
            Some(flag) if flag == "--s" || flag.starts_with("--s=") => OsString::from(&flag[1..]),
            _ => arg,
        })
        .collect()
}

/// Paths and external programs used by the hook components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    /// In-container destination of the secrets bind mount
    pub secrets_mount_point: String,
    /// In-container destination of the encrypted config map bind mount
    pub spec_mount_point: String,
    /// Subdirectory of the secrets source holding user secrets
    pub user_secrets_dir: String,
    /// In-memory directory for attested secrets and decrypted artifacts
    pub ephemeral_root: PathBuf,
    pub tee_indicator: PathBuf,
    pub nsenter_program: String,
    pub retrieval_program: String,
}

impl Default for HookConfig {
    fn default() -> Self {
        HookConfig {
            secrets_mount_point: RAKSH_SECRET_MOUNT_POINT.to_string(),
            spec_mount_point: RAKSH_SPEC_MOUNT_POINT.to_string(),
            user_secrets_dir: RAKSH_USER_SECRETS_DIR.to_string(),
            ephemeral_root: PathBuf::from(RAKSH_EPHEMERAL_ROOT),
            tee_indicator: PathBuf::from(SVM_INDICATOR_PATH),
            nsenter_program: NSENTER_PROGRAM.to_string(),
            retrieval_program: ATTESTED_RETRIEVAL_PROGRAM.to_string(),
        }
    }
}

impl HookConfig {
    /// Mount points removed from the container once secrets are staged, in
    /// unmount order.
    pub fn remediation_targets(&self) -> Vec<String> {
        vec![self.spec_mount_point.clone(), self.secrets_mount_point.clone()]
    }
}

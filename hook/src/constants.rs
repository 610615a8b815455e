// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// In-container mount points declared by the bundle
pub const RAKSH_SECRET_MOUNT_POINT: &str = "/etc/raksh/secrets";
pub const RAKSH_SPEC_MOUNT_POINT: &str = "/etc/raksh/spec";
/// Subdirectory of the secrets mount holding user supplied secrets
pub const RAKSH_USER_SECRETS_DIR: &str = "user";

// Secret file names
pub const CONFIG_MAP_KEY_FILE_NAME: &str = "configMapKey";
pub const IMAGE_KEY_FILE_NAME: &str = "imageKey";
pub const NONCE_FILE_NAME: &str = "nonce";
pub const PROPERTIES_FILE_NAME: &str = "properties";
pub const DECRYPTED_CONFIG_MAP_FILE_NAME: &str = "decryptedConfigMap";

/// In-memory area of the VM used for attested secrets and decrypted artifacts
pub const RAKSH_EPHEMERAL_ROOT: &str = "/run/raksh/secrets";

/// Reads "1" on a secure VM (SVM/PEF)
pub const SVM_INDICATOR_PATH: &str = "/sys/devices/system/cpu/svm";

pub const NSENTER_PROGRAM: &str = "nsenter";
pub const ATTESTED_RETRIEVAL_PROGRAM: &str = "esmb-get-file";

pub const BUNDLE_CONFIG_FILE_NAME: &str = "config.json";
pub const BUNDLE_ROOTFS_DIR: &str = "rootfs";

pub const LOG_DIR_ENV: &str = "RAKSH_HOOK_LOG_DIR";
pub const LOG_DIR_NAME: &str = "raksh-hook";
pub const LOG_FILE_NAME: &str = "hook.log";

/// Persisted plaintext is readable by the owner only
pub const SECRET_FILE_MODE: u32 = 0o600;

// AES-GCM parameters
pub const AES_128_KEY_LENGTH: usize = 16;
pub const AES_256_KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;

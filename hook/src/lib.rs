// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Raksh Hook
//!
//! OCI pre-start hook that provisions secrets into a confidential container.
//!
//! The runtime invokes the hook once per container start with the container
//! `State` on stdin. The hook decrypts the secrets delivered through two bind
//! mounts, stages the plaintext in the VM's in-memory area, and then removes
//! the encrypted mounts from the running container.
//!
//! ## Architecture
//!
//! ```text
//! stdin State -> bundle config.json -> secret source -> AES-GCM
//!                                          |               |
//!                            (SVM) esmb-get-file      secret store (/run/raksh)
//!                                                          |
//!                                          nsenter umount in the container
//! ```
//!
//! ## Modules
//!
//! - [`bundle`]: OCI state and bundle mount resolution
//! - [`configuration`]: CLI flags and hook paths
//! - [`constants`]: Well-known mount points, file names and programs
//! - [`crypto`]: AES-GCM decryption
//! - [`errors`]: Error taxonomy
//! - `fakes`: In-memory namespace and attested channel (`test-util` feature)
//! - [`logging`]: Log file bootstrap
//! - [`pipeline`]: The hook state machine
//! - [`probe`]: Secure VM detection
//! - [`remediation`]: Unmounting encrypted mounts inside the container
//! - [`secrets`]: Filesystem and attested secret sources
//! - [`store`]: In-memory staging of decrypted artifacts
//!
//! ## Usage
//!
//! ```bash
//! raksh-hook -s < state.json
//! raksh-hook -version
//! ```
//!
//! ## Security Considerations
//!
//! - Secret material is zeroized on drop and never logged
//! - Encrypted mounts are only removed after every plaintext artifact is staged
//! - Failures are logged and the container still starts (fail-open)

pub mod bundle;
pub mod configuration;
pub mod constants;
pub mod crypto;
pub mod errors;
#[cfg(any(test, feature = "test-util"))]
pub mod fakes;
pub mod logging;
pub mod pipeline;
pub mod probe;
pub mod remediation;
pub mod secrets;
pub mod store;

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Trusted execution capability detection.

use std::cell::OnceCell;
use std::fs;
use std::path::PathBuf;

/// Execution environment the hook is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Plain VM or host, secrets arrive as bind-mounted files
    Standard,
    /// Secure VM (SVM/PEF), secrets are released by the ultravisor
    SecureVm,
}

impl Platform {
    pub fn is_tee(&self) -> bool {
        matches!(self, Platform::SecureVm)
    }
}

pub trait CapabilityProbe {
    fn platform(&self) -> Platform;
}

/// Reads the platform indicator file once and caches the answer.
pub struct IndicatorFileProbe {
    indicator: PathBuf,
    cached: OnceCell<Platform>,
}

impl IndicatorFileProbe {
    pub fn new(indicator: impl Into<PathBuf>) -> Self {
        Self {
            indicator: indicator.into(),
            cached: OnceCell::new(),
        }
    }

    fn read_indicator(&self) -> Platform {
        match fs::read_to_string(&self.indicator) {
            Ok(value) if value.trim_end_matches('\n') == "1" => {
                tracing::info!("[hook] it is a VM with SVM/PEF support");
                Platform::SecureVm
            }
            Ok(_) => {
                tracing::info!("[hook] it is not an SVM");
                Platform::Standard
            }
            Err(err) => {
                tracing::error!(
                    "[hook] error reading svm file {}: {:?}",
                    self.indicator.display(),
                    err
                );
                Platform::Standard
            }
        }
    }
}

impl CapabilityProbe for IndicatorFileProbe {
    fn platform(&self) -> Platform {
        *self.cached.get_or_init(|| self.read_indicator())
    }
}

/// Probe with a preset answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub Platform);

impl CapabilityProbe for FixedProbe {
    fn platform(&self) -> Platform {
        self.0
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The pre-start hook as a one-way state machine.
//!
//! ```text
//! Init -> ReadState -> ResolveMounts -> FetchSecrets -> DecryptConfig
//!      -> PersistSecrets -> RemediateMounts -> Done
//! ```
//!
//! Any step may fail, which moves the pipeline to the absorbing `Failed` state
//! and skips every later step. `RemediateMounts` is only entered after
//! `PersistSecrets` succeeded, so the encrypted mounts are never removed while
//! the plaintext is not yet staged. Nothing is retried or rolled back.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::bundle::{ContainerState, resolve_mount_source};
use crate::configuration::HookConfig;
use crate::constants::{DECRYPTED_CONFIG_MAP_FILE_NAME, PROPERTIES_FILE_NAME};
use crate::crypto;
use crate::errors::HookError;
use crate::probe::{CapabilityProbe, IndicatorFileProbe, Platform};
use crate::remediation::{MountRemediator, NamespaceExecutor, Nsenter, RemediationReport};
use crate::secrets::{
    AttestedRetriever, AttestedTeeSource, FilesystemSource, SecretMaterial, SecretSource,
    UltravisorRetriever, UserSecretMap, read_user_secrets,
};
use crate::store::{SecretCategory, SecretStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequests {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: ResourceRequests,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    #[serde(rename = "containerPort", default)]
    pub container_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub resources: Resources,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub cwd: String,
    pub ports: Vec<ContainerPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

/// The decrypted config map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedSpec {
    #[serde(default)]
    pub spec: PodSpec,
}

impl DecryptedSpec {
    pub fn from_yaml(document: &[u8]) -> Result<Self, HookError> {
        Ok(serde_yaml::from_slice(document)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    ReadState,
    ResolveMounts,
    FetchSecrets,
    DecryptConfig,
    PersistSecrets,
    RemediateMounts,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

/// What a successful run produced. Kept in memory only.
pub struct HookOutcome {
    pub container_id: String,
    pub spec: DecryptedSpec,
    pub user_secrets: UserSecretMap,
    pub remediation: RemediationReport,
}

impl fmt::Debug for HookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user_secrets: Vec<&str> = self.user_secrets.keys().map(String::as_str).collect();
        f.debug_struct("HookOutcome")
            .field("container_id", &self.container_id)
            .field("spec", &self.spec)
            .field("user_secrets", &format_args!("<redacted: {user_secrets:?}>"))
            .field("remediation", &self.remediation)
            .finish()
    }
}

struct ResolvedMounts {
    secrets_source: PathBuf,
    spec_source: PathBuf,
}

struct DecryptedArtifacts {
    config_map: Zeroizing<Vec<u8>>,
    spec: DecryptedSpec,
    user_secrets: UserSecretMap,
}

pub struct HookPipeline {
    config: HookConfig,
    platform: Platform,
    retriever: Box<dyn AttestedRetriever>,
    remediator: MountRemediator<Box<dyn NamespaceExecutor>>,
    store: SecretStore,
    state: PipelineState,
    trace: Vec<PipelineState>,
}

impl HookPipeline {
    /// Builds the pipeline; the platform is probed here, once.
    pub fn new(
        config: HookConfig,
        probe: &dyn CapabilityProbe,
        retriever: Box<dyn AttestedRetriever>,
        executor: Box<dyn NamespaceExecutor>,
    ) -> Self {
        let platform = probe.platform();
        tracing::info!("[hook] platform: {:?}", platform);

        let remediator = MountRemediator::with_targets(executor, config.remediation_targets());
        let store = SecretStore::new(&config.ephemeral_root);

        Self {
            config,
            platform,
            retriever,
            remediator,
            store,
            state: PipelineState::Init,
            trace: vec![PipelineState::Init],
        }
    }

    /// Pipeline wired to the real platform indicator and utilities.
    pub fn from_config(config: HookConfig) -> Self {
        let probe = IndicatorFileProbe::new(&config.tee_indicator);
        let retriever = Box::new(UltravisorRetriever::new(&config.retrieval_program));
        let executor = Box::new(Nsenter::new(&config.nsenter_program));
        Self::new(config, &probe, retriever, executor)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered so far, starting with `Init`.
    pub fn trace(&self) -> &[PipelineState] {
        &self.trace
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn enter(&mut self, next: PipelineState) {
        tracing::debug!("[hook] {:?} -> {:?}", self.state, next);
        self.state = next;
        self.trace.push(next);
    }

    fn step<T>(
        &mut self,
        current: PipelineState,
        result: Result<T, HookError>,
    ) -> Result<T, HookError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::error!("[hook] {:?} failed: {}", current, err);
                self.enter(PipelineState::Failed);
                Err(err)
            }
        }
    }

    /// Runs one pre-start event read from `input` (the OCI `State` JSON).
    ///
    /// # Errors
    ///
    /// Returns the first failure; the pipeline is then in `Failed` and no
    /// later step has run.
    pub fn run<R: Read>(&mut self, input: R) -> Result<HookOutcome, HookError> {
        if self.state != PipelineState::Init {
            return Err(HookError::InvalidState(format!(
                "pipeline already ran and is {:?}",
                self.state
            )));
        }

        self.enter(PipelineState::ReadState);
        let result = ContainerState::from_reader(input);
        let state = self.step(PipelineState::ReadState, result)?;
        tracing::debug!("[hook] spec.State is {:?}", state);

        self.enter(PipelineState::ResolveMounts);
        let result = self.resolve_mounts(&state);
        let mounts = self.step(PipelineState::ResolveMounts, result)?;

        self.enter(PipelineState::FetchSecrets);
        let result = self.fetch_secrets(&mounts);
        let material = self.step(PipelineState::FetchSecrets, result)?;

        self.enter(PipelineState::DecryptConfig);
        let result = self.decrypt_config(&mounts, &material);
        let artifacts = self.step(PipelineState::DecryptConfig, result)?;
        drop(material);

        self.enter(PipelineState::PersistSecrets);
        let result = self.persist_secrets(&mounts, &artifacts);
        self.step(PipelineState::PersistSecrets, result)?;

        self.enter(PipelineState::RemediateMounts);
        let result = self.remediator.remediate(state.pid, &state.bundle_path);
        let remediation = self.step(PipelineState::RemediateMounts, result)?;

        self.enter(PipelineState::Done);

        Ok(HookOutcome {
            container_id: state.id,
            spec: artifacts.spec,
            user_secrets: artifacts.user_secrets,
            remediation,
        })
    }

    fn resolve_mounts(&self, state: &ContainerState) -> Result<ResolvedMounts, HookError> {
        let secrets_source =
            resolve_mount_source(&state.bundle_path, &self.config.secrets_mount_point)?;
        tracing::info!("[hook] source mount path for Raksh secret is {}", secrets_source.display());

        let spec_source = resolve_mount_source(&state.bundle_path, &self.config.spec_mount_point)?;
        tracing::info!(
            "[hook] source mount path for Raksh encrypted config map is {}",
            spec_source.display()
        );

        Ok(ResolvedMounts {
            secrets_source,
            spec_source,
        })
    }

    fn fetch_secrets(&self, mounts: &ResolvedMounts) -> Result<SecretMaterial, HookError> {
        let source: Box<dyn SecretSource + '_> = match self.platform {
            Platform::SecureVm => Box::new(AttestedTeeSource::new(
                &self.config.ephemeral_root,
                &*self.retriever,
            )),
            Platform::Standard => Box::new(FilesystemSource::new(&mounts.secrets_source)),
        };
        SecretMaterial::fetch(source.as_ref())
    }

    fn decrypt_config(
        &self,
        mounts: &ResolvedMounts,
        material: &SecretMaterial,
    ) -> Result<DecryptedArtifacts, HookError> {
        tracing::info!("[hook] reading encrypted config map");

        let properties = mounts.spec_source.join(PROPERTIES_FILE_NAME);
        let encrypted = std::fs::read(&properties).map_err(|err| {
            HookError::SecretNotFound(format!("{}: {err}", properties.display()))
        })?;

        let config_map = crypto::decrypt(&encrypted, &material.config_map_key, &material.nonce)?;
        let spec = DecryptedSpec::from_yaml(&config_map)?;
        tracing::debug!("[hook] decrypted config map with {} containers", spec.spec.containers.len());

        let user_secrets = read_user_secrets(
            &mounts.secrets_source.join(&self.config.user_secrets_dir),
            &material.config_map_key,
            &material.nonce,
        )?;

        Ok(DecryptedArtifacts {
            config_map,
            spec,
            user_secrets,
        })
    }

    fn persist_secrets(
        &self,
        mounts: &ResolvedMounts,
        artifacts: &DecryptedArtifacts,
    ) -> Result<(), HookError> {
        self.store.ensure_distinct_from(&mounts.secrets_source)?;
        self.store.ensure_distinct_from(&mounts.spec_source)?;

        self.store.persist(
            SecretCategory::Config,
            DECRYPTED_CONFIG_MAP_FILE_NAME,
            &artifacts.config_map,
        )?;

        for (name, value) in &artifacts.user_secrets {
            self.store.persist(SecretCategory::User, name, value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fakes::{InMemoryNamespace, StaticRetriever};
    use crate::probe::FixedProbe;

    fn pipeline() -> HookPipeline {
        HookPipeline::new(
            HookConfig::default(),
            &FixedProbe(Platform::Standard),
            Box::new(StaticRetriever::new()),
            Box::new(InMemoryNamespace::default()),
        )
    }

    #[test]
    fn test_decrypted_spec_from_yaml() {
        let yaml = br#"
spec:
  containers:
    - name: app
      image: registry.example.com/app:1.0
      resources:
        requests:
          cpu: 500m
          memory: 128Mi
      args: ["--port", "8080"]
      env:
        - name: MODE
          value: production
      cwd: /srv
      ports:
        - containerPort: 8080
"#;
        let spec = DecryptedSpec::from_yaml(yaml).unwrap();
        let container = &spec.spec.containers[0];

        assert_eq!(container.name, "app");
        assert_eq!(container.image, "registry.example.com/app:1.0");
        assert_eq!(container.resources.requests.cpu, "500m");
        assert_eq!(container.resources.requests.memory, "128Mi");
        assert_eq!(container.args, vec!["--port", "8080"]);
        assert_eq!(
            container.env,
            vec![EnvVar {
                name: "MODE".to_string(),
                value: "production".to_string()
            }]
        );
        assert_eq!(container.cwd, "/srv");
        assert_eq!(container.ports[0].container_port, 8080);
    }

    #[test]
    fn test_decrypted_spec_minimal() {
        let spec = DecryptedSpec::from_yaml(b"spec: {containers: [{name: app, image: x}]}").unwrap();
        assert_eq!(
            spec.spec.containers,
            vec![ContainerSpec {
                name: "app".to_string(),
                image: "x".to_string(),
                ..ContainerSpec::default()
            }]
        );
    }

    #[test]
    fn test_decrypted_spec_malformed() {
        let result = DecryptedSpec::from_yaml(b"spec: [unterminated");
        assert!(matches!(result, Err(HookError::ConfigParseError(_))));
    }

    #[test]
    fn test_invalid_state_fails_immediately() {
        let mut pipeline = pipeline();

        let result = pipeline.run("{}".as_bytes());

        assert!(matches!(result, Err(HookError::InvalidState(_))));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert_eq!(
            pipeline.trace(),
            &[PipelineState::Init, PipelineState::ReadState, PipelineState::Failed]
        );
    }

    #[test]
    fn test_pipeline_runs_once() {
        let mut pipeline = pipeline();
        let _ = pipeline.run("{}".as_bytes());

        let result = pipeline.run("{}".as_bytes());
        assert!(matches!(result, Err(HookError::InvalidState(_))));
        assert_eq!(pipeline.trace().len(), 3);
    }

    #[test]
    fn test_outcome_debug_redacts_user_secrets() {
        let mut user_secrets = UserSecretMap::new();
        user_secrets.insert("db-password".to_string(), Zeroizing::new(b"s3cret".to_vec()));
        let outcome = HookOutcome {
            container_id: "c1".to_string(),
            spec: DecryptedSpec::default(),
            user_secrets,
            remediation: RemediationReport::default(),
        };

        let rendered = format!("{outcome:?}");

        assert!(rendered.contains("db-password"));
        assert!(rendered.contains("c1"));
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("115"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Done.is_terminal());
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::RemediateMounts.is_terminal());
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

/// Failures surfaced by the hook components.
///
/// Every component returns these to its caller unchanged; the pipeline stops
/// at the first one and never retries or rolls back earlier side effects.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("invalid container state: {0}")]
    InvalidState(String),
    #[error("unable to read bundle config: {0}")]
    ConfigReadError(String),
    #[error("unable to parse config: {0}")]
    ConfigParseError(String),
    #[error("no mount found for destination {0}")]
    MountNotFound(String),
    #[error("secret not found: {0}")]
    SecretNotFound(String),
    #[error("secret fetch unavailable: {0}")]
    SecretFetchUnavailable(String),
    #[error("unable to decode secret: {0}")]
    DecodeError(String),
    #[error("invalid key length: {0} bytes")]
    InvalidKeyLength(usize),
    #[error("invalid nonce length: {0} bytes")]
    InvalidNonceLength(usize),
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("unable to persist secret: {0}")]
    PersistError(String),
    #[error("unable to remediate mounts: {0}")]
    RemediationError(String),
}

impl From<serde_json::Error> for HookError {
    fn from(source: serde_json::Error) -> Self {
        tracing::error!("[hook] {:?}", source);
        HookError::ConfigParseError(source.to_string())
    }
}

impl From<serde_yaml::Error> for HookError {
    fn from(source: serde_yaml::Error) -> Self {
        tracing::error!("[hook] {:?}", source);
        HookError::ConfigParseError(source.to_string())
    }
}

impl From<data_encoding::DecodeError> for HookError {
    fn from(source: data_encoding::DecodeError) -> Self {
        HookError::DecodeError(source.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = HookError::MountNotFound("/etc/raksh/missing".to_string());
        assert_eq!(
            err.to_string(),
            "no mount found for destination /etc/raksh/missing"
        );
    }

    #[test]
    fn test_from_serde_json_is_parse_error() {
        let source = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: HookError = source.into();
        assert!(matches!(err, HookError::ConfigParseError(_)));
    }

    #[test]
    fn test_from_decode_error() {
        let source = data_encoding::BASE64.decode(b"not base64!").unwrap_err();
        let err: HookError = source.into();
        assert!(matches!(err, HookError::DecodeError(_)));
    }
}

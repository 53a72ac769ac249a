// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider configuration: which LLM-agent CLIs a workspace may run and how
//! they authenticate. Auth material is opaque to everything except the agent
//! environment builder; read-back surfaces only `{hasValue: true}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Known agent providers. The key doubles as the CLI binary name resolved by
/// the sandbox command allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKey {
    Codex,
    Claude,
}

impl ProviderKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKey::Codex => "codex",
            ProviderKey::Claude => "claude",
        }
    }
}

impl std::fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderAuthKind {
    /// Plain API key, injected as the provider's key env var.
    ApiKey,
    /// Base64-encoded auth JSON blob, written to a credential file.
    AuthJsonB64,
    /// One-time setup token consumed by the CLI's own login flow.
    SetupToken,
}

/// Auth material for one provider. `value` is opaque and never logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAuth {
    #[serde(rename = "type")]
    pub kind: ProviderAuthKind,
    pub value: String,
}

/// Per-provider configuration stored on the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProviderAuth>,
}

/// Provider map as stored on a workspace record.
pub type ProviderMap = BTreeMap<ProviderKey, ProviderConfig>;

/// Validation failures for provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderConfigError {
    #[error("provider {0} is enabled but has no auth configured")]
    EnabledWithoutAuth(ProviderKey),
    #[error("provider {0} auth value is empty")]
    EmptyAuthValue(ProviderKey),
    #[error("provider {provider} auth_json_b64 value is not valid base64")]
    InvalidBase64 { provider: ProviderKey },
}

/// Validate a provider map: enabled ⇒ auth present and decodable.
pub fn validate_providers(providers: &ProviderMap) -> Result<(), ProviderConfigError> {
    use base64::Engine as _;
    for (key, config) in providers {
        if let Some(auth) = &config.auth {
            if auth.value.is_empty() {
                return Err(ProviderConfigError::EmptyAuthValue(*key));
            }
            if auth.kind == ProviderAuthKind::AuthJsonB64
                && base64::engine::general_purpose::STANDARD.decode(&auth.value).is_err()
            {
                return Err(ProviderConfigError::InvalidBase64 { provider: *key });
            }
        } else if config.enabled {
            return Err(ProviderConfigError::EnabledWithoutAuth(*key));
        }
    }
    Ok(())
}

/// Sanitised view of one provider for config read-back: auth material is
/// replaced by a presence flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitisedProviderConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<SanitisedAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitisedAuth {
    #[serde(rename = "type")]
    pub kind: ProviderAuthKind,
    #[serde(rename = "hasValue")]
    pub has_value: bool,
}

/// Strip auth values from a provider map for API responses.
pub fn sanitise_providers(
    providers: &ProviderMap,
) -> BTreeMap<ProviderKey, SanitisedProviderConfig> {
    providers
        .iter()
        .map(|(key, config)| {
            let auth = config.auth.as_ref().map(|a| SanitisedAuth {
                kind: a.kind,
                has_value: !a.value.is_empty(),
            });
            (*key, SanitisedProviderConfig { enabled: config.enabled, auth })
        })
        .collect()
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;

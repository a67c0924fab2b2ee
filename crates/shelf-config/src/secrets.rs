// SPDX-License-Identifier: MIT OR Apache-2.0
//! Secret indirection: provider API keys come through a [`SecretSource`]
//! so deployments can choose plain environment variables or a vault.
//!
//! A missing secret is an error value, never a panic, and secret material
//! never appears in `Debug`/`Display` output or logs.

use async_trait::async_trait;
use std::fmt;

// ---------------------------------------------------------------------------
// SecretString
// ---------------------------------------------------------------------------

/// A secret value whose `Debug`/`Display` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret for use in a request. Call sites should pass the
    /// result straight into a header or query parameter.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

// ---------------------------------------------------------------------------
// SecretError
// ---------------------------------------------------------------------------

/// Errors from secret resolution.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// The secret is not configured (or configured empty).
    #[error("secret '{name}' is not configured")]
    Missing {
        /// Secret name that was requested.
        name: String,
    },

    /// The secret backend could not be reached.
    #[error("secret backend unavailable: {reason}")]
    Unavailable {
        /// Human-readable detail, with no secret material.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// SecretSource
// ---------------------------------------------------------------------------

/// Abstraction over where secrets live.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Resolve the named secret.
    ///
    /// # Errors
    ///
    /// [`SecretError::Missing`] when unset or empty;
    /// [`SecretError::Unavailable`] when the backend cannot be reached.
    async fn get(&self, name: &str) -> Result<SecretString, SecretError>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets;

#[async_trait]
impl SecretSource for EnvSecrets {
    async fn get(&self, name: &str) -> Result<SecretString, SecretError> {
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(SecretString::new(value)),
            _ => Err(SecretError::Missing {
                name: name.to_string(),
            }),
        }
    }
}

/// Reads secrets from a Vault KV v2 mount over HTTP.
pub struct VaultSecrets {
    base_url: String,
    token: SecretString,
    client: reqwest::Client,
}

impl VaultSecrets {
    /// A vault source reading `{base_url}/v1/secret/data/{name}`.
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SecretSource for VaultSecrets {
    async fn get(&self, name: &str) -> Result<SecretString, SecretError> {
        let url = format!("{}/v1/secret/data/{name}", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", self.token.expose())
            .send()
            .await
            .map_err(|e| SecretError::Unavailable {
                reason: e.without_url().to_string(),
            })?;

        if response.status().as_u16() == 404 {
            return Err(SecretError::Missing {
                name: name.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(SecretError::Unavailable {
                reason: format!("vault returned status {}", response.status().as_u16()),
            });
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| SecretError::Unavailable {
                reason: e.without_url().to_string(),
            })?;

        match body["data"]["data"]["value"].as_str() {
            Some(value) if !value.trim().is_empty() => Ok(SecretString::new(value)),
            _ => Err(SecretError::Missing {
                name: name.to_string(),
            }),
        }
    }
}

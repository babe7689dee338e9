//! Credential references and the secrets they resolve to.
//!
//! A [`CredentialReference`] is only ever a CI/CD variable *name*. The value
//! lives in GitLab's variable store and is held in memory as a
//! [`ResolvedSecret`], whose `Debug` output is redacted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use subtle::ConstantTimeEq;

use crate::constants::SECRET_BYTES;
use crate::error::{AutomationError, AutomationResult};
use crate::gitlab::ProjectHost;

const MAX_VARIABLE_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialReference(String);

impl CredentialReference {
    pub fn new(name: impl Into<String>) -> AutomationResult<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_VARIABLE_NAME_LEN
            && name
                .bytes()
                .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_');
        if !valid {
            return Err(AutomationError::config(format!(
                "{name:?} is not a valid CI/CD variable name"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOrigin {
    Generated,
    Fetched,
}

#[derive(Clone)]
pub struct ResolvedSecret {
    name: CredentialReference,
    value: String,
    origin: SecretOrigin,
}

impl ResolvedSecret {
    pub fn new(name: CredentialReference, value: String, origin: SecretOrigin) -> Self {
        Self {
            name,
            value,
            origin,
        }
    }

    pub fn name(&self) -> &CredentialReference {
        &self.name
    }

    pub fn origin(&self) -> SecretOrigin {
        self.origin
    }

    /// The secret itself. Never log or persist the returned value.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("origin", &self.origin)
            .finish()
    }
}

impl PartialEq for ResolvedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.origin == other.origin
            && bool::from(self.value.as_bytes().ct_eq(other.value.as_bytes()))
    }
}

impl Eq for ResolvedSecret {}

/// Fetch the current value of `reference` from the project's variable store.
pub fn resolve<H: ProjectHost + ?Sized>(
    host: &H,
    reference: &CredentialReference,
) -> AutomationResult<ResolvedSecret> {
    tracing::debug!(variable = %reference, project = host.path(), "resolving variable");
    match host.get_variable(reference.as_str())? {
        Some(variable) => Ok(ResolvedSecret::new(
            reference.clone(),
            variable.value,
            SecretOrigin::Fetched,
        )),
        None => Err(AutomationError::SecretNotFound {
            project: host.path().to_string(),
            name: reference.to_string(),
        }),
    }
}

/// Base64 of the given bytes, cut at the first `=` and trimmed.
pub fn encode_secret(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    encoded
        .split('=')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Generates secrets, at most once per variable name for its lifetime (one run).
pub struct SecretGenerator<R = OsRng> {
    rng: R,
    generated: HashMap<CredentialReference, ResolvedSecret>,
}

impl SecretGenerator<OsRng> {
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }
}

impl Default for SecretGenerator<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> SecretGenerator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            generated: HashMap::new(),
        }
    }

    pub fn generate(
        &mut self,
        reference: &CredentialReference,
    ) -> AutomationResult<ResolvedSecret> {
        if let Some(existing) = self.generated.get(reference) {
            return Ok(existing.clone());
        }

        let mut bytes = [0u8; SECRET_BYTES];
        self.rng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| AutomationError::SecretGeneration(format!("entropy source: {err}")))?;
        let value = encode_secret(&bytes);
        if value.is_empty() {
            return Err(AutomationError::SecretGeneration(format!(
                "empty secret produced for {reference}"
            )));
        }

        tracing::debug!(variable = %reference, "generated secret");
        let secret = ResolvedSecret::new(reference.clone(), value, SecretOrigin::Generated);
        self.generated.insert(reference.clone(), secret.clone());
        Ok(secret)
    }

    pub fn generated_count(&self) -> usize {
        self.generated.len()
    }
}

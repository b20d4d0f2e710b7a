//! Runtime configuration.
//!
//! Endpoints, the resolved identity table and polling policies, loaded
//! from JSON. Identities only ever enter the runtime through here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use oracle_program::domain::Identities;
use oracle_program::pubkey::Pubkey;

use crate::error::RuntimeError;
use crate::poll::PollPolicy;

pub const EPHEMERAL_PROVIDER_ENDPOINT_VAR: &str = "EPHEMERAL_PROVIDER_ENDPOINT";
pub const EPHEMERAL_WS_ENDPOINT_VAR: &str = "EPHEMERAL_WS_ENDPOINT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

impl From<ConfigError> for RuntimeError {
    fn from(e: ConfigError) -> Self {
        RuntimeError::Config(e.to_string())
    }
}

/// RPC and event-stream endpoints of one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub rpc: String,
    pub ws: String,
}

/// Bounded waits used by the coordinators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicies {
    /// Delegation handoff becoming visible on the ephemeral layer.
    #[serde(default = "default_propagation")]
    pub propagation: PollPolicy,
    /// Signature confirmation.
    #[serde(default = "default_confirmation")]
    pub confirmation: PollPolicy,
    /// Committed data becoming visible on the base layer.
    #[serde(default = "default_commit")]
    pub commit: PollPolicy,
    /// Oracle answer arriving in the record.
    #[serde(default = "default_oracle")]
    pub oracle: PollPolicy,
    /// Retries of writes rejected as not-yet-delegated.
    #[serde(default = "default_transient")]
    pub transient: PollPolicy,
}

fn default_propagation() -> PollPolicy {
    PollPolicy::fixed(6, 500)
}

fn default_confirmation() -> PollPolicy {
    PollPolicy::fixed(30, 400)
}

fn default_commit() -> PollPolicy {
    PollPolicy::fixed(20, 500)
}

fn default_oracle() -> PollPolicy {
    PollPolicy::fixed(15, 2000)
}

fn default_transient() -> PollPolicy {
    PollPolicy::exponential(5, 250, 4000)
}

impl Default for PollPolicies {
    fn default() -> Self {
        Self {
            propagation: default_propagation(),
            confirmation: default_confirmation(),
            commit: default_commit(),
            oracle: default_oracle(),
            transient: default_transient(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub base: Endpoint,
    pub ephemeral: Endpoint,
    pub identities: Identities,
    #[serde(default)]
    pub policies: PollPolicies,
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Devnet endpoints and the published program identities.
    pub fn devnet() -> Result<Self, ConfigError> {
        Self::from_json(DEVNET_CONFIG)
    }

    /// Apply `EPHEMERAL_PROVIDER_ENDPOINT` / `EPHEMERAL_WS_ENDPOINT`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply endpoint overrides from `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(rpc) = lookup(EPHEMERAL_PROVIDER_ENDPOINT_VAR).filter(|v| !v.is_empty()) {
            self.ephemeral.rpc = rpc;
        }
        if let Some(ws) = lookup(EPHEMERAL_WS_ENDPOINT_VAR).filter(|v| !v.is_empty()) {
            self.ephemeral.ws = ws;
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, policy) in [
            ("propagation", &self.policies.propagation),
            ("confirmation", &self.policies.confirmation),
            ("commit", &self.policies.commit),
            ("oracle", &self.policies.oracle),
            ("transient", &self.policies.transient),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Validation(format!(
                    "policy `{}` needs at least one attempt",
                    name
                )));
            }
        }
        let ids = &self.identities;
        if ids.program_id == Pubkey::default() {
            return Err(ConfigError::Validation("program_id is unset".into()));
        }
        if ids.oracle_program == ids.program_id || ids.task_queue_program == ids.program_id {
            return Err(ConfigError::Validation(
                "external programs must differ from program_id".into(),
            ));
        }
        Ok(())
    }
}

const DEVNET_CONFIG: &str = include_str!("../config/devnet.json");

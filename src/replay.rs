//! Line-oriented replay of requests through a limiter.
//!
//! Each input line is either a request, `<identifier> <policy> [endpoint]`,
//! or an admin command: `!reset <key>`, `!status <key> <policy>`, `!clear`.
//! Blank lines and lines starting with `#` are ignored.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{
    Decision, LimitKey, MemoryStore, Policy, PolicySet, RateLimiter, RequestStore, Status,
};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayCommand {
    /// Check a request against a named policy
    Check { key: LimitKey, policy: String },
    /// Forget a key's history
    Reset { key: String },
    /// Report a key's occupancy under a named policy
    Status { key: String, policy: String },
    /// Forget every key
    Clear,
}

impl ReplayCommand {
    /// Parse one line; `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let command = match fields.as_slice() {
            ["!clear"] => ReplayCommand::Clear,
            ["!reset", key] => ReplayCommand::Reset {
                key: key.to_string(),
            },
            ["!status", key, policy] => ReplayCommand::Status {
                key: key.to_string(),
                policy: policy.to_string(),
            },
            [admin, ..] if admin.starts_with('!') => {
                return Err(FloodgateError::InvalidCommand(format!(
                    "unknown or malformed admin command: {}",
                    line
                )));
            }
            [identifier, policy] => ReplayCommand::Check {
                key: LimitKey::new(*identifier),
                policy: policy.to_string(),
            },
            [identifier, policy, endpoint] => ReplayCommand::Check {
                key: LimitKey::scoped(*identifier, *endpoint),
                policy: policy.to_string(),
            },
            _ => {
                return Err(FloodgateError::InvalidCommand(format!(
                    "expected '<identifier> <policy> [endpoint]': {}",
                    line
                )));
            }
        };
        Ok(Some(command))
    }
}

/// Result of one replayed command, serialized as a JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ReplayOutput {
    Check {
        key: String,
        policy: String,
        #[serde(flatten)]
        decision: Decision,
    },
    Reset {
        key: String,
    },
    Status {
        key: String,
        policy: String,
        #[serde(flatten)]
        status: Status,
    },
    Clear,
}

impl ReplayOutput {
    /// Encode as one newline-terminated JSON line.
    pub fn to_json_line(&self) -> Result<Vec<u8>> {
        let mut encoded = serde_json::to_vec(self)?;
        encoded.push(b'\n');
        Ok(encoded)
    }
}

/// Drives a limiter from parsed commands.
pub struct Replayer<S: RequestStore = MemoryStore> {
    limiter: Arc<RateLimiter<S>>,
    policies: PolicySet,
}

impl<S: RequestStore> Replayer<S> {
    pub fn new(limiter: Arc<RateLimiter<S>>, policies: PolicySet) -> Self {
        Self { limiter, policies }
    }

    /// Parse and execute one line.
    pub fn handle_line(&self, line: &str) -> Result<Option<ReplayOutput>> {
        match ReplayCommand::parse(line)? {
            Some(command) => self.execute(command).map(Some),
            None => Ok(None),
        }
    }

    /// Execute one command.
    pub fn execute(&self, command: ReplayCommand) -> Result<ReplayOutput> {
        match command {
            ReplayCommand::Check { key, policy } => {
                let rule = self.policy(&policy)?;
                let key = key.to_string_key();
                let decision = self.limiter.check_limit(&key, rule);
                debug!(key = %key, policy = %policy, allowed = decision.allowed, "Replayed request");
                Ok(ReplayOutput::Check {
                    key,
                    policy,
                    decision,
                })
            }
            ReplayCommand::Reset { key } => {
                self.limiter.reset(&key);
                Ok(ReplayOutput::Reset { key })
            }
            ReplayCommand::Status { key, policy } => {
                let status = self.limiter.status(&key, self.policy(&policy)?);
                Ok(ReplayOutput::Status {
                    key,
                    policy,
                    status,
                })
            }
            ReplayCommand::Clear => {
                self.limiter.clear_all();
                Ok(ReplayOutput::Clear)
            }
        }
    }

    fn policy(&self, name: &str) -> Result<&Policy> {
        self.policies
            .get(name)
            .ok_or_else(|| FloodgateError::InvalidCommand(format!("unknown policy '{}'", name)))
    }
}

//! Admission policies and the named policy set.
//!
//! A [`Policy`] is only constructible through validation, so the limiter
//! never sees a zero quota or a zero-length window. Named policies are
//! loaded from YAML and overlay the built-in presets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{FloodgateError, Result};

/// Window shared by all built-in presets.
const PRESET_WINDOW_MS: u64 = 60_000;

/// A validated admission rule: at most `max_requests` per sliding `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    max_requests: u32,
    window_ms: u64,
    message: Option<String>,
}

impl Policy {
    /// Create a policy, rejecting a zero quota or a zero-length window.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        let window_ms = u64::try_from(window.as_millis()).map_err(|_| {
            FloodgateError::Config(format!("window {:?} is too long", window))
        })?;
        Self::from_millis(max_requests, window_ms)
    }

    /// Create a policy from a window expressed in milliseconds.
    pub fn from_millis(max_requests: u32, window_ms: u64) -> Result<Self> {
        if max_requests == 0 {
            return Err(FloodgateError::Config(
                "max_requests must be at least 1".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(FloodgateError::Config(
                "window must be at least 1ms".to_string(),
            ));
        }
        Ok(Self {
            max_requests,
            window_ms,
            message: None,
        })
    }

    /// Attach the message returned with denied decisions.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Baseline per-identifier ceiling: 60 requests per minute.
    pub fn global() -> Self {
        Self::preset(60, "Too many requests from this client, please slow down.")
    }

    /// Expensive upload endpoints: 10 requests per minute.
    pub fn upload() -> Self {
        Self::preset(10, "Too many uploads, please try again in a minute.")
    }

    /// OCR, the heaviest endpoint: 5 requests per minute.
    pub fn ocr() -> Self {
        Self::preset(5, "Too many OCR requests, please try again in a minute.")
    }

    /// General API ceiling: 30 requests per minute.
    pub fn api() -> Self {
        Self::preset(30, "Too many API requests, please try again later.")
    }

    fn preset(max_requests: u32, message: &str) -> Self {
        Self {
            max_requests,
            window_ms: PRESET_WINDOW_MS,
            message: Some(message.to_string()),
        }
    }

    /// Maximum admitted requests per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Denial message, if one was configured.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Serialized form of a policy, as found in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Number of requests admitted per window
    pub max_requests: u32,
    /// Sliding window length in milliseconds
    pub window_ms: u64,
    /// Optional denial message
    #[serde(default)]
    pub message: Option<String>,
}

impl TryFrom<PolicyRule> for Policy {
    type Error = FloodgateError;

    fn try_from(rule: PolicyRule) -> Result<Self> {
        let policy = Policy::from_millis(rule.max_requests, rule.window_ms)?;
        Ok(match rule.message {
            Some(message) => policy.with_message(message),
            None => policy,
        })
    }
}

impl From<&Policy> for PolicyRule {
    fn from(policy: &Policy) -> Self {
        Self {
            max_requests: policy.max_requests,
            window_ms: policy.window_ms,
            message: policy.message.clone(),
        }
    }
}

/// Wrapper accepted by [`PolicySet::from_yaml`] alongside a bare mapping.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    policies: BTreeMap<String, PolicyRule>,
}

/// Named policies, seeded with the `global`, `upload`, `ocr` and `api` presets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    policies: BTreeMap<String, Policy>,
}

impl Default for PolicySet {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert("global".to_string(), Policy::global());
        policies.insert("upload".to_string(), Policy::upload());
        policies.insert("ocr".to_string(), Policy::ocr());
        policies.insert("api".to_string(), Policy::api());
        Self { policies }
    }
}

impl PolicySet {
    /// Build a set from configured rules, overlaying the presets.
    pub fn from_rules<I>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, PolicyRule)>,
    {
        let mut set = Self::default();
        for (name, rule) in rules {
            let policy = Policy::try_from(rule)
                .map_err(|e| FloodgateError::Config(format!("policy '{}': {}", name, e)))?;
            set.insert(name, policy);
        }
        debug!(policies = set.len(), "Policy set loaded");
        Ok(set)
    }

    /// Load a policy set from YAML, either `policies: {name: rule}` or a bare
    /// `{name: rule}` mapping.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(file) = serde_yaml::from_str::<PolicyFile>(yaml) {
            return Self::from_rules(file.policies);
        }

        let rules: BTreeMap<String, PolicyRule> = serde_yaml::from_str(yaml)?;
        Self::from_rules(rules)
    }

    /// Add or replace a named policy.
    pub fn insert(&mut self, name: impl Into<String>, policy: Policy) {
        self.policies.insert(name.into(), policy);
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Iterate over `(name, policy)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Policy)> {
        self.policies.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// The longest window of any policy in the set.
    pub fn max_window(&self) -> Option<Duration> {
        self.policies.values().map(Policy::window).max()
    }
}

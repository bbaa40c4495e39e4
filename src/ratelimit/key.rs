//! Composite limiter keys.
//!
//! The limiter treats keys as opaque strings. Callers that want a separate
//! budget per endpoint compose `identifier:endpoint` here before checking.

/// A key that identifies one rate-limited budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey {
    /// The client identifier (source address, API key, ...)
    pub identifier: String,
    /// Optional endpoint scope
    pub scope: Option<String>,
}

impl LimitKey {
    /// A key covering every request from `identifier`.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            scope: None,
        }
    }

    /// A key covering requests from `identifier` to one endpoint.
    pub fn scoped(identifier: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            scope: Some(scope.into()),
        }
    }

    /// The string handed to the limiter.
    pub fn to_string_key(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}:{}", self.identifier, scope),
            None => self.identifier.clone(),
        }
    }
}

impl std::fmt::Display for LimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

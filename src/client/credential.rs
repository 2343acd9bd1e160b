//! Bearer credential sources.
//!
//! The session/credential collaborator owns the token. The monitor only asks
//! for it per request; it never stores, refreshes or retries on expiry.

use std::fmt;

pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, if the operator is signed in.
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token handed over at startup.
#[derive(Clone)]
pub struct StaticCredential {
    token: Option<String>,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.trim().is_empty()).then_some(token),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredential")
            .field("present", &self.token.is_some())
            .finish()
    }
}

/// Reads the token from an environment variable on every request, so an
/// external login helper can rotate it underneath a running monitor.
#[derive(Clone, Debug)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredential {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_static_token_is_absent() {
        assert!(StaticCredential::new("  ").bearer_token().is_none());
        assert_eq!(
            StaticCredential::new("abc").bearer_token().as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn debug_does_not_leak_token() {
        let dbg = format!("{:?}", StaticCredential::new("secret-token"));
        assert!(!dbg.contains("secret-token"));
    }
}

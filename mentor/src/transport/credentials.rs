//! Bearer credentials attached to every outgoing request.

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
#[error("credential unavailable: {0}")]
pub struct CredentialError(pub String);

/// Source of a fresh bearer token, consulted once per request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// `Ok(None)` means the request goes out without an `Authorization` header.
    async fn bearer_token(&self) -> Result<Option<String>, CredentialError>;
}

/// Token fixed at construction (from config).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token)
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.0.clone())
    }
}

/// Token read from a process environment variable at request time, so a
/// rotated credential is picked up without rebuilding the client.
#[derive(Debug, Clone)]
pub struct EnvToken {
    key: String,
}

impl EnvToken {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl TokenSource for EnvToken {
    async fn bearer_token(&self) -> Result<Option<String>, CredentialError> {
        match std::env::var(&self.key) {
            Ok(token) if !token.trim().is_empty() => Ok(Some(token)),
            Ok(_) => Ok(None),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(CredentialError(format!("{}: {e}", self.key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_each_call() {
        let source = StaticToken::new(Some("abc".to_string()));
        assert_eq!(source.bearer_token().await.unwrap().as_deref(), Some("abc"));
        assert_eq!(source.bearer_token().await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn missing_env_token_sends_no_credential() {
        let source = EnvToken::new("MENTOR_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert_eq!(source.bearer_token().await.unwrap(), None);
    }
}

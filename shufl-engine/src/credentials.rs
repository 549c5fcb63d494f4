//! Per-user bearer credentials

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Supplies the catalog bearer credential for a user.
///
/// Refreshing expired credentials is the provider's concern.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, user_id: &str) -> Result<String>;
}

/// In-memory credential map
#[derive(Debug, Default)]
pub struct StaticCredentials {
    tokens: RwLock<HashMap<String, String>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(user_id.into(), token.into());
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    /// Add or replace a user's credential
    pub async fn set(&self, user_id: impl Into<String>, token: impl Into<String>) {
        self.tokens.write().await.insert(user_id.into(), token.into());
    }

    pub async fn remove(&self, user_id: &str) {
        self.tokens.write().await.remove(user_id);
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self, user_id: &str) -> Result<String> {
        self.tokens
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::Credential(user_id.to_string()))
    }
}

//! Principals issued by the identity service
//!
//! The pipeline never authenticates anyone itself. It receives an opaque
//! bearer token, asks a [`PrincipalResolver`] who that is, and trusts the
//! answer. Ownership of consultations is keyed by [`PrincipalId`].

use crate::error::{AuthError, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable identity of a principal (the owning doctor of a consultation)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Admin,
}

/// The authenticated actor performing a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub role: Role,
}

impl Principal {
    pub fn doctor(id: impl Into<String>) -> Self {
        Self {
            id: PrincipalId::new(id),
            role: Role::Doctor,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: PrincipalId::new(id),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self, action: &str) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(Error::forbidden(format!("{action} requires the admin role")))
        }
    }

    /// Owner-or-admin check used by update and delete
    pub fn may_modify(&self, owner: &PrincipalId) -> bool {
        self.is_admin() || &self.id == owner
    }
}

/// Resolves a bearer token into a principal
#[async_trait::async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Principal>;
}

/// One provisioned token (see `[auth]` in the configuration file)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub principal_id: String,
    pub role: Role,
}

/// Token table provisioned by the identity service
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Principal>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_grants(grants: &[TokenGrant]) -> Self {
        let mut tokens = Self::new();
        for grant in grants {
            tokens.insert(
                grant.token.clone(),
                Principal {
                    id: PrincipalId::new(grant.principal_id.clone()),
                    role: grant.role,
                },
            );
        }
        tokens
    }

    pub fn insert(&mut self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }

    pub fn with(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.insert(token, principal);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait::async_trait]
impl PrincipalResolver for StaticTokens {
    async fn resolve(&self, token: &str) -> Result<Principal> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(Error::Auth(AuthError::InvalidToken))
    }
}

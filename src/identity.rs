//! Caller identity
//!
//! Claims and bids are always attributed to the authenticated caller.
//! Nothing in a request body can name a different user.
use crate::auction::{Claimant, UserId};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: UserId,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// May create and delete listings
    #[serde(default)]
    pub admin: bool,
}

impl Identity {
    /// Display name, falling back to the email address
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }

    pub fn claimant(&self) -> Claimant {
        Claimant::new(self.uid.clone(), self.name())
    }
}

#[async_trait]
pub trait IdentityProvider {
    /// `Ok(None)` for a token nobody owns
    async fn resolve(&self, token: &str) -> Result<Option<Identity>>;
}

pub type SharedIdentityProvider = Arc<dyn IdentityProvider + Send + Sync + 'static>;

/// A token entry as it appears in configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    #[serde(flatten)]
    pub identity: Identity,
}

/// Fixed bearer tokens, for development and tests
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentityProvider {
    pub fn new(grants: impl IntoIterator<Item = TokenGrant>) -> Self {
        Self {
            tokens: grants
                .into_iter()
                .map(|grant| (grant.token, grant.identity))
                .collect(),
        }
    }

    pub fn new_shared(grants: impl IntoIterator<Item = TokenGrant>) -> SharedIdentityProvider {
        Arc::new(Self::new(grants))
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>> {
        Ok(self.tokens.get(token).cloned())
    }
}

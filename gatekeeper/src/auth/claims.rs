//! Token claims and the principal built from them.
//!
//! # Invariants
//! - A `Principal` is only ever built from verified claims or as anonymous.
//! - A `Principal` is immutable once built.

use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::PermissionLevel;

/// What a token grants, independent of its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Identifier of the API key the token was issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Identifier of the user the token was issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Granted permission levels.
    #[serde(default)]
    pub permissions: Vec<PermissionLevel>,
    /// Allowed guild identifiers (empty = all).
    #[serde(default)]
    pub guild_ids: Vec<String>,
    /// Allowed channel identifiers (empty = all).
    #[serde(default)]
    pub channel_ids: Vec<String>,
}

/// The full claims set carried by a signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The granted identity, permissions and scopes.
    #[serde(flatten)]
    pub grant: TokenGrant,
    /// Absolute expiry in seconds since Unix epoch.
    pub exp: u64,
}

/// The resolved identity attached to an admitted request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// API key identifier, if the token was issued for a key.
    pub key_id: Option<String>,
    /// User identifier, if the token was issued for a user.
    pub user_id: Option<String>,
    /// Held permission levels.
    pub permissions: BTreeSet<PermissionLevel>,
    /// Allowed guilds (empty = unrestricted).
    pub guild_scope: BTreeSet<String>,
    /// Allowed channels (empty = unrestricted).
    pub channel_scope: BTreeSet<String>,
}

impl Principal {
    /// An unauthenticated caller with no permissions.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build a principal from verified claims.
    #[must_use]
    pub fn from_claims(claims: Claims) -> Self {
        let TokenGrant {
            key_id,
            user_id,
            permissions,
            guild_ids,
            channel_ids,
        } = claims.grant;

        Self {
            key_id,
            user_id,
            permissions: permissions.into_iter().collect(),
            guild_scope: guild_ids.into_iter().collect(),
            channel_scope: channel_ids.into_iter().collect(),
        }
    }

    /// Returns `true` if the principal names neither a key nor a user.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.key_id.is_none() && self.user_id.is_none()
    }

    /// The identifier used in rate-limit keys and audit events.
    ///
    /// `key_id`, else `user_id`, else `anonymous@<ip>` (or plain `anonymous`
    /// when the caller address is unknown).
    #[must_use]
    pub fn identifier(&self, client_addr: Option<IpAddr>) -> String {
        if let Some(key_id) = &self.key_id {
            return key_id.clone();
        }
        if let Some(user_id) = &self.user_id {
            return user_id.clone();
        }
        client_addr.map_or_else(|| "anonymous".to_string(), |ip| format!("anonymous@{ip}"))
    }
}

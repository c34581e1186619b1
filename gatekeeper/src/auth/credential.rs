//! API key issuance, revocation and secret exchange.
//!
//! Provides a registry of [`IssuedCredential`]s. Each credential pairs a
//! hashed raw secret with the grant that tokens minted for it carry.
//!
//! # Pre-conditions
//! - Every instance sharing a signing secret uses the same store.
//!
//! # Post-conditions
//! - Raw secrets are returned exactly once, at issuance; only their SHA-256
//!   digest is stored.
//! - Revocation clears `is_active`; credentials are never removed.
//!
//! # Invariants
//! - A credential's permissions and scopes never change after issuance.
//! - Secret comparison runs in constant time.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::store::{CredentialStore, MemoryCredentialStore};
use super::{PermissionLevel, SignedToken, TokenCodec, TokenError, TokenGrant};
use crate::time::TimeSource;

/// Name given to the credential seeded from the bootstrap admin secret.
pub const BOOTSTRAP_ADMIN_NAME: &str = "bootstrap-admin";

/// Errors that can occur when managing credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No credential exists for the key id.
    NotFound(String),
    /// The presented secret does not match.
    InvalidSecret,
    /// The credential has been revoked.
    Revoked(String),
    /// The credential's own expiry has passed.
    Expired(String),
    /// A token could not be minted for the credential.
    Token(TokenError),
    /// The in-process store lock was poisoned by a panicking writer.
    LockPoisoned,
    /// The credential store could not be read or written.
    Store(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(key_id) => write!(f, "credential not found: {key_id}"),
            Self::InvalidSecret => write!(f, "invalid credential secret"),
            Self::Revoked(key_id) => write!(f, "credential revoked: {key_id}"),
            Self::Expired(key_id) => write!(f, "credential expired: {key_id}"),
            Self::Token(e) => write!(f, "token error: {e}"),
            Self::LockPoisoned => write!(f, "credential registry lock poisoned"),
            Self::Store(reason) => write!(f, "credential store error: {reason}"),
        }
    }
}

impl std::error::Error for CredentialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Token(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TokenError> for CredentialError {
    fn from(e: TokenError) -> Self {
        Self::Token(e)
    }
}

/// An API key as stored by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    /// Public identifier, `key_` followed by 32 hex characters.
    pub key_id: String,
    /// SHA-256 hex digest of the raw secret.
    pub hashed_secret: String,
    /// Human-readable name.
    pub name: String,
    /// Granted permission levels.
    pub permissions: BTreeSet<PermissionLevel>,
    /// Allowed guilds (empty = all).
    pub guild_scope: BTreeSet<String>,
    /// Allowed channels (empty = all).
    pub channel_scope: BTreeSet<String>,
    /// Creation time, epoch seconds.
    pub created_at: u64,
    /// Expiry, epoch seconds.
    pub expires_at: Option<u64>,
    /// Last admitted request, epoch seconds.
    pub last_used_at: Option<u64>,
    /// Cleared on revocation.
    pub is_active: bool,
    /// Per-key request limit replacing the configured default.
    pub rate_limit_override: Option<u32>,
}

impl IssuedCredential {
    /// The grant carried by tokens minted for this credential.
    #[must_use]
    pub fn grant(&self) -> TokenGrant {
        TokenGrant {
            key_id: Some(self.key_id.clone()),
            user_id: None,
            permissions: self.permissions.iter().copied().collect(),
            guild_ids: self.guild_scope.iter().cloned().collect(),
            channel_ids: self.channel_scope.iter().cloned().collect(),
        }
    }

    /// Returns `true` if the credential has an expiry at or before `now_secs`.
    #[must_use]
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now_secs)
    }
}

/// Parameters for issuing a credential.
#[derive(Debug, Clone, Default)]
pub struct CredentialRequest {
    /// Human-readable name.
    pub name: String,
    /// Granted permission levels.
    pub permissions: BTreeSet<PermissionLevel>,
    /// Allowed guilds (empty = all).
    pub guild_scope: BTreeSet<String>,
    /// Allowed channels (empty = all).
    pub channel_scope: BTreeSet<String>,
    /// Credential lifetime; `None` never expires.
    pub ttl: Option<Duration>,
    /// Per-key request limit.
    pub rate_limit_override: Option<u32>,
}

/// The result of issuing a credential. The raw secret is not stored.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// Public identifier.
    pub key_id: String,
    /// Raw secret, shown once.
    pub raw_secret: String,
    /// Credential expiry, epoch seconds.
    pub expires_at: Option<u64>,
}

/// How the gate should treat a key id it sees in a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Not present in the registry's store.
    Unknown,
    /// Issued and usable.
    Active {
        /// Per-key request limit, if any.
        rate_limit_override: Option<u32>,
    },
    /// Issued but revoked.
    Revoked,
    /// Issued but past its own expiry.
    Expired,
}

/// A registry of issued API keys over a [`CredentialStore`].
///
/// Key ids in tokens are checked against this registry, so it must be the
/// same store for every instance that shares a signing secret.
pub struct CredentialRegistry {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn TimeSource>,
}

impl fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRegistry").finish_non_exhaustive()
    }
}

impl CredentialRegistry {
    /// Create a registry over a store.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn TimeSource>) -> Self {
        Self { store, clock }
    }

    /// Create a registry held in process memory.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn TimeSource>) -> Self {
        Self::new(Arc::new(MemoryCredentialStore::new()), clock)
    }

    /// Issue a new credential and return its id and raw secret.
    ///
    /// # Errors
    /// Returns `CredentialError::Store` if the store cannot be written.
    pub async fn issue(&self, request: CredentialRequest) -> Result<IssuedKey, CredentialError> {
        let now = self.clock.now_secs();
        let key_id = generate_key_id();
        let raw_secret = generate_secret();
        let expires_at = request.ttl.map(|ttl| now.saturating_add(ttl.as_secs()));

        let credential = IssuedCredential {
            key_id: key_id.clone(),
            hashed_secret: hash_secret(&raw_secret),
            name: request.name,
            permissions: request.permissions,
            guild_scope: request.guild_scope,
            channel_scope: request.channel_scope,
            created_at: now,
            expires_at,
            last_used_at: None,
            is_active: true,
            rate_limit_override: request.rate_limit_override,
        };
        if !self.store.insert(credential).await? {
            return Err(CredentialError::Store(format!("key id already taken: {key_id}")));
        }

        tracing::info!(key_id = %key_id, "credential issued");
        Ok(IssuedKey {
            key_id,
            raw_secret,
            expires_at,
        })
    }

    /// Ensure the bootstrap admin credential for `raw_secret` exists and
    /// return its key id.
    ///
    /// The key id is derived from the secret, so every instance seeds the
    /// same credential. An existing one is left as is; a revoked bootstrap
    /// key stays revoked.
    ///
    /// # Errors
    /// Returns `CredentialError::Store` if the store cannot be written.
    pub async fn seed_admin(&self, raw_secret: &str) -> Result<String, CredentialError> {
        let key_id = bootstrap_key_id(raw_secret);
        let credential = IssuedCredential {
            key_id: key_id.clone(),
            hashed_secret: hash_secret(raw_secret),
            name: BOOTSTRAP_ADMIN_NAME.to_string(),
            permissions: BTreeSet::from([PermissionLevel::Admin]),
            guild_scope: BTreeSet::new(),
            channel_scope: BTreeSet::new(),
            created_at: self.clock.now_secs(),
            expires_at: None,
            last_used_at: None,
            is_active: true,
            rate_limit_override: None,
        };

        if self.store.insert(credential).await? {
            tracing::info!(key_id = %key_id, "bootstrap admin credential seeded");
        } else {
            tracing::debug!(key_id = %key_id, "bootstrap admin credential already present");
        }
        Ok(key_id)
    }

    /// Revoke a credential. Revoking twice is not an error.
    ///
    /// # Errors
    /// Returns `CredentialError::NotFound` if the key id is unknown.
    pub async fn revoke(&self, key_id: &str) -> Result<(), CredentialError> {
        if !self.store.deactivate(key_id).await? {
            return Err(CredentialError::NotFound(key_id.to_string()));
        }
        tracing::info!(key_id = %key_id, "credential revoked");
        Ok(())
    }

    /// Exchange a key id and raw secret for a fresh bearer token.
    ///
    /// The token expires after `ttl` or at the credential's own expiry,
    /// whichever is sooner.
    ///
    /// # Errors
    /// - `CredentialError::InvalidSecret` if the key is unknown or the secret
    ///   does not match. Both report the same error.
    /// - `CredentialError::Revoked` / `CredentialError::Expired` if the key
    ///   cannot be used.
    pub async fn exchange(
        &self,
        codec: &TokenCodec,
        key_id: &str,
        raw_secret: &str,
        ttl: Duration,
    ) -> Result<(SignedToken, u64), CredentialError> {
        let credential = self
            .get(key_id)
            .await?
            .ok_or(CredentialError::InvalidSecret)?;

        let presented = hash_secret(raw_secret);
        if !bool::from(presented.as_bytes().ct_eq(credential.hashed_secret.as_bytes())) {
            return Err(CredentialError::InvalidSecret);
        }
        if !credential.is_active {
            return Err(CredentialError::Revoked(key_id.to_string()));
        }
        if credential.is_expired(self.clock.now_secs()) {
            return Err(CredentialError::Expired(key_id.to_string()));
        }

        let (token, claims) = codec.issue(&credential.grant(), ttl, credential.expires_at)?;
        Ok((token, claims.exp))
    }

    /// Mint a token for a credential without presenting its secret.
    ///
    /// Used at issuance, when the caller is already authorized as admin.
    ///
    /// # Errors
    /// Returns `CredentialError::NotFound` if the key id is unknown.
    pub async fn mint(
        &self,
        codec: &TokenCodec,
        key_id: &str,
        ttl: Duration,
    ) -> Result<(SignedToken, u64), CredentialError> {
        let credential = self
            .get(key_id)
            .await?
            .ok_or_else(|| CredentialError::NotFound(key_id.to_string()))?;
        let (token, claims) = codec.issue(&credential.grant(), ttl, credential.expires_at)?;
        Ok((token, claims.exp))
    }

    /// Look up a credential.
    ///
    /// # Errors
    /// Returns `CredentialError::Store` if the store cannot be read.
    pub async fn get(&self, key_id: &str) -> Result<Option<IssuedCredential>, CredentialError> {
        self.store.get(key_id).await
    }

    /// Classify a key id for the request path.
    ///
    /// # Errors
    /// Returns `CredentialError::Store` if the store cannot be read.
    pub async fn status(&self, key_id: &str) -> Result<KeyStatus, CredentialError> {
        let status = match self.store.get(key_id).await? {
            None => KeyStatus::Unknown,
            Some(credential) if !credential.is_active => KeyStatus::Revoked,
            Some(credential) if credential.is_expired(self.clock.now_secs()) => KeyStatus::Expired,
            Some(credential) => KeyStatus::Active {
                rate_limit_override: credential.rate_limit_override,
            },
        };
        Ok(status)
    }

    /// Record that a credential was used. Unknown ids are ignored.
    ///
    /// # Errors
    /// Returns `CredentialError::Store` if the store cannot be written.
    pub async fn touch(&self, key_id: &str) -> Result<(), CredentialError> {
        self.store.stamp_used(key_id, self.clock.now_secs()).await
    }
}

/// Generate a key id: `key_` followed by 32 hex characters.
fn generate_key_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("key_{:032x}", u128::from_be_bytes(bytes))
}

/// Generate a raw secret: 32 random bytes, base64url without padding.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Key id of the bootstrap admin credential for a raw secret.
fn bootstrap_key_id(raw_secret: &str) -> String {
    let digest = Sha256::digest(format!("bootstrap-admin:{raw_secret}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    format!("key_{:032x}", u128::from_be_bytes(bytes))
}

/// SHA-256 hex digest of a raw secret.
fn hash_secret(raw_secret: &str) -> String {
    format!("{:x}", Sha256::digest(raw_secret.as_bytes()))
}

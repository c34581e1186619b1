//! Authentication module.
//!
//! Bearer tokens, the permission hierarchy and the API key registry.
//!
//! # Pre-conditions
//! - A non-empty signing secret is available before any token is issued.
//!
//! # Post-conditions
//! - A `Principal` exists only for verified tokens or anonymous callers.
//!
//! # Invariants
//! - Raw API key secrets are never stored.

pub mod claims;
pub mod credential;
pub mod permission;
pub mod store;
pub mod token;

pub use claims::{Claims, Principal, TokenGrant};
pub use credential::{
    BOOTSTRAP_ADMIN_NAME, CredentialError, CredentialRegistry, CredentialRequest, IssuedCredential,
    IssuedKey, KeyStatus,
};
pub use permission::{AccessDenied, PermissionLevel, PermissionModel, ResourceScope, UnknownPermission};
pub use store::{CredentialStore, MemoryCredentialStore, RedisCredentialStore};
pub use token::{SignedToken, SigningKeyError, TokenCodec, TokenError};

//! Signed bearer tokens.
//!
//! Tokens are HS256 JSON Web Tokens whose payload is a [`Claims`] set.
//!
//! # Pre-conditions
//! - The signing secret must be non-empty.
//!
//! # Post-conditions
//! - `decode(issue(grant, ttl))` returns `grant` unchanged until the token expires.
//! - Untrusted input never panics; every failure is a [`TokenError`] value.
//!
//! # Invariants
//! - Verification is stateless apart from reading the clock.
//! - A token whose integrity cannot be established is never decoded into claims.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use super::{Claims, TokenGrant};
use crate::time::TimeSource;

/// Error returned when issuing or decoding a token fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token cannot be parsed, or its claims do not fit the schema.
    Malformed,
    /// The token's signature does not match its contents.
    InvalidSignature,
    /// The token's `exp` is at or before the current time.
    Expired,
    /// The claims could not be serialized or signed.
    Signing(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed token"),
            Self::InvalidSignature => write!(f, "invalid token signature"),
            Self::Expired => write!(f, "token has expired"),
            Self::Signing(reason) => write!(f, "failed to sign token: {reason}"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Error returned when the signing secret is unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningKeyError {
    /// The secret is empty.
    EmptySecret,
}

impl fmt::Display for SigningKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySecret => write!(f, "signing secret must not be empty"),
        }
    }
}

impl std::error::Error for SigningKeyError {}

/// An opaque signed token string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken(String);

impl SignedToken {
    /// Borrow the encoded token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the encoded token.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

/// Issues and verifies signed tokens with a process-wide secret.
///
/// # Thread Safety
///
/// Holds only immutable key material; share it behind an `Arc`.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn TimeSource>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Create a codec for the given secret.
    ///
    /// # Errors
    /// Returns `SigningKeyError::EmptySecret` if the secret is empty.
    pub fn new(secret: &[u8], clock: Arc<dyn TimeSource>) -> Result<Self, SigningKeyError> {
        if secret.is_empty() {
            return Err(SigningKeyError::EmptySecret);
        }
        if secret.len() < 32 {
            tracing::warn!("signing secret is shorter than the recommended 32 bytes");
        }

        // Expiry is checked against the injected clock after the signature
        // has been verified, so the library's own time checks are disabled.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            clock,
        })
    }

    /// Sign a grant that expires after `ttl`, or at `not_after` (epoch
    /// seconds) if that comes sooner.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if the claims cannot be encoded.
    pub fn issue(
        &self,
        grant: &TokenGrant,
        ttl: Duration,
        not_after: Option<u64>,
    ) -> Result<(SignedToken, Claims), TokenError> {
        let ttl_expiry = self.clock.now_secs().saturating_add(ttl.as_secs());
        let exp = not_after.map_or(ttl_expiry, |limit| limit.min(ttl_expiry));

        let claims = Claims {
            grant: grant.clone(),
            exp,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok((SignedToken(token), claims))
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    /// - `TokenError::Malformed` if the token cannot be parsed or its claims
    ///   do not fit the schema.
    /// - `TokenError::InvalidSignature` if the signature does not verify.
    /// - `TokenError::Expired` if `exp` is at or before now.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        if !has_token_shape(token) {
            return Err(TokenError::Malformed);
        }

        let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(error) => return Err(self.classify_failure(token, &error)),
        };

        if claims.exp <= self.clock.now_secs() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Decide whether a failed decode was an integrity failure or a schema
    /// failure behind a valid signature.
    fn classify_failure(&self, token: &str, error: &jsonwebtoken::errors::Error) -> TokenError {
        use jsonwebtoken::errors::ErrorKind;

        match error.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidToken => TokenError::Malformed,
            _ => {
                // Re-decode into an untyped payload: if that succeeds the
                // signature is intact and only the claims schema is wrong.
                match decode::<serde_json::Value>(token, &self.decoding_key, &self.validation) {
                    Ok(_) => TokenError::Malformed,
                    Err(_) => TokenError::InvalidSignature,
                }
            }
        }
    }
}

/// Returns `true` if the token is three non-empty base64url segments.
fn has_token_shape(token: &str) -> bool {
    let mut segments = 0;
    for segment in token.split('.') {
        segments += 1;
        if segment.is_empty()
            || !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return false;
        }
    }
    segments == 3
}

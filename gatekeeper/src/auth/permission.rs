//! Permission hierarchy and scope containment.
//!
//! # Invariants
//! - Levels are totally ordered: `ReadOnly < ReadWrite < Moderate < Admin`.
//! - Holding a level authorizes every requirement at or below it.
//! - An empty guild or channel scope means unrestricted, never "deny all".
//!
//! Everything here is pure and free of shared state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Principal;

/// Permission levels for API access.
///
/// The discriminants define the hierarchy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Read messages and search.
    ReadOnly = 1,
    /// Send messages.
    ReadWrite = 2,
    /// Moderate members and messages.
    Moderate = 3,
    /// Manage credentials and rate limits.
    Admin = 4,
}

impl PermissionLevel {
    /// All levels in ascending order.
    pub const ALL: [Self; 4] = [Self::ReadOnly, Self::ReadWrite, Self::Moderate, Self::Admin];

    /// Wire name used in token claims.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::ReadWrite => "read_write",
            Self::Moderate => "moderate",
            Self::Admin => "admin",
        }
    }

    /// Numeric rank in the hierarchy.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known permission level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPermission(pub String);

impl fmt::Display for UnknownPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown permission level: {}", self.0)
    }
}

impl std::error::Error for UnknownPermission {}

impl FromStr for PermissionLevel {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// Why a principal was refused by the permission model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    /// No held level reaches the required one.
    InsufficientPermission,
    /// The requested guild or channel is outside the principal's scope.
    OutOfScope,
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientPermission => write!(f, "insufficient permission"),
            Self::OutOfScope => write!(f, "resource out of scope"),
        }
    }
}

impl std::error::Error for AccessDenied {}

/// The guild and channel a request targets, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceScope {
    /// Target guild identifier.
    pub guild_id: Option<String>,
    /// Target channel identifier.
    pub channel_id: Option<String>,
}

impl ResourceScope {
    /// A request that targets no particular guild or channel.
    #[must_use]
    pub const fn unscoped() -> Self {
        Self {
            guild_id: None,
            channel_id: None,
        }
    }

    /// A request targeting a guild.
    #[must_use]
    pub fn guild(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: Some(guild_id.into()),
            channel_id: None,
        }
    }

    /// Also target a channel.
    #[must_use]
    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }
}

/// Evaluates permission levels and scopes.
///
/// Stateless; one value is shared by every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionModel;

impl PermissionModel {
    /// Returns `true` iff the highest held level is at least `required`.
    ///
    /// An empty set never satisfies anything.
    pub fn satisfies<'a>(
        self,
        held: impl IntoIterator<Item = &'a PermissionLevel>,
        required: PermissionLevel,
    ) -> bool {
        held.into_iter().max().is_some_and(|max| *max >= required)
    }

    /// Returns `true` iff the guild and channel are both within scope.
    ///
    /// An absent identifier or an empty scope set always passes.
    #[must_use]
    pub fn in_scope(
        self,
        principal: &Principal,
        guild_id: Option<&str>,
        channel_id: Option<&str>,
    ) -> bool {
        let guild_ok = guild_id.is_none_or(|id| {
            principal.guild_scope.is_empty() || principal.guild_scope.contains(id)
        });
        let channel_ok = channel_id.is_none_or(|id| {
            principal.channel_scope.is_empty() || principal.channel_scope.contains(id)
        });
        guild_ok && channel_ok
    }

    /// Checks a principal against an optional required level and a scope.
    ///
    /// The level is checked first so that a principal lacking the level is
    /// reported as such even when the target is also out of scope.
    pub fn authorize(
        self,
        principal: &Principal,
        required: Option<PermissionLevel>,
        scope: &ResourceScope,
    ) -> Result<(), AccessDenied> {
        if let Some(required) = required
            && !self.satisfies(&principal.permissions, required)
        {
            return Err(AccessDenied::InsufficientPermission);
        }

        if !self.in_scope(
            principal,
            scope.guild_id.as_deref(),
            scope.channel_id.as_deref(),
        ) {
            return Err(AccessDenied::OutOfScope);
        }

        Ok(())
    }
}

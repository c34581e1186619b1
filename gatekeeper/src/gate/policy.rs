//! Per-route access requirements.

use crate::auth::{PermissionLevel, ResourceScope};

/// Path parameter naming the target guild.
const GUILD_PARAM: &str = "guild_id";
/// Path parameter naming the target channel.
const CHANNEL_PARAM: &str = "channel_id";

/// What a route demands of its callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Path template, e.g. `/v1/guilds/{guild_id}/search`.
    pub template: &'static str,
    /// Whether a bearer token is mandatory.
    pub requires_auth: bool,
    /// Minimum permission level, if any.
    pub required_level: Option<PermissionLevel>,
    /// Requests per window for this route, replacing the default.
    pub rate_limit: Option<u32>,
}

impl RoutePolicy {
    /// A route open to anonymous callers.
    #[must_use]
    pub const fn open(template: &'static str) -> Self {
        Self {
            template,
            requires_auth: false,
            required_level: None,
            rate_limit: None,
        }
    }

    /// A route requiring a token holding at least `level`.
    #[must_use]
    pub const fn protected(template: &'static str, level: PermissionLevel) -> Self {
        Self {
            template,
            requires_auth: true,
            required_level: Some(level),
            rate_limit: None,
        }
    }

    /// Override the default request limit for this route.
    #[must_use]
    pub const fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Build the guild and channel scope from the matched route's decoded
    /// path parameters.
    ///
    /// Returns `None` when the template names a guild or channel parameter
    /// that the request did not supply.
    #[must_use]
    pub fn scope_from_params<'p>(
        &self,
        params: impl IntoIterator<Item = (&'p str, &'p str)>,
    ) -> Option<ResourceScope> {
        let mut scope = ResourceScope::unscoped();
        for (name, value) in params {
            match name {
                GUILD_PARAM => scope.guild_id = Some(value.to_string()),
                CHANNEL_PARAM => scope.channel_id = Some(value.to_string()),
                _ => {}
            }
        }

        let complete = (!self.names(GUILD_PARAM) || scope.guild_id.is_some())
            && (!self.names(CHANNEL_PARAM) || scope.channel_id.is_some());
        complete.then_some(scope)
    }

    fn names(&self, param: &str) -> bool {
        self.template.contains(&format!("{{{param}}}"))
    }
}

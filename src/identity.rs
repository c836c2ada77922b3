//! Bot identity resolution
//!
//! Picks the credentials used for the adapter lookups made while handling a
//! delivery, in order: the read-only token of the SCM context, the acting
//! user's platform account, then the configured service account.

use tracing::{debug, warn};

use crate::config::{ScmContextConfig, WebhookSettings};
use crate::directory::UserDirectory;
use crate::error::{CicdError, Result};
use crate::webhook::ParsedHook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    ReadOnlyContext,
    ActingUser,
    ServiceAccount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmIdentity {
    pub username: String,
    pub token: String,
    pub source: IdentitySource,
}

pub async fn resolve_identity(
    users: &dyn UserDirectory,
    hook: &ParsedHook,
    settings: &WebhookSettings,
    scm_context: Option<&ScmContextConfig>,
) -> Result<ScmIdentity> {
    if let Some(token) = scm_context
        .and_then(|c| c.read_only_token.as_deref())
        .filter(|t| !t.is_empty())
    {
        debug!(scm_context = %hook.scm_context, "using read-only token");
        return Ok(ScmIdentity {
            username: settings.username.clone(),
            token: token.to_string(),
            source: IdentitySource::ReadOnlyContext,
        });
    }

    let candidates = [
        (hook.username.as_str(), IdentitySource::ActingUser),
        (settings.username.as_str(), IdentitySource::ServiceAccount),
    ];
    for (username, source) in candidates {
        if username.is_empty() {
            continue;
        }
        match users.get(username, &hook.scm_context).await {
            Ok(Some(user)) => {
                return Ok(ScmIdentity {
                    username: user.username.clone(),
                    token: user.unseal_token(),
                    source,
                });
            }
            Ok(None) => debug!(username, "no platform account"),
            Err(e) => warn!(username, "user lookup failed: {}", e),
        }
    }

    Err(CicdError::IdentityUnavailable(format!(
        "neither {} nor {} has an account in {}",
        hook.username, settings.username, hook.scm_context
    )))
}

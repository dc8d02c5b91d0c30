use async_trait::async_trait;
use http::HeaderMap;

use super::{Access, AccessController, AccessSet, AuthError, Challenge};

/// Admits every request with a fixed routing identity. Used for the admin
/// listener and for the `testing` auth mode.
pub struct ConstantAccessController {
    identity: String,
    allow: bool,
}

impl ConstantAccessController {
    pub fn new(identity: impl Into<String>) -> Self {
        ConstantAccessController {
            identity: identity.into(),
            allow: true,
        }
    }

    #[cfg(test)]
    pub fn denying(identity: impl Into<String>) -> Self {
        ConstantAccessController {
            identity: identity.into(),
            allow: false,
        }
    }
}

#[async_trait]
impl AccessController for ConstantAccessController {
    async fn authorized(
        &self,
        _headers: &HeaderMap,
        requested: &[Access],
    ) -> Result<String, Challenge> {
        if !self.allow {
            return Err(Challenge {
                realm: self.identity.clone(),
                service: self.identity.clone(),
                access_set: AccessSet::from_items(requested),
                error: AuthError::InsufficientScope,
            });
        }
        Ok(self.identity.clone())
    }
}

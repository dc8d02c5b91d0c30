//! Request authentication.
//!
//! An [`AccessController`] validates the caller and yields the routing
//! label carried in the token's context (`signer`, `alternate`, `admin`).
//! Failures surface as a [`Challenge`] which renders as HTTP 401 with a
//! `WWW-Authenticate: Bearer` header per RFC 6750.

mod constant;
mod keyserver;

pub use constant::ConstantAccessController;
pub use keyserver::{KeyserverAccessController, KeyserverOptions};

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode};

/// JWT context key carrying the routing identity.
pub const TUF_ROOT_SIGNER_CLAIM: &str = "com.apostille.root";

/// The typed routing identity. Labels outside this set are rejected by the
/// router as a lookup failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Signer,
    Alternate,
    Admin,
}

impl Identity {
    pub fn from_label(label: &str) -> Option<Identity> {
        match label {
            "signer" => Some(Identity::Signer),
            "alternate" => Some(Identity::Alternate),
            "admin" => Some(Identity::Admin),
            _ => None,
        }
    }
}

/// A typed, named resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub kind: String,
    pub name: String,
}

/// One requested (or granted) action on a resource.
#[derive(Debug, Clone)]
pub struct Access {
    pub resource: Resource,
    pub action: String,
}

impl Access {
    pub fn repository(gun: &str, action: &str) -> Access {
        Access {
            resource: Resource {
                kind: "repository".to_string(),
                name: gun.to_string(),
            },
            action: action.to_string(),
        }
    }
}

/// Actions granted on one resource; `*` matches any action.
#[derive(Debug, Default, Clone)]
pub struct ActionSet(HashSet<String>);

impl ActionSet {
    pub fn add(&mut self, action: impl Into<String>) {
        self.0.insert(action.into());
    }

    pub fn contains(&self, action: &str) -> bool {
        self.0.contains("*") || self.0.contains(action)
    }

    fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.0.iter().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Actions granted (or requested) per resource.
#[derive(Debug, Default, Clone)]
pub struct AccessSet(HashMap<Resource, ActionSet>);

impl AccessSet {
    pub fn from_items(items: &[Access]) -> AccessSet {
        let mut set = AccessSet::default();
        for item in items {
            set.0
                .entry(item.resource.clone())
                .or_default()
                .add(item.action.clone());
        }
        set
    }

    pub fn contains(&self, access: &Access) -> bool {
        self.0
            .get(&access.resource)
            .map(|actions| actions.contains(&access.action))
            .unwrap_or(false)
    }

    /// Space-separated `type:name:action[,action]...` scopes for the
    /// WWW-Authenticate challenge, per RFC 6750.
    pub fn scope_param(&self) -> String {
        let mut scopes: Vec<String> = self
            .0
            .iter()
            .map(|(resource, actions)| {
                format!(
                    "{}:{}:{}",
                    resource.kind,
                    resource.name,
                    actions.keys().join(",")
                )
            })
            .collect();
        scopes.sort_unstable();
        scopes.join(" ")
    }
}

/// Authentication failure kinds, mapped onto the stable RFC 6750 error
/// tags carried in the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    TokenRequired,
    MalformedToken,
    InvalidToken,
    InsufficientScope,
}

impl AuthError {
    pub fn tag(&self) -> &'static str {
        match self {
            AuthError::InsufficientScope => "insufficient_scope",
            _ => "invalid_token",
        }
    }
}

/// The 401 challenge emitted when authentication fails.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub realm: String,
    pub service: String,
    pub access_set: AccessSet,
    pub error: AuthError,
}

impl Challenge {
    /// `WWW-Authenticate` header value.
    pub fn header_value(&self) -> String {
        let mut value = format!(
            "Bearer realm={:?},service={:?}",
            self.realm, self.service
        );
        let scope = self.access_set.scope_param();
        if !scope.is_empty() {
            value.push_str(&format!(",scope={scope:?}"));
        }
        value.push_str(&format!(",error={:?}", self.error.tag()));
        value
    }
}

impl IntoResponse for Challenge {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "errors": [{
                "code": "UNAUTHORIZED",
                "message": "authentication required",
                "detail": self.error.tag(),
            }]
        });
        (
            StatusCode::UNAUTHORIZED,
            [(http::header::WWW_AUTHENTICATE, self.header_value())],
            axum::Json(body),
        )
            .into_response()
    }
}

/// Decides whether a request may perform the requested accesses and, if
/// so, which routing label it carries.
#[async_trait]
pub trait AccessController: Send + Sync {
    async fn authorized(
        &self,
        headers: &HeaderMap,
        requested: &[Access],
    ) -> Result<String, Challenge>;
}

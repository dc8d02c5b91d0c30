use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use http::HeaderMap;
use serde::Deserialize;
use tokio::sync::{watch, RwLock};

use super::{Access, AccessController, AccessSet, AuthError, Challenge, TUF_ROOT_SIGNER_CLAIM};

/// Clock skew tolerated on `nbf` and `exp`, per RFC 7519 §4.1.5.
const LEEWAY: Duration = Duration::from_secs(60);

/// Options for the keyserver-backed controller, straight from the
/// `auth.options` configuration section.
#[derive(Debug, Clone)]
pub struct KeyserverOptions {
    pub realm: String,
    pub issuer: String,
    pub service: String,
    pub keyserver: String,
    pub update_key_interval: Duration,
}

/// A JSON Web Key as served by the keyserver. Only the curves this service
/// issues tokens with are understood.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

impl Jwk {
    fn is_valid(&self) -> bool {
        self.kid.is_some() && self.verifier().is_some()
    }

    fn coordinate(&self, field: &Option<String>) -> Option<Vec<u8>> {
        field
            .as_ref()
            .and_then(|value| URL_SAFE_NO_PAD.decode(value.as_bytes()).ok())
    }

    fn verifier(&self) -> Option<JwkVerifier> {
        match (self.kty.as_str(), self.crv.as_deref()) {
            ("OKP", Some("Ed25519")) => {
                let x = self.coordinate(&self.x)?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(x.as_slice().try_into().ok()?)
                    .ok()?;
                Some(JwkVerifier::Ed25519(key))
            }
            ("EC", Some("P-256")) => {
                let x = self.coordinate(&self.x)?;
                let y = self.coordinate(&self.y)?;
                let mut sec1 = Vec::with_capacity(65);
                sec1.push(0x04);
                sec1.extend_from_slice(&x);
                sec1.extend_from_slice(&y);
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1).ok()?;
                Some(JwkVerifier::Es256(key))
            }
            _ => None,
        }
    }

    /// Verify a JWS signature over `message` with the algorithm the token
    /// header declares.
    fn verify(&self, alg: &str, message: &[u8], signature: &[u8]) -> Result<(), AuthError> {
        use ed25519_dalek::Verifier as _;
        use p256::ecdsa::signature::Verifier as _;

        match (self.verifier(), alg) {
            (Some(JwkVerifier::Ed25519(key)), "EdDSA") => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| AuthError::InvalidToken)?;
                key.verify(message, &signature)
                    .map_err(|_| AuthError::InvalidToken)
            }
            (Some(JwkVerifier::Es256(key)), "ES256") => {
                let signature = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| AuthError::InvalidToken)?;
                key.verify(message, &signature)
                    .map_err(|_| AuthError::InvalidToken)
            }
            _ => Err(AuthError::InvalidToken),
        }
    }
}

enum JwkVerifier {
    Ed25519(ed25519_dalek::VerifyingKey),
    Es256(p256::ecdsa::VerifyingKey),
}

#[derive(Deserialize)]
struct JwkSet {
    keys: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JoseHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    access: Vec<ResourceActions>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, service: &str) -> bool {
        match self {
            Audience::One(aud) => aud == service,
            Audience::Many(auds) => auds.iter().any(|aud| aud == service),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceActions {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    actions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenContext {
    #[serde(default)]
    context: HashMap<String, String>,
}

/// Validates bearer JWTs against a JWK set fetched from a remote
/// keyserver. The key map refreshes on a fixed interval in a background
/// task; reads take the shared lock and never hold it across network I/O.
pub struct KeyserverAccessController {
    realm: String,
    issuer: String,
    service: String,
    keyserver: String,
    update_key_interval: Duration,
    client: reqwest::Client,
    keys: RwLock<HashMap<String, Jwk>>,
}

impl KeyserverAccessController {
    /// Build the controller and perform the initial JWK fetch. A failed
    /// initial fetch logs and leaves the map empty; the refresh loop (or
    /// per-token fallback fetch) fills it in later.
    pub async fn new(options: KeyserverOptions) -> Arc<Self> {
        let controller = Arc::new(KeyserverAccessController {
            realm: options.realm,
            issuer: options.issuer,
            service: options.service,
            keyserver: options.keyserver,
            update_key_interval: options.update_key_interval,
            client: reqwest::Client::new(),
            keys: RwLock::new(HashMap::new()),
        });
        if let Err(err) = controller.update_keys().await {
            tracing::warn!(error = %err, "initial JWK fetch failed");
        }
        controller
    }

    /// Periodic JWK refresh, intended to be spawned by the process once
    /// at startup. Failures log and leave the current map untouched; the
    /// loop returns on shutdown.
    pub async fn refresh_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.update_key_interval);
        ticker.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::debug!("performing fetch of JWKs");
                    if let Err(err) = self.update_keys().await {
                        tracing::warn!(error = %err, "JWK refresh failed");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    }

    /// Fetch the whole JWK set and atomically swap the key map. If no
    /// valid key comes back the current map is left untouched.
    pub async fn update_keys(&self) -> Result<(), reqwest::Error> {
        let url = format!("{}/services/{}/keys", self.keyserver, self.service);
        tracing::info!(url = %url, "fetching jwk set from keyserver");
        let set: JwkSet = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut keys = HashMap::new();
        for (i, value) in set.keys.into_iter().enumerate() {
            match serde_json::from_value::<Jwk>(value) {
                Ok(jwk) if jwk.is_valid() => {
                    keys.insert(jwk.kid.clone().expect("validated above"), jwk);
                }
                Ok(_) => tracing::warn!(index = i, "skipping unusable JWK"),
                Err(err) => tracing::warn!(index = i, error = %err, "unable to decode JWK"),
            }
        }
        if keys.is_empty() {
            tracing::warn!("keyserver returned no valid keys, keeping current set");
            return Ok(());
        }
        let count = keys.len();
        *self.keys.write().await = keys;
        tracing::info!(count, "successfully fetched JWK set");
        Ok(())
    }

    /// Single-key fallback fetch for a `kid` missing from the cached set.
    async fn try_find_key(&self, kid: &str) -> Result<Jwk, AuthError> {
        let url = format!("{}/services/{}/keys/{}", self.keyserver, self.service, kid);
        tracing::info!(url = %url, "fetching jwk from keyserver");
        let jwk: Jwk = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| AuthError::InvalidToken)?
            .error_for_status()
            .map_err(|_| AuthError::InvalidToken)?
            .json()
            .await
            .map_err(|_| AuthError::InvalidToken)?;
        if !jwk.is_valid() {
            return Err(AuthError::InvalidToken);
        }
        Ok(jwk)
    }

    async fn verify_token(&self, raw_token: &str) -> Result<String, AuthError> {
        let (header, claims, message, signature) = split_token(raw_token)?;

        let jwk = {
            let kid = header.kid.as_deref().ok_or(AuthError::InvalidToken)?;
            let cached = self.keys.read().await.get(kid).cloned();
            match cached {
                Some(jwk) => jwk,
                // miss: one on-demand fetch, no lock held during I/O
                None => self.try_find_key(kid).await?,
            }
        };
        jwk.verify(&header.alg, message.as_bytes(), &signature)?;

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            tracing::info!(issuer = ?claims.iss, "token from untrusted issuer");
            return Err(AuthError::InvalidToken);
        }
        if !claims
            .aud
            .as_ref()
            .map(|aud| aud.contains(&self.service))
            .unwrap_or(false)
        {
            tracing::info!("token intended for another audience");
            return Err(AuthError::InvalidToken);
        }

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let leeway = LEEWAY.as_secs() as i64;
        if let Some(exp) = claims.exp {
            if now > exp + leeway {
                tracing::info!("token expired");
                return Err(AuthError::InvalidToken);
            }
        }
        if let Some(nbf) = claims.nbf {
            if now < nbf - leeway {
                tracing::info!("token not yet valid");
                return Err(AuthError::InvalidToken);
            }
        }

        let context = parse_context(raw_token)?;
        match context.get(TUF_ROOT_SIGNER_CLAIM) {
            Some(identity) if !identity.is_empty() => Ok(identity.clone()),
            _ => Err(AuthError::MalformedToken),
        }
    }

    fn granted_access(claims: &Claims) -> AccessSet {
        let items: Vec<Access> = claims
            .access
            .iter()
            .flat_map(|resource| {
                resource.actions.iter().map(|action| Access {
                    resource: super::Resource {
                        kind: resource.kind.clone(),
                        name: resource.name.clone(),
                    },
                    action: action.clone(),
                })
            })
            .collect();
        AccessSet::from_items(&items)
    }

    fn challenge(&self, requested: &[Access], error: AuthError) -> Challenge {
        Challenge {
            realm: self.realm.clone(),
            service: self.service.clone(),
            access_set: AccessSet::from_items(requested),
            error,
        }
    }
}

#[async_trait]
impl AccessController for KeyserverAccessController {
    async fn authorized(
        &self,
        headers: &HeaderMap,
        requested: &[Access],
    ) -> Result<String, Challenge> {
        let raw_token = bearer_token(headers)
            .ok_or_else(|| self.challenge(requested, AuthError::TokenRequired))?;

        // claims are needed for the scope check after signature validation
        let (_, claims, _, _) = split_token(&raw_token)
            .map_err(|err| self.challenge(requested, err))?;
        let identity = self
            .verify_token(&raw_token)
            .await
            .map_err(|err| self.challenge(requested, err))?;

        let granted = Self::granted_access(&claims);
        for access in requested {
            if !granted.contains(access) {
                return Err(self.challenge(requested, AuthError::InsufficientScope));
            }
        }

        Ok(identity)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let mut parts = header.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.to_string())
}

/// Split a compact JWS into its parsed header, parsed claims, the signing
/// input (`header.payload`), and the decoded signature.
fn split_token(raw_token: &str) -> Result<(JoseHeader, Claims, String, Vec<u8>), AuthError> {
    let parts: Vec<&str> = raw_token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::MalformedToken);
    }
    let header_bytes = URL_SAFE_NO_PAD
        .decode(parts[0].as_bytes())
        .map_err(|_| AuthError::MalformedToken)?;
    let header: JoseHeader =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::MalformedToken)?;
    let claims_bytes = URL_SAFE_NO_PAD
        .decode(parts[1].as_bytes())
        .map_err(|_| AuthError::MalformedToken)?;
    let claims: Claims =
        serde_json::from_slice(&claims_bytes).map_err(|_| AuthError::MalformedToken)?;
    let signature = URL_SAFE_NO_PAD
        .decode(parts[2].as_bytes())
        .map_err(|_| AuthError::MalformedToken)?;
    let message = format!("{}.{}", parts[0], parts[1]);
    Ok((header, claims, message, signature))
}

/// Decode the token's claims segment and return its `context` map.
/// Rejects anything that is not strict URL-safe base64 or not JSON.
pub fn parse_context(raw_token: &str) -> Result<HashMap<String, String>, AuthError> {
    let claims_segment = raw_token.split('.').nth(1).ok_or(AuthError::MalformedToken)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(claims_segment.as_bytes())
        .map_err(|_| AuthError::MalformedToken)?;
    let parsed: TokenContext =
        serde_json::from_slice(&decoded).map_err(|_| AuthError::MalformedToken)?;
    Ok(parsed.context)
}

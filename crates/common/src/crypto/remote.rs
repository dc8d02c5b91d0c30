use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::tuf::{KeyAlgorithm, PublicKey, RoleName};

use super::{CryptoError, CryptoService};

const CONNECT_BUDGET: Duration = Duration::from_secs(15);
const CONNECT_TICK: Duration = Duration::from_secs(1);

/// Connection settings for the external signer.
#[derive(Debug, Clone)]
pub struct RemoteSignerConfig {
    pub hostname: String,
    pub port: u16,
    /// PEM bundle of the CA that signed the signer's certificate.
    pub tls_ca: Option<Vec<u8>>,
    /// Client certificate + key PEM for mutual TLS.
    pub tls_client_identity: Option<Vec<u8>>,
}

impl RemoteSignerConfig {
    fn base_url(&self) -> String {
        format!("https://{}:{}", self.hostname, self.port)
    }
}

/// Client for a remote signing service. Keys created here persist in the
/// signer across process restarts.
pub struct RemoteCryptoService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateKeyRequest<'a> {
    role: &'a str,
    gun: &'a str,
    algorithm: KeyAlgorithm,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    key_id: &'a str,
    message: String,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

impl RemoteCryptoService {
    /// Connect to the signer, retrying for up to 15 seconds at 1-second
    /// intervals before giving up. Startup fails if the signer stays
    /// unreachable.
    pub async fn connect(config: RemoteSignerConfig) -> Result<Self, CryptoError> {
        let mut builder = reqwest::Client::builder().use_rustls_tls();
        if let Some(ca) = &config.tls_ca {
            let cert = reqwest::Certificate::from_pem(ca)?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &config.tls_client_identity {
            let identity = reqwest::Identity::from_pem(identity)?;
            builder = builder.identity(identity);
        }
        let client = builder.build()?;

        let service = RemoteCryptoService {
            client,
            base_url: config.base_url(),
        };

        let deadline = tokio::time::Instant::now() + CONNECT_BUDGET;
        let mut ticker = tokio::time::interval(CONNECT_TICK);
        let mut last_error = None;
        loop {
            ticker.tick().await;
            if tokio::time::Instant::now() > deadline {
                return Err(CryptoError::Backend(format!(
                    "timed out contacting remote signer at {}: {}",
                    service.base_url,
                    last_error.unwrap_or_else(|| "no attempts completed".to_string()),
                )));
            }
            tracing::info!(url = %service.base_url, "trying to connect to remote signer");
            match service.check_health().await {
                Ok(()) => return Ok(service),
                Err(err) => last_error = Some(err.to_string()),
            }
        }
    }
}

#[async_trait]
impl CryptoService for RemoteCryptoService {
    async fn create_key(
        &self,
        role: &RoleName,
        gun: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<PublicKey, CryptoError> {
        let response = self
            .client
            .post(format!("{}/keys", self.base_url))
            .json(&CreateKeyRequest {
                role: role.as_str(),
                gun,
                algorithm,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let response = self
            .client
            .post(format!("{}/sign", self.base_url))
            .json(&SignRequest {
                key_id,
                message: STANDARD.encode(message),
            })
            .send()
            .await?
            .error_for_status()?;
        let body: SignResponse = response.json().await?;
        STANDARD
            .decode(body.signature.as_bytes())
            .map_err(|err| CryptoError::Backend(format!("signer returned invalid base64: {err}")))
    }

    async fn add_key(
        &self,
        _key_id: &str,
        _algorithm: KeyAlgorithm,
        _private_pkcs8: &[u8],
    ) -> Result<(), CryptoError> {
        Err(CryptoError::Unsupported(
            "remote signers never accept private key material",
        ))
    }

    async fn public_key(&self, key_id: &str) -> Option<PublicKey> {
        let response = self
            .client
            .get(format!("{}/keys/{}", self.base_url, key_id))
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        response.json().await.ok()
    }

    async fn export_private_pkcs8(&self, _key_id: &str) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::Unsupported(
            "remote signers never release private key material",
        ))
    }

    async fn check_health(&self) -> Result<(), CryptoError> {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

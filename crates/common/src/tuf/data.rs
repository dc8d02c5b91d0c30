use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};

/// Canonical role names, in the order trust flows.
pub const BASE_ROLE_NAMES: [&str; 4] = ["root", "targets", "snapshot", "timestamp"];

/// A TUF role: one of the canonical roles or a delegation path such as
/// `targets/releases`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    pub fn root() -> Self {
        RoleName("root".to_string())
    }

    pub fn targets() -> Self {
        RoleName("targets".to_string())
    }

    pub fn snapshot() -> Self {
        RoleName("snapshot".to_string())
    }

    pub fn timestamp() -> Self {
        RoleName("timestamp".to_string())
    }

    pub fn base_roles() -> [RoleName; 4] {
        BASE_ROLE_NAMES.map(|name| RoleName(name.to_string()))
    }

    pub fn is_base(&self) -> bool {
        BASE_ROLE_NAMES.contains(&self.0.as_str())
    }

    /// A delegation is any role nested under `targets/`.
    pub fn is_delegation(&self) -> bool {
        self.0.starts_with("targets/")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleName {
    fn from(value: &str) -> Self {
        RoleName(value.to_string())
    }
}

impl From<String> for RoleName {
    fn from(value: String) -> Self {
        RoleName(value)
    }
}

/// Key algorithms understood by the crypto service and the metadata model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa")]
    Ecdsa,
    /// An ECDSA key whose public material is a self-signed x509 certificate
    /// (PEM bytes). Used for organizational root keys.
    #[serde(rename = "ecdsa-x509")]
    EcdsaX509,
    #[serde(rename = "rsa")]
    Rsa,
}

impl KeyAlgorithm {
    /// The `method` string recorded on signatures produced with this key.
    pub fn signature_method(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Ecdsa | KeyAlgorithm::EcdsaX509 => "ecdsa",
            KeyAlgorithm::Rsa => "rsa",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Ecdsa => "ecdsa",
            KeyAlgorithm::EcdsaX509 => "ecdsa-x509",
            KeyAlgorithm::Rsa => "rsa",
        };
        f.write_str(name)
    }
}

/// Public key as it appears in metadata key maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(rename = "keytype")]
    pub algorithm: KeyAlgorithm,
    #[serde(rename = "keyval")]
    pub keyval: KeyVal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    #[serde(with = "base64_bytes")]
    pub public: Vec<u8>,
    /// Always null on the wire; private material never leaves the signer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
}

impl PublicKey {
    pub fn new(algorithm: KeyAlgorithm, public: Vec<u8>) -> Self {
        PublicKey {
            algorithm,
            keyval: KeyVal {
                public,
                private: None,
            },
        }
    }

    /// Key ID: hex-encoded SHA-256 over the canonical JSON of the key.
    pub fn key_id(&self) -> String {
        let canonical = to_canonical_json(self).expect("public key always serializes");
        hex::encode(Sha256::digest(&canonical))
    }

    pub fn public_bytes(&self) -> &[u8] {
        &self.keyval.public
    }
}

/// A single signature over a role body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "keyid")]
    pub key_id: String,
    pub method: String,
    #[serde(with = "base64_bytes")]
    pub sig: Vec<u8>,
}

/// A signed metadata envelope whose body is kept verbatim.
///
/// Keeping `signed` as raw JSON preserves the exact bytes a publisher
/// produced, so re-serving (or stashing) their metadata never perturbs
/// the content their signatures cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signed {
    pub signed: Box<RawValue>,
    pub signatures: Vec<Signature>,
}

impl Signed {
    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// The `version` field of the signed body.
    pub fn version(&self) -> Result<i64, serde_json::Error> {
        #[derive(Deserialize)]
        struct VersionOnly {
            version: i64,
        }
        let body: VersionOnly = serde_json::from_str(self.signed.get())?;
        Ok(body.version)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Serialize any value as canonical JSON: compact, with object keys sorted.
///
/// Round-tripping through `serde_json::Value` sorts map keys (the default
/// `Map` is backed by a `BTreeMap`), which is what signature payloads and
/// key IDs are computed over.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

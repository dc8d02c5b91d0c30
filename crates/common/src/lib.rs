/**
 * Cryptographic service abstraction.
 *  - `CryptoService` trait used everywhere signatures are produced
 *  - In-process implementation (ed25519 / ECDSA P-256) for dev setups
 *  - Remote signer client with startup reconnect and health checks
 */
pub mod crypto;
/**
 * TUF metadata model.
 *  Role names, public keys, signed metadata objects for the four
 *  canonical roles, delegations, and an in-memory `Repo` that can
 *  initialize and sign a repository against a `CryptoService`.
 */
pub mod tuf;

pub mod prelude {
    pub use crate::crypto::{CryptoError, CryptoService, LocalCryptoService};
    pub use crate::tuf::{KeyAlgorithm, PublicKey, Repo, RoleName, Signature, Signed, TufError};
}

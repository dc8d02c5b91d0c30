use std::collections::HashMap;
use std::sync::Arc;

use common::crypto::CryptoService;
use common::tuf::{Repo, RoleName, RootMeta, Signed, TufError};

use super::{Gun, MetaStore, MetaUpdate};

#[derive(Debug, thiserror::Error)]
pub enum SwizzleError {
    #[error("attempting to overwrite reserved delegation: {0}")]
    ReservedDelegation(RoleName),

    #[error("no root available to fetch targets role from")]
    NoSignerRoot,

    #[error("organizational root is not available: {0}")]
    RootUnavailable(String),

    #[error("metadata is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Tuf(#[from] TufError),
}

/// Transform a signer-rooted publish into the parallel alternate-rooted
/// publish chained to the organizational root.
///
/// The client's targets file survives verbatim under the stash delegation,
/// signed by the client's own targets keys; everything above it is re-signed
/// with the organizational keys. Updates for roles the client did not send
/// are not invented, so the emitted batch mirrors the input shape plus the
/// appended stash update.
pub(super) async fn swizzle_targets(
    crypto: &Arc<dyn CryptoService>,
    backing: &Arc<dyn MetaStore>,
    root_store: &Arc<dyn MetaStore>,
    root_gun: &Gun,
    gun: &Gun,
    updates: &[MetaUpdate],
    stashed_role: &RoleName,
) -> Result<Vec<MetaUpdate>, SwizzleError> {
    // the stash slot belongs to the swizzler, unconditionally
    if let Some(update) = updates.iter().find(|u| u.role == *stashed_role) {
        return Err(SwizzleError::ReservedDelegation(update.role.clone()));
    }

    let index: HashMap<&str, usize> = updates
        .iter()
        .enumerate()
        .filter(|(_, u)| u.role.is_base())
        .map(|(i, u)| (u.role.as_str(), i))
        .collect();

    let Some(&targets_idx) = index.get("targets") else {
        tracing::debug!(gun = %gun, "no target changes to swizzle");
        return Ok(updates.to_vec());
    };
    tracing::debug!(gun = %gun, "swizzling targets role for publish");

    // organizational root skeleton, re-read on every publish so admin
    // rotations take effect immediately
    let (_, org_root_bytes) = root_store
        .get_current(root_gun, &RoleName::root(), None)
        .await
        .map_err(|err| SwizzleError::RootUnavailable(err.to_string()))?;

    // target keys come from the publish's own root when present, otherwise
    // from the last signer-rooted root on record
    let signer_root_bytes = match index.get("root") {
        Some(&idx) => updates[idx].data.clone(),
        None => {
            tracing::debug!(gun = %gun, "root not included in publish, loading last stored root");
            backing
                .get_current(gun, &RoleName::root(), None)
                .await
                .map(|(_, bytes)| bytes)
                .map_err(|_| SwizzleError::NoSignerRoot)?
        }
    };
    let signer_root_envelope = Signed::from_slice(&signer_root_bytes)?;
    let signer_root: RootMeta = serde_json::from_str(signer_root_envelope.signed.get())?;
    let signer_targets_role = signer_root.build_base_role(&RoleName::targets())?;

    let targets_update = &updates[targets_idx];
    let mut repo = Repo::from_signed_root(crypto.clone(), &org_root_bytes)?;
    repo.init_targets(RoleName::targets(), targets_update.version);
    repo.add_delegation(
        &RoleName::targets(),
        stashed_role.clone(),
        signer_targets_role.keys,
        vec![String::new()],
        1,
    )?;
    let stash_version =
        repo.set_stashed_targets(stashed_role.clone(), targets_update.data.clone())?;

    let alternate_targets = repo.sign_targets(&RoleName::targets()).await?;
    let stash_bytes = repo.sign_targets(stashed_role).await?;

    let snapshot_version = index
        .get("snapshot")
        .map(|&idx| updates[idx].version)
        .unwrap_or(targets_update.version);
    repo.init_snapshot(snapshot_version);
    let alternate_snapshot = repo.sign_snapshot().await?;

    let timestamp_version = index
        .get("timestamp")
        .map(|&idx| updates[idx].version)
        .unwrap_or(targets_update.version);
    repo.init_timestamp(timestamp_version);
    let alternate_timestamp = repo.sign_timestamp().await?;

    let mut swizzled = updates.to_vec();
    for update in &mut swizzled {
        match update.role.as_str() {
            // the alternate chain stays anchored to operator keys
            "root" => update.data = org_root_bytes.clone(),
            "targets" => update.data = alternate_targets.clone(),
            "snapshot" => update.data = alternate_snapshot.clone(),
            "timestamp" => update.data = alternate_timestamp.clone(),
            _ => {}
        }
    }
    swizzled.push(MetaUpdate::new(stashed_role.clone(), stash_version, stash_bytes));

    Ok(swizzled)
}

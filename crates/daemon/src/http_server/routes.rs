use http::Method;

use common::tuf::RoleName;

use crate::storage::Gun;

/// A parsed `/v2/<gun>/_trust/...` request.
///
/// GUNs are path-shaped (they contain `/`), so the URL cannot be matched
/// segment-wise; everything after `/v2/` is parsed here instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustRoute {
    MetaCurrent { gun: Gun, role: RoleName },
    MetaChecksum { gun: Gun, role: RoleName, checksum: String },
    MetaVersion { gun: Gun, role: RoleName, version: i64 },
    Publish { gun: Gun },
    GetKey { gun: Gun, role: RoleName },
    RotateKey { gun: Gun, role: RoleName },
    DeleteGun { gun: Gun },
    Changefeed { gun: Gun },
}

impl TrustRoute {
    pub fn gun(&self) -> &Gun {
        match self {
            TrustRoute::MetaCurrent { gun, .. }
            | TrustRoute::MetaChecksum { gun, .. }
            | TrustRoute::MetaVersion { gun, .. }
            | TrustRoute::Publish { gun }
            | TrustRoute::GetKey { gun, .. }
            | TrustRoute::RotateKey { gun, .. }
            | TrustRoute::DeleteGun { gun }
            | TrustRoute::Changefeed { gun } => gun,
        }
    }

    /// Scopes the access controller must admit before the handler runs.
    pub fn required_scopes(&self) -> &'static [&'static str] {
        match self {
            TrustRoute::MetaCurrent { .. }
            | TrustRoute::MetaChecksum { .. }
            | TrustRoute::MetaVersion { .. }
            | TrustRoute::Changefeed { .. } => &["pull"],
            TrustRoute::Publish { .. } | TrustRoute::GetKey { .. } => &["push", "pull"],
            TrustRoute::RotateKey { .. } | TrustRoute::DeleteGun { .. } => &["*"],
        }
    }
}

/// A TUF role name as it appears in URLs: a canonical role or a
/// `targets/...` delegation path with non-empty segments.
fn valid_role(role: &str) -> bool {
    if matches!(role, "root" | "targets" | "snapshot" | "timestamp") {
        return true;
    }
    role.strip_prefix("targets/")
        .map(|rest| {
            !rest.is_empty()
                && rest
                    .split('/')
                    .all(|segment| !segment.is_empty() && !segment.contains(char::is_whitespace))
        })
        .unwrap_or(false)
}

/// SHA-256 / SHA-384 / SHA-512 hex digests.
fn valid_checksum(checksum: &str) -> bool {
    matches!(checksum.len(), 64 | 96 | 128)
        && checksum.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse the path remainder after `/v2/`. Returns `None` for anything that
/// is not a trust route; the dispatcher answers those with a 404.
pub fn parse(method: &Method, path: &str) -> Option<TrustRoute> {
    if let Some((gun, file)) = split_suffix(path, "/_trust/tuf/") {
        let gun = Gun::new(gun);
        if file.is_empty() {
            return match *method {
                Method::POST => Some(TrustRoute::Publish { gun }),
                Method::DELETE => Some(TrustRoute::DeleteGun { gun }),
                _ => None,
            };
        }
        if let Some(role) = file.strip_suffix(".key") {
            if !matches!(role, "snapshot" | "timestamp") {
                return None;
            }
            let role = RoleName::from(role);
            return match *method {
                Method::GET => Some(TrustRoute::GetKey { gun, role }),
                Method::POST => Some(TrustRoute::RotateKey { gun, role }),
                _ => None,
            };
        }
        if *method != Method::GET {
            return None;
        }
        let stem = file.strip_suffix(".json")?;
        if valid_role(stem) {
            return Some(TrustRoute::MetaCurrent {
                gun,
                role: RoleName::from(stem),
            });
        }
        if let Some((role, checksum)) = stem.rsplit_once('.') {
            if valid_checksum(checksum) && valid_role(role) {
                return Some(TrustRoute::MetaChecksum {
                    gun,
                    role: RoleName::from(role),
                    checksum: checksum.to_lowercase(),
                });
            }
        }
        if let Some((version, role)) = stem.split_once('.') {
            if !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(version) = version.parse::<i64>() {
                    if version >= 1 && valid_role(role) {
                        return Some(TrustRoute::MetaVersion {
                            gun,
                            role: RoleName::from(role),
                            version,
                        });
                    }
                }
            }
        }
        return None;
    }

    if let Some((gun, rest)) = split_suffix(path, "/_trust/changefeed") {
        if rest.is_empty() && *method == Method::GET {
            return Some(TrustRoute::Changefeed { gun: Gun::new(gun) });
        }
    }

    None
}

/// Split `path` around the first occurrence of `marker`, returning the GUN
/// before it and the remainder after it.
fn split_suffix<'a>(path: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let index = path.find(marker)?;
    let gun = &path[..index];
    if gun.is_empty() {
        return None;
    }
    Some((gun, &path[index + marker.len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Option<TrustRoute> {
        parse(&Method::GET, path)
    }

    #[test]
    fn current_metadata_routes() {
        assert_eq!(
            get("quay.io/acme/app/_trust/tuf/root.json"),
            Some(TrustRoute::MetaCurrent {
                gun: Gun::from("quay.io/acme/app"),
                role: RoleName::root(),
            })
        );
        assert_eq!(
            get("quay.io/acme/app/_trust/tuf/targets/releases.json"),
            Some(TrustRoute::MetaCurrent {
                gun: Gun::from("quay.io/acme/app"),
                role: RoleName::from("targets/releases"),
            })
        );
        assert_eq!(get("quay.io/acme/app/_trust/tuf/bogus.json"), None);
    }

    #[test]
    fn checksum_routes() {
        let sha256 = "a".repeat(64);
        let route = get(&format!(
            "quay.io/acme/app/_trust/tuf/targets.{sha256}.json"
        ));
        assert_eq!(
            route,
            Some(TrustRoute::MetaChecksum {
                gun: Gun::from("quay.io/acme/app"),
                role: RoleName::targets(),
                checksum: sha256,
            })
        );

        // sha384 and sha512 digests are also addressable
        assert!(get(&format!("g/a/_trust/tuf/root.{}.json", "b".repeat(96))).is_some());
        assert!(get(&format!("g/a/_trust/tuf/root.{}.json", "c".repeat(128))).is_some());
        // wrong length is not a checksum route
        assert_eq!(get(&format!("g/a/_trust/tuf/root.{}.json", "d".repeat(63))), None);
    }

    #[test]
    fn version_routes() {
        assert_eq!(
            get("quay.io/acme/app/_trust/tuf/7.snapshot.json"),
            Some(TrustRoute::MetaVersion {
                gun: Gun::from("quay.io/acme/app"),
                role: RoleName::snapshot(),
                version: 7,
            })
        );
        assert_eq!(
            get("g/a/_trust/tuf/3.targets/releases.json"),
            Some(TrustRoute::MetaVersion {
                gun: Gun::from("g/a"),
                role: RoleName::from("targets/releases"),
                version: 3,
            })
        );
        assert_eq!(get("g/a/_trust/tuf/0.root.json"), None);
    }

    #[test]
    fn publish_and_delete() {
        assert_eq!(
            parse(&Method::POST, "quay.io/acme/app/_trust/tuf/"),
            Some(TrustRoute::Publish {
                gun: Gun::from("quay.io/acme/app")
            })
        );
        assert_eq!(
            parse(&Method::DELETE, "quay.io/acme/app/_trust/tuf/"),
            Some(TrustRoute::DeleteGun {
                gun: Gun::from("quay.io/acme/app")
            })
        );
        assert_eq!(parse(&Method::PUT, "quay.io/acme/app/_trust/tuf/"), None);
    }

    #[test]
    fn key_routes() {
        assert_eq!(
            get("g/a/_trust/tuf/snapshot.key"),
            Some(TrustRoute::GetKey {
                gun: Gun::from("g/a"),
                role: RoleName::snapshot(),
            })
        );
        assert_eq!(
            parse(&Method::POST, "g/a/_trust/tuf/timestamp.key"),
            Some(TrustRoute::RotateKey {
                gun: Gun::from("g/a"),
                role: RoleName::timestamp(),
            })
        );
        // only snapshot and timestamp keys are served
        assert_eq!(get("g/a/_trust/tuf/root.key"), None);
        assert_eq!(get("g/a/_trust/tuf/targets.key"), None);
    }

    #[test]
    fn changefeed_route() {
        assert_eq!(
            get("quay.io/acme/app/_trust/changefeed"),
            Some(TrustRoute::Changefeed {
                gun: Gun::from("quay.io/acme/app")
            })
        );
        assert_eq!(parse(&Method::POST, "g/a/_trust/changefeed"), None);
    }

    #[test]
    fn missing_gun_is_rejected() {
        assert_eq!(get("/_trust/tuf/root.json"), None);
    }

    #[test]
    fn scope_requirements() {
        let pull = get("g/a/_trust/tuf/root.json").unwrap();
        assert_eq!(pull.required_scopes(), &["pull"]);
        let publish = parse(&Method::POST, "g/a/_trust/tuf/").unwrap();
        assert_eq!(publish.required_scopes(), &["push", "pull"]);
        let delete = parse(&Method::DELETE, "g/a/_trust/tuf/").unwrap();
        assert_eq!(delete.required_scopes(), &["*"]);
    }
}

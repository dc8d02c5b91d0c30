//! End-to-end tests through the trust router: publish as a signer, read
//! back from every identity, and exercise the admin path against the
//! organizational root.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use tower::ServiceExt;

use common::tuf::{KeyAlgorithm, RoleName, Signed, TargetsMeta};
use countersign_daemon::auth::ConstantAccessController;
use countersign_daemon::http_server::{router, CacheSettings};
use countersign_daemon::service_state::State;
use countersign_daemon::storage::{
    ChannelStore, MemoryStore, MetaStore, MultiplexingStore, ReadOnlyStore, ROOT,
};
use countersign_daemon::testkit::{publish_updates, TestPublisher, TestRoot};

const GUN: &str = "quay.io/acme/app";

struct Harness {
    root: TestRoot,
    publisher: TestPublisher,
    base_state: State,
    signer: Router,
    alternate: Router,
    admin: Router,
    backing: Arc<MemoryStore>,
}

async fn harness_with_prefixes(prefixes: Vec<String>) -> Harness {
    let root = TestRoot::generate().await;
    let publisher = TestPublisher::generate(GUN).await;

    let backing = Arc::new(MemoryStore::new());
    let backing_dyn: Arc<dyn MetaStore> = backing.clone();
    root.persist(&backing_dyn).await;

    let root_read: Arc<dyn MetaStore> = Arc::new(ChannelStore::new(
        Arc::new(ReadOnlyStore::new(backing_dyn.clone())),
        ROOT,
    ));
    let multiplexer = Arc::new(MultiplexingStore::new(
        backing_dyn.clone(),
        root.crypto(),
        root_read,
        root.gun().clone(),
        RoleName::from("targets/releases"),
    ));

    let base_state = State::new(
        multiplexer,
        backing_dyn,
        Arc::new(ConstantAccessController::new("signer")),
        root.crypto(),
        KeyAlgorithm::Ed25519,
        prefixes,
        CacheSettings::default(),
    );
    let signer = router(base_state.clone());
    let alternate = router(
        base_state.with_access(Arc::new(ConstantAccessController::new("alternate"))),
    );
    let admin = router(base_state.with_access(Arc::new(ConstantAccessController::new("admin"))));

    Harness {
        root,
        publisher,
        base_state,
        signer,
        alternate,
        admin,
        backing,
    }
}

async fn harness() -> Harness {
    harness_with_prefixes(Vec::new()).await
}

/// Assemble the publish body by hand so the signed envelopes land on the
/// wire byte-for-byte.
fn publish_body(files: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    let mut body = Vec::from(&b"{"[..]);
    for (i, (role, envelope)) in files.iter().enumerate() {
        if i > 0 {
            body.push(b',');
        }
        body.extend_from_slice(format!("{role:?}:").as_bytes());
        body.extend_from_slice(envelope);
    }
    body.push(b'}');
    body
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>, http::HeaderMap) {
    let response = router.clone().oneshot(request).await.expect("infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body collects")
        .to_vec();
    (status, body, headers)
}

async fn post_publish(router: &Router, gun: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v2/{gun}/_trust/tuf/"))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let (status, body, _) = send(router, request).await;
    (status, body)
}

async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>, http::HeaderMap) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

#[tokio::test]
async fn signer_publish_reads_back_verbatim() {
    let h = harness().await;
    let files = h.publisher.signed_files(1).await;

    let (status, body) = post_publish(&h.signer, GUN, publish_body(&files)).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));

    for role in ["root", "targets", "snapshot", "timestamp"] {
        let (status, served, headers) =
            get(&h.signer, &format!("/v2/{GUN}/_trust/tuf/{role}.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(served, files[role], "{role} bytes differ for the signer");
        let cache_control = headers.get("cache-control").unwrap().to_str().unwrap();
        assert!(cache_control.contains("must-revalidate"));
        assert!(headers.contains_key("last-modified"));
    }
}

#[tokio::test]
async fn alternate_reader_sees_rerooted_chain_with_stashed_targets() {
    let h = harness().await;
    let files = h.publisher.signed_files(1).await;
    let (status, _) = post_publish(&h.signer, GUN, publish_body(&files)).await;
    assert_eq!(status, StatusCode::OK);

    // alternate targets differ from the published bytes and carry the
    // stash delegation keyed with the publisher's targets keys
    let (status, targets, _) = get(&h.alternate, &format!("/v2/{GUN}/_trust/tuf/targets.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(targets, files["targets"]);
    h.root.verify_signed_by(&RoleName::targets(), &targets);

    let envelope = Signed::from_slice(&targets).unwrap();
    let body: TargetsMeta = serde_json::from_str(envelope.signed.get()).unwrap();
    let delegation = &body.delegations.roles[0];
    assert_eq!(delegation.name, RoleName::from("targets/releases"));
    let mut expected = h.publisher.targets_key_ids();
    expected.sort();
    let mut actual = delegation.keyids.clone();
    actual.sort();
    assert_eq!(actual, expected);

    // the stashed delegation preserves the publisher's signed section
    // byte-for-byte and still verifies against their keys
    let (status, stash, _) = get(
        &h.alternate,
        &format!("/v2/{GUN}/_trust/tuf/targets/releases.json"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stash_envelope = Signed::from_slice(&stash).unwrap();
    let original_envelope = Signed::from_slice(&files["targets"]).unwrap();
    assert_eq!(stash_envelope.signed.get(), original_envelope.signed.get());
    h.publisher.verify_signed_by(&RoleName::targets(), &stash);

    // snapshot and timestamp verify against the organizational keys
    for role in [RoleName::snapshot(), RoleName::timestamp()] {
        let (status, served, _) =
            get(&h.alternate, &format!("/v2/{GUN}/_trust/tuf/{role}.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(served, files[role.as_str()]);
        h.root.verify_signed_by(&role, &served);
    }
}

#[tokio::test]
async fn version_conflict_is_rejected_without_partial_writes() {
    let h = harness().await;
    let v1 = h.publisher.signed_files(1).await;
    let (status, _) = post_publish(&h.signer, GUN, publish_body(&v1)).await;
    assert_eq!(status, StatusCode::OK);

    let replay = h.publisher.signed_files(1).await;
    let (status, body) = post_publish(&h.signer, GUN, publish_body(&replay)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("OLD_VERSION"));

    // both channels still serve the original v1 bytes
    let (_, signer_root, _) = get(&h.signer, &format!("/v2/{GUN}/_trust/tuf/root.json")).await;
    assert_eq!(signer_root, v1["root"]);
    let (status, _, _) = get(&h.alternate, &format!("/v2/{GUN}/_trust/tuf/root.json")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reserved_delegation_publish_is_rejected_atomically() {
    let h = harness().await;
    let mut files = h.publisher.signed_files(1).await;
    files.insert(
        "targets/releases".to_string(),
        br#"{"signed":{"_type":"Targets","version":1},"signatures":[]}"#.to_vec(),
    );

    let changes_before = h.backing.get_changes("0", 1000, "").await.unwrap().len();
    let (status, body) = post_publish(&h.signer, GUN, publish_body(&files)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("RESERVED_DELEGATION"));

    let changes_after = h.backing.get_changes("0", 1000, "").await.unwrap().len();
    assert_eq!(changes_before, changes_after, "rows were written");
}

#[tokio::test]
async fn admin_updates_root_and_next_publish_chains_to_it() {
    let h = harness().await;
    let (status, _) = post_publish(
        &h.signer,
        GUN,
        publish_body(&h.publisher.signed_files(1).await),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // admin rotates the organizational root through the publish endpoint
    let rotated = TestRoot::generate_with(h.root.shared_crypto(), 2).await;
    let mut files = BTreeMap::new();
    files.insert("root".to_string(), rotated.root_bytes().to_vec());
    let (status, body) = post_publish(&h.admin, "quay", publish_body(&files)).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));

    // the admin view serves the rotated root back
    let (status, served, _) = get(&h.admin, "/v2/quay/_trust/tuf/root.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, rotated.root_bytes());

    // and the next signer publish chains the alternate channel to it
    let (status, _) = post_publish(
        &h.signer,
        GUN,
        publish_body(&h.publisher.signed_files(2).await),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, alternate_root, _) = get(&h.alternate, &format!("/v2/{GUN}/_trust/tuf/root.json")).await;
    assert_eq!(alternate_root, rotated.root_bytes());
}

#[tokio::test]
async fn checksum_and_version_addressing() {
    let h = harness().await;
    let files = h.publisher.signed_files(1).await;
    post_publish(&h.signer, GUN, publish_body(&files)).await;

    let checksum = {
        use sha2::Digest as _;
        hex::encode(sha2::Sha256::digest(&files["targets"]))
    };
    let (status, served, headers) = get(
        &h.signer,
        &format!("/v2/{GUN}/_trust/tuf/targets.{checksum}.json"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, files["targets"]);
    let cache_control = headers.get("cache-control").unwrap().to_str().unwrap();
    assert_eq!(cache_control, "max-age=31536000");

    let (status, served, _) = get(&h.signer, &format!("/v2/{GUN}/_trust/tuf/1.targets.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, files["targets"]);

    let (status, _, _) = get(&h.signer, &format!("/v2/{GUN}/_trust/tuf/9.targets.json")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gun_prefixes_are_enforced() {
    let h = harness_with_prefixes(vec!["quay.io/".to_string()]).await;
    let (status, _, _) = get(
        &h.signer,
        "/v2/docker.io/acme/app/_trust/tuf/root.json",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_publish(
        &h.signer,
        GUN,
        publish_body(&h.publisher.signed_files(1).await),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_identity_is_a_lookup_failure() {
    let h = harness().await;
    post_publish(
        &h.signer,
        GUN,
        publish_body(&h.publisher.signed_files(1).await),
    )
    .await;

    // a token context label outside {signer, alternate, admin} resolves no
    // channel view, which reads as metadata-not-found
    let mislabeled = router(
        h.base_state
            .with_access(Arc::new(ConstantAccessController::new("quay"))),
    );
    let (status, body, _) = get(&mislabeled, &format!("/v2/{GUN}/_trust/tuf/root.json")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(String::from_utf8_lossy(&body).contains("invalid tuf root signer"));
}

#[tokio::test]
async fn auth_probe_and_key_endpoints() {
    let h = harness().await;

    let (status, _, _) = get(&h.signer, "/v2/").await;
    assert_eq!(status, StatusCode::OK);

    let (status, key_body, _) = get(&h.signer, &format!("/v2/{GUN}/_trust/tuf/snapshot.key")).await;
    assert_eq!(status, StatusCode::OK);
    let key: serde_json::Value = serde_json::from_slice(&key_body).unwrap();
    assert_eq!(key["keytype"], "ed25519");

    // rotation produces a different key
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v2/{GUN}/_trust/tuf/snapshot.key"))
        .body(Body::empty())
        .unwrap();
    let (status, rotated_body, _) = send(&h.signer, request).await;
    assert_eq!(status, StatusCode::OK);
    let rotated: serde_json::Value = serde_json::from_slice(&rotated_body).unwrap();
    assert_ne!(key["keyval"]["public"], rotated["keyval"]["public"]);

    // only snapshot and timestamp keys exist
    let (status, _, _) = get(&h.signer, &format!("/v2/{GUN}/_trust/tuf/root.key")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn changefeed_reports_published_rows() {
    let h = harness().await;
    post_publish(
        &h.signer,
        GUN,
        publish_body(&h.publisher.signed_files(1).await),
    )
    .await;

    let (status, body, _) = get(&h.signer, &format!("/v2/{GUN}/_trust/changefeed?records=50")).await;
    assert_eq!(status, StatusCode::OK);
    let feed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let count = feed["count"].as_u64().unwrap();
    // four signer-channel roles + four alternate roles + the stash row
    assert_eq!(count, 9);
}

#[tokio::test]
async fn delete_removes_signer_channel_only() {
    let h = harness().await;
    post_publish(
        &h.signer,
        GUN,
        publish_body(&h.publisher.signed_files(1).await),
    )
    .await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/v2/{GUN}/_trust/tuf/"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&h.signer, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = get(&h.signer, &format!("/v2/{GUN}/_trust/tuf/root.json")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // the alternate-rooted history is retained
    let (status, _, _) = get(&h.alternate, &format!("/v2/{GUN}/_trust/tuf/root.json")).await;
    assert_eq!(status, StatusCode::OK);
}

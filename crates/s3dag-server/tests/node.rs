//! End-to-end tests over a fully wired node.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use s3dag_cache::CacheConfig;
use s3dag_gateway::{ByteRange, CompletePart, ObjectLayer, PutObjectOptions};
use s3dag_lifecycle::{
    Collaborators, DistributedLock, EventSink, Expiration, InMemoryLockService, Lifecycle,
    RecordingEventSink, Rule, RuleStatus, SweepState, LIFECYCLE_LOCK,
};
use s3dag_server::{BackendKind, Node, ServerConfig};

fn config(node_id: &str) -> ServerConfig {
    let mut lifecycle_policies = BTreeMap::new();
    lifecycle_policies.insert(
        "logs".to_string(),
        Lifecycle::new(vec![Rule {
            id: "scratch".into(),
            status: RuleStatus::Enabled,
            prefix: "tmp/".into(),
            tags: BTreeMap::new(),
            expiration: Expiration {
                days: Some(1),
                date: None,
            },
        }]),
    );
    ServerConfig {
        node_id: node_id.into(),
        backend: BackendKind::Dag,
        lifecycle_policies,
        ..Default::default()
    }
}

async fn put(node: &Node, bucket: &str, object: &str, data: &'static [u8]) {
    node.gateway()
        .put_object(bucket, object, Bytes::from_static(data), PutObjectOptions::default())
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Data path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn evicted_objects_are_served_from_the_dag() {
    let mut c = config("node-a");
    c.cache = CacheConfig {
        max_size: 8,
        ..Default::default()
    };
    let node = Node::build(c).unwrap();
    let gw = node.gateway();
    gw.make_bucket("photos", "").await.unwrap();
    put(&node, "photos", "one", b"first!").await;
    put(&node, "photos", "two", b"second").await;

    // both cannot fit in eight bytes
    assert!(node.cache().stats().bytes <= 8);
    let one = gw.get_object("photos", "one", None).await.unwrap();
    assert_eq!(&one[..], b"first!");
    let part = gw
        .get_object("photos", "two", Some(ByteRange { start: 2, length: 3 }))
        .await
        .unwrap();
    assert_eq!(&part[..], b"con");

    let hashes = node.ledger().get_object_hashes("photos").unwrap();
    assert_eq!(hashes.len(), 2);
}

#[tokio::test]
async fn multipart_upload_lands_in_the_dag() {
    let node = Node::build(config("node-a")).unwrap();
    let gw = node.gateway();
    gw.make_bucket("media", "").await.unwrap();

    let id = gw.new_multipart_upload("media", "movie").await.unwrap();
    let p1 = gw
        .put_object_part("media", "movie", &id, 1, Bytes::from_static(b"hello "))
        .await
        .unwrap();
    let p2 = gw
        .put_object_part("media", "movie", &id, 2, Bytes::from_static(b"world"))
        .await
        .unwrap();
    let parts = [
        CompletePart {
            part_number: 1,
            etag: p1.etag,
        },
        CompletePart {
            part_number: 2,
            etag: p2.etag,
        },
    ];
    let info = gw
        .complete_multipart_upload("media", "movie", &id, &parts)
        .await
        .unwrap();
    assert_eq!(info.size, 11);

    let data = gw.get_object("media", "movie", None).await.unwrap();
    assert_eq!(&data[..], b"hello world");
    assert!(node.ledger().get_object_hash("media", "movie").is_ok());
    assert!(node.ledger().get_multipart_upload(&id).is_err());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweep_removes_expired_objects_from_the_dag() {
    let events = Arc::new(RecordingEventSink::new());
    let collab = Collaborators {
        events: Arc::clone(&events) as Arc<dyn EventSink>,
        ..Collaborators::local()
    };
    let node = Node::with_collaborators(config("node-a"), collab).unwrap();
    node.gateway().make_bucket("logs", "").await.unwrap();
    put(&node, "logs", "tmp/1", b"a").await;
    put(&node, "logs", "tmp/2", b"b").await;
    put(&node, "logs", "audit/1", b"c").await;

    let report = node
        .sweeper()
        .run_once_at(Utc::now() + chrono::Duration::days(3))
        .await
        .unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(events.events().len(), 2);

    let remaining: Vec<_> = node
        .ledger()
        .get_object_hashes("logs")
        .unwrap()
        .into_keys()
        .collect();
    assert_eq!(remaining, vec!["audit/1".to_string()]);
    assert!(node.gateway().get_object_info("logs", "tmp/1").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nodes_sharing_a_lock_sweep_one_at_a_time() {
    let locks = Arc::new(InMemoryLockService::new());
    let collab = || Collaborators {
        lock: Arc::clone(&locks) as Arc<dyn DistributedLock>,
        ..Collaborators::local()
    };
    let a = Node::with_collaborators(config("node-a"), collab()).unwrap();
    let b = Node::with_collaborators(config("node-b"), collab()).unwrap();
    for node in [&a, &b] {
        node.gateway().make_bucket("logs", "").await.unwrap();
        put(node, "logs", "tmp/1", b"a").await;
    }

    // node-b waits its turn behind node-a
    locks
        .acquire(LIFECYCLE_LOCK, "node-a", Duration::from_secs(1))
        .await
        .unwrap();
    let later = Utc::now() + chrono::Duration::days(3);
    let sweeper = Arc::clone(b.sweeper());
    let waiting = tokio::spawn(async move { sweeper.run_once_at(later).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.sweeper().state(), SweepState::Idle);
    assert!(b.sweeper().status().last_activity.is_none());

    locks.release(LIFECYCLE_LOCK, "node-a").await.unwrap();
    let report = waiting.await.unwrap().unwrap();
    assert_eq!(report.deleted, 1);
    assert!(b.sweeper().status().last_activity.is_some());

    let report = a.sweeper().run_once_at(later).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert!(locks.holder(LIFECYCLE_LOCK).is_none());
}

#[tokio::test]
async fn running_node_sweeps_and_shuts_down() {
    let node = Node::build(config("node-a")).unwrap();
    let sweeper = Arc::clone(node.sweeper());
    let ledger = Arc::clone(node.ledger());
    let running = node.start().unwrap();

    for _ in 0..500 {
        if sweeper.status().last_activity.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(sweeper.status().last_activity.is_some());

    running.shutdown().await.unwrap();
    assert_eq!(sweeper.state(), SweepState::Idle);
    assert!(ledger.get_bucket_names().is_err());
}

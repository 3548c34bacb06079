#![cfg(feature = "peer")]

use std::sync::Arc;
use std::time::Duration;

use relaylink::peer::{
    ClientCluster, Destination, PeerError, RpcRequest, DEFAULT_DISCONNECT_REASON,
};
use relaylink::shard::split_into_shards;
use relaylink::transport::{KeyPair, MemoryRelay, RelayEvent};
use serde_json::{json, Value};

const BOB: &str = "b0b";
const RELAY: &str = "wss://relay.test";

fn keys(public: &str) -> KeyPair {
    KeyPair::new(public, format!("{public}-secret"))
}

fn bob() -> Destination {
    Destination::new(BOB, [RELAY])
}

fn event(author: &str, to: &str, content: String) -> RelayEvent {
    RelayEvent {
        id: format!("evt-{}", content.len()),
        author: author.to_string(),
        to: to.to_string(),
        kind: 21000,
        content,
    }
}

fn sent_request_id(relay: &MemoryRelay, index: usize) -> String {
    let message: Value =
        serde_json::from_str(&relay.sent()[index].message).expect("sent message is JSON");
    message["requestId"]
        .as_str()
        .expect("sent message has requestId")
        .to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_or_create_yields_one_client() {
    let relay = Arc::new(MemoryRelay::new().with_sync_delay(Duration::from_millis(20)));
    let cluster = ClientCluster::new(relay.clone());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cluster = cluster.clone();
            tokio::spawn(async move { cluster.get_or_create_client(bob(), keys("alice"), false).await })
        })
        .collect();

    let mut clients = Vec::new();
    for handle in handles {
        clients.push(handle.await.expect("task should join").expect("bring-up should succeed"));
    }

    let first = &clients[0];
    assert!(clients.iter().all(|client| Arc::ptr_eq(client, first)));
    assert_eq!(cluster.list_clients().len(), 1);
    // Every call syncs, cache hit or not.
    assert_eq!(relay.synced().len(), 8);
}

#[tokio::test]
async fn sharded_reply_reaches_the_caller() {
    let relay = Arc::new(MemoryRelay::new());
    let cluster = ClientCluster::new(relay.clone());
    let client = cluster
        .get_or_create_client(bob(), keys("alice"), false)
        .await
        .unwrap();

    let pending = client
        .send(BOB, RpcRequest::new("GetUserInfo"))
        .expect("send should register");
    let request_id = sent_request_id(&relay, 0);
    assert_eq!(request_id, pending.request_id());

    let reply = json!({ "requestId": request_id, "status": "OK", "balance": 21_000 }).to_string();
    let mut fragments = split_into_shards(&reply, 7, "shards-1").unwrap();
    assert!(fragments.len() > 2);
    fragments.swap(0, 2);
    let last = fragments.pop().expect("at least one fragment");

    for fragment in fragments {
        assert!(relay.deliver(event(BOB, "alice", fragment)));
    }
    assert_eq!(cluster.open_shard_sets(), 1);
    assert_eq!(client.pending_calls().len(), 1);

    assert!(cluster.route_inbound_event(&event(BOB, "alice", last)));
    assert_eq!(cluster.open_shard_sets(), 0);

    let response = pending.await.expect("response should resolve");
    assert_eq!(response["balance"], 21_000);
    assert!(client.client_state().latest_response_at_millis > 0);
}

#[tokio::test]
async fn unclaimed_event_is_reported_and_changes_nothing() {
    let relay = Arc::new(MemoryRelay::new());
    let cluster = ClientCluster::new(relay.clone());
    let client = cluster
        .get_or_create_client(bob(), keys("alice"), false)
        .await
        .unwrap();
    let _pending = client.send(BOB, RpcRequest::new("ping").with_request_id("known")).unwrap();

    let unknown = event(BOB, "alice", json!({ "requestId": "unknown" }).to_string());
    assert!(!cluster.route_inbound_event(&unknown));

    let misaddressed = event(BOB, "carol", json!({ "requestId": "known" }).to_string());
    assert!(!cluster.route_inbound_event(&misaddressed));

    assert_eq!(client.pending_calls().len(), 1);
    assert_eq!(client.client_state().latest_response_at_millis, 0);
}

#[tokio::test]
async fn temporary_clients_route_but_are_not_listed() {
    let relay = Arc::new(MemoryRelay::new());
    let cluster = ClientCluster::new(relay.clone());
    let persistent = cluster
        .get_or_create_client(bob(), keys("alice"), false)
        .await
        .unwrap();
    let temporary = cluster
        .get_or_create_client(bob(), keys("alice"), true)
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&persistent, &temporary));
    let listed = cluster.list_clients();
    assert_eq!(listed.len(), 1);
    assert!(Arc::ptr_eq(&listed[0], &persistent));

    let pending = temporary
        .send(BOB, RpcRequest::new("once").with_request_id("tmp-1"))
        .unwrap();
    let reply = event(BOB, "alice", json!({ "requestId": "tmp-1", "ok": true }).to_string());
    assert!(relay.deliver(reply));
    assert_eq!(pending.await.unwrap()["ok"], true);
}

#[tokio::test]
async fn local_identity_is_part_of_the_key() {
    let relay = Arc::new(MemoryRelay::new());
    let cluster = ClientCluster::new(relay.clone());
    let alice = cluster
        .get_or_create_client(bob(), keys("alice"), false)
        .await
        .unwrap();
    let carol = cluster
        .get_or_create_client(bob(), keys("carol"), false)
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&alice, &carol));
    assert_eq!(cluster.list_clients().len(), 2);
    assert_eq!(carol.key().to_string(), format!("{BOB}-carol"));
}

#[tokio::test]
async fn bad_references_fail_before_bring_up() {
    let relay = Arc::new(MemoryRelay::new());
    let cluster = ClientCluster::new(relay.clone());

    let err = cluster
        .get_or_create_client(Destination::new(BOB, Vec::<String>::new()), keys("alice"), false)
        .await
        .expect_err("empty relay set should fail");
    assert!(matches!(err, PeerError::NoRelays(pubkey) if pubkey == BOB));

    let err = cluster
        .get_or_create_client("npub1notaprofile", keys("alice"), false)
        .await
        .expect_err("garbage reference should fail");
    assert!(matches!(err, PeerError::InvalidReference(_)));

    assert!(relay.synced().is_empty());
}

#[tokio::test]
async fn nprofile_reference_resolves_relays() {
    let relay = Arc::new(MemoryRelay::new());
    let cluster = ClientCluster::new(relay.clone());
    let client = cluster
        .get_or_create_client(
            "nprofile1qqsrhuxx8l9ex335q7he0f09aej04zpazpl0ne2cgukyawd24mayt8gpp4mhxue69uhhytnc9e3k7mgpz4mhxue69uhkg6nzv9ejuumpv34kytnrdaksjlyr9p",
            keys("alice"),
            false,
        )
        .await
        .unwrap();

    assert_eq!(
        client.destination(),
        "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d"
    );
    assert_eq!(client.relays(), ["wss://r.x.com", "wss://djbas.sadkb.com"]);
}

#[tokio::test]
async fn failed_sync_reaches_its_caller_only() {
    let relay = Arc::new(MemoryRelay::new());
    let cluster = ClientCluster::new(relay.clone());
    relay.fail_next_sync("relay unreachable");

    let err = cluster
        .get_or_create_client(bob(), keys("alice"), false)
        .await
        .expect_err("first bring-up should fail");
    assert!(matches!(err, PeerError::Transport(_)));
    assert!(cluster.list_clients().is_empty());

    cluster
        .get_or_create_client(bob(), keys("alice"), false)
        .await
        .expect("queue keeps running after a failure");
    assert_eq!(cluster.list_clients().len(), 1);
}

#[tokio::test]
async fn shutdown_fails_outstanding_calls() {
    let relay = Arc::new(MemoryRelay::new());
    let cluster = ClientCluster::new(relay.clone());
    let client = cluster
        .get_or_create_client(bob(), keys("alice"), false)
        .await
        .unwrap();
    let pending = client.send(BOB, RpcRequest::new("slow")).unwrap();

    cluster.shutdown(None);

    let response = pending.await.unwrap();
    assert_eq!(response["status"], "ERROR");
    assert_eq!(response["reason"], DEFAULT_DISCONNECT_REASON);
    assert!(cluster.list_clients().is_empty());

    let replacement = cluster
        .get_or_create_client(bob(), keys("alice"), false)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&client, &replacement));
}

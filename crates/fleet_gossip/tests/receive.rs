use std::sync::Arc;
use std::time::Duration;

use fleet_gossip::test_utils::{pattern_fixture, shared_pattern, MemNetwork};
use fleet_gossip::*;
use pretty_assertions::assert_eq;

fn node(agent: &str, tuning: GossipTuningParams) -> Arc<PatternGossip> {
    let net = MemNetwork::<TestPattern>::new();
    let transport: DynTransport = net.clone();
    let node = PatternGossip::new(GossipConfig::new(agent).with_tuning(tuning), transport).unwrap();
    net.join(&node);
    node
}

fn codec() -> CompressionCodec {
    CompressionCodec::new(true, 1024)
}

fn with_clock(
    mut item: SharedItem<TestPattern>,
    clock: &[(&str, u64)],
) -> SharedItem<TestPattern> {
    item.vector_clock = clock.iter().map(|(a, c)| (*a, *c)).collect();
    item
}

#[test]
fn receive_is_idempotent() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let wire = shared_pattern("A", pattern_fixture("p", 0.9, 0.9))
        .to_wire(&codec())
        .unwrap();

    assert!(b.receive(wire.clone()));
    assert!(!b.receive(wire.clone()));
    assert!(!b.receive_bytes(&wire.encode().unwrap()));

    let stats = b.get_stats();
    assert_eq!(stats.items_received, 1);
    assert_eq!(stats.duplicates_filtered, 2);
    assert_eq!(b.get_all_items().len(), 1);
    assert_eq!(b.local_clock().get("A"), 1);
}

#[test]
fn tampered_payload_is_rejected() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let item = shared_pattern("A", pattern_fixture("p", 0.9, 0.9));
    let mut wire = item.to_wire(&codec()).unwrap();
    wire.payload = canonical_payload(&pattern_fixture("evil", 0.9, 0.9)).unwrap();
    wire.uncompressed_size = wire.payload.len();

    assert!(!b.receive(wire));
    assert!(!b.receive_bytes(b"{\"not\": \"an item\"}"));

    let stats = b.get_stats();
    assert_eq!(stats.integrity_rejected, 2);
    assert_eq!(stats.items_received, 0);
    assert_eq!(stats.duplicates_filtered, 0);
    assert!(b.get_item(&item.id).is_none());
    assert!(b.local_clock().is_empty());
}

#[test]
fn forged_uncompressed_size_is_rejected_without_allocating() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let mut content = pattern_fixture("big", 0.9, 0.9);
    content.template = "expect(result).toEqual(expected);\n".repeat(200);
    let mut wire = shared_pattern("A", content).to_wire(&codec()).unwrap();
    assert!(wire.is_compressed);
    wire.uncompressed_size = usize::MAX / 2;

    assert!(!b.receive(wire.clone()));
    wire.uncompressed_size = usize::MAX;
    assert!(!b.receive_bytes(&wire.encode().unwrap()));

    let stats = b.get_stats();
    assert_eq!(stats.integrity_rejected, 2);
    assert_eq!(stats.items_received, 0);
    assert!(b.get_all_items().is_empty());
}

#[test]
fn deeper_local_history_beats_better_concurrent_remote() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let content = pattern_fixture("p", 0.9, 0.9);
    let mut local = with_clock(shared_pattern("A", content.clone()), &[("A", 2)]);
    local.priority = 0.5;
    assert_eq!(b.import_items(vec![local.clone()]), 1);

    let mut remote = with_clock(shared_pattern("C", content), &[("A", 1), ("C", 1)]);
    remote.priority = 0.8;
    assert!(remote.quality_score() > local.quality_score());

    let mut events = b.subscribe();
    assert!(!b.receive(remote.to_wire(&codec()).unwrap()));

    let held = b.get_item(&local.id).unwrap();
    assert_eq!(held.source_agent_id, AgentId::from("A"));
    assert_eq!(held.priority, 0.5);
    // the survivor absorbed the remote history
    assert_eq!(held.vector_clock.get("A"), 2);
    assert_eq!(held.vector_clock.get("C"), 1);

    let stats = b.get_stats();
    assert_eq!(stats.stale_rejected, 1);
    assert_eq!(stats.conflicts_resolved, 1);
    assert_eq!(stats.items_received, 0);

    match events.try_recv().unwrap() {
        GossipEvent::ConflictResolved { resolution, .. } => {
            assert_eq!(resolution.winner, Winner::Local);
            assert_eq!(resolution.ordering, ClockOrdering::Concurrent);
            assert!(!resolution.by_quality);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn dominating_local_clock_wins_without_tiebreak() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let content = pattern_fixture("p", 0.9, 0.9);
    let local = with_clock(shared_pattern("A", content.clone()), &[("A", 2), ("C", 1)]);
    b.import_items(vec![local.clone()]);

    let mut remote = with_clock(shared_pattern("C", content), &[("A", 1), ("C", 1)]);
    remote.priority = 1.0;

    let mut events = b.subscribe();
    assert!(!b.receive(remote.to_wire(&codec()).unwrap()));
    match events.try_recv().unwrap() {
        GossipEvent::ConflictResolved { resolution, .. } => {
            assert_eq!(resolution.winner, Winner::Local);
            assert_eq!(resolution.ordering, ClockOrdering::After);
            assert!(!resolution.by_quality);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn concurrent_exact_tie_keeps_local() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let content = pattern_fixture("p", 0.9, 0.9);
    let local = with_clock(shared_pattern("A", content.clone()), &[("A", 1), ("C", 0)]);
    b.import_items(vec![local.clone()]);

    let remote = with_clock(shared_pattern("C", content), &[("A", 0), ("C", 1)]);
    assert_eq!(remote.quality_score(), local.quality_score());

    for _ in 0..3 {
        assert!(!b.receive(remote.to_wire(&codec()).unwrap()));
    }
    assert_eq!(
        b.get_item(&local.id).unwrap().source_agent_id,
        AgentId::from("A")
    );
}

#[test]
fn concurrent_better_remote_replaces_local() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let content = pattern_fixture("p", 0.9, 0.9);
    let mut local = with_clock(shared_pattern("A", content.clone()), &[("A", 1)]);
    local.priority = 0.5;
    b.import_items(vec![local.clone()]);

    let mut remote = with_clock(shared_pattern("C", content), &[("C", 1)]);
    remote.priority = 0.8;

    assert!(b.receive(remote.to_wire(&codec()).unwrap()));
    let held = b.get_item(&local.id).unwrap();
    assert_eq!(held.source_agent_id, AgentId::from("C"));
    assert_eq!(held.priority, 0.8);
    assert_eq!(held.vector_clock.get("A"), 1);
    assert_eq!(held.vector_clock.get("C"), 1);
    assert_eq!(b.get_stats().conflicts_resolved, 1);
    assert_eq!(b.get_stats().items_received, 1);
}

#[test]
fn expired_arrivals_are_rejected() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let content = pattern_fixture("old", 0.9, 0.9);
    let created_at = (Timestamp::now() - Duration::from_secs(7200)).unwrap();
    let old = SharedItem::new(
        content.clone(),
        ContentDigest::of(&content).unwrap(),
        "A".into(),
        [("A", 1)].into_iter().collect(),
        0.9,
        created_at,
        Duration::from_secs(3600),
    )
    .unwrap();

    assert!(!b.receive(old.to_wire(&codec()).unwrap()));
    assert_eq!(b.import_items(vec![old.clone()]), 0);
    let stats = b.get_stats();
    assert_eq!(stats.expired_rejected, 2);
    assert!(b.get_item(&old.id).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_items_are_invisible_before_purge() {
    fleet_trace::test_run().ok();

    let mut tuning = GossipTuningParams::default();
    tuning.item_ttl_ms = 20;
    let a = node("A", tuning);
    a.register_peer("B", PeerKind::Any);
    let id = a.share(pattern_fixture("p", 0.9, 0.9), None).unwrap();
    assert!(a.get_item(&id).is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(a.get_item(&id).is_none());
    assert!(a.get_relevant_items(&[], 10).is_empty());
    assert!(a.export_items().is_empty());
    assert_eq!(a.run_gossip_round().await.items, 0);
    assert_eq!(a.get_stats().current_items, 1);

    assert_eq!(a.purge_expired(), 1);
    let stats = a.get_stats();
    assert_eq!(stats.current_items, 0);
    assert_eq!(stats.expired_purged, 1);
}

#[test]
fn overflow_keeps_the_highest_priority_items() {
    fleet_trace::test_run().ok();

    let mut tuning = GossipTuningParams::default();
    tuning.max_items = 5;
    let a = node("A", tuning);
    let mut events = a.subscribe();

    let priorities = [0.6, 0.9, 0.31, 0.7, 0.8, 0.5];
    for (i, p) in priorities.iter().enumerate() {
        a.share(pattern_fixture(&format!("p{}", i), 0.9, 0.9), Some(*p))
            .unwrap();
    }

    let mut kept: Vec<f64> = a.get_all_items().iter().map(|i| i.priority).collect();
    kept.sort_by(f64::total_cmp);
    assert_eq!(kept, vec![0.5, 0.6, 0.7, 0.8, 0.9]);
    assert_eq!(a.get_stats().overflow_evicted, 1);

    let mut saw_eviction = false;
    while let Ok(evt) = events.try_recv() {
        if evt
            == (GossipEvent::ItemsEvicted {
                expired: 0,
                overflow: 1,
            })
        {
            saw_eviction = true;
        }
    }
    assert!(saw_eviction);
}

#[test]
fn export_then_import_round_trips() {
    fleet_trace::test_run().ok();

    let a = node("A", GossipTuningParams::default());
    for name in ["one", "two", "three"] {
        a.share(pattern_fixture(name, 0.9, 0.9), None).unwrap();
    }
    let exported = a.export_items();
    assert_eq!(exported.len(), 3);

    let json = serde_json::to_string(&exported).unwrap();
    let restored: Vec<SharedItem<TestPattern>> = serde_json::from_str(&json).unwrap();

    let b = node("B", GossipTuningParams::default());
    assert_eq!(b.import_items(restored.clone()), 3);
    assert_eq!(b.import_items(restored), 0);

    let stats = b.get_stats();
    assert_eq!(stats.items_imported, 3);
    assert_eq!(stats.items_received, 0);
    assert_eq!(stats.duplicates_filtered, 3);
    assert_eq!(b.get_all_items(), a.get_all_items());
    assert_eq!(b.local_clock().get("A"), 3);
}

#[test]
fn import_rejects_tampered_items() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    let mut item = shared_pattern("A", pattern_fixture("p", 0.9, 0.9));
    item.content.confidence = 0.1;
    assert_eq!(b.import_items(vec![item]), 0);
    assert_eq!(b.get_stats().integrity_rejected, 1);
}

#[test]
fn received_items_touch_registered_peers() {
    fleet_trace::test_run().ok();

    let b = node("B", GossipTuningParams::default());
    b.register_peer("A", PeerKind::Pattern);
    assert!(b.peer("A").unwrap().last_seen.is_none());

    let wire = shared_pattern("A", pattern_fixture("p", 0.9, 0.9))
        .to_wire(&codec())
        .unwrap();
    let mut events = b.subscribe();
    assert!(b.receive(wire.clone()));

    let peer = b.peer("A").unwrap();
    assert!(peer.last_seen.is_some());
    assert_eq!(peer.last_known_clock.get("A"), 1);
    assert_eq!(
        events.try_recv().unwrap(),
        GossipEvent::ItemReceived {
            item_id: wire.id,
            source_agent_id: "A".into(),
        }
    );
}

#[test]
fn invalid_config_fails_fast() {
    let net = MemNetwork::<TestPattern>::new();
    let mut tuning = GossipTuningParams::default();
    tuning.fanout = 0;
    let transport: DynTransport = net.clone();
    let err = PatternGossip::new(GossipConfig::new("A").with_tuning(tuning), transport).unwrap_err();
    assert!(matches!(err, GossipError::Config(_)));

    let transport: DynTransport = net;
    assert!(PatternGossip::new(GossipConfig::new(""), transport).is_err());
}

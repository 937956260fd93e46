use draftsync_storage::{SnapshotBus, SnapshotChange};
use draftsync_types::{DraftId, DraftKey, OriginId};

fn updated(key: &DraftKey, origin: OriginId) -> SnapshotChange {
    SnapshotChange::Updated {
        key: key.clone(),
        origin,
        draft_id: Some(DraftId::new("d_1")),
    }
}

#[tokio::test]
async fn subscribers_only_see_their_key() {
    let bus = SnapshotBus::new();
    let a = DraftKey::new("a");
    let b = DraftKey::new("b");
    let mut sub_a = bus.subscribe(&a);
    let mut sub_b = bus.subscribe(&b);

    bus.publish(updated(&a, OriginId::new()));

    assert_eq!(sub_a.recv().await.unwrap().key(), &a);
    assert!(sub_b.try_recv().is_none());
}

#[tokio::test]
async fn subscribe_all_sees_every_key() {
    let bus = SnapshotBus::new();
    let mut all = bus.subscribe_all();
    let origin = OriginId::new();

    bus.publish(updated(&DraftKey::new("a"), origin));
    bus.publish(SnapshotChange::Cleared {
        key: DraftKey::new("b"),
        origin,
    });

    assert_eq!(all.recv().await.unwrap().key(), &DraftKey::new("a"));
    assert!(matches!(
        all.recv().await.unwrap(),
        SnapshotChange::Cleared { .. }
    ));
}

#[test]
fn publish_without_subscribers_reaches_nobody() {
    let bus = SnapshotBus::new();
    assert_eq!(bus.publish(updated(&DraftKey::new("a"), OriginId::new())), 0);
}

#[test]
fn dropping_last_subscription_unsubscribes() {
    let bus = SnapshotBus::new();
    let key = DraftKey::new("a");
    let first = bus.subscribe(&key);
    let second = bus.subscribe(&key);
    assert_eq!(bus.subscriber_count(&key), 2);

    drop(first);
    assert_eq!(bus.subscriber_count(&key), 1);

    drop(second);
    assert_eq!(bus.subscriber_count(&key), 0);
    assert_eq!(bus.publish(updated(&key, OriginId::new())), 0);
}

#[tokio::test]
async fn clones_share_channels() {
    let bus = SnapshotBus::new();
    let other = bus.clone();
    let key = DraftKey::new("a");
    let mut sub = bus.subscribe(&key);

    assert_eq!(other.publish(updated(&key, OriginId::new())), 1);
    assert!(sub.recv().await.is_some());
}

//! Fire-and-forget broadcast: subscribe-before-publish delivery, the slow
//! joiner miss, and bootstrap ordering errors.

use std::time::Duration;

use partyline::{Fabric, FabricConfig, FabricError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_subscriber_receives_published_payload() {
    init_tracing();
    let base = 45000;

    let mut publisher =
        Fabric::new(FabricConfig::local(1, 2, base).expect("config")).expect("fabric");
    let mut subscriber =
        Fabric::new(FabricConfig::local(2, 2, base).expect("config")).expect("fabric");

    publisher.bind_broadcast_source().expect("bind source");
    subscriber.subscribe_to_all().expect("subscribe");
    // The subscription connects in the background; give the source time
    // to accept before publishing, since misses are by contract silent.
    std::thread::sleep(Duration::from_millis(300));

    publisher.broadcast(b"commitment").expect("publish");
    let payload = subscriber
        .recv_broadcast(Some(Duration::from_secs(5)))
        .expect("recv")
        .expect("payload within timeout");
    assert_eq!(payload, b"commitment");

    // Re-subscribing skips already connected peers and must not cause
    // duplicate delivery.
    subscriber.subscribe_to_all().expect("re-subscribe");
    publisher.broadcast(b"opening").expect("publish");
    let payload = subscriber
        .recv_broadcast(Some(Duration::from_secs(5)))
        .expect("recv")
        .expect("payload within timeout");
    assert_eq!(payload, b"opening");
    let extra = subscriber
        .recv_broadcast(Some(Duration::from_millis(200)))
        .expect("recv");
    assert!(extra.is_none(), "one publish must arrive exactly once");
}

#[test]
fn test_slow_joiner_misses_earlier_publish() {
    init_tracing();
    let base = 48000;

    let mut publisher =
        Fabric::new(FabricConfig::local(1, 2, base).expect("config")).expect("fabric");
    let mut subscriber =
        Fabric::new(FabricConfig::local(2, 2, base).expect("config")).expect("fabric");

    publisher.bind_broadcast_source().expect("bind source");
    // Published before anyone subscribed: dropped, not an error.
    publisher.broadcast(b"lost").expect("publish");

    subscriber.subscribe_to_all().expect("subscribe");
    let got = subscriber
        .recv_broadcast(Some(Duration::from_millis(300)))
        .expect("recv");
    assert!(got.is_none(), "a slow joiner must not see earlier publishes");
}

#[test]
fn test_broadcast_requires_bootstrap() {
    init_tracing();
    let fabric = Fabric::new(FabricConfig::local(1, 2, 9200).expect("config")).expect("fabric");

    assert!(matches!(
        fabric.broadcast(b"x"),
        Err(FabricError::NotReady { .. })
    ));
    assert!(matches!(
        fabric.recv_broadcast(Some(Duration::from_millis(1))),
        Err(FabricError::NotReady { .. })
    ));
}

//! Raw pairwise transport: three-party establishment, large payload
//! roundtrips, the short-read-on-close contract, and target validation.

use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use partyline::{FabricConfig, RawError, RawTransport};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_three_party_pairwise_exchange() {
    init_tracing();
    let base = 51000;
    let n = 3;

    let handles: Vec<thread::JoinHandle<()>> = (1..=n)
        .map(|id| {
            thread::spawn(move || {
                let config = FabricConfig::local(id, n, base).expect("config");
                let mut transport = RawTransport::new(config);
                transport.connect_all().expect("connect_all");

                // Deterministic schedule over every ordered pair: the
                // lower id sends, the higher id receives.
                for i in 1..=n {
                    for j in (i + 1)..=n {
                        let value: u32 = i * 100 + j;
                        if id == i {
                            transport
                                .send_to(j, &value.to_le_bytes())
                                .expect("send");
                        } else if id == j {
                            let mut buf = [0u8; 4];
                            let got = transport.receive_from(i, &mut buf).expect("recv");
                            assert_eq!(got, 4);
                            assert_eq!(u32::from_le_bytes(buf), value);
                        }
                    }
                }
                transport.flush_all();

                // Every party touched at least one pair, in one direction
                // or the other.
                assert!(transport.bytes_sent() + transport.bytes_received() > 0);
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("party thread");
    }
}

#[test]
fn test_payload_sizes_roundtrip() {
    init_tracing();
    let base = 54000;
    let sizes = [1usize, 4096, 1 << 20];

    let sender = thread::spawn(move || {
        let config = FabricConfig::local(1, 2, base).expect("config");
        let mut transport = RawTransport::new(config);
        transport.connect_all().expect("connect_all");

        let mut rng = StdRng::seed_from_u64(7);
        let mut total = 0u64;
        for size in sizes {
            let mut payload = vec![0u8; size];
            rng.fill_bytes(&mut payload);
            transport.send_to(2, &payload).expect("send");
            total += size as u64;
        }
        assert_eq!(transport.bytes_sent(), total);
        let (sent, received) = transport.link_counters(2).expect("link");
        assert_eq!(sent, total);
        assert_eq!(received, 0);
    });

    let receiver = thread::spawn(move || {
        let config = FabricConfig::local(2, 2, base).expect("config");
        let mut transport = RawTransport::new(config);
        transport.connect_all().expect("connect_all");

        // Same seed as the sender, so the expected bytes are known
        // without a side channel.
        let mut rng = StdRng::seed_from_u64(7);
        for size in sizes {
            let mut expected = vec![0u8; size];
            rng.fill_bytes(&mut expected);
            let mut buf = vec![0u8; size];
            let got = transport.receive_from(1, &mut buf).expect("recv");
            assert_eq!(got, size);
            assert_eq!(buf, expected);
        }
        assert_eq!(transport.bytes_received(), sizes.iter().sum::<usize>() as u64);
    });

    sender.join().expect("sender thread");
    receiver.join().expect("receiver thread");
}

#[test]
fn test_short_read_when_peer_closes() {
    init_tracing();
    let base = 57000;

    let peer = thread::spawn(move || {
        let config = FabricConfig::local(2, 2, base).expect("config");
        let mut transport = RawTransport::new(config);
        transport.connect_all().expect("connect_all");
        transport.send_to(1, &[10, 20, 30]).expect("send");
        // Dropping the transport closes the pair stream.
    });

    let config = FabricConfig::local(1, 2, base).expect("config");
    let mut transport = RawTransport::new(config);
    transport.connect_all().expect("connect_all");

    let mut buf = [0u8; 8];
    let got = transport.receive_from(2, &mut buf).expect("recv");
    assert_eq!(got, 3, "close mid-buffer must yield a short count, not an error");
    assert_eq!(&buf[..3], &[10, 20, 30]);

    peer.join().expect("peer thread");
}

#[test]
fn test_target_validation_without_io() {
    init_tracing();
    let config = FabricConfig::local(1, 2, 9300).expect("config");
    let mut transport = RawTransport::new(config);

    assert!(matches!(
        transport.send_to(1, b"x"),
        Err(RawError::SelfTarget { id: 1 })
    ));
    assert!(matches!(
        transport.send_to(5, b"x"),
        Err(RawError::UnknownParty { id: 5 })
    ));
    let mut buf = [0u8; 1];
    assert!(matches!(
        transport.receive_from(2, &mut buf),
        Err(RawError::NotConnected { id: 2 })
    ));
}

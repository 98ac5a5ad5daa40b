use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rwfprims_codec::{decode_array, ArrayEncoder, DataType};
use rwfprims_session::{
    connect, BindOptions, Channel, ConnectOptions, Provider, ProviderConfig, ReadEvent,
    SessionError, StopReason,
};
use rwfprims_transport::RwfStream;

fn loopback_config() -> ProviderConfig {
    ProviderConfig::default()
        .with_bind(
            BindOptions::default()
                .with_interface(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(0),
        )
        .with_update_interval(Duration::from_millis(50))
        .with_init_timeout(Duration::from_secs(5))
}

fn next_message(channel: &mut Channel<RwfStream>, within: Duration) -> Bytes {
    let deadline = Instant::now() + within;
    loop {
        match channel.read().expect("read should succeed") {
            ReadEvent::Message(bytes) => return bytes,
            ReadEvent::Ping | ReadEvent::WouldBlock => {}
        }
        assert!(Instant::now() < deadline, "no message before deadline");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn publishes_service_and_decodes_client_arrays() {
    let provider = Provider::bind(
        loopback_config()
            .with_runtime(Duration::from_millis(1500))
            .with_service_name("TEST_FEED"),
    )
    .expect("provider should bind");
    let addr = provider.local_addr();

    let handle = thread::spawn(move || {
        let mut components = Vec::new();
        let summary = provider.run(|info| components.push(info.peer_component.clone()));
        (summary, components)
    });

    let mut client = connect(addr, &ConnectOptions::default().with_component("loopback-test"))
        .expect("client should connect");

    let service = next_message(&mut client, Duration::from_secs(2));
    let array = decode_array(&service, 14, 1).expect("service array should decode");
    assert_eq!(array.primitive_type(), DataType::Ascii);
    let entry = array
        .entries()
        .next()
        .expect("should have one entry")
        .expect("entry should frame");
    assert_eq!(entry.ascii().expect("should be ascii"), "TEST_FEED");

    let mut encoder = ArrayEncoder::with_fixed_width(4);
    encoder.add_uint(7).expect("add should succeed");
    encoder.add_uint(11).expect("add should succeed");
    let mut buffer = client.get_buffer(64).expect("buffer should allocate");
    encoder.complete(&mut buffer).expect("complete should succeed");
    client.write(buffer).expect("write should succeed");
    client.ping().expect("ping should succeed");

    let (summary, components) = handle.join().expect("provider thread should not panic");
    let summary = summary.expect("provider should stop cleanly");
    assert_eq!(summary.reason, StopReason::RuntimeExpired);
    assert!(summary.connected);
    assert_eq!(summary.arrays_published, 1);
    assert_eq!(summary.messages, 1);
    assert_eq!(summary.arrays_decoded, 1);
    assert_eq!(summary.pings_received, 1);
    assert_eq!(components, vec!["loopback-test".to_string()]);

    client.close();
}

#[test]
fn shutdown_flag_stops_idle_provider() {
    let provider = Provider::bind(loopback_config()).expect("provider should bind");
    let flag = provider.shutdown_flag();

    let handle = thread::spawn(move || provider.run(|_| {}));
    thread::sleep(Duration::from_millis(100));
    flag.store(true, Ordering::Relaxed);

    let summary = handle
        .join()
        .expect("provider thread should not panic")
        .expect("provider should stop cleanly");
    assert_eq!(summary.reason, StopReason::Interrupted);
    assert!(!summary.connected);
    assert_eq!(summary.messages, 0);
}

#[test]
fn runtime_expires_without_connection() {
    let provider = Provider::bind(loopback_config().with_runtime(Duration::from_millis(200)))
        .expect("provider should bind");

    let started = Instant::now();
    let summary = provider.run(|_| {}).expect("provider should stop cleanly");
    assert_eq!(summary.reason, StopReason::RuntimeExpired);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[test]
fn silent_consumer_is_dropped() {
    let bind = BindOptions::default()
        .with_interface(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_port(0)
        .with_ping_timeout(Duration::from_secs(1))
        .with_min_ping_timeout(Duration::from_secs(1));
    let provider = Provider::bind(
        loopback_config()
            .with_bind(bind)
            .with_runtime(Duration::from_secs(10)),
    )
    .expect("provider should bind");
    let addr = provider.local_addr();

    let handle = thread::spawn(move || provider.run(|_| {}));
    let client = connect(
        addr,
        &ConnectOptions::default().with_ping_timeout(Duration::from_secs(1)),
    )
    .expect("client should connect");

    let started = Instant::now();
    let err = handle
        .join()
        .expect("provider thread should not panic")
        .unwrap_err();
    assert!(matches!(err, SessionError::PeerSilent(t) if t == Duration::from_secs(1)));
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(client);
}

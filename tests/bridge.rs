//! Drives a running bridge over loopback UDP, the way a LIFX client would.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lifx_bridge::memory::{MemoryDevice, MemoryRegistry};
use lifx_bridge::registry::{DeviceId, DeviceRegistry, DeviceState, HardwareAddress};
use lifx_bridge::server::{Server, Shutdown};
use lifx_bridge::settings::BridgeSettings;
use lifx_core::{BuildOptions, Message, RawMessage, Service, HSBK};

const SOURCE: u32 = 0xcafe_f00d;

struct Bridge {
    addr: SocketAddr,
    registry: Arc<MemoryRegistry>,
    shutdown: Shutdown,
    handle: Option<JoinHandle<()>>,
}

impl Bridge {
    fn start() -> Bridge {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(
            DeviceId(1234),
            MemoryDevice::dimmer("Hall Dimmer").with_state(DeviceState {
                on: true,
                brightness: 50,
                ..DeviceState::default()
            }),
        );
        registry.insert(DeviceId(99), MemoryDevice::rgb("RGB Strip"));
        registry.insert(DeviceId(1301), MemoryDevice::relay("Porch Relay"));

        let settings = BridgeSettings {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            poll_timeout_ms: 50,
            idle_timeout_ms: 50,
            ..BridgeSettings::default()
        };
        let server = Server::new(&settings, registry.clone()).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = thread::spawn(move || server.run());
        Bridge {
            addr,
            registry,
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn client() -> UdpSocket {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    sock
}

fn send(sock: &UdpSocket, bridge: &Bridge, msg: Message, opts: BuildOptions) {
    let bytes = lifx_core::encode(&opts, msg).unwrap();
    sock.send_to(&bytes, bridge.addr).unwrap();
}

/// Everything that arrives before the read timeout.
fn receive_all(sock: &UdpSocket) -> Vec<(RawMessage, Message)> {
    let mut buf = [0; 1024];
    let mut replies = Vec::new();
    while let Ok((amt, _)) = sock.recv_from(&mut buf) {
        replies.push(lifx_core::decode(&buf[..amt]).unwrap());
    }
    replies
}

fn target(id: u32) -> u64 {
    HardwareAddress::for_device(DeviceId(id)).target()
}

#[test]
fn discovery_finds_every_published_device() {
    let bridge = Bridge::start();
    let sock = client();
    send(
        &sock,
        &bridge,
        Message::GetService,
        BuildOptions {
            source: SOURCE,
            ..BuildOptions::default()
        },
    );

    let replies = receive_all(&sock);
    assert_eq!(replies.len(), 3);
    let port = u32::from(bridge.addr.port());
    let mut targets: Vec<u64> = replies
        .iter()
        .map(|(raw, msg)| {
            assert_eq!(
                *msg,
                Message::StateService {
                    service: Service::UDP,
                    port
                }
            );
            assert_eq!(raw.frame.source, SOURCE);
            raw.frame_addr.target
        })
        .collect();
    targets.sort_unstable();
    let mut expected = vec![target(99), target(1234), target(1301)];
    expected.sort_unstable();
    assert_eq!(targets, expected);
}

#[test]
fn light_get_reports_dimmer_state() {
    let bridge = Bridge::start();
    let sock = client();
    send(
        &sock,
        &bridge,
        Message::LightGet,
        BuildOptions {
            target: Some(target(1234)),
            sequence: 7,
            source: SOURCE,
            ..BuildOptions::default()
        },
    );

    let replies = receive_all(&sock);
    assert_eq!(replies.len(), 1);
    let (raw, msg) = &replies[0];
    assert_eq!(raw.frame_addr.sequence, 7);
    assert_eq!(raw.frame_addr.target, target(1234));
    match msg {
        Message::LightState {
            color,
            power,
            label,
            ..
        } => {
            assert_eq!(
                *color,
                HSBK {
                    hue: 0,
                    saturation: 0,
                    brightness: 32767,
                    kelvin: 3000
                }
            );
            assert_eq!(*power, 65535);
            assert_eq!(label.0, "Hall Dimmer");
        }
        other => panic!("expected LightState, got {:?}", other),
    }
}

#[test]
fn set_power_acks_then_reports_and_retransmission_is_ignored() {
    let bridge = Bridge::start();
    let sock = client();
    let opts = BuildOptions {
        target: Some(target(1234)),
        ack_required: true,
        res_required: true,
        sequence: 9,
        source: SOURCE,
    };
    send(
        &sock,
        &bridge,
        Message::LightSetPower {
            level: 0,
            duration: 0,
        },
        opts.clone(),
    );

    let replies: Vec<Message> = receive_all(&sock).into_iter().map(|(_, m)| m).collect();
    assert_eq!(
        replies,
        vec![
            Message::Acknowledgement { seq: 9 },
            Message::LightStatePower { level: 0 }
        ]
    );
    assert!(!bridge.registry.state(DeviceId(1234)).unwrap().on);

    // the same sequence number again is a retransmission
    bridge
        .registry
        .apply(DeviceId(1234), lifx_bridge::registry::Mutation::TurnOn)
        .unwrap();
    send(
        &sock,
        &bridge,
        Message::LightSetPower {
            level: 0,
            duration: 0,
        },
        opts,
    );
    assert!(receive_all(&sock).is_empty());
    assert!(bridge.registry.state(DeviceId(1234)).unwrap().on);
}

#[test]
fn malformed_datagrams_are_survived() {
    let bridge = Bridge::start();
    let sock = client();
    sock.send_to(&[0x24, 0x00, 0x00, 0x34], bridge.addr).unwrap();
    sock.send_to(&[0xff; 40], bridge.addr).unwrap();
    assert!(receive_all(&sock).is_empty());

    send(
        &sock,
        &bridge,
        Message::GetPower,
        BuildOptions {
            target: Some(target(99)),
            source: SOURCE,
            ..BuildOptions::default()
        },
    );
    let replies = receive_all(&sock);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].1, Message::StatePower { level: 0 });
}

//! The UDP side of the bridge.
//!
//! A single blocking loop owns the socket.  It wakes up at least once per receive timeout to
//! check for shutdown and to refresh the published device list, so nothing else ever needs to
//! touch the socket.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::adapter::DeviceAdapter;
use crate::error::Result;
use crate::registry::{DeviceRegistry, PublishedDevices};
use crate::responder::{Responder, ResponderSettings};
use crate::settings::BridgeSettings;

/// Largest datagram read.  LIFX messages are far smaller.
const MAX_DATAGRAM: usize = 1024;

/// Creates the listening socket with address reuse and broadcast enabled.
pub fn bind(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Asks a running [Server] to stop.  The loop notices within one receive timeout.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Server {
    socket: UdpSocket,
    responder: Responder,
    devices: Arc<PublishedDevices>,
    shutdown: Shutdown,
    poll_timeout: Duration,
    idle_timeout: Duration,
    refresh_interval: Duration,
    last_refresh: Instant,
}

impl Server {
    /// Binds the socket and loads the published device list.
    ///
    /// Failing to list devices isn't fatal; the list is retried on the refresh interval.
    pub fn new(settings: &BridgeSettings, registry: Arc<dyn DeviceRegistry>) -> Result<Server> {
        let socket = bind(SocketAddr::new(settings.bind_addr, settings.port))?;
        let local = socket.local_addr()?;
        info!("listening for LIFX requests on {}", local);

        let devices = Arc::new(PublishedDevices::new(registry.clone()));
        match devices.refresh() {
            Ok(count) => info!("emulating {} devices", count),
            Err(e) => error!("unable to list published devices: {}", e),
        }

        let mut responder_settings = ResponderSettings::from(settings);
        // advertise the port actually bound, which differs when port 0 was asked for
        responder_settings.port = local.port();
        let adapter = DeviceAdapter::new(registry, settings.default_kelvin);
        let responder = Responder::new(devices.clone(), adapter, responder_settings);

        Ok(Server {
            socket,
            responder,
            devices,
            shutdown: Shutdown::default(),
            poll_timeout: settings.poll_timeout(),
            idle_timeout: settings.idle_timeout(),
            refresh_interval: settings.refresh_interval(),
            last_refresh: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The published device list.  Call [PublishedDevices::refresh] on it when the registry
    /// reports that devices were added, removed or changed.
    pub fn devices(&self) -> Arc<PublishedDevices> {
        self.devices.clone()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serves requests until shut down.  Nothing that happens after startup stops the loop.
    pub fn run(mut self) {
        let mut buf = [0; MAX_DATAGRAM];
        while !self.shutdown.is_triggered() {
            self.maintain();

            let timeout = if self.devices.is_empty() {
                self.idle_timeout
            } else {
                self.poll_timeout
            };
            if let Err(e) = self.socket.set_read_timeout(Some(timeout)) {
                warn!("unable to set socket read timeout: {}", e);
            }

            match self.socket.recv_from(&mut buf) {
                Ok((amt, peer)) => self.handle_datagram(&buf[..amt], peer),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("error receiving from socket: {}", e);
                    // keep a persistent error from spinning
                    thread::sleep(self.poll_timeout);
                }
            }
        }
        info!("LIFX bridge stopped");
    }

    /// Decodes one datagram and sends back whatever the emulated devices reply.
    pub fn handle_datagram(&mut self, data: &[u8], peer: SocketAddr) {
        let (raw, msg) = match lifx_core::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("dropping {} byte datagram from {}: {}", data.len(), peer, e);
                return;
            }
        };

        for reply in self.responder.respond(&raw, &msg, peer) {
            let bytes = match reply.pack() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("unable to encode reply to {}: {}", peer, e);
                    continue;
                }
            };
            if let Err(e) = self.socket.send_to(&bytes, peer) {
                warn!("unable to send reply to {}: {}", peer, e);
            }
        }
    }

    fn maintain(&mut self) {
        if self.last_refresh.elapsed() < self.refresh_interval {
            return;
        }
        debug!("periodic refresh of published devices");
        if let Err(e) = self.devices.refresh() {
            error!("unable to list published devices: {}", e);
        }
        self.last_refresh = Instant::now();
    }
}

/*!
The communications server: the shared transport abstraction `Publisher` and
`Locator` are built against.

`CommunicationsServer` is the contract the core protocol logic consumes.
`UdpCommunicationsServer` is the one concrete implementation this crate
ships -- a `socket2`-configured multicast UDP socket per usable local
interface, driven by `tokio`. It is deliberately a swappable collaborator:
nothing in `publisher` or `locator` depends on `socket2`, `pnet`, or any OS
networking primitive directly.
*/

use crate::common::httpu::{self, Message};
use crate::common::interface::LocalInterface;
use crate::error::Result;
use crate::syntax::{MULTICAST_ADDRESS, MULTICAST_PORT};
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Whether an inbound datagram is an advertisement/search request, or a
/// search response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    Request,
    Response,
}

/// A parsed inbound datagram together with where it came from and which
/// local interface received it.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub message: Message,
    pub from: SocketAddr,
    pub local_ip: IpAddr,
}

/// The transport contract consumed by `Publisher` and `Locator`.
#[async_trait]
pub trait CommunicationsServer: Send + Sync {
    /// Joins the multicast group on every usable interface. Idempotent.
    async fn begin_listening_multicast(&self) -> Result<()>;

    /// Leaves the multicast group. Idempotent.
    async fn stop_listening_multicast(&self) -> Result<()>;

    /// Sends one datagram to a specific unicast endpoint.
    async fn send_unicast(
        &self,
        message: &Message,
        to: SocketAddr,
        from_local_ip: Option<IpAddr>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Sends `send_count` copies of a datagram to the multicast group, from
    /// one interface (`from_local_ip = Some(..)`) or every listening
    /// interface (`None`).
    async fn send_multicast(
        &self,
        message: &Message,
        send_count: u8,
        from_local_ip: Option<IpAddr>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Subscribes to inbound datagrams. Each call gets its own receiver.
    fn subscribe(&self) -> broadcast::Receiver<InboundMessage>;

    /// When `true`, disposing a `Publisher`/`Locator` built on this server
    /// must not stop or drop the server itself.
    fn is_shared(&self) -> bool;
}

struct BoundSocket {
    local_ip: Ipv4Addr,
    socket: Arc<UdpSocket>,
}

/// The concrete UDP collaborator: one multicast-joined socket per usable
/// IPv4 interface.
pub struct UdpCommunicationsServer {
    sockets: Vec<BoundSocket>,
    events: broadcast::Sender<InboundMessage>,
    listening: AtomicBool,
    shared: bool,
    listen_tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl UdpCommunicationsServer {
    /// Binds one multicast socket per interface in `interfaces`.
    pub fn bind(interfaces: &[LocalInterface], packet_ttl: u32, shared: bool) -> Result<Self> {
        let (tx, _rx) = broadcast::channel(256);
        let mut sockets = Vec::with_capacity(interfaces.len());
        for interface in interfaces {
            let std_socket = bind_multicast_socket(interface.ipv4, packet_ttl)?;
            std_socket.set_nonblocking(true)?;
            let socket = UdpSocket::from_std(std_socket)?;
            sockets.push(BoundSocket {
                local_ip: interface.ipv4,
                socket: Arc::new(socket),
            });
        }
        Ok(Self {
            sockets,
            events: tx,
            listening: AtomicBool::new(false),
            shared,
            listen_tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    fn socket_for(&self, local_ip: Option<IpAddr>) -> Vec<&BoundSocket> {
        match local_ip {
            Some(IpAddr::V4(ip)) => self.sockets.iter().filter(|s| s.local_ip == ip).collect(),
            _ => self.sockets.iter().collect(),
        }
    }
}

fn bind_multicast_socket(interface_ip: Ipv4Addr, ttl: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(true)?;
    let multicast_addr: Ipv4Addr = MULTICAST_ADDRESS.parse().expect("constant is a valid IPv4 address");
    socket.join_multicast_v4(&multicast_addr, &interface_ip)?;
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), MULTICAST_PORT);
    socket.bind(&SockAddr::from(bind_addr))?;
    Ok(socket.into())
}

#[async_trait]
impl CommunicationsServer for UdpCommunicationsServer {
    async fn begin_listening_multicast(&self) -> Result<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut tasks = self.listen_tasks.lock().await;
        for bound in &self.sockets {
            let socket = bound.socket.clone();
            let local_ip = IpAddr::V4(bound.local_ip);
            let events = self.events.clone();
            tasks.push(tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                loop {
                    let (len, from) = match socket.recv_from(&mut buf).await {
                        Ok(received) => received,
                        Err(error) => {
                            tracing::warn!(%error, "communications server recv failed");
                            continue;
                        }
                    };
                    let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                        tracing::trace!("dropped non-UTF-8 datagram");
                        continue;
                    };
                    let Some(message) = httpu::parse(text) else {
                        tracing::trace!("dropped unparseable datagram");
                        continue;
                    };
                    let kind = match &message {
                        Message::Request { .. } => MessageKind::Request,
                        Message::Response { .. } => MessageKind::Response,
                    };
                    let _ = events.send(InboundMessage {
                        kind,
                        message,
                        from,
                        local_ip,
                    });
                }
            }));
        }
        Ok(())
    }

    async fn stop_listening_multicast(&self) -> Result<()> {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut tasks = self.listen_tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }

    async fn send_unicast(
        &self,
        message: &Message,
        to: SocketAddr,
        from_local_ip: Option<IpAddr>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let wire = message.to_string();
        if cancel.is_cancelled() {
            return Ok(());
        }
        if let Some(bound) = self.socket_for(from_local_ip).into_iter().next() {
            if let Err(error) = bound.socket.send_to(wire.as_bytes(), to).await {
                tracing::warn!(%error, %to, "unicast send failed");
            }
        }
        Ok(())
    }

    async fn send_multicast(
        &self,
        message: &Message,
        send_count: u8,
        from_local_ip: Option<IpAddr>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let wire = message.to_string();
        let dest = SocketAddr::new(
            MULTICAST_ADDRESS.parse().expect("constant is a valid IP address"),
            MULTICAST_PORT,
        );
        for _ in 0..send_count {
            if cancel.is_cancelled() {
                return Ok(());
            }
            for bound in self.socket_for(from_local_ip) {
                if let Err(error) = bound.socket.send_to(wire.as_bytes(), dest).await {
                    tracing::warn!(%error, "multicast send failed");
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.events.subscribe()
    }

    fn is_shared(&self) -> bool {
        self.shared
    }
}

impl Drop for UdpCommunicationsServer {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.listen_tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_requests_and_responses() {
        let request = Message::notify();
        let response = Message::ok_response();
        assert!(matches!(
            if matches!(request, Message::Request { .. }) {
                MessageKind::Request
            } else {
                MessageKind::Response
            },
            MessageKind::Request
        ));
        assert!(matches!(
            if matches!(response, Message::Request { .. }) {
                MessageKind::Request
            } else {
                MessageKind::Response
            },
            MessageKind::Response
        ));
    }

    #[tokio::test]
    async fn loopback_unicast_round_trip() {
        let interface = LocalInterface {
            name: "lo-test".to_string(),
            ipv4: Ipv4Addr::LOCALHOST,
        };
        let server = match UdpCommunicationsServer::bind(&[interface], 4, false) {
            Ok(server) => server,
            Err(_) => return, // environments without multicast support (CI sandboxes) just skip
        };
        server.begin_listening_multicast().await.unwrap();
        let mut events = server.subscribe();
        let message = Message::notify().with_header("USN", "uuid:test::upnp:rootdevice");
        let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), MULTICAST_PORT);
        server
            .send_unicast(&message, dest, None, &CancellationToken::new())
            .await
            .unwrap();
        let received = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv()).await;
        if let Ok(Ok(inbound)) = received {
            assert_eq!(inbound.kind, MessageKind::Request);
            assert_eq!(inbound.message.header("USN"), Some("uuid:test::upnp:rootdevice"));
        }
    }
}

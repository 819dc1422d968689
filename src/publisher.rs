/*!
The device publisher: periodic `ssdp:alive` advertisement, `M-SEARCH`
response handling (MX delay, duplicate suppression, device-tree matching),
and `ssdp:byebye` revocation.
*/

use crate::common::httpu::Message;
use crate::common::user_agent::{rfc1123_now, server_string};
use crate::device::{AdvertisementPair, RootDevice};
use crate::error::{Error, Result};
use crate::syntax::{
    HTTP_HEADER_CACHE_CONTROL, HTTP_HEADER_DATE, HTTP_HEADER_EXT, HTTP_HEADER_HOST,
    HTTP_HEADER_LOCATION, HTTP_HEADER_MX, HTTP_HEADER_NT, HTTP_HEADER_NTS, HTTP_HEADER_SERVER,
    HTTP_HEADER_ST, HTTP_HEADER_USN, HTTP_METHOD_SEARCH, MULTICAST_ADDRESS, MULTICAST_PORT,
    NTS_ALIVE, NTS_BYEBYE,
};
use crate::transport::{CommunicationsServer, InboundMessage, MessageKind};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The dedup window inside which a repeated `M-SEARCH` from the same
/// endpoint/target is dropped rather than re-answered.
const DEDUP_WINDOW: Duration = Duration::from_millis(500);

/// Tuning knobs for a `Publisher`: the per-call options widened to cover
/// a whole device registry rather than one advertisement.
#[derive(Clone, Debug)]
pub struct PublisherOptions {
    pub os_name: String,
    pub os_version: String,
    /// Also advertise (and answer) the `pnp:rootdevice` search target.
    pub support_pnp_root_device: bool,
    /// Only answer/advertise on the interface whose address matches a
    /// device's own configured address.
    pub send_only_matched_host: bool,
}

impl PublisherOptions {
    pub fn new(os_name: impl Into<String>, os_version: impl Into<String>) -> Self {
        Self {
            os_name: os_name.into(),
            os_version: os_version.into(),
            support_pnp_root_device: true,
            send_only_matched_host: false,
        }
    }
}

struct SearchRecord {
    received: Instant,
}

/// Advertises a forest of root devices and answers `M-SEARCH` requests for
/// them.
pub struct Publisher {
    server: Arc<dyn CommunicationsServer>,
    options: PublisherOptions,
    devices: Mutex<Vec<Arc<RootDevice>>>,
    recent_searches: Mutex<HashMap<String, SearchRecord>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    request_listener: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Publisher {
    /// Starts multicast listening, subscribes to inbound requests, and
    /// performs one (empty, until devices are added) alive sweep.
    pub async fn new(server: Arc<dyn CommunicationsServer>, options: PublisherOptions) -> Result<Arc<Self>> {
        if options.os_name.trim().is_empty() || options.os_version.trim().is_empty() {
            return Err(Error::InvalidInput("os_name and os_version must be non-empty".to_string()));
        }
        server.begin_listening_multicast().await?;
        let publisher = Arc::new(Self {
            server,
            options,
            devices: Mutex::new(Vec::new()),
            recent_searches: Mutex::new(HashMap::new()),
            heartbeat: Mutex::new(None),
            request_listener: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        publisher.clone().spawn_request_listener();
        publisher.alive_sweep_all().await;
        Ok(publisher)
    }

    fn spawn_request_listener(self: Arc<Self>) {
        let mut events = self.server.subscribe();
        let listener = self.clone();
        let handle = tokio::spawn(async move {
            while let Ok(inbound) = events.recv().await {
                if listener.disposed.load(Ordering::SeqCst) {
                    break;
                }
                if inbound.kind == MessageKind::Request && inbound.message.method() == Some(HTTP_METHOD_SEARCH) {
                    let publisher = listener.clone();
                    publisher.on_search(inbound);
                }
            }
        });
        *self.request_listener.lock().unwrap() = Some(handle);
    }

    /// Arms the periodic alive-heartbeat: first fire at +5s, then every
    /// `interval`.
    pub fn start_sending_alive_notifications(self: &Arc<Self>, interval: Duration) {
        let publisher = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            loop {
                if publisher.disposed.load(Ordering::SeqCst) {
                    return;
                }
                publisher.alive_sweep_all().await;
                tokio::time::sleep(interval).await;
            }
        });
        *self.heartbeat.lock().unwrap() = Some(handle);
    }

    /// Adds a device to the registry and immediately advertises it. A
    /// no-op (but successful) if the same device is already registered.
    pub async fn add_device(self: &Arc<Self>, device: Arc<RootDevice>) -> Result<()> {
        self.check_alive()?;
        let is_new = {
            let mut devices = self.devices.lock().unwrap();
            if devices.iter().any(|d| Arc::ptr_eq(d, &device)) {
                false
            } else {
                devices.push(device.clone());
                true
            }
        };
        if is_new {
            self.alive_sweep(&device).await;
        }
        Ok(())
    }

    /// Removes a device by UUID and sends a byebye sweep for it. A no-op if
    /// the device is not registered.
    pub async fn remove_device(self: &Arc<Self>, uuid: &str) -> Result<()> {
        self.check_alive()?;
        let removed = {
            let mut devices = self.devices.lock().unwrap();
            let index = devices.iter().position(|d| d.device.uuid == uuid);
            index.map(|i| devices.remove(i))
        };
        if let Some(device) = removed {
            self.byebye_sweep(&device, 3).await;
        }
        Ok(())
    }

    /// Stops the heartbeat and request listener, sends a final byebye for
    /// every registered device, and releases the transport unless it is
    /// shared with another collaborator.
    pub async fn dispose(self: &Arc<Self>) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        if let Some(handle) = self.heartbeat.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.request_listener.lock().unwrap().take() {
            handle.abort();
        }
        let snapshot: Vec<Arc<RootDevice>> = self.devices.lock().unwrap().drain(..).collect();
        for device in snapshot {
            self.byebye_sweep(&device, 1).await;
        }
        if !self.server.is_shared() {
            self.server.stop_listening_multicast().await?;
        }
        Ok(())
    }

    fn check_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    async fn alive_sweep_all(&self) {
        let snapshot: Vec<Arc<RootDevice>> = self.devices.lock().unwrap().clone();
        for device in snapshot {
            self.alive_sweep(&device).await;
        }
    }

    async fn alive_sweep(&self, device: &Arc<RootDevice>) {
        for pair in device.enumerate(self.options.support_pnp_root_device) {
            let message = self.build_notify(device, &pair, NTS_ALIVE);
            self.send_multicast(&message, device, 1).await;
        }
    }

    async fn byebye_sweep(&self, device: &Arc<RootDevice>, send_count: u8) {
        for pair in device.enumerate(self.options.support_pnp_root_device) {
            let message = self.build_notify(device, &pair, NTS_BYEBYE);
            self.send_multicast(&message, device, send_count).await;
        }
    }

    async fn send_multicast(&self, message: &Message, device: &Arc<RootDevice>, send_count: u8) {
        let from_local_ip = Some(device.address);
        if let Err(error) = self
            .server
            .send_multicast(message, send_count, from_local_ip, &CancellationToken::new())
            .await
        {
            tracing::warn!(%error, "failed to send advertisement");
        }
    }

    fn build_notify(&self, device: &RootDevice, pair: &AdvertisementPair, nts: &str) -> Message {
        Message::notify()
            .with_header(HTTP_HEADER_HOST, format!("{}:{}", MULTICAST_ADDRESS, MULTICAST_PORT))
            .with_header(HTTP_HEADER_CACHE_CONTROL, format!("max-age = {}", device.cache_lifetime.as_secs()))
            .with_header(HTTP_HEADER_LOCATION, device.location.to_string())
            .with_header(HTTP_HEADER_NT, pair.notification_type.clone())
            .with_header(HTTP_HEADER_NTS, nts)
            .with_header(HTTP_HEADER_SERVER, server_string(&self.options.os_name, &self.options.os_version))
            .with_header(HTTP_HEADER_USN, pair.usn.clone())
    }

    fn build_search_response(&self, device: &RootDevice, pair: &AdvertisementPair) -> Message {
        Message::ok_response()
            .with_header(HTTP_HEADER_EXT, "")
            .with_header(HTTP_HEADER_DATE, rfc1123_now())
            .with_header(HTTP_HEADER_HOST, format!("{}:{}", MULTICAST_ADDRESS, MULTICAST_PORT))
            .with_header(HTTP_HEADER_CACHE_CONTROL, format!("max-age = {}", device.cache_lifetime.as_secs()))
            .with_header(HTTP_HEADER_ST, pair.notification_type.clone())
            .with_header(HTTP_HEADER_SERVER, server_string(&self.options.os_name, &self.options.os_version))
            .with_header(HTTP_HEADER_USN, pair.usn.clone())
            .with_header(HTTP_HEADER_LOCATION, device.location.to_string())
    }

    /// Validates, dedups, and (if not dropped) spawns the MX-delayed
    /// response fan-out. Synchronous aside from the spawn so the dedup
    /// check can never race with the delayed send of the same request.
    fn on_search(self: Arc<Self>, inbound: InboundMessage) {
        let Some(search_target) = inbound.message.header(HTTP_HEADER_ST).filter(|s| !s.is_empty()) else {
            tracing::trace!("dropped M-SEARCH with empty ST");
            return;
        };
        let search_target = search_target.to_string();
        let dedup_key = format!("{}:{}", search_target, inbound.from);
        {
            let mut recent = self.recent_searches.lock().unwrap();
            if let Some(record) = recent.get(&dedup_key) {
                if record.received.elapsed() < DEDUP_WINDOW {
                    tracing::trace!(%dedup_key, "dropped duplicate M-SEARCH");
                    return;
                }
            }
            recent.insert(dedup_key, SearchRecord { received: Instant::now() });
            if recent.len() > 10 {
                recent.retain(|_, record| record.received.elapsed() < DEDUP_WINDOW);
            }
        }

        let Some(max_wait_interval) = mx_to_max_wait_interval(inbound.message.header(HTTP_HEADER_MX)) else {
            tracing::trace!("dropped M-SEARCH with invalid MX");
            return;
        };

        let delay_ms = {
            let mut rng = rand::thread_rng();
            let upper = (max_wait_interval as u64) * 1000;
            rng.gen_range(16..upper.max(17))
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            self.respond_to_search(&inbound, &search_target).await;
        });
    }

    async fn respond_to_search(&self, inbound: &InboundMessage, search_target: &str) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let snapshot: Vec<Arc<RootDevice>> = self.devices.lock().unwrap().clone();
        for device in snapshot {
            if self.options.send_only_matched_host && device.address != inbound.local_ip {
                continue;
            }
            for pair in device.matching_pairs(search_target, self.options.support_pnp_root_device) {
                let message = self.build_search_response(&device, &pair);
                if let Err(error) = self
                    .server
                    .send_unicast(&message, inbound.from, Some(inbound.local_ip), &CancellationToken::new())
                    .await
                {
                    tracing::warn!(%error, "failed to send search response");
                }
            }
        }
    }
}

/// Converts an `MX` header value into a bounded response-delay ceiling, in
/// whole seconds. Missing/empty is treated as `1`; non-positive or
/// unparseable values drop the request entirely (`None`); values over 120
/// are replaced with a uniform random pick in `[0, 120)`.
fn mx_to_max_wait_interval(mx: Option<&str>) -> Option<i64> {
    let raw = match mx {
        None => "1",
        Some("") => "1",
        Some(value) => value,
    };
    let parsed: i64 = raw.trim().parse().ok()?;
    if parsed <= 0 {
        return None;
    }
    if parsed > 120 {
        Some(rand::thread_rng().gen_range(0..120))
    } else {
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::uri::URL;
    use crate::device::Device;
    use crate::transport::InboundMessage;
    use pretty_assertions::assert_eq;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::sync::{broadcast, Mutex as AsyncMutex};

    struct FakeServer {
        events: broadcast::Sender<InboundMessage>,
        unicasts: AsyncMutex<Vec<(Message, SocketAddr)>>,
        multicasts: AsyncMutex<Vec<(Message, u8)>>,
    }

    impl FakeServer {
        fn new() -> Arc<Self> {
            let (tx, _rx) = broadcast::channel(64);
            Arc::new(Self {
                events: tx,
                unicasts: AsyncMutex::new(Vec::new()),
                multicasts: AsyncMutex::new(Vec::new()),
            })
        }

        fn inject(&self, message: Message, from: SocketAddr, local_ip: IpAddr) {
            let _ = self.events.send(InboundMessage {
                kind: MessageKind::Request,
                message,
                from,
                local_ip,
            });
        }
    }

    #[async_trait::async_trait]
    impl CommunicationsServer for FakeServer {
        async fn begin_listening_multicast(&self) -> Result<()> {
            Ok(())
        }
        async fn stop_listening_multicast(&self) -> Result<()> {
            Ok(())
        }
        async fn send_unicast(&self, message: &Message, to: SocketAddr, _from: Option<IpAddr>, _cancel: &CancellationToken) -> Result<()> {
            self.unicasts.lock().await.push((message.clone(), to));
            Ok(())
        }
        async fn send_multicast(&self, message: &Message, send_count: u8, _from: Option<IpAddr>, _cancel: &CancellationToken) -> Result<()> {
            self.multicasts.lock().await.push((message.clone(), send_count));
            Ok(())
        }
        fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
            self.events.subscribe()
        }
        fn is_shared(&self) -> bool {
            false
        }
    }

    fn root(uuid: &str) -> Arc<RootDevice> {
        Arc::new(RootDevice::new(
            Device::new(uuid, "schemas-upnp-org", "MediaServer", "1"),
            URL::parse("http://192.168.1.2:8080/desc.xml").unwrap(),
            Duration::from_secs(1800),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
        ))
    }

    #[tokio::test]
    async fn adding_a_device_triggers_one_alive_sweep() {
        let server = FakeServer::new();
        let publisher = Publisher::new(server.clone(), PublisherOptions::new("TestOS", "1.0")).await.unwrap();
        publisher.add_device(root("dev-1")).await.unwrap();
        // rootdevice + pnp:rootdevice + udn + full_device_type = 4 multicasts
        assert_eq!(server.multicasts.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn removing_a_device_sends_byebye_three_times_each() {
        let server = FakeServer::new();
        let publisher = Publisher::new(server.clone(), PublisherOptions::new("TestOS", "1.0")).await.unwrap();
        let device = root("dev-1");
        publisher.add_device(device.clone()).await.unwrap();
        server.multicasts.lock().await.clear();
        publisher.remove_device("dev-1").await.unwrap();
        let sent = server.multicasts.lock().await;
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|(_, count)| *count == 3));
    }

    #[tokio::test]
    async fn mx_bounds_hold_for_valid_and_invalid_values() {
        assert_eq!(mx_to_max_wait_interval(None), Some(1));
        assert_eq!(mx_to_max_wait_interval(Some("")), Some(1));
        assert_eq!(mx_to_max_wait_interval(Some("5")), Some(5));
        assert_eq!(mx_to_max_wait_interval(Some("0")), None);
        assert_eq!(mx_to_max_wait_interval(Some("-3")), None);
        assert_eq!(mx_to_max_wait_interval(Some("notanumber")), None);
        assert!(mx_to_max_wait_interval(Some("500")).unwrap() < 120);
    }

    #[tokio::test]
    async fn duplicate_search_within_window_is_suppressed() {
        let server = FakeServer::new();
        let publisher = Publisher::new(server.clone(), PublisherOptions::new("TestOS", "1.0")).await.unwrap();
        publisher.add_device(root("dev-1")).await.unwrap();

        let from = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 4000);
        let local_ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));
        let search = Message::search().with_header("ST", "ssdp:all").with_header("MX", "1");

        server.inject(search.clone(), from, local_ip);
        server.inject(search, from, local_ip);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let unicasts = server.unicasts.lock().await;
        // one M-SEARCH should produce 4 unicast responses (one per pair);
        // the duplicate within the window must not double that.
        assert_eq!(unicasts.len(), 4);
    }

    #[tokio::test]
    async fn disposing_twice_fails_the_second_time() {
        let server = FakeServer::new();
        let publisher = Publisher::new(server.clone(), PublisherOptions::new("TestOS", "1.0")).await.unwrap();
        publisher.dispose().await.unwrap();
        assert!(matches!(publisher.dispose().await, Err(Error::Disposed)));
    }

    #[tokio::test]
    async fn operations_after_dispose_fail() {
        let server = FakeServer::new();
        let publisher = Publisher::new(server.clone(), PublisherOptions::new("TestOS", "1.0")).await.unwrap();
        publisher.dispose().await.unwrap();
        assert!(matches!(publisher.add_device(root("dev-1")).await, Err(Error::Disposed)));
    }
}

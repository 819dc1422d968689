/*!
The device locator: issues `M-SEARCH` multicasts, ingests `NOTIFY`
announcements and search responses, maintains a TTL-bounded discovery
cache, and emits availability events.
*/

use crate::common::httpu::{HeaderMap, Message};
use crate::common::uri::URL;
use crate::common::user_agent::user_agent_string;
use crate::error::{Error, Result};
use crate::syntax::{
    HTTP_EXTENSION_DISCOVER, HTTP_HEADER_CACHE_CONTROL, HTTP_HEADER_HOST, HTTP_HEADER_LOCATION,
    HTTP_HEADER_MAN, HTTP_HEADER_MX, HTTP_HEADER_NT, HTTP_HEADER_NTS, HTTP_HEADER_ST,
    HTTP_HEADER_USER_AGENT, HTTP_HEADER_USN, HTTP_METHOD_NOTIFY, MULTICAST_ADDRESS,
    MULTICAST_PORT, NTS_ALIVE, NTS_BYEBYE, ST_ALL,
};
use crate::transport::{CommunicationsServer, InboundMessage, MessageKind};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

lazy_static! {
    static ref MAX_AGE: Regex = Regex::new(r"max-age\s*=\s*(\d+)").unwrap();
}

/// A device the locator has observed, either through a search response or a
/// `ssdp:alive` notification.
#[derive(Clone, Debug)]
pub struct DiscoveredDevice {
    pub notification_type: String,
    pub usn: String,
    pub description_location: URL,
    pub cache_lifetime: Duration,
    pub as_at: Instant,
    pub headers: HeaderMap,
}

impl DiscoveredDevice {
    pub fn is_expired(&self) -> bool {
        self.cache_lifetime.is_zero() || Instant::now() >= self.as_at + self.cache_lifetime
    }
}

/// Events published as the discovery cache changes.
#[derive(Clone, Debug)]
pub enum LocatorEvent {
    DeviceAvailable {
        device: DiscoveredDevice,
        is_newly_discovered: bool,
        remote_ip: Option<IpAddr>,
    },
    DeviceUnavailable {
        device: DiscoveredDevice,
        expired: bool,
    },
}

#[derive(Clone, Debug)]
pub struct LocatorOptions {
    pub os_name: String,
    pub os_version: String,
    /// `None`/empty/`"ssdp:all"` admits every notification type; any other
    /// value admits only an exact (case-insensitive) match.
    pub notification_filter: Option<String>,
}

impl LocatorOptions {
    pub fn new(os_name: impl Into<String>, os_version: impl Into<String>) -> Self {
        Self {
            os_name: os_name.into(),
            os_version: os_version.into(),
            notification_filter: None,
        }
    }
}

type CacheKey = (String, String);

/// Discovers devices on the network and keeps a TTL-bounded cache of them.
pub struct Locator {
    server: Arc<dyn CommunicationsServer>,
    options: LocatorOptions,
    cache: Mutex<HashMap<CacheKey, DiscoveredDevice>>,
    events: broadcast::Sender<LocatorEvent>,
    response_listener: Mutex<Option<JoinHandle<()>>>,
    notify_listener: Mutex<Option<JoinHandle<()>>>,
    broadcast_timer: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Locator {
    /// Subscribes to inbound search responses immediately. Does not join
    /// multicast or subscribe to `NOTIFY` traffic until
    /// [`start_listening_for_notifications`](Self::start_listening_for_notifications)
    /// is called.
    pub fn new(server: Arc<dyn CommunicationsServer>, options: LocatorOptions) -> Result<Arc<Self>> {
        if options.os_name.trim().is_empty() || options.os_version.trim().is_empty() {
            return Err(Error::InvalidInput("os_name and os_version must be non-empty".to_string()));
        }
        let (tx, _rx) = broadcast::channel(256);
        let locator = Arc::new(Self {
            server,
            options,
            cache: Mutex::new(HashMap::new()),
            events: tx,
            response_listener: Mutex::new(None),
            notify_listener: Mutex::new(None),
            broadcast_timer: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        locator.clone().spawn_response_listener();
        Ok(locator)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocatorEvent> {
        self.events.subscribe()
    }

    fn spawn_response_listener(self: Arc<Self>) {
        let mut events = self.server.subscribe();
        let listener = self.clone();
        let handle = tokio::spawn(async move {
            while let Ok(inbound) = events.recv().await {
                if listener.disposed.load(Ordering::SeqCst) {
                    break;
                }
                if inbound.kind == MessageKind::Response {
                    listener.handle_response(&inbound);
                }
            }
        });
        *self.response_listener.lock().unwrap() = Some(handle);
    }

    /// Begins listening for `NOTIFY` announcements. Idempotent: re-arms the
    /// subscription rather than stacking a second one.
    pub async fn start_listening_for_notifications(self: &Arc<Self>) -> Result<()> {
        self.check_alive()?;
        self.server.begin_listening_multicast().await?;
        if let Some(handle) = self.notify_listener.lock().unwrap().take() {
            handle.abort();
        }
        let mut events = self.server.subscribe();
        let locator = self.clone();
        let handle = tokio::spawn(async move {
            while let Ok(inbound) = events.recv().await {
                if locator.disposed.load(Ordering::SeqCst) {
                    break;
                }
                if inbound.kind == MessageKind::Request && inbound.message.method() == Some(HTTP_METHOD_NOTIFY) {
                    locator.handle_notify(&inbound);
                }
            }
        });
        *self.notify_listener.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop_listening_for_notifications(&self) {
        if let Some(handle) = self.notify_listener.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Arms (or re-arms, in place) a periodic timer: at `due_time`, then
    /// every `period`, it ensures notification listening is active, sweeps
    /// expired cache entries, and issues a default search.
    pub fn restart_broadcast_timer(self: &Arc<Self>, due_time: Duration, period: Duration) {
        if let Some(handle) = self.broadcast_timer.lock().unwrap().take() {
            handle.abort();
        }
        let locator = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(due_time).await;
            loop {
                if locator.disposed.load(Ordering::SeqCst) {
                    return;
                }
                let _ = locator.start_listening_for_notifications().await;
                locator.sweep_expired();
                let _ = locator.search(ST_ALL, Duration::from_secs(0), &CancellationToken::new()).await;
                tokio::time::sleep(period).await;
            }
        });
        *self.broadcast_timer.lock().unwrap() = Some(handle);
    }

    /// Issues one `M-SEARCH` multicast.
    ///
    /// `target` must be non-empty; `wait_time` must be zero or greater than
    /// one second. The outgoing request always carries `ST: ssdp:all` and
    /// `MX: 3` regardless of the arguments -- a deliberate, long-standing
    /// quirk; see DESIGN.md.
    pub async fn search(&self, target: &str, wait_time: Duration, cancel: &CancellationToken) -> Result<()> {
        self.check_alive()?;
        if target.is_empty() {
            return Err(Error::InvalidInput("search target must not be empty".to_string()));
        }
        if !(wait_time.is_zero() || wait_time > Duration::from_secs(1)) {
            return Err(Error::InvalidInput("wait_time must be zero or greater than one second".to_string()));
        }
        let _max_wait_seconds = wait_time_to_mx(wait_time);
        let message = Message::search()
            .with_header(HTTP_HEADER_HOST, format!("{}:{}", MULTICAST_ADDRESS, MULTICAST_PORT))
            .with_header(HTTP_HEADER_USER_AGENT, user_agent_string(&self.options.os_name, &self.options.os_version))
            .with_header(HTTP_HEADER_MAN, HTTP_EXTENSION_DISCOVER)
            .with_header(HTTP_HEADER_ST, ST_ALL)
            .with_header(HTTP_HEADER_MX, "3");
        self.server.send_multicast(&message, 1, None, cancel).await
    }

    pub async fn dispose(self: &Arc<Self>) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        let handles = vec![
            self.response_listener.lock().unwrap().take(),
            self.notify_listener.lock().unwrap().take(),
            self.broadcast_timer.lock().unwrap().take(),
        ];
        for handle in handles.into_iter().flatten() {
            handle.abort();
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

    fn filter_matches(&self, notification_type: &str) -> bool {
        match &self.options.notification_filter {
            None => true,
            Some(filter) if filter.is_empty() || filter.eq_ignore_ascii_case(ST_ALL) => true,
            Some(filter) => filter.eq_ignore_ascii_case(notification_type),
        }
    }

    fn handle_response(&self, inbound: &InboundMessage) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if inbound.message.status() != Some(200) {
            return;
        }
        let Some(location) = inbound.message.header(HTTP_HEADER_LOCATION) else {
            tracing::trace!("dropped search response with no LOCATION");
            return;
        };
        let Some(usn) = inbound.message.header(HTTP_HEADER_USN) else {
            return;
        };
        let Some(st) = inbound.message.header(HTTP_HEADER_ST) else {
            return;
        };
        let Some(description_location) = URL::parse(location).ok() else {
            tracing::trace!(%location, "dropped search response with unparseable LOCATION");
            return;
        };
        let device = DiscoveredDevice {
            notification_type: st.to_string(),
            usn: usn.to_string(),
            description_location,
            cache_lifetime: parse_max_age(inbound.message.header(HTTP_HEADER_CACHE_CONTROL)),
            as_at: Instant::now(),
            headers: inbound.message.headers().clone(),
        };
        self.upsert((st.to_string(), usn.to_string()), device, Some(inbound.from.ip()));
    }

    fn handle_notify(&self, inbound: &InboundMessage) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Some(nts) = inbound.message.header(HTTP_HEADER_NTS) else {
            return;
        };
        let Some(nt) = inbound.message.header(HTTP_HEADER_NT).filter(|s| !s.is_empty()) else {
            return;
        };
        let Some(usn) = inbound.message.header(HTTP_HEADER_USN) else {
            return;
        };
        if nts.eq_ignore_ascii_case(NTS_ALIVE) {
            let Some(location) = inbound.message.header(HTTP_HEADER_LOCATION) else {
                tracing::trace!("dropped ssdp:alive with no LOCATION");
                return;
            };
            let Some(description_location) = URL::parse(location).ok() else {
                tracing::trace!(%location, "dropped ssdp:alive with unparseable LOCATION");
                return;
            };
            let device = DiscoveredDevice {
                notification_type: nt.to_string(),
                usn: usn.to_string(),
                description_location,
                cache_lifetime: parse_max_age(inbound.message.header(HTTP_HEADER_CACHE_CONTROL)),
                as_at: Instant::now(),
                headers: inbound.message.headers().clone(),
            };
            self.upsert((nt.to_string(), usn.to_string()), device, Some(inbound.from.ip()));
        } else if nts.eq_ignore_ascii_case(NTS_BYEBYE) {
            let removed = self.remove_by_usn(usn);
            if removed.is_empty() {
                // ssdp:byebye never carries LOCATION; fall back to the sender's
                // address since there is no prior cache entry to draw one from.
                let Some(description_location) = URL::parse(&format!("http://{}/", inbound.from)).ok() else {
                    return;
                };
                let synthesized = DiscoveredDevice {
                    notification_type: nt.to_string(),
                    usn: usn.to_string(),
                    description_location,
                    cache_lifetime: Duration::ZERO,
                    as_at: Instant::now(),
                    headers: inbound.message.headers().clone(),
                };
                self.emit_unavailable(synthesized, false);
            } else {
                for device in removed {
                    self.emit_unavailable(device, false);
                }
            }
        }
    }

    fn upsert(&self, key: CacheKey, device: DiscoveredDevice, remote_ip: Option<IpAddr>) {
        let is_new = {
            let mut cache = self.cache.lock().unwrap();
            let existed = cache.remove(&key).is_some();
            cache.insert(key, device.clone());
            !existed
        };
        if self.filter_matches(&device.notification_type) {
            let _ = self.events.send(LocatorEvent::DeviceAvailable {
                device,
                is_newly_discovered: is_new,
                remote_ip,
            });
        }
    }

    fn remove_by_usn(&self, usn: &str) -> Vec<DiscoveredDevice> {
        let mut cache = self.cache.lock().unwrap();
        let keys: Vec<CacheKey> = cache
            .iter()
            .filter(|(_, device)| device.usn == usn)
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter().filter_map(|key| cache.remove(&key)).collect()
    }

    fn emit_unavailable(&self, device: DiscoveredDevice, expired: bool) {
        if self.filter_matches(&device.notification_type) {
            let _ = self.events.send(LocatorEvent::DeviceUnavailable { device, expired });
        }
    }

    /// Snapshots expired entries under the cache lock, releases the lock,
    /// then removes every entry sharing a USN with an expired one (the
    /// entire device identity, not just the stale pair) and emits one
    /// `DeviceUnavailable(expired = true)` per removed, filter-matching
    /// entry.
    fn sweep_expired(&self) {
        let expired_usns: std::collections::HashSet<String> = {
            let cache = self.cache.lock().unwrap();
            cache
                .values()
                .filter(|device| device.is_expired())
                .map(|device| device.usn.clone())
                .collect()
        };
        for usn in expired_usns {
            for device in self.remove_by_usn(&usn) {
                self.emit_unavailable(device, true);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    #[cfg(test)]
    pub(crate) fn sweep_expired_for_test(&self) {
        self.sweep_expired();
    }
}

fn wait_time_to_mx(wait_time: Duration) -> u64 {
    if wait_time.is_zero() || wait_time < Duration::from_secs(2) {
        1
    } else {
        (wait_time - Duration::from_secs(1)).as_secs()
    }
}

fn parse_max_age(cache_control: Option<&str>) -> Duration {
    cache_control
        .and_then(|value| MAX_AGE.captures(value))
        .and_then(|captures| captures.get(1))
        .and_then(|seconds| seconds.as_str().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO)
}

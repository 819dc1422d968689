/*!
The UPnP device model: root devices, embedded devices, and the recursive
advertisement-pair enumeration rules that drive both the publisher's
`NOTIFY` sweeps and its `M-SEARCH` response matching.
*/

use crate::common::uri::URL;
use crate::error::{Error, Result};
use crate::syntax::{ST_ALL, ST_PNP_ROOT_DEVICE, ST_ROOT_DEVICE};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The fields shared by every device in a tree, root or embedded.
#[derive(Clone, Debug)]
pub struct Device {
    pub uuid: String,
    pub device_type: String,
    pub type_namespace: String,
    pub type_version: String,
    /// The token UPnP device-type URNs carry between namespace and type,
    /// almost always the literal `"device"`.
    pub device_class: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
}

impl Device {
    pub fn new(uuid: impl Into<String>, type_namespace: impl Into<String>, device_type: impl Into<String>, type_version: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            device_type: device_type.into(),
            type_namespace: type_namespace.into(),
            type_version: type_version.into(),
            device_class: "device".to_string(),
            friendly_name: String::new(),
            manufacturer: String::new(),
            model_name: String::new(),
        }
    }

    /// `uuid:{uuid}`.
    pub fn udn(&self) -> String {
        format!("uuid:{}", self.uuid)
    }

    /// `urn:{namespace}:{class|device}:{device_type}:{version}`.
    pub fn full_device_type(&self) -> String {
        format!(
            "urn:{}:{}:{}:{}",
            self.type_namespace, self.device_class, self.device_type, self.type_version
        )
    }
}

/// A notification-type / USN pair, the unit of both `NOTIFY` fan-out and
/// `M-SEARCH` response matching.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdvertisementPair {
    pub notification_type: String,
    pub usn: String,
}

impl AdvertisementPair {
    fn new(notification_type: impl Into<String>, usn: impl Into<String>) -> Self {
        Self {
            notification_type: notification_type.into(),
            usn: usn.into(),
        }
    }
}

/// An event raised when an embedded device is attached to or detached from
/// its parent.
#[derive(Debug)]
pub enum DeviceTreeEvent {
    Added(Arc<EmbeddedDevice>),
    Removed(Arc<EmbeddedDevice>),
}

/// A device embedded within a root device's tree. May itself own further
/// embedded devices.
#[derive(Debug)]
pub struct EmbeddedDevice {
    pub device: Device,
    children: std::sync::Mutex<Vec<Arc<EmbeddedDevice>>>,
    attached: AtomicBool,
}

impl EmbeddedDevice {
    pub fn new(device: Device) -> Arc<Self> {
        Arc::new(Self {
            device,
            children: std::sync::Mutex::new(Vec::new()),
            attached: AtomicBool::new(false),
        })
    }

    /// Attaches `child` to this device. Fails if `child` is already attached
    /// to any parent.
    pub fn add_child(&self, child: Arc<EmbeddedDevice>) -> Result<DeviceTreeEvent> {
        attach(&child)?;
        self.children.lock().unwrap().push(child.clone());
        Ok(DeviceTreeEvent::Added(child))
    }

    pub fn remove_child(&self, uuid: &str) -> Option<DeviceTreeEvent> {
        let mut children = self.children.lock().unwrap();
        let index = children.iter().position(|c| c.device.uuid == uuid)?;
        let child = children.remove(index);
        child.attached.store(false, Ordering::SeqCst);
        Some(DeviceTreeEvent::Removed(child))
    }

    fn children_snapshot(&self) -> Vec<Arc<EmbeddedDevice>> {
        self.children.lock().unwrap().clone()
    }
}

fn attach(child: &Arc<EmbeddedDevice>) -> Result<()> {
    if child.attached.swap(true, Ordering::SeqCst) {
        Err(Error::InvariantViolation(format!(
            "device {} is already attached to a parent",
            child.device.uuid
        )))
    } else {
        Ok(())
    }
}

/// A root device: owns a `LOCATION`, a cache lifetime, and the address it is
/// reachable on, plus a forest of embedded devices.
#[derive(Debug)]
pub struct RootDevice {
    pub device: Device,
    pub location: URL,
    pub cache_lifetime: Duration,
    pub address: IpAddr,
    children: std::sync::Mutex<Vec<Arc<EmbeddedDevice>>>,
}

impl RootDevice {
    pub fn new(device: Device, location: URL, cache_lifetime: Duration, address: IpAddr) -> Self {
        Self {
            device,
            location,
            cache_lifetime,
            address,
            children: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn add_child(&self, child: Arc<EmbeddedDevice>) -> Result<DeviceTreeEvent> {
        attach(&child)?;
        self.children.lock().unwrap().push(child.clone());
        Ok(DeviceTreeEvent::Added(child))
    }

    pub fn remove_child(&self, uuid: &str) -> Option<DeviceTreeEvent> {
        let mut children = self.children.lock().unwrap();
        let index = children.iter().position(|c| c.device.uuid == uuid)?;
        let child = children.remove(index);
        child.attached.store(false, Ordering::SeqCst);
        Some(DeviceTreeEvent::Removed(child))
    }

    /// The full advertisement-pair set for this tree: `upnp:rootdevice` (and
    /// optionally `pnp:rootdevice`) once for the root, then `(udn, udn)` and
    /// `(full_device_type, usn)` for the root and every embedded descendant.
    pub fn enumerate(&self, support_pnp_root_device: bool) -> Vec<AdvertisementPair> {
        let mut pairs = Vec::new();
        let udn = self.device.udn();
        pairs.push(AdvertisementPair::new(ST_ROOT_DEVICE, format!("{}::{}", udn, ST_ROOT_DEVICE)));
        if support_pnp_root_device {
            pairs.push(AdvertisementPair::new(
                ST_PNP_ROOT_DEVICE,
                format!("{}::{}", udn, ST_PNP_ROOT_DEVICE),
            ));
        }
        enumerate_tree(&self.device, &self.children.lock().unwrap(), &mut pairs);
        pairs
    }

    /// Filters `enumerate()`'s output down to the pairs that answer a given
    /// `M-SEARCH` `ST` value. `ssdp:all` returns everything; every other
    /// value is matched by exact (case-insensitive) equality against a
    /// pair's notification type, which is sufficient for `upnp:rootdevice`,
    /// `pnp:rootdevice`, `uuid:...`, and `urn:...` alike because each is
    /// already the literal notification type some pair in the enumeration
    /// carries.
    pub fn matching_pairs(&self, search_target: &str, support_pnp_root_device: bool) -> Vec<AdvertisementPair> {
        let all = self.enumerate(support_pnp_root_device);
        if search_target.eq_ignore_ascii_case(ST_ALL) {
            return all;
        }
        all.into_iter()
            .filter(|pair| pair.notification_type.eq_ignore_ascii_case(search_target))
            .collect()
    }
}

fn enumerate_tree(device: &Device, children: &[Arc<EmbeddedDevice>], pairs: &mut Vec<AdvertisementPair>) {
    let udn = device.udn();
    pairs.push(AdvertisementPair::new(udn.clone(), udn.clone()));
    let full_device_type = device.full_device_type();
    pairs.push(AdvertisementPair::new(full_device_type.clone(), format!("{}::{}", udn, full_device_type)));
    for child in children {
        enumerate_tree(&child.device, &child.children_snapshot(), pairs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn root(uuid: &str) -> RootDevice {
        RootDevice::new(
            Device::new(uuid, "schemas-upnp-org", "MediaServer", "1"),
            URL::parse("http://192.168.1.2:8080/desc.xml").unwrap(),
            Duration::from_secs(1800),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
        )
    }

    fn embedded(uuid: &str) -> Arc<EmbeddedDevice> {
        EmbeddedDevice::new(Device::new(uuid, "schemas-upnp-org", "ContentDirectory", "1"))
    }

    #[test]
    fn enumeration_completeness_for_root_only() {
        let r = root("root-1");
        let pairs = r.enumerate(true);
        // rootdevice + pnp:rootdevice + udn + full_device_type = 4
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0].notification_type, "upnp:rootdevice");
        assert_eq!(pairs[1].notification_type, "pnp:rootdevice");
        assert_eq!(pairs[2].notification_type, "uuid:root-1");
        assert_eq!(pairs[3].notification_type, "urn:schemas-upnp-org:device:MediaServer:1");
        assert_eq!(pairs[3].usn, "uuid:root-1::urn:schemas-upnp-org:device:MediaServer:1");
    }

    #[test]
    fn enumeration_without_pnp_root_device_drops_one_pair() {
        let r = root("root-1");
        assert_eq!(r.enumerate(false).len(), 3);
    }

    #[test]
    fn enumeration_adds_two_pairs_per_embedded_device() {
        let r = root("root-1");
        r.add_child(embedded("child-1")).unwrap();
        r.add_child(embedded("child-2")).unwrap();
        assert_eq!(r.enumerate(true).len(), 4 + 2 * 2);
    }

    #[test]
    fn attaching_an_already_attached_device_fails() {
        let r1 = root("root-1");
        let r2 = root("root-2");
        let child = embedded("child-1");
        r1.add_child(child.clone()).unwrap();
        let err = r2.add_child(child).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn matching_ssdp_all_returns_everything() {
        let r = root("root-1");
        r.add_child(embedded("child-1")).unwrap();
        assert_eq!(r.matching_pairs("ssdp:all", true).len(), r.enumerate(true).len());
    }

    #[test]
    fn matching_rootdevice_returns_only_root_pair() {
        let r = root("root-1");
        let pairs = r.matching_pairs("upnp:rootdevice", true);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].usn, "uuid:root-1::upnp:rootdevice");
    }

    #[test]
    fn matching_uuid_is_case_insensitive() {
        let r = root("root-1");
        let pairs = r.matching_pairs("UUID:ROOT-1", true);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].notification_type, "uuid:root-1");
    }

    #[test]
    fn matching_unknown_target_returns_nothing() {
        let r = root("root-1");
        assert!(r.matching_pairs("urn:example-com:device:Toaster:1", true).is_empty());
    }

    #[test]
    fn removing_a_child_drops_its_pairs() {
        let r = root("root-1");
        r.add_child(embedded("child-1")).unwrap();
        assert!(r.remove_child("child-1").is_some());
        assert_eq!(r.enumerate(true).len(), 4);
    }
}

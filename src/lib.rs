/*!
A platform-independent implementation of the discovery layer of UPnP
1.0/1.1: the Simple Service Discovery Protocol (SSDP).

Two coordinated endpoints share one [`transport::CommunicationsServer`]:

- [`publisher::Publisher`] advertises a forest of [`device::RootDevice`]s
  (`ssdp:alive`/`ssdp:byebye`) and answers `M-SEARCH` requests.
- [`locator::Locator`] issues `M-SEARCH` requests, ingests `NOTIFY`
  announcements and search responses, and maintains a TTL-bounded cache of
  [`locator::DiscoveredDevice`]s.

Device-description document fetching, UPnP SOAP control, and GENA eventing
are out of scope; this crate is the discovery layer only.
*/

pub mod common;
pub mod device;
pub mod error;
pub mod locator;
pub mod publisher;
pub mod syntax;
pub mod transport;

pub use error::{Error, Result};

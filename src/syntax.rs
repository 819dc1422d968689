/*!
Wire constants: the SSDP multicast address, HTTPU method/status tokens, and
canonical header names. Kept as a single flat module of `&str` constants,
trimmed to the 1.0/1.1 header set this crate actually emits and parses (no
BOOTID/CONFIGID/SEARCHPORT/control-point headers -- see DESIGN.md).
*/

/// The standard SSDP multicast group address.
pub const MULTICAST_ADDRESS: &str = "239.255.255.250";

/// The standard SSDP multicast port.
pub const MULTICAST_PORT: u16 = 1900;

pub const HTTP_PROTOCOL_NAME: &str = "HTTP";
pub const HTTP_PROTOCOL_VERSION: &str = "1.1";
pub const HTTP_MATCH_ANY_RESOURCE: &str = "*";
pub const HTTP_OK_STATUS: &str = "200";
pub const HTTP_OK_REASON: &str = "OK";

pub const HTTP_METHOD_NOTIFY: &str = "NOTIFY";
pub const HTTP_METHOD_SEARCH: &str = "M-SEARCH";

pub const HTTP_HEADER_SEP: &str = ": ";
pub const HTTP_HEADER_LINE_SEP: &str = "\r\n";

pub const HTTP_HEADER_HOST: &str = "HOST";
pub const HTTP_HEADER_CACHE_CONTROL: &str = "CACHE-CONTROL";
pub const HTTP_HEADER_LOCATION: &str = "LOCATION";
pub const HTTP_HEADER_NT: &str = "NT";
pub const HTTP_HEADER_NTS: &str = "NTS";
pub const HTTP_HEADER_USN: &str = "USN";
pub const HTTP_HEADER_ST: &str = "ST";
pub const HTTP_HEADER_MX: &str = "MX";
pub const HTTP_HEADER_MAN: &str = "MAN";
pub const HTTP_HEADER_EXT: &str = "EXT";
pub const HTTP_HEADER_SERVER: &str = "SERVER";
pub const HTTP_HEADER_DATE: &str = "DATE";
pub const HTTP_HEADER_USER_AGENT: &str = "USER-AGENT";

/// Value of the `MAN` header on every `M-SEARCH` request.
pub const HTTP_EXTENSION_DISCOVER: &str = "\"ssdp:discover\"";

pub const NTS_ALIVE: &str = "ssdp:alive";
pub const NTS_BYEBYE: &str = "ssdp:byebye";

pub const ST_ALL: &str = "ssdp:all";
pub const ST_ROOT_DEVICE: &str = "upnp:rootdevice";
pub const ST_PNP_ROOT_DEVICE: &str = "pnp:rootdevice";

pub const UPNP_STRING: &str = "UPnP";
pub const UPNP_VERSION_10: &str = "1.0";
pub const RSSDP_PRODUCT_NAME: &str = "RSSDP";
pub const RSSDP_PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

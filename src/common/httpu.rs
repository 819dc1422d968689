/*!
HTTPU message codec: builds and parses the `NOTIFY`/`M-SEARCH`/`200 OK`
datagrams exchanged over the SSDP multicast group.

Framing is ASCII text, CRLF-terminated lines, a start-line followed by
`Name: Value` header lines and a trailing blank line -- the subset of
HTTP/1.1 message syntax UDP carries (hence "HTTPU"). Header lookups are
case-insensitive; a missing header is `None`, never an error.
*/

use crate::syntax::{
    HTTP_HEADER_LINE_SEP, HTTP_HEADER_SEP, HTTP_MATCH_ANY_RESOURCE, HTTP_METHOD_NOTIFY,
    HTTP_METHOD_SEARCH, HTTP_OK_REASON, HTTP_OK_STATUS, HTTP_PROTOCOL_NAME, HTTP_PROTOCOL_VERSION,
};
use std::fmt;

/// An ordered, case-insensitive header multimap. Order of insertion is
/// preserved on the wire but never significant on parse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap(Vec<(String, String)>);

impl HeaderMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.0.push((name.to_string(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A parsed or to-be-serialized SSDP datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// `NOTIFY * HTTP/1.1` or `M-SEARCH * HTTP/1.1`.
    Request { method: String, headers: HeaderMap },
    /// `HTTP/1.1 200 OK`.
    Response {
        status: u16,
        reason: String,
        headers: HeaderMap,
    },
}

impl Message {
    pub fn notify() -> Self {
        Message::Request {
            method: HTTP_METHOD_NOTIFY.to_string(),
            headers: HeaderMap::new(),
        }
    }

    pub fn search() -> Self {
        Message::Request {
            method: HTTP_METHOD_SEARCH.to_string(),
            headers: HeaderMap::new(),
        }
    }

    pub fn ok_response() -> Self {
        Message::Response {
            status: HTTP_OK_STATUS.parse().unwrap(),
            reason: HTTP_OK_REASON.to_string(),
            headers: HeaderMap::new(),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } => Some(method.as_str()),
            Message::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Message::Response { status, .. } => Some(*status),
            Message::Request { .. } => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            Message::Request { headers, .. } => headers,
            Message::Response { headers, .. } => headers,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        match &mut self {
            Message::Request { headers, .. } => headers.insert(name, value),
            Message::Response { headers, .. } => headers.insert(name, value),
        };
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request { method, headers } => {
                write!(
                    f,
                    "{} {} {}/{}{sep}",
                    method,
                    HTTP_MATCH_ANY_RESOURCE,
                    HTTP_PROTOCOL_NAME,
                    HTTP_PROTOCOL_VERSION,
                    sep = HTTP_HEADER_LINE_SEP
                )?;
                for (name, value) in headers.iter() {
                    write!(f, "{}{}{}{}", name, HTTP_HEADER_SEP, value, HTTP_HEADER_LINE_SEP)?;
                }
                write!(f, "{}", HTTP_HEADER_LINE_SEP)
            }
            Message::Response {
                status,
                reason,
                headers,
            } => {
                write!(
                    f,
                    "{}/{} {} {}{sep}",
                    HTTP_PROTOCOL_NAME,
                    HTTP_PROTOCOL_VERSION,
                    status,
                    reason,
                    sep = HTTP_HEADER_LINE_SEP
                )?;
                for (name, value) in headers.iter() {
                    write!(f, "{}{}{}{}", name, HTTP_HEADER_SEP, value, HTTP_HEADER_LINE_SEP)?;
                }
                write!(f, "{}", HTTP_HEADER_LINE_SEP)
            }
        }
    }
}

/// Parses a raw UDP payload into a `Message`. Returns `None` for anything
/// that is not a recognized start-line or is otherwise malformed -- callers
/// must silently drop, never surface, a parse failure (see the crate's
/// error taxonomy).
pub fn parse(datagram: &str) -> Option<Message> {
    let mut lines = datagram.split("\r\n");
    let start_line = lines.next()?;

    let message = if let Some(rest) = start_line.strip_prefix(&format!(
        "{}/{} ",
        HTTP_PROTOCOL_NAME, HTTP_PROTOCOL_VERSION
    )) {
        let mut parts = rest.splitn(2, ' ');
        let status: u16 = parts.next()?.trim().parse().ok()?;
        let reason = parts.next().unwrap_or("").trim().to_string();
        Message::Response {
            status,
            reason,
            headers: HeaderMap::new(),
        }
    } else {
        let mut parts = start_line.splitn(3, ' ');
        let method = parts.next()?.to_string();
        let _resource = parts.next()?;
        let protocol = parts.next()?;
        if !protocol.starts_with(HTTP_PROTOCOL_NAME) {
            return None;
        }
        if method != HTTP_METHOD_NOTIFY && method != HTTP_METHOD_SEARCH {
            return None;
        }
        Message::Request {
            method,
            headers: HeaderMap::new(),
        }
    };

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        headers.insert(name.trim(), value.trim().to_string());
    }

    Some(match message {
        Message::Request { method, .. } => Message::Request { method, headers },
        Message::Response { status, reason, .. } => Message::Response {
            status,
            reason,
            headers,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_a_notify_message() {
        let message = Message::notify()
            .with_header("HOST", "239.255.255.250:1900")
            .with_header("NTS", "ssdp:alive")
            .with_header("USN", "uuid:abc::upnp:rootdevice");
        let wire = message.to_string();
        assert!(wire.starts_with("NOTIFY * HTTP/1.1\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));

        let parsed = parse(&wire).unwrap();
        assert_eq!(parsed.method(), Some("NOTIFY"));
        assert_eq!(parsed.header("NTS"), Some("ssdp:alive"));
        assert_eq!(parsed.header("nts"), Some("ssdp:alive"));
        assert_eq!(parsed.header("USN"), Some("uuid:abc::upnp:rootdevice"));
    }

    #[test]
    fn round_trips_a_search_response() {
        let message = Message::ok_response()
            .with_header("ST", "upnp:rootdevice")
            .with_header("LOCATION", "http://10.0.0.1:80/desc.xml");
        let wire = message.to_string();
        let parsed = parse(&wire).unwrap();
        assert_eq!(parsed.status(), Some(200));
        assert_eq!(parsed.header("ST"), Some("upnp:rootdevice"));
    }

    #[test]
    fn rejects_unrecognized_start_lines() {
        assert!(parse("GET / HTTP/1.1\r\n\r\n").is_none());
        assert!(parse("garbage").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_missing_is_none() {
        let message = Message::search().with_header("ST", "ssdp:all");
        assert_eq!(message.header("st"), Some("ssdp:all"));
        assert_eq!(message.header("MX"), None);
    }
}

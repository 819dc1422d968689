/*!
Lightweight URI/URL newtypes.

`USN`/`NT`/`ST` values (`uuid:…`, `urn:…`, `upnp:rootdevice`) are valid URIs
but not valid `url::Url`s, so they get the permissive `URI` wrapper. The
`LOCATION` header always carries an absolute HTTP(S) URL, so it gets the
stricter `URL` wrapper backed by the `url` crate.
*/

use std::fmt;
use std::str::FromStr;

/// A permissive, opaque URI -- anything that round-trips as a string. Used
/// for `USN`, `NT`, and `ST` header values, which are URI-shaped but not
/// necessarily parseable as `url::Url`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct URI(String);

impl URI {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for URI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for URI {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for URI {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for URI {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An absolute URL, e.g. a device description `LOCATION`. Thin wrapper over
/// `url::Url` so construction/parsing goes through one crate-wide choke
/// point.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct URL(url::Url);

impl URL {
    pub fn parse(value: &str) -> Result<Self, url::ParseError> {
        Ok(Self(url::Url::parse(value)?))
    }

    pub fn inner(&self) -> &url::Url {
        &self.0
    }

    /// Returns a copy of this URL with the host replaced -- used when a
    /// description location must be rewritten per outbound interface.
    pub fn with_host(&self, host: &str) -> Result<Self, url::ParseError> {
        let mut url = self.0.clone();
        url.set_host(Some(host))?;
        Ok(Self(url))
    }
}

impl fmt::Display for URL {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for URL {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

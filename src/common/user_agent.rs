/*!
`SERVER`/`USER-AGENT` string construction and RFC 1123 date formatting.
*/

use crate::syntax::{RSSDP_PRODUCT_NAME, RSSDP_PRODUCT_VERSION, UPNP_STRING, UPNP_VERSION_10};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const RFC1123: &[FormatItem<'_>] = format_description!(
    "[weekday repr:short], [day padding:zero] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Builds the `SERVER` header value: `{os_name}/{os_version} UPnP/1.0 RSSDP/{version}`.
pub fn server_string(os_name: &str, os_version: &str) -> String {
    format!(
        "{}/{} {}/{} {}/{}",
        os_name, os_version, UPNP_STRING, UPNP_VERSION_10, RSSDP_PRODUCT_NAME, RSSDP_PRODUCT_VERSION
    )
}

/// Builds the `USER-AGENT` header value used by the locator's `M-SEARCH`
/// requests, in the same product-token shape as `SERVER`.
pub fn user_agent_string(os_name: &str, os_version: &str) -> String {
    server_string(os_name, os_version)
}

/// Formats `now` as an RFC 1123 `DATE` header value.
pub fn rfc1123_now() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(RFC1123)
        .unwrap_or_else(|_| "Thu, 01 Jan 1970 00:00:00 GMT".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn server_string_has_three_product_tokens() {
        let s = server_string("Linux", "6.1");
        assert_eq!(s.split(' ').count(), 3);
        assert!(s.starts_with("Linux/6.1 "));
        assert!(s.contains("UPnP/1.0"));
        assert!(s.contains("RSSDP/"));
    }

    #[test]
    fn rfc1123_now_ends_in_gmt() {
        assert!(rfc1123_now().ends_with("GMT"));
    }
}

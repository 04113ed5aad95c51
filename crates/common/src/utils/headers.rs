use http::{HeaderMap, HeaderName, HeaderValue};

use crate::protocol::HeaderValues;

/// Connection-scoped headers that must not cross the tunnel in either direction.
/// `content-length` is recomputed from the decoded body on the receiving side.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Whether a header only has meaning for a single transport hop
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Convert HTTP headers to the wire format, keeping every value of repeated headers
pub fn headers_to_map(headers: &HeaderMap) -> HeaderValues {
    let mut map = HeaderValues::new();

    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        // Values that are not visible ASCII cannot be represented on the wire
        let Ok(value) = value.to_str() else {
            continue;
        };

        map.entry(name.as_str().to_string())
            .or_default()
            .push(value.to_string());
    }

    map
}

/// Convert the wire format back into a HeaderMap; invalid names or values are skipped
pub fn map_to_headers(map: &HeaderValues) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, values) in map.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            for value in values {
                if let Ok(header_value) = HeaderValue::from_str(value) {
                    headers.append(header_name.clone(), header_value);
                }
            }
        }
    }

    headers
}

use http::{header, HeaderMap, HeaderName};

/// Headers that never cross the gateway boundary: hop-by-hop headers and the
/// ones the outbound client computes itself.
const STRIPPED: &[HeaderName] = &[
    header::ACCEPT,
    header::ACCEPT_ENCODING,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// The default-safe subset of inbound headers forwarded to subgraphs when no
/// rewriter is configured.
pub fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if name == "keep-alive" || STRIPPED.contains(name) {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }
    outbound
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        inbound.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert("x-request-id", HeaderValue::from_static("abc"));

        let outbound = forwarded_headers(&inbound);

        assert_eq!(outbound.len(), 2);
        assert!(outbound.contains_key(header::AUTHORIZATION));
        assert!(outbound.contains_key("x-request-id"));
    }
}

//! Provenance header enrichment.
//!
//! # Responsibilities
//! - Set the configured client-IP header
//! - Extend `X-Forwarded-For` with the proxy's own address
//! - Synthesize or extend the RFC 7239 `Forwarded` header
//! - Mark TLS-terminated requests with the configured TLS header
//!
//! # Design Decisions
//! - Pure function over the header map; no shared state
//! - `X-Forwarded-For` is only ever extended here, never originated,
//!   unless the client-IP header is configured to be `X-Forwarded-For`
//! - An existing `Forwarded` value is never rewritten, only appended to

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, FORWARDED};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Remote address could not be split into host and port.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    #[error("cannot parse {0}")]
    MalformedAddress(String),
}

/// Invalid header name or value in the enrichment settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderConfigError {
    #[error("invalid header name {0:?}")]
    InvalidName(String),
    #[error("invalid header value {0:?}")]
    InvalidValue(String),
}

/// Validated enrichment settings.
///
/// Empty strings disable the corresponding rule.
#[derive(Debug, Clone)]
pub struct HeaderConfig {
    local_ip: Option<HeaderValue>,
    client_ip_header: Option<HeaderName>,
    tls_header: Option<HeaderName>,
    tls_header_value: HeaderValue,
}

impl HeaderConfig {
    pub fn new(
        local_ip: &str,
        client_ip_header: &str,
        tls_header: &str,
        tls_header_value: &str,
    ) -> Result<Self, HeaderConfigError> {
        let local_ip = non_empty(local_ip).map(parse_value).transpose()?;
        let client_ip_header = non_empty(client_ip_header).map(parse_name).transpose()?;
        let tls_header = non_empty(tls_header).map(parse_name).transpose()?;
        let tls_header_value = parse_value(tls_header_value)?;

        Ok(Self {
            local_ip,
            client_ip_header,
            tls_header,
            tls_header_value,
        })
    }
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            local_ip: None,
            client_ip_header: None,
            tls_header: None,
            tls_header_value: HeaderValue::from_static(""),
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn parse_name(name: &str) -> Result<HeaderName, HeaderConfigError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| HeaderConfigError::InvalidName(name.to_string()))
}

fn parse_value(value: &str) -> Result<HeaderValue, HeaderConfigError> {
    HeaderValue::from_str(value).map_err(|_| HeaderConfigError::InvalidValue(value.to_string()))
}

/// Apply the provenance rules to `headers` for a request from `remote_addr`.
///
/// `remote_addr` must be `host:port` (`[v6]:port` for IPv6). Fails with
/// [`EnrichError::MalformedAddress`] otherwise, leaving `headers` untouched.
pub fn enrich(
    headers: &mut HeaderMap,
    remote_addr: &str,
    tls: bool,
    config: &HeaderConfig,
) -> Result<(), EnrichError> {
    let malformed = || EnrichError::MalformedAddress(remote_addr.to_string());
    let (remote_ip, _port) = split_host_port(remote_addr).ok_or_else(malformed)?;
    let remote_ip_value = HeaderValue::from_str(remote_ip).map_err(|_| malformed())?;

    if let Some(name) = &config.client_ip_header {
        headers.insert(name.clone(), remote_ip_value);
    }

    if let Some(local_ip) = &config.local_ip {
        if let Some(xff) = headers.get(&X_FORWARDED_FOR) {
            let extended = append_value(xff, b", ", local_ip);
            headers.insert(X_FORWARDED_FOR, extended);
        }
    }

    let forwarded = match headers.get(FORWARDED).filter(|value| !value.is_empty()) {
        Some(existing) => existing.clone(),
        None => {
            let proto = if tls { "https" } else { "http" };
            HeaderValue::from_str(&format!("for={remote_ip}; proto={proto}")).map_err(|_| malformed())?
        }
    };
    let forwarded = match &config.local_ip {
        Some(local_ip) => append_value(&forwarded, b"; by=", local_ip),
        None => forwarded,
    };
    headers.insert(FORWARDED, forwarded);

    if tls {
        if let Some(name) = &config.tls_header {
            headers.insert(name.clone(), config.tls_header_value.clone());
        }
    }

    Ok(())
}

/// `existing + sep + tail`, byte-wise so opaque existing values survive.
fn append_value(existing: &HeaderValue, sep: &[u8], tail: &HeaderValue) -> HeaderValue {
    let mut bytes = Vec::with_capacity(existing.len() + sep.len() + tail.len());
    bytes.extend_from_slice(existing.as_bytes());
    bytes.extend_from_slice(sep);
    bytes.extend_from_slice(tail.as_bytes());
    HeaderValue::from_bytes(&bytes).unwrap_or_else(|_| existing.clone())
}

/// Split `host:port` or `[host]:port`.
///
/// Returns `None` for a missing port separator or an unbracketed host that
/// itself contains a colon.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':')?;
        if port.contains(['[', ']']) {
            return None;
        }
        return Some((host, port));
    }

    let (host, port) = addr.rsplit_once(':')?;
    if host.contains([':', '[', ']']) || port.contains(['[', ']']) {
        return None;
    }
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(local_ip: &str, client_ip_header: &str, tls_header: &str, tls_value: &str) -> HeaderConfig {
        HeaderConfig::new(local_ip, client_ip_header, tls_header, tls_value).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn run(
        addr: &str,
        tls: bool,
        existing: &[(&str, &str)],
        cfg: &HeaderConfig,
    ) -> Result<HeaderMap, EnrichError> {
        let mut map = headers(existing);
        enrich(&mut map, addr, tls, cfg).map(|_| map)
    }

    #[test]
    fn test_malformed_address() {
        let err = run("1.2.3.4", false, &[], &HeaderConfig::default()).unwrap_err();
        assert_eq!(err, EnrichError::MalformedAddress("1.2.3.4".into()));
        assert_eq!(err.to_string(), "cannot parse 1.2.3.4");
    }

    #[test]
    fn test_set_client_ip_header() {
        let got = run("1.2.3.4:5555", false, &[], &config("", "Client-IP", "", "")).unwrap();
        assert_eq!(got, headers(&[("forwarded", "for=1.2.3.4; proto=http"), ("client-ip", "1.2.3.4")]));

        let got = run("1.2.3.4:5555", false, &[], &config("5.6.7.8", "Client-IP", "", "")).unwrap();
        assert_eq!(
            got,
            headers(&[("forwarded", "for=1.2.3.4; proto=http; by=5.6.7.8"), ("client-ip", "1.2.3.4")])
        );
    }

    #[test]
    fn test_client_ip_header_as_x_forwarded_for() {
        let got = run("1.2.3.4:5555", false, &[], &config("", "X-Forwarded-For", "", "")).unwrap();
        assert_eq!(
            got,
            headers(&[("forwarded", "for=1.2.3.4; proto=http"), ("x-forwarded-for", "1.2.3.4")])
        );

        let got = run("1.2.3.4:5555", false, &[], &config("5.6.7.8", "X-Forwarded-For", "", "")).unwrap();
        assert_eq!(
            got,
            headers(&[
                ("forwarded", "for=1.2.3.4; proto=http; by=5.6.7.8"),
                ("x-forwarded-for", "1.2.3.4, 5.6.7.8"),
            ])
        );
    }

    #[test]
    fn test_extend_x_forwarded_for() {
        let got = run(
            "1.2.3.4:5555",
            false,
            &[("x-forwarded-for", "9.9.9.9")],
            &config("5.6.7.8", "", "", ""),
        )
        .unwrap();
        assert_eq!(
            got,
            headers(&[
                ("forwarded", "for=1.2.3.4; proto=http; by=5.6.7.8"),
                ("x-forwarded-for", "9.9.9.9, 5.6.7.8"),
            ])
        );
    }

    #[test]
    fn test_x_forwarded_for_never_originated() {
        let got = run("1.2.3.4:5555", false, &[], &config("5.6.7.8", "", "", "")).unwrap();
        assert!(got.get(&X_FORWARDED_FOR).is_none());

        // Present but no local IP: left as is.
        let got = run("1.2.3.4:5555", false, &[("x-forwarded-for", "9.9.9.9")], &HeaderConfig::default()).unwrap();
        assert_eq!(got.get(&X_FORWARDED_FOR).unwrap(), "9.9.9.9");
    }

    #[test]
    fn test_set_forwarded() {
        let got = run("1.2.3.4:5555", false, &[], &HeaderConfig::default()).unwrap();
        assert_eq!(got, headers(&[("forwarded", "for=1.2.3.4; proto=http")]));

        let got = run("1.2.3.4:5555", true, &[], &config("5.6.7.8", "", "", "")).unwrap();
        assert_eq!(got, headers(&[("forwarded", "for=1.2.3.4; proto=https; by=5.6.7.8")]));
    }

    #[test]
    fn test_extend_forwarded() {
        let got = run(
            "1.2.3.4:5555",
            false,
            &[("forwarded", "for=9.9.9.9; proto=http; by=8.8.8.8")],
            &config("5.6.7.8", "", "", ""),
        )
        .unwrap();
        assert_eq!(
            got,
            headers(&[("forwarded", "for=9.9.9.9; proto=http; by=8.8.8.8; by=5.6.7.8")])
        );

        let got = run(
            "1.2.3.4:5555",
            true,
            &[("forwarded", "for=9.9.9.9; proto=http")],
            &HeaderConfig::default(),
        )
        .unwrap();
        assert_eq!(got, headers(&[("forwarded", "for=9.9.9.9; proto=http")]));
    }

    #[test]
    fn test_empty_forwarded_is_replaced() {
        let got = run(
            "1.2.3.4:5555",
            true,
            &[("forwarded", "")],
            &config("5.6.7.8", "", "", ""),
        )
        .unwrap();
        assert_eq!(got, headers(&[("forwarded", "for=1.2.3.4; proto=https; by=5.6.7.8")]));
    }

    #[test]
    fn test_tls_header_only_on_tls() {
        let cfg = config("5.6.7.8", "", "Secure", "");
        let got = run("1.2.3.4:5555", false, &[], &cfg).unwrap();
        assert!(got.get("secure").is_none());

        let got = run("1.2.3.4:5555", true, &[], &cfg).unwrap();
        assert_eq!(
            got,
            headers(&[("forwarded", "for=1.2.3.4; proto=https; by=5.6.7.8"), ("secure", "")])
        );

        let got = run("1.2.3.4:5555", true, &[], &config("5.6.7.8", "", "Secure", "true")).unwrap();
        assert_eq!(got.get("secure").unwrap(), "true");
    }

    #[test]
    fn test_enrich_is_deterministic() {
        let cfg = config("5.6.7.8", "X-Real-Ip", "X-Tls", "on");
        let existing = [("x-forwarded-for", "9.9.9.9"), ("accept", "*/*")];
        let first = run("[2001:db8::1]:443", true, &existing, &cfg).unwrap();
        for _ in 0..10 {
            assert_eq!(run("[2001:db8::1]:443", true, &existing, &cfg).unwrap(), first);
        }
        assert_eq!(first.get("x-real-ip").unwrap(), "2001:db8::1");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("1.2.3.4:80"), Some(("1.2.3.4", "80")));
        assert_eq!(split_host_port("[::1]:80"), Some(("::1", "80")));
        assert_eq!(split_host_port("host:"), Some(("host", "")));
        assert_eq!(split_host_port("1.2.3.4"), None);
        assert_eq!(split_host_port("::1:80"), None);
        assert_eq!(split_host_port("[::1]"), None);
        assert_eq!(split_host_port("[::1:80"), None);
    }

    #[test]
    fn test_invalid_config() {
        assert_eq!(
            HeaderConfig::new("", "bad header", "", "").unwrap_err(),
            HeaderConfigError::InvalidName("bad header".into())
        );
        assert!(HeaderConfig::new("bad\x01ip", "", "", "").is_err());
    }
}

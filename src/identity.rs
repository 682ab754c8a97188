use actix_web::http::header::{HeaderMap, HeaderName};
use once_cell::sync::Lazy;

/// Identifier shared by every client that sends neither forwarding header.
///
/// Distinct clients collapse onto this value and share one set of windows.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub static X_FORWARDED_FOR: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-forwarded-for"));

pub static X_REAL_IP: Lazy<HeaderName> = Lazy::new(|| HeaderName::from_static("x-real-ip"));

/// Derive the rate limiting identifier of the client that sent a request.
///
/// Checks, in order:
/// 1. the leftmost (original client) entry of `x-forwarded-for`, trimmed;
/// 2. `x-real-ip`, verbatim;
/// 3. falls back to [UNKNOWN_CLIENT].
///
/// A header that is present but empty, or whose value is not visible ASCII, counts as absent:
/// an unreadable `x-forwarded-for` falls through to `x-real-ip` rather than straight to
/// [UNKNOWN_CLIENT].
///
/// # Security
///
/// Both headers are client controlled unless a proxy you trust overwrites them, and their
/// contents are not validated. This mitigates abuse, it does not authenticate anyone.
pub fn client_identifier(headers: &HeaderMap) -> String {
    forwarded_for(headers)
        .or_else(|| real_ip(headers))
        .unwrap_or(UNKNOWN_CLIENT)
        .to_owned()
}

// Values that are not visible ASCII are ignored, as if the header were absent.
fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(&*X_FORWARDED_FOR)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then_some(first)
}

fn real_ip(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(&*X_REAL_IP)?.to_str().ok()?;
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_static(*name),
                HeaderValue::from_static(*value),
            );
        }
        map
    }

    #[test]
    fn test_forwarded_for_takes_leftmost() {
        let map = headers(&[("x-forwarded-for", "1.2.3.4, 5.6.7.8")]);
        assert_eq!(client_identifier(&map), "1.2.3.4");
        let map = headers(&[("x-forwarded-for", "  2a00:1450:4009:81f::200e ,10.0.0.1")]);
        assert_eq!(client_identifier(&map), "2a00:1450:4009:81f::200e");
    }

    #[test]
    fn test_forwarded_for_preferred_over_real_ip() {
        let map = headers(&[
            ("x-real-ip", "10.0.0.1"),
            ("x-forwarded-for", "1.2.3.4"),
        ]);
        assert_eq!(client_identifier(&map), "1.2.3.4");
    }

    #[test]
    fn test_real_ip_verbatim() {
        let map = headers(&[("x-real-ip", "142.250.187.206")]);
        assert_eq!(client_identifier(&map), "142.250.187.206");
    }

    #[test]
    fn test_no_validation() {
        // Anything goes, the value is only trimmed
        let map = headers(&[("x-forwarded-for", " not-an-ip ")]);
        assert_eq!(client_identifier(&map), "not-an-ip");
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(client_identifier(&HeaderMap::new()), UNKNOWN_CLIENT);
        // Empty or unreadable headers fall through to the next source
        let map = headers(&[("x-forwarded-for", " , 1.2.3.4")]);
        assert_eq!(client_identifier(&map), "unknown");
        let mut map = headers(&[("x-real-ip", "10.0.0.1")]);
        map.insert(
            X_FORWARDED_FOR.clone(),
            HeaderValue::from_bytes(b"\xff\xfe").unwrap(),
        );
        assert_eq!(client_identifier(&map), "10.0.0.1");
    }
}

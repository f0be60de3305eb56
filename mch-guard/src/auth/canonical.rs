//! Canonical string construction for outbound and inbound signatures.
//!
//! The byte layout here is a wire contract with the platform. A single extra
//! or missing newline, a differently escaped query string, or a re-serialized
//! body invalidates the signature on the other side.

use std::time::{SystemTime, UNIX_EPOCH};

use url::form_urlencoded;
use uuid::Uuid;

use crate::{
    auth::MIN_NONCE_LEN,
    error::{GuardError, Result},
};

/// Everything covered by an outbound request signature.
///
/// Built per request and dropped after signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningContext<'a> {
    /// Upper-case HTTP method.
    pub method: &'a str,
    /// Absolute path including the query string, exactly as sent.
    pub path_with_query: &'a str,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Random alphanumeric nonce.
    pub nonce: &'a str,
    /// Raw request body. `None` for bodiless methods.
    pub body: Option<&'a [u8]>,
}

impl<'a> SigningContext<'a> {
    /// Creates a validated signing context.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidInput`] if the method is not upper-case
    /// ASCII letters, the path does not start with `/`, the path holds a byte
    /// an HTTP client would percent-encode before sending (see
    /// [`is_wire_safe_path`]), or the nonce is shorter than 8 characters or
    /// not alphanumeric.
    pub fn new(
        method: &'a str,
        path_with_query: &'a str,
        timestamp: u64,
        nonce: &'a str,
        body: Option<&'a [u8]>,
    ) -> Result<Self> {
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(GuardError::InvalidInput(format!("invalid HTTP method: {method:?}")));
        }
        if !path_with_query.starts_with('/') {
            return Err(GuardError::InvalidInput("path must start with '/'".to_owned()));
        }
        if path_with_query.contains(['\r', '\n']) {
            return Err(GuardError::InvalidInput("path contains a line break".to_owned()));
        }
        if !is_wire_safe_path(path_with_query) {
            return Err(GuardError::InvalidInput(format!(
                "path must be percent-encoded before signing: {path_with_query:?}"
            )));
        }
        validate_nonce(nonce)?;

        Ok(Self { method, path_with_query, timestamp, nonce, body })
    }

    /// Returns the exact bytes to hash and sign.
    ///
    /// ```
    /// use mch_guard::auth::SigningContext;
    ///
    /// let ctx = SigningContext::new("GET", "/v3/certificates", 1700000000, "abc12345xy", None)?;
    /// assert_eq!(ctx.canonical_bytes(), b"GET\n/v3/certificates\n1700000000\nabc12345xy\n\n");
    /// # Ok::<(), mch_guard::GuardError>(())
    /// ```
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let body = self.body.unwrap_or_default();
        let timestamp = self.timestamp.to_string();

        let mut out = Vec::with_capacity(
            self.method.len()
                + self.path_with_query.len()
                + timestamp.len()
                + self.nonce.len()
                + body.len()
                + 5,
        );
        for part in [self.method.as_bytes(), self.path_with_query.as_bytes(), timestamp.as_bytes()]
        {
            out.extend_from_slice(part);
            out.push(b'\n');
        }
        out.extend_from_slice(self.nonce.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(body);
        out.push(b'\n');
        out
    }
}

/// Everything covered by an inbound response or notification signature.
///
/// All fields come straight from the received headers and body; the body
/// must be the exact bytes received, before any JSON decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationContext<'a> {
    /// `Wechatpay-Timestamp` header value.
    pub timestamp: &'a str,
    /// `Wechatpay-Nonce` header value.
    pub nonce: &'a str,
    /// `Wechatpay-Serial` header value.
    pub serial_no: &'a str,
    /// `Wechatpay-Signature` header value (base64).
    pub signature: &'a str,
    /// Raw body bytes.
    pub body: &'a [u8],
}

impl VerificationContext<'_> {
    /// Returns the inbound canonical bytes: `timestamp\nnonce\nbody\n`.
    ///
    /// Method and path are deliberately absent.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        inbound_canonical(self.timestamp, self.nonce, self.body)
    }
}

pub(crate) fn inbound_canonical(timestamp: &str, nonce: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(timestamp.len() + nonce.len() + body.len() + 3);
    out.extend_from_slice(timestamp.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(nonce.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(body);
    out.push(b'\n');
    out
}

/// Appends a query string to `path`.
///
/// Keys and values are `application/x-www-form-urlencoded` (space becomes
/// `+`), pairs are joined with `&` in the order given, and nothing is sorted.
/// The returned string must be used verbatim both for signing and for the
/// request URL.
///
/// ```
/// use mch_guard::auth::build_path_with_query;
///
/// let path = build_path_with_query(
///     "/v3/ecommerce/fund/enddaybalance/1900000109",
///     &[("date", "2019-08-17"), ("note", "a b&c")],
/// );
/// assert_eq!(path, "/v3/ecommerce/fund/enddaybalance/1900000109?date=2019-08-17&note=a+b%26c");
/// ```
#[must_use]
pub fn build_path_with_query(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_owned();
    }
    let encoded = form_urlencoded::Serializer::new(String::new()).extend_pairs(query).finish();
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}{encoded}")
}

/// Whether `path_with_query` goes out on the wire exactly as written.
///
/// URL parsers percent-encode spaces, control bytes, non-ASCII and a few
/// ASCII punctuation characters, and treat `#` as the start of a fragment
/// that is never sent. A path containing any of them would be signed over
/// different bytes than the platform receives.
///
/// ```
/// use mch_guard::auth::is_wire_safe_path;
///
/// assert!(is_wire_safe_path("/v3/refund/domestic/refunds/%E9%80%80%E6%AC%BE%201"));
/// assert!(!is_wire_safe_path("/v3/refund/domestic/refunds/退款 1"));
/// ```
#[must_use]
pub fn is_wire_safe_path(path_with_query: &str) -> bool {
    path_with_query.bytes().all(|b| {
        b.is_ascii_graphic()
            && !matches!(b, b'"' | b'\'' | b'<' | b'>' | b'`' | b'\\' | b'#' | b'{' | b'}')
    })
}

/// Generates a 32-character alphanumeric nonce.
#[must_use]
pub fn generate_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current Unix time in seconds.
///
/// # Errors
///
/// Returns [`GuardError::InvalidInput`] if the system clock is before the
/// Unix epoch.
pub fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| GuardError::InvalidInput(format!("system time error: {e}")))
}

fn validate_nonce(nonce: &str) -> Result<()> {
    if nonce.len() < MIN_NONCE_LEN {
        return Err(GuardError::InvalidInput(format!(
            "nonce must be at least {MIN_NONCE_LEN} characters"
        )));
    }
    if !nonce.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(GuardError::InvalidInput("nonce must be alphanumeric".to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_canonical_with_body() {
        let body = br#"{"sub_mchid":"1900000109"}"#;
        let ctx =
            SigningContext::new("POST", "/v3/ecommerce/refunds/apply", 1_554_208_460, "593BEC0C930BF1AFEB40B4A08C8FB242", Some(body))
                .unwrap();
        assert_eq!(
            ctx.canonical_bytes(),
            b"POST\n/v3/ecommerce/refunds/apply\n1554208460\n593BEC0C930BF1AFEB40B4A08C8FB242\n{\"sub_mchid\":\"1900000109\"}\n"
        );
    }

    #[test]
    fn test_outbound_canonical_without_body_ends_with_empty_line() {
        let ctx = SigningContext::new("GET", "/v3/certificates", 1_700_000_000, "abc12345xy", None)
            .unwrap();
        let bytes = ctx.canonical_bytes();
        assert!(bytes.ends_with(b"abc12345xy\n\n"));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 5);
    }

    #[test]
    fn test_empty_body_equals_no_body() {
        let a = SigningContext::new("DELETE", "/v3/x", 1, "abcdefgh", None).unwrap();
        let b = SigningContext::new("DELETE", "/v3/x", 1, "abcdefgh", Some(b"")).unwrap();
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_inbound_canonical() {
        let ctx = VerificationContext {
            timestamp: "1554209980",
            nonce: "c5ac7061fccab6bf3e254dcf98995b8c",
            serial_no: "S1",
            signature: "sig",
            body: br#"{"data":[]}"#,
        };
        assert_eq!(
            ctx.canonical_bytes(),
            b"1554209980\nc5ac7061fccab6bf3e254dcf98995b8c\n{\"data\":[]}\n"
        );
    }

    #[test]
    fn test_rejects_short_nonce() {
        let err = SigningContext::new("GET", "/v3/x", 1, "abc", None).unwrap_err();
        assert!(matches!(err, GuardError::InvalidInput(ref m) if m.contains("at least 8")));
    }

    #[test]
    fn test_rejects_non_alphanumeric_nonce() {
        assert!(SigningContext::new("GET", "/v3/x", 1, "abc-1234", None).is_err());
        assert!(SigningContext::new("GET", "/v3/x", 1, "abc1234\n", None).is_err());
    }

    #[test]
    fn test_rejects_bad_method_and_path() {
        assert!(SigningContext::new("get", "/v3/x", 1, "abcdefgh", None).is_err());
        assert!(SigningContext::new("", "/v3/x", 1, "abcdefgh", None).is_err());
        assert!(SigningContext::new("GET", "v3/x", 1, "abcdefgh", None).is_err());
        assert!(SigningContext::new("GET", "/v3/x\nHost: evil", 1, "abcdefgh", None).is_err());
    }

    #[test]
    fn test_rejects_path_that_would_be_reencoded() {
        for path in [
            "/v3/refund/domestic/refunds/退款 1",
            "/v3/refund/domestic/refunds/a b",
            "/v3/x\tsuffix",
            "/v3/x#frag",
            "/v3/{id}",
            "/v3/x?q=\"a\"",
            "/v3\\x",
        ] {
            let err = SigningContext::new("GET", path, 1, "abcdefgh", None).unwrap_err();
            assert!(matches!(err, GuardError::InvalidInput(ref m) if m.contains("percent-encoded")), "{path}");
        }
    }

    #[test]
    fn test_accepts_percent_encoded_path() {
        let path = "/v3/refund/domestic/refunds/%E9%80%80%E6%AC%BE%201?limit=10&note=a+b%26c";
        let ctx = SigningContext::new("GET", path, 1, "abcdefgh", None).unwrap();
        assert_eq!(ctx.path_with_query, path);
    }

    #[test]
    fn test_query_preserves_caller_order() {
        let path = build_path_with_query("/v3/p", &[("z", "1"), ("a", "2")]);
        assert_eq!(path, "/v3/p?z=1&a=2");
    }

    #[test]
    fn test_query_escapes_reserved_characters() {
        let path = build_path_with_query("/v3/p", &[("k y", "v=1&2/3")]);
        assert_eq!(path, "/v3/p?k+y=v%3D1%262%2F3");
    }

    #[test]
    fn test_query_appends_to_existing_query() {
        let path = build_path_with_query("/v3/p?limit=10", &[("offset", "20")]);
        assert_eq!(path, "/v3/p?limit=10&offset=20");
    }

    #[test]
    fn test_empty_query_leaves_path_untouched() {
        assert_eq!(build_path_with_query("/v3/certificates", &[]), "/v3/certificates");
    }

    #[test]
    fn test_generated_nonce_is_valid() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_eq!(a.len(), 32);
        assert!(validate_nonce(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn test_unix_timestamp_is_recent() {
        assert!(unix_timestamp().unwrap() > 1_700_000_000);
    }
}

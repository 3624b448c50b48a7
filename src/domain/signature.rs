//! Request signatures for response caching.
//!
//! A request signature identifies a class of requests whose responses are
//! interchangeable. It is computed from:
//! - HTTP method
//! - Full request URI
//! - Optional: values of selected headers, in the order they were selected
//!
//! The digest is SHA-256, so signatures are stable across processes and can be
//! used as keys in a shared cache backend.

use http::header::HeaderName;
use http::Request;
use sha2::{Digest, Sha256};
use std::fmt;

/// A deterministic identifier for a request shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestSignature(String);

impl RequestSignature {
    /// Compute a signature from method and URI only.
    ///
    /// # Example
    /// ```
    /// use advanced_throttle::RequestSignature;
    ///
    /// let a = http::Request::get("https://example.com/a").body(()).unwrap();
    /// let b = http::Request::get("https://example.com/a").body(()).unwrap();
    /// let c = http::Request::post("https://example.com/a").body(()).unwrap();
    ///
    /// assert_eq!(RequestSignature::of(&a), RequestSignature::of(&b));
    /// assert_ne!(RequestSignature::of(&a), RequestSignature::of(&c));
    /// ```
    pub fn of<B>(request: &Request<B>) -> Self {
        Self::with_headers(request, &[])
    }

    /// Compute a signature from method, URI and the given headers.
    ///
    /// Missing headers contribute an explicit "absent" marker so that a request
    /// without the header never collides with one carrying an empty value.
    pub fn with_headers<B>(request: &Request<B>, headers: &[HeaderName]) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(request.method().as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(request.uri().to_string().as_bytes());

        for name in headers {
            hasher.update(b"\n");
            hasher.update(name.as_str().as_bytes());
            let values = request.headers().get_all(name);
            let mut present = false;
            for value in values {
                present = true;
                hasher.update(b"=");
                hasher.update(value.as_bytes());
            }
            if !present {
                hasher.update(b"\0");
            }
        }

        RequestSignature(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an already computed signature, e.g. one read back from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        RequestSignature(hex.into())
    }

    /// Hex representation of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

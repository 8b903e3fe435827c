//! Request view handed to the classifier by the proxy, plus the keys
//! detectors derive from it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Connect,
    Trace,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
        }
    }

    /// Methods for which the proxy buffers and forwards a body.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method name that is not a known HTTP method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown HTTP method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "CONNECT" => Method::Connect,
            "TRACE" => Method::Trace,
            _ => return Err(UnknownMethod(s.to_string())),
        };
        Ok(method)
    }
}

/// Case-insensitive multi-valued header collection (lowercase keys).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>")]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Get a single header value (first if multiple).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// All values of a header, in arrival order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Headers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<BTreeMap<String, Vec<String>>> for Headers {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        let mut headers = Headers::new();
        for (name, values) in map {
            for value in values {
                headers.append(&name, value);
            }
        }
        headers
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value);
        }
        headers
    }
}

/// Addresses a request came from: the socket peer and any forwarded chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteAddresses {
    /// Socket peer address
    pub ip: IpAddr,
    /// `X-Forwarded-For` chain, client first
    #[serde(default)]
    pub forwarded_for: Vec<IpAddr>,
}

impl RemoteAddresses {
    /// A direct connection with no forwarding chain.
    pub fn direct(ip: IpAddr) -> Self {
        Self {
            ip,
            forwarded_for: vec![],
        }
    }

    /// Build from the socket peer and the request's `X-Forwarded-For`
    /// headers. Entries that are not IP addresses are skipped.
    pub fn from_peer_and_headers(peer: IpAddr, headers: &Headers) -> Self {
        let forwarded_for = headers
            .get_all("x-forwarded-for")
            .iter()
            .flat_map(|value| value.split(','))
            .filter_map(|hop| hop.trim().parse().ok())
            .collect();

        Self {
            ip: peer,
            forwarded_for,
        }
    }

    /// The address the client claims to originate from.
    pub fn client_ip(&self) -> IpAddr {
        self.forwarded_for.first().copied().unwrap_or(self.ip)
    }
}

impl fmt::Display for RemoteAddresses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip)?;
        if !self.forwarded_for.is_empty() {
            let chain: Vec<String> = self.forwarded_for.iter().map(|ip| ip.to_string()).collect();
            write!(f, " (for {})", chain.join(", "))?;
        }
        Ok(())
    }
}

/// Immutable view of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub headers: Headers,
    pub remote: RemoteAddresses,
    pub path: String,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>, remote: RemoteAddresses) -> Self {
        Self {
            method,
            headers: Headers::new(),
            remote,
            path: path.into(),
        }
    }

    /// Add a header value.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the header collection.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// SHA-256 digest of a header set.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Computes a fixed-size digest from a header set.
pub trait Fingerprinter: Send + Sync {
    /// `None` when the headers carry nothing to fingerprint.
    fn fingerprint(&self, headers: &Headers) -> Option<Fingerprint>;
}

/// Headers a proxy chain rewrites on every hop.
const PER_HOP_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip", "forwarded", "via"];

/// SHA-256 over header names and values in name order.
///
/// Per-hop forwarding headers are skipped so that a client keeps its
/// fingerprint when its address changes.
#[derive(Debug, Clone)]
pub struct HeaderFingerprinter {
    ignored: HashSet<String>,
}

impl HeaderFingerprinter {
    pub fn new() -> Self {
        Self {
            ignored: PER_HOP_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }

    /// Also skip the given header.
    pub fn ignoring(mut self, name: &str) -> Self {
        self.ignored.insert(name.to_ascii_lowercase());
        self
    }
}

impl Default for HeaderFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprinter for HeaderFingerprinter {
    fn fingerprint(&self, headers: &Headers) -> Option<Fingerprint> {
        digest_headers(headers, |name| !self.ignored.contains(name))
    }
}

fn digest_headers(headers: &Headers, include: impl Fn(&str) -> bool) -> Option<Fingerprint> {
    let mut hasher = Sha256::new();
    let mut hashed = 0usize;

    for (name, values) in headers.iter().filter(|&(name, _)| include(name)) {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        for value in values {
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xffu8]);
        hashed += 1;
    }

    (hashed > 0).then(|| Fingerprint(hasher.finalize().into()))
}

/// Key correlating repeated contacts from the same logical client.
///
/// Two requests share an identity when method, path, remote addresses and
/// the full header set are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
    method: Method,
    path: String,
    remote: RemoteAddresses,
    headers: Option<Fingerprint>,
}

impl RequestIdentity {
    pub fn of(request: &HttpRequest) -> Self {
        Self {
            method: request.method,
            path: request.path.clone(),
            remote: request.remote.clone(),
            headers: digest_headers(&request.headers, |_| true),
        }
    }
}

impl From<&HttpRequest> for RequestIdentity {
    fn from(request: &HttpRequest) -> Self {
        Self::of(request)
    }
}

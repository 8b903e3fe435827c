//! Bot detection modules.
//!
//! Each detector keeps its own short-lived correlation state and returns the
//! labels it attaches to a request.

pub mod fast_browser;
pub mod ip_rotation;

pub use fast_browser::FastBrowserDetector;
pub use ip_rotation::IpRotationDetector;

use crate::label::Labels;
use crate::request::HttpRequest;

/// Internal failure of a detector.
///
/// Never reaches the proxy: the classifier downgrades it to an empty
/// contribution.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// A lock guarding per-client state was poisoned by a panicking holder
    #[error("{detector}: state lock poisoned")]
    StatePoisoned { detector: &'static str },
}

/// Trait for bot detectors.
pub trait Detector: Send + Sync {
    /// Classify the request. `body` is only present for methods that carry
    /// one.
    fn classify(&self, request: &HttpRequest, body: Option<&[u8]>) -> Result<Labels, DetectionError>;

    /// Get the detector name.
    fn name(&self) -> &'static str;
}

//! Cross-IP correlation detector.
//!
//! Within a short window, two requests carrying the same distinctive header
//! set are assumed to come from the same agent. If that agent shows up from
//! a different address, it is rotating IPs.

use super::{DetectionError, Detector};
use crate::cache::{Expiration, ExpiringCache};
use crate::clock::Clock;
use crate::config::ClassifierConfig;
use crate::label::{Label, Labels};
use crate::request::{Fingerprint, Fingerprinter, HttpRequest, RemoteAddresses};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NAME: &str = "ip_rotation";

/// Cross-IP correlation detector.
pub struct IpRotationDetector {
    /// Last addresses seen per header fingerprint
    last_seen: ExpiringCache<Fingerprint, RemoteAddresses>,
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl IpRotationDetector {
    /// Create a new detector. The window slides on every sighting.
    pub fn new(
        window: Duration,
        max_entries: usize,
        fingerprinter: Arc<dyn Fingerprinter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            last_seen: ExpiringCache::new(
                "ip_rotation_last_seen",
                Expiration::AfterAccess(window),
                max_entries,
                clock,
            ),
            fingerprinter,
        }
    }

    pub fn from_config(
        config: &ClassifierConfig,
        fingerprinter: Arc<dyn Fingerprinter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut detector = Self::new(
            config.ip_rotation.window(),
            config.cache.max_entries,
            fingerprinter,
            clock,
        );
        detector.last_seen = detector
            .last_seen
            .with_sweep_interval(config.cache.sweep_interval);
        detector
    }

    /// Number of fingerprints currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.last_seen.entry_count()
    }
}

impl Detector for IpRotationDetector {
    fn classify(&self, request: &HttpRequest, _body: Option<&[u8]>) -> Result<Labels, DetectionError> {
        // Nothing to correlate on: treat as a fresh client
        let Some(fingerprint) = self.fingerprinter.fingerprint(&request.headers) else {
            return Ok(Labels::new());
        };

        let mut labels = Labels::new();
        if let Some(seen) = self.last_seen.get(&fingerprint) {
            if seen != request.remote {
                debug!(
                    detector = NAME,
                    %fingerprint,
                    previous = %seen,
                    current = %request.remote,
                    "Header fingerprint moved to a new address"
                );
                labels.insert(Label::IpRotation);
            }
        }

        // Always track the latest address so the next rotation is judged on its own
        self.last_seen.insert(fingerprint, request.remote.clone());
        Ok(labels)
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

//! Composite classifier: runs every detector and unions their labels.

use crate::clock::Clock;
use crate::config::{ClassifierConfig, HeaderConfig};
use crate::detectors::{DetectionError, Detector, FastBrowserDetector, IpRotationDetector};
use crate::label::Labels;
use crate::request::{Fingerprinter, HttpRequest};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ordered set of detectors combined into one label set.
///
/// A detector that errors or panics contributes nothing; classification
/// never fails from the caller's point of view.
#[derive(Default)]
pub struct CompositeClassifier {
    detectors: Vec<Box<dyn Detector>>,
}

impl CompositeClassifier {
    /// Create an empty classifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the detectors enabled in `config`.
    pub fn from_config(
        config: &ClassifierConfig,
        clock: Arc<dyn Clock>,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        let mut classifier = Self::new();

        if config.fast_browser.enabled {
            classifier = classifier.with_detector(FastBrowserDetector::from_config(config, clock.clone()));
        }
        if config.ip_rotation.enabled {
            classifier = classifier.with_detector(IpRotationDetector::from_config(
                config,
                fingerprinter,
                clock,
            ));
        }

        info!(
            detectors = ?classifier.detector_names(),
            "Traffic classifier initialized"
        );
        classifier
    }

    /// Append a detector. Detectors run in registration order.
    pub fn with_detector(mut self, detector: impl Detector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run all detectors and merge their labels.
    pub fn classify(&self, request: &HttpRequest, body: Option<&[u8]>) -> Labels {
        let mut labels = Labels::new();

        for detector in &self.detectors {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| detector.classify(request, body)));
            match outcome {
                Ok(Ok(found)) => {
                    debug!(
                        detector = detector.name(),
                        labels = %found.join(),
                        "Detector complete"
                    );
                    labels.extend(found);
                }
                Ok(Err(error)) => {
                    warn!(
                        detector = detector.name(),
                        %error,
                        "Detector failed, contributing no labels"
                    );
                }
                Err(_) => {
                    warn!(
                        detector = detector.name(),
                        "Detector panicked, contributing no labels"
                    );
                }
            }
        }

        labels
    }
}

impl Detector for CompositeClassifier {
    fn classify(&self, request: &HttpRequest, body: Option<&[u8]>) -> Result<Labels, DetectionError> {
        Ok(CompositeClassifier::classify(self, request, body))
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// Headers the proxy attaches to a flagged request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationHeaders {
    /// `(name, comma-joined labels)`
    pub labels: (String, String),
    /// `(name, fresh trace id)`
    pub trace_id: (String, String),
}

impl ClassificationHeaders {
    /// `None` when nothing was detected; the proxy then forwards the request
    /// untouched.
    pub fn for_labels(labels: &Labels, names: &HeaderConfig) -> Option<Self> {
        if labels.is_empty() {
            return None;
        }

        Some(Self {
            labels: (names.labels_header.clone(), labels.join()),
            trace_id: (names.trace_id_header.clone(), Uuid::new_v4().to_string()),
        })
    }

    /// Both headers as `(name, value)` pairs.
    pub fn pairs(&self) -> [(&str, &str); 2] {
        [
            (self.labels.0.as_str(), self.labels.1.as_str()),
            (self.trace_id.0.as_str(), self.trace_id.1.as_str()),
        ]
    }
}

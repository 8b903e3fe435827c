//! Traffic Classification Agent for Zentinel
//!
//! Labels inbound requests as automated traffic using stateful heuristics.
//! The proxy calls [`CompositeClassifier::classify`] inline for every request
//! and attaches [`ClassificationHeaders`] when the returned set is non-empty.
//!
//! # Detectors
//!
//! - Rapid revisits: the same request repeated faster than a browser would,
//!   escalating into an exponential penalty box (`FAST_BROWSER`)
//! - IP rotation: the same header fingerprint reappearing from another
//!   address within a short window (`IP_ROTATION`)
//!
//! Detector state lives in in-memory expiring caches owned by each detector.
//! A failing detector contributes no labels instead of failing the request.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zentinel_agent_traffic_classifier::{
//!     ClassifierConfig, CompositeClassifier, HeaderFingerprinter, SystemClock,
//! };
//!
//! let classifier = CompositeClassifier::from_config(
//!     &ClassifierConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(HeaderFingerprinter::new()),
//! );
//! let labels = classifier.classify(&request, None);
//! ```

pub mod backoff;
pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod detectors;
pub mod label;
pub mod replay;
pub mod request;

pub use classifier::{ClassificationHeaders, CompositeClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClassifierConfig;
pub use label::{Label, Labels};
pub use request::{HeaderFingerprinter, Headers, HttpRequest, Method, RemoteAddresses};

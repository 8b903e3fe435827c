//! Integration tests for the Zentinel Traffic Classification Agent.
//!
//! These tests drive the public classifier API the way the proxy does:
//! build a request view, classify it, attach headers when flagged.

use std::sync::Arc;
use std::time::Duration;
use zentinel_agent_traffic_classifier::classifier::ClassificationHeaders;
use zentinel_agent_traffic_classifier::config::{ConfigError, HeaderConfig};
use zentinel_agent_traffic_classifier::detectors::{
    DetectionError, Detector, FastBrowserDetector, IpRotationDetector,
};
use zentinel_agent_traffic_classifier::{
    ClassifierConfig, CompositeClassifier, HeaderFingerprinter, HttpRequest, Label, Labels,
    ManualClock, Method, RemoteAddresses,
};

// =============================================================================
// Helpers
// =============================================================================

fn make_request(ip: &str, path: &str, user_agent: &str) -> HttpRequest {
    HttpRequest::new(Method::Get, path, RemoteAddresses::direct(ip.parse().unwrap()))
        .with_header("User-Agent", user_agent)
        .with_header("Accept", "text/html,application/xhtml+xml")
        .with_header("Accept-Language", "en-US,en;q=0.9")
}

fn classifier() -> (Arc<ManualClock>, CompositeClassifier) {
    let clock = Arc::new(ManualClock::new());
    let classifier = CompositeClassifier::from_config(
        &ClassifierConfig::default(),
        clock.clone(),
        Arc::new(HeaderFingerprinter::new()),
    );
    (clock, classifier)
}

const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0.0.0 Safari/537.36";
const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_default_config_is_valid() {
    let config = ClassifierConfig::default();

    assert!(config.validate().is_ok());
    assert!(config.fast_browser.enabled);
    assert_eq!(config.fast_browser.visit_window_ms, 900);
    assert_eq!(config.fast_browser.penalty_box_ttl_seconds, 1200);
    assert!(config.ip_rotation.enabled);
    assert_eq!(config.ip_rotation.window_seconds, 10);
    assert_eq!(config.backoff.initial_delay_ms, 1_000);
    assert_eq!(config.backoff.max_delay_ms, 300_000);
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "fast_browser": {
            "visit_window_ms": 500
        },
        "ip_rotation": {
            "enabled": false
        },
        "backoff": {
            "initial_delay_ms": 250,
            "multiplier": 3.0
        },
        "headers": {
            "labels_header": "X-Quarantine-Labels"
        }
    }"#;

    let config: ClassifierConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.fast_browser.visit_window_ms, 500);
    assert_eq!(config.fast_browser.penalty_box_ttl_seconds, 1200);
    assert!(!config.ip_rotation.enabled);
    assert_eq!(config.backoff.initial_delay_ms, 250);
    assert_eq!(config.backoff.max_delay_ms, 300_000);
    assert_eq!(config.headers.labels_header, "X-Quarantine-Labels");
    assert_eq!(config.headers.trace_id_header, "X-Bot-Trace-Id");
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_from_yaml() {
    let yaml = r#"
fast_browser:
  enabled: false
ip_rotation:
  window_seconds: 30
cache:
  max_entries: 5000
"#;

    let config: ClassifierConfig = serde_yaml::from_str(yaml).unwrap();

    assert!(!config.fast_browser.enabled);
    assert_eq!(config.ip_rotation.window_seconds, 30);
    assert_eq!(config.cache.max_entries, 5000);
}

#[test]
fn test_invalid_config_rejected() {
    let config: ClassifierConfig =
        serde_json::from_str(r#"{"ip_rotation": {"window_seconds": 0}}"#).unwrap();

    assert_eq!(
        config.validate(),
        Err(ConfigError::ZeroDuration {
            field: "ip_rotation.window_seconds"
        })
    );
}

// =============================================================================
// First Contact Tests
// =============================================================================

#[test]
fn test_first_contact_is_clean() {
    let (clock, classifier) = classifier();

    for i in 0..50 {
        let ua = format!("{} client-{}", CHROME, i);
        let request = make_request(&format!("192.0.2.{}", i + 1), &format!("/page{}", i), &ua);
        assert!(
            classifier.classify(&request, None).is_empty(),
            "Client {} is a first contact",
            i
        );
        clock.advance(Duration::from_millis(5));
    }
}

#[test]
fn test_shared_profile_is_not_a_first_contact() {
    let (clock, classifier) = classifier();

    assert!(classifier
        .classify(&make_request("192.0.2.1", "/", CHROME), None)
        .is_empty());

    // Same header profile from another address is correlated, not fresh
    clock.advance(Duration::from_millis(5));
    assert_eq!(
        classifier.classify(&make_request("192.0.2.2", "/", CHROME), None),
        Labels::single(Label::IpRotation)
    );
}

// =============================================================================
// Rapid Revisit Tests
// =============================================================================

#[test]
fn test_rapid_revisit_escalation() {
    let (clock, classifier) = classifier();
    let request = make_request("192.0.2.1", "/checkout", CHROME);

    assert!(classifier.classify(&request, None).is_empty());

    clock.advance(Duration::from_millis(50));
    assert!(classifier.classify(&request, None).is_empty());

    clock.advance(Duration::from_millis(50));
    assert_eq!(
        classifier.classify(&request, None),
        Labels::single(Label::FastBrowser)
    );
}

#[test]
fn test_penalty_persists_until_deadline() {
    let clock = Arc::new(ManualClock::new());
    let detector = FastBrowserDetector::from_config(&ClassifierConfig::default(), clock.clone());
    let request = make_request("192.0.2.1", "/", CHROME);

    detector.classify(&request, None).unwrap();
    detector.classify(&request, None).unwrap(); // penalty until 1000ms
    assert_eq!(detector.penalized_count(), 1);

    // Each contact inside the cool-down is flagged and pushes it out
    let mut elapsed = Duration::ZERO;
    for step in [500u64, 1_500, 3_000] {
        clock.advance(Duration::from_millis(step));
        elapsed += Duration::from_millis(step);
        let labels = detector.classify(&request, None).unwrap();
        assert!(
            labels.contains(Label::FastBrowser),
            "Contact at {:?} should still be penalized",
            elapsed
        );
    }

    // Fourth attempt at 5000ms extended the deadline to 5000 + 8000
    clock.advance(Duration::from_millis(7_999));
    assert!(detector.classify(&request, None).unwrap().contains(Label::FastBrowser));

    // Fifth attempt at 12999ms: deadline 12999 + 16000
    clock.advance(Duration::from_millis(16_000));
    assert!(detector.classify(&request, None).unwrap().is_empty());
    assert_eq!(detector.penalized_count(), 0);
}

#[test]
fn test_penalty_cap() {
    let clock = Arc::new(ManualClock::new());
    let config: ClassifierConfig = serde_json::from_str(
        r#"{"backoff": {"initial_delay_ms": 100, "multiplier": 10.0, "max_delay_ms": 2000}}"#,
    )
    .unwrap();
    let detector = FastBrowserDetector::from_config(&config, clock.clone());
    let request = make_request("192.0.2.1", "/", CHROME);

    detector.classify(&request, None).unwrap();
    detector.classify(&request, None).unwrap();
    for _ in 0..20 {
        clock.advance(Duration::from_millis(10));
        assert!(detector.classify(&request, None).unwrap().contains(Label::FastBrowser));
    }

    // Growth is capped: the last touch granted at most 2s
    clock.advance(Duration::from_millis(2_000));
    assert!(detector.classify(&request, None).unwrap().is_empty());
}

// =============================================================================
// IP Rotation Tests
// =============================================================================

#[test]
fn test_cross_ip_rotation() {
    let (clock, classifier) = classifier();

    assert!(classifier
        .classify(&make_request("198.51.100.1", "/", FIREFOX), None)
        .is_empty());

    clock.advance(Duration::from_secs(3));
    let labels = classifier.classify(&make_request("198.51.100.2", "/", FIREFOX), None);
    assert_eq!(labels, Labels::single(Label::IpRotation));

    clock.advance(Duration::from_secs(3));
    assert!(classifier
        .classify(&make_request("198.51.100.2", "/", FIREFOX), None)
        .is_empty());
}

#[test]
fn test_rotation_window_expiry() {
    let (clock, classifier) = classifier();

    classifier.classify(&make_request("198.51.100.1", "/", FIREFOX), None);
    clock.advance(Duration::from_secs(11));

    assert!(classifier
        .classify(&make_request("198.51.100.2", "/", FIREFOX), None)
        .is_empty());
}

#[test]
fn test_distinct_profiles_do_not_correlate() {
    let (clock, classifier) = classifier();

    classifier.classify(&make_request("198.51.100.1", "/", FIREFOX), None);
    clock.advance(Duration::from_secs(1));

    assert!(classifier
        .classify(&make_request("198.51.100.2", "/", CHROME), None)
        .is_empty());
}

#[test]
fn test_both_labels_at_once() {
    let (clock, classifier) = classifier();
    let home = make_request("198.51.100.1", "/", CHROME);

    classifier.classify(&home, None);
    clock.advance(Duration::from_millis(20));
    classifier.classify(&home, None);
    clock.advance(Duration::from_millis(20));

    // Penalized identity and a fresh address for the same profile in between
    classifier.classify(&make_request("198.51.100.7", "/", CHROME), None);
    clock.advance(Duration::from_millis(20));
    let labels = classifier.classify(&home, None);

    assert_eq!(labels.join(), "FAST_BROWSER,IP_ROTATION");
}

// =============================================================================
// Composite / Fail-Open Tests
// =============================================================================

struct BrokenDetector;

impl Detector for BrokenDetector {
    fn classify(&self, _: &HttpRequest, _: Option<&[u8]>) -> Result<Labels, DetectionError> {
        Err(DetectionError::StatePoisoned { detector: "broken" })
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

struct BodyInspector;

impl Detector for BodyInspector {
    fn classify(&self, _: &HttpRequest, body: Option<&[u8]>) -> Result<Labels, DetectionError> {
        match body {
            Some(bytes) if bytes.is_empty() => panic!("unexpected empty body"),
            _ => Ok(Labels::new()),
        }
    }

    fn name(&self) -> &'static str {
        "body_inspector"
    }
}

#[test]
fn test_composite_fail_open() {
    let clock = Arc::new(ManualClock::new());
    let classifier = CompositeClassifier::new()
        .with_detector(FastBrowserDetector::from_config(&ClassifierConfig::default(), clock.clone()))
        .with_detector(BrokenDetector)
        .with_detector(BodyInspector);

    let request = make_request("192.0.2.1", "/", CHROME);
    classifier.classify(&request, None);
    classifier.classify(&request, None);

    assert_eq!(
        classifier.classify(&request, Some(b"")),
        Labels::single(Label::FastBrowser)
    );
}

#[test]
fn test_missing_headers_are_fresh() {
    let (_, classifier) = classifier();
    let bare = |ip: &str| HttpRequest::new(Method::Post, "/api", RemoteAddresses::direct(ip.parse().unwrap()));

    assert!(classifier.classify(&bare("203.0.113.1"), Some(b"{}")).is_empty());
    assert!(classifier.classify(&bare("203.0.113.2"), Some(b"{}")).is_empty());
}

// =============================================================================
// Proxy Header Tests
// =============================================================================

#[test]
fn test_headers_attached_only_when_flagged() {
    let (clock, classifier) = classifier();
    let names = HeaderConfig::default();

    let clean = classifier.classify(&make_request("198.51.100.1", "/", FIREFOX), None);
    assert!(ClassificationHeaders::for_labels(&clean, &names).is_none());

    clock.advance(Duration::from_secs(1));
    let flagged = classifier.classify(&make_request("198.51.100.2", "/", FIREFOX), None);
    let headers = ClassificationHeaders::for_labels(&flagged, &names).unwrap();

    assert_eq!(headers.labels, ("X-Bot-Labels".to_string(), "IP_ROTATION".to_string()));
    assert_eq!(headers.trace_id.0, "X-Bot-Trace-Id");
    assert_eq!(headers.trace_id.1.len(), 36);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_classification() {
    let clock = Arc::new(ManualClock::new());
    let classifier = Arc::new(CompositeClassifier::from_config(
        &ClassifierConfig::default(),
        clock.clone(),
        Arc::new(HeaderFingerprinter::new()),
    ));

    let mut handles = Vec::new();
    for client in 0..64u32 {
        let classifier = Arc::clone(&classifier);
        handles.push(tokio::spawn(async move {
            let ua = format!("Mozilla/5.0 client-{}", client);
            let request = make_request(&format!("10.1.{}.{}", client / 250, client % 250 + 1), "/", &ua);
            (0..3)
                .map(|_| classifier.classify(&request, None))
                .collect::<Vec<_>>()
        }));
    }

    for handle in handles {
        let results = handle.await.unwrap();
        assert!(results[0].is_empty());
        assert!(results[1].is_empty());
        assert_eq!(results[2], Labels::single(Label::FastBrowser));
    }
}

#[test]
fn test_ip_rotation_detector_standalone() {
    let clock = Arc::new(ManualClock::new());
    let detector = IpRotationDetector::new(
        Duration::from_millis(500),
        1_000,
        Arc::new(HeaderFingerprinter::new().ignoring("cookie")),
        clock.clone(),
    );

    let first = make_request("198.51.100.1", "/", FIREFOX).with_header("Cookie", "session=a");
    let second = make_request("198.51.100.2", "/", FIREFOX).with_header("Cookie", "session=b");

    assert!(detector.classify(&first, None).unwrap().is_empty());
    clock.advance(Duration::from_millis(100));
    assert!(detector.classify(&second, None).unwrap().contains(Label::IpRotation));
    assert_eq!(detector.tracked_count(), 1);
}

//! Offline replay of recorded requests through the classifier.
//!
//! Input is JSON lines, one request per line. `at_ms` drives a manual clock
//! so recorded timing is reproduced exactly, whatever the replay speed.

use crate::classifier::{ClassificationHeaders, CompositeClassifier};
use crate::clock::ManualClock;
use crate::config::{ClassifierConfig, HeaderConfig};
use crate::label::{Label, Labels};
use crate::request::{
    HeaderFingerprinter, Headers, HttpRequest, Method, RemoteAddresses, UnknownMethod,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Replay failure.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: invalid record: {source}")]
    InvalidRecord {
        line: usize,
        source: serde_json::Error,
    },

    #[error("line {line}: {source}")]
    InvalidMethod { line: usize, source: UnknownMethod },

    #[error("failed to encode outcome: {0}")]
    Encode(serde_json::Error),
}

/// One recorded request.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRecord {
    /// Milliseconds since the start of the recording
    #[serde(default)]
    pub at_ms: Option<u64>,
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Socket peer address
    pub remote: IpAddr,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl ReplayRecord {
    /// Build the request view the proxy would have handed over.
    pub fn to_request(&self) -> Result<HttpRequest, UnknownMethod> {
        let method: Method = self.method.parse()?;
        let remote = RemoteAddresses::from_peer_and_headers(self.remote, &self.headers);
        Ok(HttpRequest::new(method, self.path.clone(), remote).with_headers(self.headers.clone()))
    }
}

/// Classification of one replayed request.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub at_ms: u64,
    pub method: Method,
    pub path: String,
    pub remote: String,
    pub labels: Labels,
    /// Headers the proxy would attach
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Totals of a replay run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub requests: usize,
    pub flagged: usize,
    pub by_label: BTreeMap<Label, usize>,
}

/// Classifier driven by recorded time.
pub struct Replayer {
    clock: Arc<ManualClock>,
    classifier: CompositeClassifier,
    header_names: HeaderConfig,
}

impl Replayer {
    pub fn new(config: &ClassifierConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let classifier = CompositeClassifier::from_config(
            config,
            clock.clone(),
            Arc::new(HeaderFingerprinter::new()),
        );

        Self {
            clock,
            classifier,
            header_names: config.headers.clone(),
        }
    }

    /// Classify one record. Records without `at_ms` reuse the current time.
    pub fn process(&self, record: &ReplayRecord) -> Result<ReplayOutcome, UnknownMethod> {
        if let Some(at_ms) = record.at_ms {
            self.clock.advance_to(Duration::from_millis(at_ms));
        }

        let request = record.to_request()?;
        let body = record
            .body
            .as_deref()
            .filter(|_| request.method.carries_body())
            .map(str::as_bytes);

        let labels = self.classifier.classify(&request, body);
        let headers: BTreeMap<String, String> = ClassificationHeaders::for_labels(&labels, &self.header_names)
            .map(|h| {
                h.pairs()
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(ReplayOutcome {
            at_ms: u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            method: request.method,
            path: request.path,
            remote: request.remote.to_string(),
            labels,
            headers,
        })
    }

    /// Replay every record of `input`, writing one JSON outcome per line.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn run<R: BufRead, W: Write>(&self, input: R, mut output: W) -> Result<ReplaySummary, ReplayError> {
        let mut summary = ReplaySummary::default();

        for (index, line) in input.lines().enumerate() {
            let line_no = index + 1;
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let record: ReplayRecord = serde_json::from_str(trimmed)
                .map_err(|source| ReplayError::InvalidRecord { line: line_no, source })?;
            let outcome = self
                .process(&record)
                .map_err(|source| ReplayError::InvalidMethod { line: line_no, source })?;

            summary.requests += 1;
            if !outcome.labels.is_empty() {
                summary.flagged += 1;
                for label in outcome.labels.iter() {
                    *summary.by_label.entry(label).or_default() += 1;
                }
                debug!(line = line_no, labels = %outcome.labels.join(), "Request flagged");
            }

            serde_json::to_writer(&mut output, &outcome).map_err(ReplayError::Encode)?;
            output.write_all(b"\n")?;
        }

        output.flush()?;
        if summary.requests == 0 {
            warn!("Replay input contained no requests");
        }
        Ok(summary)
    }
}

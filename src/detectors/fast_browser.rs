//! Rapid-revisit detector.
//!
//! A client repeating the exact same request inside a short window once is
//! tolerated (double submit). Doing it again puts the client in the penalty
//! box: every further contact before the cool-down ends is labeled
//! `FAST_BROWSER` and pushes the cool-down out exponentially.

use super::{DetectionError, Detector};
use crate::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::cache::{Expiration, ExpiringCache};
use crate::clock::Clock;
use crate::config::ClassifierConfig;
use crate::label::{Label, Labels};
use crate::request::{HttpRequest, RequestIdentity};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const NAME: &str = "fast_browser";

type SharedBackoff = Arc<Mutex<ExponentialBackoff>>;

/// Rapid-revisit detector.
pub struct FastBrowserDetector {
    /// Identities seen within the visit window
    visits: ExpiringCache<RequestIdentity, ()>,
    /// Identities under an active cool-down
    penalty_box: ExpiringCache<RequestIdentity, SharedBackoff>,
    /// Growth of the cool-down
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl FastBrowserDetector {
    /// Create a new rapid-revisit detector.
    pub fn new(
        visit_window: Duration,
        penalty_box_ttl: Duration,
        policy: BackoffPolicy,
        max_entries: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            visits: ExpiringCache::new(
                "fast_browser_visits",
                Expiration::AfterWrite(visit_window),
                max_entries,
                clock.clone(),
            ),
            penalty_box: ExpiringCache::new(
                "fast_browser_penalty_box",
                Expiration::AfterWrite(penalty_box_ttl),
                max_entries,
                clock.clone(),
            ),
            policy,
            clock,
        }
    }

    pub fn from_config(config: &ClassifierConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.fast_browser.visit_window(),
            config.fast_browser.penalty_box_ttl(),
            config.backoff.policy(),
            config.cache.max_entries,
            clock,
        )
        .with_sweep_interval(config.cache.sweep_interval)
    }

    /// Override the opportunistic sweep interval of both stores.
    pub fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.visits = self.visits.with_sweep_interval(interval);
        self.penalty_box = self.penalty_box.with_sweep_interval(interval);
        self
    }

    /// Number of identities currently held in the penalty box.
    pub fn penalized_count(&self) -> usize {
        self.penalty_box.entry_count()
    }
}

impl Detector for FastBrowserDetector {
    fn classify(&self, request: &HttpRequest, _body: Option<&[u8]>) -> Result<Labels, DetectionError> {
        let identity = RequestIdentity::of(request);
        let now = self.clock.now();

        if let Some(entry) = self.penalty_box.get(&identity) {
            let mut backoff = match entry.lock() {
                Ok(backoff) => backoff,
                Err(_) => {
                    // Drop the record so the next contact starts clean
                    self.penalty_box.invalidate(&identity);
                    warn!(
                        detector = NAME,
                        remote = %request.remote,
                        "Penalty record poisoned, discarding it"
                    );
                    return Err(DetectionError::StatePoisoned { detector: NAME });
                }
            };

            if backoff.is_backed_off(now) {
                backoff.touch(now);
                debug!(
                    detector = NAME,
                    remote = %request.remote,
                    path = %request.path,
                    attempts = backoff.attempts(),
                    "Client still in penalty box"
                );
                return Ok(Labels::single(Label::FastBrowser));
            }

            drop(backoff);
            self.penalty_box.invalidate(&identity);
            debug!(
                detector = NAME,
                remote = %request.remote,
                "Cool-down elapsed, releasing client"
            );
            return Ok(Labels::new());
        }

        if self.visits.get(&identity).is_some() {
            let backoff = ExponentialBackoff::started(self.policy, now);
            self.penalty_box
                .insert(identity.clone(), Arc::new(Mutex::new(backoff)));
            debug!(
                detector = NAME,
                remote = %request.remote,
                path = %request.path,
                "Rapid repeat visit, client enters penalty box"
            );
        }

        self.visits.insert(identity, ());
        Ok(Labels::new())
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

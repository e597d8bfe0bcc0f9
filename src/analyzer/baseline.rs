//! Baseline outcome and the response-equivalence relation.

use super::replay::{ReplayOutcome, ReplayResult};

/// Default relative body-length slack accepted as "still the same response".
pub const DEFAULT_BODY_SLACK: f64 = 0.05;

/// Reference outcome captured with the full original cookie set.
///
/// Two outcomes are equivalent when the status matches and either the body
/// digests are identical or the body lengths differ by at most the configured
/// slack. The slack absorbs timestamps, nonces, and similar dynamic noise.
#[derive(Debug, Clone)]
pub struct Baseline {
    outcome: ReplayOutcome,
    body_slack: f64,
}

impl Baseline {
    pub fn new(outcome: ReplayOutcome, body_slack: f64) -> Self {
        Self {
            outcome,
            body_slack,
        }
    }

    pub fn outcome(&self) -> &ReplayOutcome {
        &self.outcome
    }

    pub fn status(&self) -> u16 {
        self.outcome.status
    }

    pub fn body_len(&self) -> usize {
        self.outcome.body_len
    }

    pub fn matches(&self, other: &ReplayOutcome) -> bool {
        if other.status != self.outcome.status {
            return false;
        }
        if other.digest == self.outcome.digest {
            return true;
        }
        let delta = (other.body_len as f64 - self.outcome.body_len as f64).abs();
        delta / (self.outcome.body_len.max(1) as f64) <= self.body_slack
    }

    /// A failed replay never matches the baseline.
    pub fn matches_result(&self, result: &ReplayResult) -> bool {
        result.outcome().is_some_and(|outcome| self.matches(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::replay::digest;

    fn outcome(status: u16, body: &[u8]) -> ReplayOutcome {
        ReplayOutcome {
            status,
            body_len: body.len(),
            digest: digest(body),
        }
    }

    #[test]
    fn identical_digest_matches() {
        let baseline = Baseline::new(outcome(200, b"welcome back"), DEFAULT_BODY_SLACK);
        assert!(baseline.matches(&outcome(200, b"welcome back")));
    }

    #[test]
    fn status_mismatch_never_matches() {
        let baseline = Baseline::new(outcome(200, b"welcome back"), DEFAULT_BODY_SLACK);
        assert!(!baseline.matches(&outcome(401, b"welcome back")));
    }

    #[test]
    fn small_length_drift_is_tolerated() {
        let body = vec![b'x'; 1000];
        let baseline = Baseline::new(outcome(200, &body), DEFAULT_BODY_SLACK);

        let near = vec![b'y'; 1040];
        assert!(baseline.matches(&outcome(200, &near)));

        let far = vec![b'y'; 1100];
        assert!(!baseline.matches(&outcome(200, &far)));
    }

    #[test]
    fn zero_length_baseline_uses_unit_denominator() {
        let baseline = Baseline::new(
            ReplayOutcome {
                status: 204,
                body_len: 0,
                digest: digest(b""),
            },
            DEFAULT_BODY_SLACK,
        );
        assert!(!baseline.matches(&outcome(204, b"x")));
    }

    #[test]
    fn failed_replay_does_not_match() {
        let baseline = Baseline::new(outcome(200, b"ok"), DEFAULT_BODY_SLACK);
        assert!(!baseline.matches_result(&ReplayResult::Failed("connection reset".into())));
    }
}

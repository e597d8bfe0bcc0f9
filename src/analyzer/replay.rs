//! Replay layer: one request in, one outcome out.
//!
//! The [`Replayer`] owns no retry policy and never mutates the request it is
//! given; it forwards through a [`ReplayTransport`] and condenses the response
//! into status, body length, and a SHA-256 body digest. A reqwest-backed
//! transport is provided for standalone use; inside a proxy extension the host
//! supplies its own.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use sha2::{Digest, Sha256};

use crate::host::{ReplayTransport, TransportError};

use super::request::{CaptureRequest, CaptureResponse};

/// SHA-256 digest of a response body.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Condensed view of one upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub status: u16,
    pub body_len: usize,
    pub digest: [u8; 32],
}

impl ReplayOutcome {
    pub fn from_response(response: &CaptureResponse) -> Self {
        Self {
            status: response.status(),
            body_len: response.body().len(),
            digest: digest(response.body()),
        }
    }
}

/// Result of one replay. A transport error, a timeout, or an empty body all
/// collapse into `Failed`; interpreting that is the solver's job.
#[derive(Debug, Clone)]
pub enum ReplayResult {
    Outcome(ReplayOutcome),
    Failed(String),
}

impl ReplayResult {
    pub fn outcome(&self) -> Option<&ReplayOutcome> {
        match self {
            ReplayResult::Outcome(outcome) => Some(outcome),
            ReplayResult::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ReplayResult::Failed(_))
    }

    pub fn status(&self) -> Option<u16> {
        self.outcome().map(|o| o.status)
    }
}

/// Stateless replay front-end over a transport.
#[derive(Clone)]
pub struct Replayer {
    transport: Arc<dyn ReplayTransport>,
}

impl Replayer {
    pub fn new(transport: Arc<dyn ReplayTransport>) -> Self {
        Self { transport }
    }

    /// Send one request. Never retries, never panics.
    pub fn replay(&self, request: &CaptureRequest) -> ReplayResult {
        match self.transport.send(request) {
            Ok(response) => {
                if response.body().is_empty() {
                    ReplayResult::Failed("empty response body".to_string())
                } else {
                    ReplayResult::Outcome(ReplayOutcome::from_response(&response))
                }
            }
            Err(err) => ReplayResult::Failed(err.to_string()),
        }
    }
}

/// Reqwest-backed transport for running analyses outside a proxy host.
///
/// Redirects are disabled so the solver observes the upstream's first answer,
/// not wherever a `Location` chain ends up.
pub struct ReqwestReplayTransport {
    client: Client,
}

impl ReqwestReplayTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client. It should already have redirects disabled.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl ReplayTransport for ReqwestReplayTransport {
    fn send(&self, request: &CaptureRequest) -> Result<CaptureResponse, TransportError> {
        let mut headers = request.headers().clone();
        if let Some(cookie_header) = request.cookie_header() {
            let value = http::HeaderValue::from_str(&cookie_header)
                .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
            headers.insert(http::header::COOKIE, value);
        }

        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(headers);
        if !request.body().is_empty() {
            builder = builder.body(request.body().to_vec());
        }

        let response = builder.send().map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Transport(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .map_err(|err| TransportError::Transport(err.to_string()))?;

        Ok(CaptureResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use http::Method;
    use std::sync::Mutex;
    use url::Url;

    struct FixedTransport {
        responses: Mutex<Vec<Result<CaptureResponse, TransportError>>>,
    }

    impl ReplayTransport for FixedTransport {
        fn send(&self, _request: &CaptureRequest) -> Result<CaptureResponse, TransportError> {
            self.responses
                .lock()
                .expect("responses lock poisoned")
                .remove(0)
        }
    }

    fn request() -> CaptureRequest {
        CaptureRequest::new(Method::GET, Url::parse("https://example.com/").unwrap())
    }

    #[test]
    fn outcome_carries_status_length_and_digest() {
        let transport = FixedTransport {
            responses: Mutex::new(vec![Ok(CaptureResponse::new(
                200,
                HeaderMap::new(),
                &b"hello"[..],
            ))]),
        };
        let replayer = Replayer::new(Arc::new(transport));

        match replayer.replay(&request()) {
            ReplayResult::Outcome(outcome) => {
                assert_eq!(outcome.status, 200);
                assert_eq!(outcome.body_len, 5);
                assert_eq!(outcome.digest, digest(b"hello"));
            }
            ReplayResult::Failed(reason) => panic!("unexpected failure: {reason}"),
        }
    }

    #[test]
    fn empty_body_is_a_failure() {
        let transport = FixedTransport {
            responses: Mutex::new(vec![Ok(CaptureResponse::new(
                200,
                HeaderMap::new(),
                Vec::<u8>::new(),
            ))]),
        };
        let replayer = Replayer::new(Arc::new(transport));
        assert!(replayer.replay(&request()).is_failed());
    }

    #[test]
    fn transport_errors_become_failures() {
        let transport = FixedTransport {
            responses: Mutex::new(vec![Err(TransportError::Timeout)]),
        };
        let replayer = Replayer::new(Arc::new(transport));
        match replayer.replay(&request()) {
            ReplayResult::Failed(reason) => assert!(reason.contains("timed out")),
            ReplayResult::Outcome(_) => panic!("expected failure"),
        }
    }
}

//! Client facade over the cluster's HTTP API.
//!
//! Read/write/mkdir requests rotate through the configured targets when a
//! node answers "not the leader" or cannot be reached; status queries go to
//! one named node only, so leader discovery can ask each member directly.

use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{AddressList, Endpoint};

/// How long to wait for a TCP connection to come up.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// Pause before retrying against the next target.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Errors surfaced by cluster client operations. Every failure carries a
/// human-readable message; the binaries catch this kind at top level, print
/// it, and exit non-zero.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Every candidate node rejected the request as non-leader.
    #[error("not the leader (hint: {leader_hint:?})")]
    NotLeader { leader_hint: Option<u64> },
    /// The request timed out.
    #[error("request timed out")]
    Timeout,
    /// Network or protocol failure.
    #[error("network error: {0}")]
    Network(String),
}

/// One node's view of its own role, from a single status query.
///
/// Never cached beyond its immediate use: the consistency probe depends on
/// leadership being re-observed from scratch at each step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub is_leader: bool,
    pub term: u64,
}

/// Operations the harness needs from the cluster's client library.
pub trait KvCluster {
    /// Read a key. `Ok(None)` means the key does not exist, which is not an
    /// error: the benchmark key may not have been written yet.
    fn read(&self, key: &str) -> Result<Option<String>, ClientError>;

    /// Write a value under a key through the current leader.
    fn write(&self, key: &str, value: &str) -> Result<(), ClientError>;

    /// Create a directory if absent (idempotent on the server side).
    fn make_dir(&self, path: &str) -> Result<(), ClientError>;

    /// Query one node directly for its own leadership view, with a timeout
    /// independent of any overall run deadline.
    fn status(&self, endpoint: &Endpoint, timeout: Duration)
        -> Result<StatusReport, ClientError>;
}

/// Factory for short-lived, endpoint-scoped client connections.
///
/// The consistency probe opens a fresh connection per step so that nothing
/// about leader identity survives between its write and read.
pub trait Connector {
    type Client: KvCluster;

    fn connect(&self, targets: &AddressList) -> Result<Self::Client, ClientError>;
}

/// Response for GET /client/read{key}
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvGetResponse {
    key: String,
    value: Option<String>,
}

/// Request body for POST /client/write{key}
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvWriteRequest {
    value: String,
}

/// Error response from the server
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    leader_hint: Option<u64>,
}

/// Response for GET /client/status
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatusResponse {
    node_id: u64,
    state: String,
    term: u64,
    leader_id: Option<u64>,
}

/// Outcome of one attempt against one target.
enum Attempt<T> {
    Done(T),
    /// 503 from a non-leader; rotate to the next target.
    NotLeader(Option<u64>),
    /// Transport failure; rotate to the next target.
    Retry(String),
    /// The request itself timed out; not retried.
    TimedOut,
    /// Unrecoverable protocol failure; not retried.
    Fail(String),
}

/// Blocking HTTP client for the cluster's client API.
pub struct HttpClient {
    targets: AddressList,
    http: reqwest::blocking::Client,
    max_retries: usize,
}

impl HttpClient {
    /// Connect to the cluster described by `targets`. `request_timeout`
    /// bounds each read/write/mkdir request.
    pub fn connect(targets: AddressList, request_timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(HttpClient {
            targets,
            http,
            max_retries: 10,
        })
    }

    /// Run `attempt` against successive targets (round-robin) until it
    /// succeeds, fails hard, or the retry budget runs out.
    fn rotate<T>(&self, attempt: impl Fn(&Endpoint) -> Attempt<T>) -> Result<T, ClientError> {
        let targets = self.targets.endpoints();
        if targets.is_empty() {
            return Err(ClientError::Network("empty address list".to_string()));
        }

        let mut index = 0;
        let mut last_hint = None;
        let mut last_transport: Option<String> = None;
        for _ in 0..self.max_retries {
            match attempt(&targets[index]) {
                Attempt::Done(value) => return Ok(value),
                Attempt::NotLeader(hint) => last_hint = hint,
                Attempt::Retry(detail) => last_transport = Some(detail),
                Attempt::TimedOut => return Err(ClientError::Timeout),
                Attempt::Fail(detail) => return Err(ClientError::Network(detail)),
            }
            index = (index + 1) % targets.len();
            thread::sleep(RETRY_DELAY);
        }

        match last_transport {
            Some(detail) => Err(ClientError::Network(detail)),
            None => Err(ClientError::NotLeader {
                leader_hint: last_hint,
            }),
        }
    }

    /// Classify a response whose success body is `parse`-able.
    fn classify<T>(
        result: Result<reqwest::blocking::Response, reqwest::Error>,
        parse: impl FnOnce(reqwest::blocking::Response) -> Result<T, reqwest::Error>,
    ) -> Attempt<T> {
        match result {
            Ok(response) if response.status().is_success() => match parse(response) {
                Ok(value) => Attempt::Done(value),
                Err(e) => Attempt::Fail(e.to_string()),
            },
            Ok(response) if response.status() == StatusCode::SERVICE_UNAVAILABLE => {
                let hint = response
                    .json::<ErrorResponse>()
                    .ok()
                    .and_then(|e| e.leader_hint);
                Attempt::NotLeader(hint)
            }
            Ok(response) => Attempt::Fail(format!("unexpected status: {}", response.status())),
            Err(e) if e.is_timeout() => Attempt::TimedOut,
            Err(e) => Attempt::Retry(e.to_string()),
        }
    }
}

impl KvCluster for HttpClient {
    fn read(&self, key: &str) -> Result<Option<String>, ClientError> {
        self.rotate(|target| {
            let url = format!("http://{}/client/read{}", target, key);
            match self.http.get(&url).send() {
                // Missing key surfaces as 404; map it to Ok(None).
                Ok(response) if response.status() == StatusCode::NOT_FOUND => Attempt::Done(None),
                result => Self::classify(result, |response| {
                    response.json::<KvGetResponse>().map(|body| body.value)
                }),
            }
        })
    }

    fn write(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let body = KvWriteRequest {
            value: value.to_string(),
        };
        self.rotate(|target| {
            let url = format!("http://{}/client/write{}", target, key);
            Self::classify(self.http.post(&url).json(&body).send(), |_| Ok(()))
        })
    }

    fn make_dir(&self, path: &str) -> Result<(), ClientError> {
        self.rotate(|target| {
            let url = format!("http://{}/client/mkdir{}", target, path);
            Self::classify(self.http.post(&url).send(), |_| Ok(()))
        })
    }

    fn status(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<StatusReport, ClientError> {
        let url = format!("http://{}/client/status", endpoint);
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout
                } else {
                    ClientError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Network(format!(
                "unexpected status: {}",
                response.status()
            )));
        }

        let body: StatusResponse = response
            .json()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(StatusReport {
            is_leader: body.state == "Leader",
            term: body.term,
        })
    }
}

/// Builds a fresh `HttpClient` per call so no connection or leader identity
/// survives across verifier steps.
#[derive(Clone, Debug)]
pub struct HttpConnector {
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        HttpConnector { request_timeout }
    }
}

impl Connector for HttpConnector {
    type Client = HttpClient;

    fn connect(&self, targets: &AddressList) -> Result<HttpClient, ClientError> {
        HttpClient::connect(targets.clone(), self.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let targets = AddressList::parse("127.0.0.1:5254").unwrap();
        let client = HttpClient::connect(targets, Duration::from_secs(2)).unwrap();
        assert_eq!(client.targets.len(), 1);
    }

    #[test]
    fn test_empty_address_list_is_a_network_error() {
        let client = HttpClient {
            targets: AddressList::parse("x:1").unwrap().without_port("1"),
            http: reqwest::blocking::Client::new(),
            max_retries: 1,
        };
        match client.read("/bench") {
            Err(ClientError::Network(detail)) => assert!(detail.contains("empty")),
            other => panic!("expected network error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_messages_are_human_readable() {
        let err = ClientError::NotLeader {
            leader_hint: Some(2),
        };
        assert!(err.to_string().contains("not the leader"));
        assert!(ClientError::Network("refused".into())
            .to_string()
            .contains("refused"));
    }

    #[test]
    fn test_status_wire_format() {
        let raw = r#"{"node_id":3,"state":"Leader","term":7,"leader_id":3}"#;
        let body: StatusResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.state, "Leader");
        assert_eq!(body.term, 7);
        assert_eq!(body.node_id, 3);
    }
}

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pipeline::{CorrelationContext, ProbeRequest, Technology};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::checker::{CheckError, Checker, RestChecker, SoapChecker};
use super::types::{KoReason, ProbeOutcome, ProbeReport};
use crate::crypto::TokenSigner;

/// Probe executor - performs one probe and classifies its outcome
pub struct ProbeExecutor {
    rest: Box<dyn Checker>,
    soap: Box<dyn Checker>,
    base_url: Option<Url>,
}

impl ProbeExecutor {
    pub fn new(
        timeout: Duration,
        signer: Arc<TokenSigner>,
        soap_action: &str,
        base_url: Option<Url>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_checkers(
            Box::new(RestChecker::new(client.clone(), signer.clone())),
            Box::new(SoapChecker::new(client, signer, soap_action)),
            base_url,
        ))
    }

    pub fn with_checkers(rest: Box<dyn Checker>, soap: Box<dyn Checker>, base_url: Option<Url>) -> Self {
        Self { rest, soap, base_url }
    }

    /// `basePath[0]`. A relative path, with or without a leading slash, is
    /// appended to the path of the configured base URL.
    pub fn resolve_target(&self, base_path: &[String]) -> Option<Url> {
        let first = base_path.first()?;
        match Url::parse(first) {
            Ok(url) => Some(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut base = self.base_url.clone()?;
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                base.join(first.trim_start_matches('/')).ok()
            }
            Err(_) => None,
        }
    }

    pub async fn probe(&self, request: &ProbeRequest, context: &CorrelationContext) -> ProbeReport {
        let checked_at = Utc::now();
        let report = |outcome| ProbeReport {
            eservice_record_id: request.eservice_record_id,
            checked_at,
            outcome,
        };

        let Some(target) = self.resolve_target(&request.base_path) else {
            warn!(base_path = ?request.base_path, "No usable probe target");
            return report(ProbeOutcome::Ko { reason: KoReason::Unknown, response_time: None });
        };

        let checker = match request.technology {
            Technology::Rest => self.rest.as_ref(),
            Technology::Soap => self.soap.as_ref(),
        };

        let start = Instant::now();
        let result = checker.check(&target, request, context).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(status) if (200..300).contains(&status) => ProbeOutcome::Ok { response_time: elapsed },
            Ok(status) => ProbeOutcome::Ko {
                reason: KoReason::HttpStatus(status),
                response_time: Some(elapsed),
            },
            Err(e) => {
                debug!(%target, "Probe failed: {e}");
                ProbeOutcome::Ko { reason: classify(&e), response_time: None }
            }
        };

        report(outcome)
    }
}

fn classify(error: &CheckError) -> KoReason {
    let CheckError::Request(error) = error else {
        return KoReason::Unknown;
    };

    if error.is_timeout() || io_kind(error) == Some(io::ErrorKind::TimedOut) {
        return KoReason::ConnectionTimeout;
    }
    if error.is_connect() && io_kind(error) == Some(io::ErrorKind::ConnectionRefused) {
        return KoReason::ConnectionRefused;
    }
    KoReason::Unknown
}

/// Kind of the first I/O error in the source chain.
fn io_kind(error: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_keypair;
    use crate::testing::{StubResponse, refused_addr, spawn_http_stub, spawn_silent_server};

    fn executor(timeout: Duration, base_url: Option<&str>) -> ProbeExecutor {
        let signer = Arc::new(TokenSigner::new(generate_keypair(), "iss", Duration::from_secs(60)));
        ProbeExecutor::new(timeout, signer, "status", base_url.map(|u| Url::parse(u).unwrap()))
            .unwrap()
    }

    fn request(base_path: &str) -> ProbeRequest {
        ProbeRequest {
            eservice_record_id: 42,
            technology: Technology::Rest,
            base_path: vec![base_path.to_string()],
            audience: vec![],
        }
    }

    async fn outcome_of(executor: &ProbeExecutor, base_path: &str) -> ProbeOutcome {
        executor.probe(&request(base_path), &CorrelationContext::new("caller")).await.outcome
    }

    #[tokio::test]
    async fn test_success_measures_response_time() {
        let stub = spawn_http_stub(|_| {
            StubResponse::json(200, "{}").delayed(Duration::from_millis(80))
        })
        .await;
        let executor = executor(Duration::from_secs(5), None);

        match outcome_of(&executor, &format!("http://{}/", stub.addr)).await {
            ProbeOutcome::Ok { response_time } => assert!(response_time >= 80),
            other => panic!("expected OK, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let addr = refused_addr().await;
        let executor = executor(Duration::from_secs(5), None);

        assert_eq!(
            outcome_of(&executor, &format!("http://{addr}/")).await,
            ProbeOutcome::Ko { reason: KoReason::ConnectionRefused, response_time: None }
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let addr = spawn_silent_server().await;
        let executor = executor(Duration::from_millis(200), None);

        assert_eq!(
            outcome_of(&executor, &format!("http://{addr}/")).await,
            ProbeOutcome::Ko { reason: KoReason::ConnectionTimeout, response_time: None }
        );
    }

    #[tokio::test]
    async fn test_error_status_is_reported_with_time() {
        let stub = spawn_http_stub(|_| StubResponse::json(500, "{}")).await;
        let executor = executor(Duration::from_secs(5), None);

        match outcome_of(&executor, &format!("http://{}/", stub.addr)).await {
            ProbeOutcome::Ko { reason, response_time } => {
                assert_eq!(reason, KoReason::HttpStatus(500));
                assert_eq!(reason.to_string(), "500");
                assert!(response_time.is_some());
            }
            other => panic!("expected KO, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_relative_path_uses_base_url() {
        let stub = spawn_http_stub(|_| StubResponse::json(200, "{}")).await;
        let executor = executor(Duration::from_secs(5), Some(&format!("http://{}/gw/", stub.addr)));

        assert!(matches!(outcome_of(&executor, "svc/status").await, ProbeOutcome::Ok { .. }));
        assert_eq!(stub.requests().await[0].path, "/gw/svc/status");
    }

    #[tokio::test]
    async fn test_root_relative_path_keeps_gateway_prefix() {
        let stub = spawn_http_stub(|_| StubResponse::json(200, "{}")).await;
        let executor = executor(Duration::from_secs(5), Some(&format!("http://{}/gw", stub.addr)));

        assert!(matches!(outcome_of(&executor, "/health").await, ProbeOutcome::Ok { .. }));
        assert_eq!(stub.requests().await[0].path, "/gw/health");
    }

    #[test]
    fn test_resolve_target_joins_onto_base_path() {
        let executor = executor(Duration::from_secs(5), Some("http://gateway.example/gw/"));
        let resolve = |path: &str| executor.resolve_target(&[path.to_string()]).map(|u| u.to_string());

        assert_eq!(resolve("/health").as_deref(), Some("http://gateway.example/gw/health"));
        assert_eq!(resolve("svc/status?full=1").as_deref(), Some("http://gateway.example/gw/svc/status?full=1"));
        assert_eq!(resolve("https://svc.example/v1").as_deref(), Some("https://svc.example/v1"));
        assert_eq!(executor.resolve_target(&[]), None);
    }

    #[tokio::test]
    async fn test_unresolvable_target_is_unknown() {
        let executor = executor(Duration::from_secs(5), None);
        assert_eq!(
            outcome_of(&executor, "svc/status").await,
            ProbeOutcome::Ko { reason: KoReason::Unknown, response_time: None }
        );
    }
}

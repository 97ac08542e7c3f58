use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pipeline::{CorrelationContext, ProbeRequest};
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::crypto::TokenSigner;

/// Header the correlation id travels in on outbound probes.
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// Operation element sent in every SOAP probe body.
const SOAP_PROBE_BODY: &str = r#"<probe:status xmlns:probe="urn:eservice-probing"/>"#;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("probe request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("could not sign probe token: {0}")]
    Token(#[from] serde_json::Error),
}

/// Checker trait for the probe technologies
#[async_trait]
pub trait Checker: Send + Sync {
    /// Call the target once and return the HTTP status it answered with.
    async fn check(
        &self,
        target: &Url,
        request: &ProbeRequest,
        context: &CorrelationContext,
    ) -> Result<u16, CheckError>;
}

/// REST checker: authenticated GET
pub struct RestChecker {
    client: reqwest::Client,
    signer: Arc<TokenSigner>,
}

impl RestChecker {
    pub fn new(client: reqwest::Client, signer: Arc<TokenSigner>) -> Self {
        Self { client, signer }
    }
}

#[async_trait]
impl Checker for RestChecker {
    async fn check(
        &self,
        target: &Url,
        request: &ProbeRequest,
        context: &CorrelationContext,
    ) -> Result<u16, CheckError> {
        let claims =
            self.signer.claims(&request.eservice_record_id.to_string(), &request.audience, None);
        let token = self.signer.sign(&claims)?;

        let response = self
            .client
            .get(target.clone())
            .bearer_auth(token)
            .header(CORRELATION_HEADER, context.correlation_id.to_string())
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}

/// SOAP checker: signed envelope POST
pub struct SoapChecker {
    client: reqwest::Client,
    signer: Arc<TokenSigner>,
    soap_action: String,
}

impl SoapChecker {
    pub fn new(client: reqwest::Client, signer: Arc<TokenSigner>, soap_action: impl Into<String>) -> Self {
        Self { client, signer, soap_action: soap_action.into() }
    }

    fn envelope(token: &str) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
                r#"xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">"#,
                "<soapenv:Header><wsse:Security>",
                r#"<wsse:BinarySecurityToken ValueType="JWT">{token}</wsse:BinarySecurityToken>"#,
                "</wsse:Security></soapenv:Header>",
                "<soapenv:Body>{body}</soapenv:Body>",
                "</soapenv:Envelope>"
            ),
            token = token,
            body = SOAP_PROBE_BODY
        )
    }
}

pub fn body_digest(body: &str) -> String {
    STANDARD.encode(Sha256::digest(body.as_bytes()))
}

#[async_trait]
impl Checker for SoapChecker {
    async fn check(
        &self,
        target: &Url,
        request: &ProbeRequest,
        context: &CorrelationContext,
    ) -> Result<u16, CheckError> {
        let claims = self.signer.claims(
            &request.eservice_record_id.to_string(),
            &request.audience,
            Some(body_digest(SOAP_PROBE_BODY)),
        );
        let token = self.signer.sign(&claims)?;

        let response = self
            .client
            .post(target.clone())
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", self.soap_action.as_str())
            .header(CORRELATION_HEADER, context.correlation_id.to_string())
            .body(Self::envelope(&token))
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}

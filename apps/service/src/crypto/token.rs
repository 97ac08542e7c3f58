//! Compact EdDSA JWTs presented to probed services.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::keys::KeyPair;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    /// Base64 SHA-256 of the SOAP body the token travels with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

pub struct TokenSigner {
    keypair: KeyPair,
    issuer: String,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(keypair: KeyPair, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self { keypair, issuer: issuer.into(), ttl }
    }

    pub fn key_id(&self) -> String {
        self.keypair.key_id()
    }

    pub fn claims(&self, subject: &str, audience: &[String], digest: Option<String>) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: audience.to_vec(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
            digest,
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, serde_json::Error> {
        let header = Header { alg: "EdDSA".to_string(), typ: "JWT".to_string(), kid: self.key_id() };

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
        );
        let signature = self.keypair.signing_key.sign(signing_input.as_bytes());

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes())))
    }
}

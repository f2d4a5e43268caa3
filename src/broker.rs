//! Credential broker
//!
//! Fetches one ephemeral credential per session from a trusted issuer. There is
//! no retry and no caching; the session decides what a failure means.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::model::Credential;

#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn fetch_credential(&self) -> Result<Credential, SessionError>;
}

/// POSTs to the issuer endpoint and reads `{ "value": .. }` from the response.
pub struct HttpCredentialBroker {
    client: reqwest::Client,
    issuer_url: String,
}

impl HttpCredentialBroker {
    pub fn new(client: reqwest::Client, issuer_url: impl Into<String>) -> HttpCredentialBroker {
        HttpCredentialBroker {
            client,
            issuer_url: issuer_url.into(),
        }
    }
}

/// Server-side failures count as the issuer being unavailable; anything else
/// that is not a success is a rejection.
fn classify(status: StatusCode, body: String) -> SessionError {
    if status.is_server_error() {
        SessionError::IssuerUnreachable(format!("issuer answered {status}: {body}"))
    } else {
        SessionError::IssuerRejected {
            status: status.as_u16(),
            reason: body,
        }
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialBroker {
    async fn fetch_credential(&self) -> Result<Credential, SessionError> {
        debug!("Requesting credential from {}", self.issuer_url);

        let response = self
            .client
            .post(&self.issuer_url)
            .send()
            .await
            .map_err(|e| SessionError::IssuerUnreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::IssuerUnreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(classify(status, body));
        }

        let credential = Credential::from_json(&body).map_err(|reason| {
            SessionError::IssuerRejected {
                status: status.as_u16(),
                reason: format!("malformed credential response: {reason}"),
            }
        })?;

        info!(
            "🔑 Got ephemeral credential (expires {:?})",
            credential.expires_at()
        );
        Ok(credential)
    }
}

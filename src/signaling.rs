//! Signaling exchange
//!
//! Trades the local offer for the remote answer in one authenticated HTTP
//! request. Never retried: submitting the same offer twice can create two live
//! sessions on the remote side.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::model::sdp::SDP_CONTENT_TYPE;
use crate::model::{Credential, SessionAnswer, SessionOffer};

#[async_trait]
pub trait SignalingExchange: Send + Sync {
    async fn exchange(
        &self,
        offer: &SessionOffer,
        credential: &Credential,
    ) -> Result<SessionAnswer, SessionError>;
}

/// Posts raw SDP with a bearer credential and reads the raw SDP answer.
pub struct HttpSignaling {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSignaling {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> HttpSignaling {
        HttpSignaling {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SignalingExchange for HttpSignaling {
    async fn exchange(
        &self,
        offer: &SessionOffer,
        credential: &Credential,
    ) -> Result<SessionAnswer, SessionError> {
        info!("📤 Sending SDP offer to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential.expose())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer.as_str().to_owned())
            .send()
            .await
            .map_err(|e| SessionError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(SessionError::SignalingRejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("📥 Answer SDP:\n{}", body);
        Ok(SessionAnswer::new(body))
    }
}

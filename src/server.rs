//! Local credential issuer
//!
//! Holds the long-lived API key and hands out one ephemeral credential per
//! `POST /api/session`, minted by the upstream realtime service. Browsers and
//! the CLI client only ever see the ephemeral value.

use anyhow::{anyhow, Context};
use rouille::{router, Request, Response, Server};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::IssuerConfig;
use crate::model::Credential;

/// Mints ephemeral credentials from the upstream service.
pub struct Issuer {
    config: IssuerConfig,
    client: reqwest::blocking::Client,
}

impl Issuer {
    pub fn new(config: IssuerConfig) -> Issuer {
        Issuer {
            config,
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn handle(&self, request: &Request) -> Response {
        info!("{} {}", request.method(), request.url());

        let response = router!(request,
            (GET) (/) => {
                Response::json(&json!({ "status": "ok" }))
            },
            (POST) (/api/session) => {
                self.mint()
            },
            _ => Response::empty_404()
        );

        response.with_additional_header("Access-Control-Allow-Origin", "*")
    }

    fn mint(&self) -> Response {
        if self.config.api_key.is_empty() {
            error!("No upstream API key configured");
            return error_response(500, "issuer has no API key configured");
        }

        match self.request_upstream() {
            Ok(credential) => {
                info!(
                    "🔑 Minted ephemeral credential (expires {:?})",
                    credential.expires_at()
                );
                Response::json(&json!({
                    "value": credential.expose(),
                    "expires_at": credential.expires_at().map(|t| t.timestamp()),
                }))
            }
            Err(e) => {
                warn!("Upstream credential request failed: {:#}", e);
                error_response(502, &format!("{:#}", e))
            }
        }
    }

    fn request_upstream(&self) -> anyhow::Result<Credential> {
        let body = json!({
            "session": {
                "type": "realtime",
                "model": self.config.model,
                "audio": { "output": { "voice": self.config.voice } },
            }
        });

        let response = self
            .client
            .post(&self.config.upstream_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .context("contacting upstream")?;

        let status = response.status();
        let text = response.text().context("reading upstream response")?;
        if !status.is_success() {
            return Err(anyhow!("upstream answered {}: {}", status, text));
        }

        Credential::from_json(&text).map_err(|e| anyhow!("malformed upstream response: {}", e))
    }
}

fn error_response(status: u16, message: &str) -> Response {
    Response::json(&json!({ "error": message })).with_status_code(status)
}

/// Serve the issuer until the process exits.
pub fn main(config: IssuerConfig) -> anyhow::Result<()> {
    let listen = config.listen;
    let issuer = Issuer::new(config);

    let server = Server::new(listen, move |request| issuer.handle(request))
        .map_err(|e| anyhow!("starting the issuer on {}: {}", listen, e))?;

    info!("Credential issuer listening on http://{}", server.server_addr());
    server.run();
    Ok(())
}

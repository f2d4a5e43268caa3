//! Command-line voice client
//!
//! Connects one session with a silent microphone and a logging speaker, prints
//! what the remote endpoint sends, and hangs up on Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::audio::{LoggingSink, SilenceMicrophone};
use crate::broker::HttpCredentialBroker;
use crate::config::ClientConfig;
use crate::session::{SessionOptions, VoiceSession};
use crate::signaling::HttpSignaling;
use crate::transport::Str0mTransportFactory;

#[tokio::main]
pub async fn run(config: ClientConfig) -> Result<()> {
    let http = reqwest::Client::builder()
        .build()
        .context("building HTTP client")?;

    let session = VoiceSession::new(
        Arc::new(HttpCredentialBroker::new(http.clone(), &config.issuer_url)),
        Arc::new(HttpSignaling::new(http, &config.signaling_url)),
        Arc::new(Str0mTransportFactory::new(
            config.bind_address,
            Arc::new(SilenceMicrophone),
            Arc::new(LoggingSink::default()),
        )),
        SessionOptions {
            channel_label: config.channel_label.clone(),
            connect_timeout: config.connect_timeout(),
        },
    );

    let mut connected = session.subscribe();
    let mut events = session.subscribe_events();

    info!("📞 Calling {}", config.signaling_url);
    session
        .connect()
        .await
        .with_context(|| format!("connecting via {}", config.issuer_url))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, hanging up");
                break;
            }
            changed = connected.changed() => {
                if changed.is_err() || !*connected.borrow() {
                    warn!(
                        "Session ended: {}",
                        session.last_error().unwrap_or_else(|| "disconnected".to_string())
                    );
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => info!("⬇️ {}", event.kind()),
                Err(RecvError::Lagged(missed)) => warn!("Dropped {} control events", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.disconnect();
    Ok(())
}

//! Connects to a ward dashboard feed and logs everything it receives.
//!
//! Reads `WARD_WS_*` settings (see `ClientSettings`), e.g.
//! `WARD_WS_URL=ws://localhost:8000/ws WARD_WS_CLIENT_ID=nurse-station cargo run --example ward_monitor`.
//! Set `WARD_PATIENT_ID` to follow one patient.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ward_realtime::{
    ClientSettings, ConnectionHandle, EnvelopeKind, EventHandlers, Notification, RealtimeError,
};

#[tokio::main]
async fn main() -> Result<(), RealtimeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ward_realtime=debug")),
        )
        .init();

    let settings = ClientSettings::from_env()?;
    let patient_id = std::env::var("WARD_PATIENT_ID")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok());
    info!(address = %settings.address(), ?patient_id, "starting ward monitor");

    let handle = ConnectionHandle::from_settings(&settings);
    // The callback only signals; the main loop owns the handle.
    let (opened_tx, mut opened_rx) = mpsc::unbounded_channel::<()>();
    handle.set_handlers(
        EventHandlers::new()
            .on_open(move || {
                info!("connected");
                let _ = opened_tx.send(());
            })
            .on_message(|envelope| match envelope.kind {
                EnvelopeKind::Notification => match envelope.payload::<Notification>() {
                    Ok(n) => info!(level = ?n.level, title = %n.title, "{}", n.message),
                    Err(err) => warn!(%err, "unreadable notification"),
                },
                _ => info!(kind = %envelope.kind, data = %envelope.data, "update"),
            })
            .on_close(|reason| info!(code = reason.code, reason = %reason.reason, "closed"))
            .on_error(|err| warn!(%err, "connection error"))
            .on_reconnect_attempt(|attempt| match attempt.delay {
                Some(delay) => info!(attempt = attempt.attempt, ?delay, "reconnecting"),
                None => warn!(attempt = attempt.attempt, "giving up"),
            }),
    );

    handle.connect().await;

    let window = tokio::time::sleep(Duration::from_secs(3_600));
    tokio::pin!(window);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut window => {
                info!("monitor window elapsed");
                break;
            }
            Some(()) = opened_rx.recv() => {
                // Subscriptions are per connection; renew them after every reconnect.
                if let Some(id) = patient_id {
                    handle.subscribe_to_patient(id);
                }
            }
        }
    }

    if let Ok(stats) = handle.stats().await {
        info!(
            received = stats.messages_received,
            sent = stats.messages_sent,
            reconnects = stats.reconnects,
            "session summary"
        );
    }
    handle.shutdown().await;
    Ok(())
}

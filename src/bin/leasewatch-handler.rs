//! Script run by udhcpc (`-s`) on every lease transition.
//!
//! udhcpc passes the transition as the first argument and the lease in its
//! environment; the event is forwarded to the queue named by `EVENT_QUEUE`.

use leasewatch::{
    channel::ChannelSender, event::handler_payload, process::EVENT_QUEUE_ENV,
};
use std::{env, error::Error as StdError, process::ExitCode};
use tracing_subscriber::EnvFilter;

fn run() -> Result<(), Box<dyn StdError>> {
    let kind = env::args()
        .nth(1)
        .ok_or("missing event argument")?;
    let queue = env::var(EVENT_QUEUE_ENV)
        .map_err(|_| format!("{EVENT_QUEUE_ENV} is not set"))?;

    let payload = handler_payload(&kind, |key| env::var(key).ok());
    tracing::debug!("Publishing {} to {}", payload, queue);

    let sender = ChannelSender::open(&queue)?;
    sender.send(serde_json::to_vec(&payload)?.as_slice())?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("leasewatch-handler: {}", e);
            ExitCode::FAILURE
        }
    }
}

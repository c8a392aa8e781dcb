use clap::Parser;
use leasewatch::{listener_fn, Args, DhcpSupervisor, SupervisorConfig};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn StdError>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = SupervisorConfig::from_args(args).await?;
    let lease_timeout = config.lease_timeout;
    let shutdown_timeout = config.shutdown_timeout;

    let log_events = listener_fn(|ctx, kind, event| {
        tracing::info!(
            "[{}] {} event: {}",
            ctx.interface.name,
            kind,
            serde_json::Value::Object(event.fields().clone())
        );
        Ok(())
    });
    let mut supervisor = DhcpSupervisor::start(config, vec![log_events]).await?;
    tracing::info!(
        "Supervising udhcpc on interface '{}' ({})",
        supervisor.interface().name,
        supervisor.interface().address
    );

    if !supervisor.is_once() {
        supervisor.await_ip(lease_timeout).await?;
        if let Some(lease) = supervisor.lease() {
            println!("{}", serde_json::to_string(&lease)?);
        }
        tracing::info!("Lease obtained, renewing until interrupted");
        tokio::signal::ctrl_c().await?;
    }

    match supervisor.finish(shutdown_timeout).await? {
        Some(ip) => {
            if supervisor.is_once() {
                if let Some(lease) = supervisor.lease() {
                    println!("{}", serde_json::to_string(&lease)?);
                }
            }
            tracing::info!("Released supervision of {} holding {}", supervisor.interface().name, ip);
        }
        None => tracing::info!("No lease held on {} at shutdown", supervisor.interface().name),
    }

    Ok(())
}

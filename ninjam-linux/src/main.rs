// NINJAM Linux client: TCP transport, timers and interval capture around ninjam-core.

mod audio;
mod config;
mod session;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut cli = config::CliOverrides::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("ninjam-linux {}", VERSION);
                return Ok(());
            }
            "--host" => cli.host = Some(args.next().context("--host needs hostname:port")?),
            "--user" => cli.username = Some(args.next().context("--user needs a name")?),
            "--password" => cli.password = Some(args.next().context("--password needs a value")?),
            other => anyhow::bail!("unknown argument {:?}", other),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ninjam=info")),
        )
        .init();

    let cfg = config::load(&cli);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(session::run(cfg))
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

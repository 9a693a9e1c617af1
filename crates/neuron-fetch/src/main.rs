//! Command-line entry point.

use anyhow::Context as _;
use neuron_fetch::{AuthSession, HttpConnector, Mode, config, download_single, run_batch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    let invocation = config::parse();
    let config = invocation.config;

    let http = precomputed::default_http_client().context("failed to build HTTP client")?;

    if let Some(session) = &config.session {
        AuthSession::connect(&http, session)
            .await
            .with_context(|| format!("failed to open datastack {}", session.datastack))?;
    } else {
        tracing::info!("datastack session skipped");
    }

    let connector = HttpConnector::new(http, config.cache_bytes);
    match invocation.mode {
        Mode::Batch => {
            run_batch(&connector, &config).await?;
        }
        Mode::Single { segment, lod } => {
            download_single(&connector, &config, segment, lod)
                .await
                .with_context(|| format!("failed to export neuron {segment} at lod {lod}"))?;
        }
    }

    Ok(())
}

use anyhow::Context;
use strata_worker::{Worker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata_worker=debug,strata_pipeline=debug,strata_events=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    let pool = strata_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    strata_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    strata_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let worker = Worker::start(pool, &config);
    shutdown_signal().await?;

    let stuck = worker.shutdown(config.shutdown_timeout).await;
    if stuck > 0 {
        tracing::warn!(stuck, "Some loops were abandoned at shutdown");
    }
    tracing::info!("Worker stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { tokio::signal::ctrl_c().await.context("Failed to install Ctrl-C handler") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        result = terminate => {
            result?;
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
    Ok(())
}

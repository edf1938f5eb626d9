use anyhow::Context;
use duetto::{AppState, Config, db};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env().context("read configuration")?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_idle_minutes)));

    let db_pool = db::connect(&config.database_url)
        .await
        .with_context(|| format!("open database {}", config.database_url))?;
    let stale = db::reset_presence(&db_pool).await?;
    if stale > 0 {
        info!(stale, "cleared presence left by a previous run");
    }

    tokio::fs::create_dir_all(&config.media_root)
        .await
        .with_context(|| format!("create media root {}", config.media_root.display()))?;
    if config.dev_login {
        tracing::warn!("DEV_LOGIN is on: /dev/login/{{email}} signs in without credentials");
    }

    let bind_addr = config.bind_addr;
    let app = duetto::router(AppState::new(db_pool, config)).layer(session_layer);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    info!("listening on http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received Ctrl+C, shutting down");
        })
        .await
        .context("server stopped")?;

    Ok(())
}

// src/main.rs

use std::{net::SocketAddr, sync::Arc, time::Duration};

use quizbot::{
    config::Config,
    db,
    error::AppError,
    routes,
    services::{
        dispatcher::Dispatcher, progress::ProgressTracker,
        scheduler::PacingScheduler,
    },
    state::AppState,
    transport::{Transport, matrix::MatrixTransport, run_event_loop},
    utils::hash::hash_password,
};
use sqlx::SqlitePool;
use tokio::{sync::mpsc, task::JoinError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration from environment (.env included)
    let config = Config::from_env()?;

    let file_appender = tracing_appender::rolling::daily("logs", "quizbot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Initialize Database Pool with Retry
    let mut retry_count = 0;
    let pool = loop {
        match db::connect(&config.database_url).await {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    tracing::error!("Failed to open database after 5 retries: {}", e);
                    return Err(e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };
    tracing::info!("Database connected...");

    tracing::info!("Running migrations...");
    db::migrate(&pool).await?;
    tracing::info!("Migrations applied successfully.");

    if let Err(e) = seed_admin_user(&pool, &config).await {
        tracing::error!("Failed to seed admin user: {}", e);
    }

    let state = AppState::new(pool.clone(), config.clone());
    let catalog = state.catalog.clone();
    let progress = ProgressTracker::new(pool.clone(), catalog.clone());
    let dispatcher = Dispatcher::new(catalog.clone(), progress.clone(), config.chat_admins.clone());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
            }
            cancel.cancel();
        }
    });

    let app = routes::create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Transport(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!("Admin API listening on {}", addr);

    let http = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    });

    match &config.matrix {
        Some(matrix_config) => {
            let matrix = Arc::new(MatrixTransport::login(matrix_config).await?);
            let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

            let sync = tokio::spawn({
                let matrix = matrix.clone();
                let cancel = cancel.clone();
                async move { matrix.sync_loop(events_tx, cancel).await }
            });

            let transport: Arc<dyn Transport> = matrix.clone();
            let scheduler =
                PacingScheduler::new(catalog, progress, transport, &config.schedule);
            let pacing = tokio::spawn({
                let cancel = cancel.clone();
                async move { scheduler.run(cancel).await }
            });

            run_event_loop(
                events_rx,
                dispatcher,
                matrix.as_ref(),
                matrix.user_id(),
                cancel.clone(),
            )
            .await;

            cancel.cancel();
            let (sync, pacing) = tokio::join!(sync, pacing);
            report_task("matrix sync", sync);
            report_task("pacing scheduler", pacing);
        }
        None => {
            tracing::warn!("MATRIX_* not configured, running the admin API only");
            cancel.cancelled().await;
        }
    }

    report_task("admin api", http.await);
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Logs how a background task ended. Returns false if it panicked or was aborted.
fn report_task(name: &str, result: Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.is_panic() => {
            tracing::error!(task = name, error = %e, "Background task panicked");
            false
        }
        Err(e) => {
            tracing::error!(task = name, error = %e, "Background task was cancelled");
            false
        }
    }
}

async fn seed_admin_user(pool: &SqlitePool, config: &Config) -> Result<(), AppError> {
    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM admins WHERE username = ?1")
            .bind(username)
            .fetch_optional(pool)
            .await?;

        if exists.is_none() {
            tracing::info!("Seeding admin user: {}", username);
            let hashed_password = hash_password(password)?;

            sqlx::query("INSERT INTO admins (username, password, created_at) VALUES (?1, ?2, ?3)")
                .bind(username)
                .bind(hashed_password)
                .bind(chrono::Utc::now())
                .execute(pool)
                .await?;
            tracing::info!("Admin user created successfully.");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn crash() {
        panic!("scheduler crashed");
    }

    #[tokio::test]
    async fn panicked_task_is_reported() {
        let crashed = tokio::spawn(crash()).await;
        assert!(!report_task("pacing scheduler", crashed));

        let finished = tokio::spawn(async {}).await;
        assert!(report_task("matrix sync", finished));
    }
}

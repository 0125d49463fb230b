use std::sync::Arc;

use tracing::{error, info};

use robux_shop_api::{config, db, events, handlers::AppServices, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = config::load_config()?;
    config::init_tracing(app_config.log_level(), app_config.log_json);

    info!(
        environment = %app_config.environment,
        "starting robux-shop-api"
    );

    let db_pool = Arc::new(db::establish_connection_from_app_config(&app_config).await?);

    if app_config.auto_migrate {
        db::run_migrations(&db_pool).await?;
    }

    let (event_sender, event_receiver) = events::channel(app_config.event_channel_capacity);
    let event_task = events::spawn_event_logger(event_receiver);

    let services = AppServices::new(db_pool.clone(), event_sender.clone(), &app_config)?;

    let state = AppState {
        db: db_pool.clone(),
        config: app_config.clone(),
        event_sender,
        services,
    };

    let app = robux_shop_api::app(state);

    let addr = format!("{}:{}", app_config.host, app_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The server dropped its event senders; let the logger drain
    if let Err(e) = event_task.await {
        error!(error = %e, "event logger task failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

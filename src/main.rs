use dotenvy::dotenv;
use giftstore_reserve::{
    config::{self, database},
    core::{ReservationPolicy, StoreContext, scheduler, system_config},
    errors::Result,
    notify::{LogNotifier, Notifier, SmtpNotifier},
};
use std::{env, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the application configuration
    let app_config = config::settings::load_app_configuration()?;

    // 4. Initialize database
    let database_url = database::get_database_url();
    if database_url.starts_with("sqlite://data/") {
        std::fs::create_dir_all("data")?;
    }
    let db = database::create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database schema ready"))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Seed the walk-in floor and the catalog (never overwrites live data)
    let seeded_floor = match app_config.reservation.min_reservation_stock {
        Some(floor) => system_config::seed_min_reservation_stock(&db, floor)
            .await?
            .then_some(floor),
        None => None,
    };
    if let Some(floor) = seeded_floor {
        info!(floor, "Seeded global minimum reservation stock");
    }
    let seeded = config::catalog::seed_catalog(&db, &app_config.items).await?;
    info!(seeded, "Catalog seeding complete");

    // 6. Choose the notifier
    let notifier: Arc<dyn Notifier> = if app_config.email.smtp_server.is_some() {
        match SmtpNotifier::from_settings(&app_config.email, env::var("SMTP_PASSWORD").ok()) {
            Ok(smtp) => Arc::new(smtp),
            Err(e) => {
                warn!(error = %e, "SMTP unavailable, logging emails instead");
                Arc::new(LogNotifier::new())
            }
        }
    } else {
        info!("No SMTP server configured, logging emails instead");
        Arc::new(LogNotifier::new())
    };

    let ctx = StoreContext::new(db)
        .with_notifier(notifier)
        .with_policy(ReservationPolicy::from_config(&app_config));

    // 7. Run the sweeps until Ctrl-C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = scheduler::spawn_sweeps(&ctx, &app_config.scheduler, &shutdown_rx);
    info!("Giftstore reservation service running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown_tx.send(true).ok();
    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task ended abnormally: {}", e);
        }
    }
    ctx.db.close().await?;
    Ok(())
}

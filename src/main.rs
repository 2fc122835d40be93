mod auth;
mod config;
mod db;
mod error;
mod geocode;
mod kafka;
mod models;
mod position;
mod processor;
mod publisher;
mod render;
mod store;
mod viewer;

use std::sync::Arc;

use auth::StaticAuth;
use config::{AppConfig, Role};
use db::store::PgLocationStore;
use error::PublishError;
use geocode::NominatimResolver;
use kafka::KafkaPositionSource;
use position::WatchOptions;
use processor::liveness::SystemClock;
use publisher::{DriverPublisher, SharingState};
use render::LogRenderer;
use store::LocationStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use viewer::ViewerSubscription;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Campus Bus Tracker ({:?})...", config.role);

    // Init DB
    let pool = db::init_pool(&config.database_url).await?;
    info!("Connected to database");

    let store: Arc<dyn LocationStore> = Arc::new(PgLocationStore::new(
        pool,
        config.location_key.clone(),
        config.store_notify_channel.clone(),
    ));

    match config.role {
        Role::Driver => run_driver(&config, store).await,
        Role::Viewer => run_viewer(&config, store).await,
    }
}

async fn run_driver(config: &AppConfig, store: Arc<dyn LocationStore>) -> anyhow::Result<()> {
    let auth = StaticAuth::new(config.auth_uid.clone(), config.auth_email.clone());
    let options = WatchOptions {
        timeout: config.position_timeout(),
        ..WatchOptions::default()
    };
    let mut publisher = DriverPublisher::new(
        store,
        Arc::new(KafkaPositionSource::new(config)),
        Arc::new(auth),
        Arc::new(SystemClock),
        options,
    );

    let mut profile = config.driver_profile();
    if !profile.is_complete() {
        if let Some(previous) = publisher.previous_profile().await {
            info!("Loaded previous driver info: {}", previous.driver_name);
            profile = previous;
        }
    }

    match publisher.start(profile).await {
        Ok(()) => {}
        Err(PublishError::NotAuthenticated) => {
            error!("No authenticated user found. Set AUTH_UID and log in again.");
            return Ok(());
        }
        Err(e) => {
            error!("Could not start location sharing: {}", e);
            return Ok(());
        }
    }

    let mut status = publisher.subscribe_status();
    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    info!("Sharing location. Type 'stop' or press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl-C, stopping location sharing");
                break;
            }
            _ = status.wait_for(|s| s.state == SharingState::Idle) => break,
            line = commands.next_line(), if stdin_open => match line {
                Ok(Some(cmd)) if cmd.trim() == "stop" => publisher.stop(),
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    let last_error = publisher.status().last_error;
    publisher.shutdown().await;
    if let Some(e) = last_error {
        warn!("Location sharing ended: {}", e);
    }
    Ok(())
}

async fn run_viewer(config: &AppConfig, store: Arc<dyn LocationStore>) -> anyhow::Result<()> {
    let resolver = NominatimResolver::new(&config.geocoder_url, &config.geocoder_user_agent)?;
    let (viewer, mut events) = ViewerSubscription::mount(
        store,
        Arc::new(resolver),
        Arc::new(SystemClock),
        config.fallback_anchor(),
    );

    let mut renderer = LogRenderer::default();
    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl-C, closing the live view");
                break;
            }
            event = events.recv() => match event {
                Some(event) => render::dispatch(&mut renderer, event),
                None => break,
            },
            line = commands.next_line(), if stdin_open => match line {
                Ok(Some(cmd)) if cmd.trim() == "dismiss" => viewer.dismiss_error(),
                Ok(Some(cmd)) if cmd.trim() == "status" => {
                    for line in viewer.state().borrow().summary() {
                        println!("{}", line);
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    viewer.unmount().await;
    Ok(())
}

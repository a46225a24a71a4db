use std::{
    net::SocketAddr,
    sync::{Arc, RwLock},
};

use dotenvy::dotenv;
use jobs::dispatch::RunStats;
use jobs::spawn_all_jobs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
use mockall_double::double;

#[cfg_attr(test, double)]
use database::AppDatabase;

#[cfg_attr(test, double)]
use jobs::dispatch::fcm::FcmClient;

pub mod app;
pub mod constants;
pub mod database;
pub mod jobs;
pub mod models;
pub mod utils;

pub async fn start_service() {
    // import .env file
    dotenv().ok();
    initialize_logging();
    // create database client
    let db_client = AppDatabase::new()
        .await
        .expect("Unable to accquire database client");
    let db_client = Arc::new(db_client);
    // create messaging gateway client
    let fcm_client = FcmClient::new().expect("Unable to create FCM client");
    let fcm_client = Arc::new(fcm_client);
    let run_stats = Arc::new(RwLock::new(RunStats::default()));
    spawn_all_jobs(db_client, fcm_client, run_stats.clone());
    start_server(run_stats).await;
}

fn initialize_logging() {
    // create default env filter
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or("notify_dispatch=debug".into());

    // initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();
}

async fn start_server(run_stats: Arc<RwLock<RunStats>>) {
    // read the port number from env variable
    let port = std::env::var("PORT").unwrap_or_default();
    let port = port.parse::<u16>().unwrap_or(3000);
    // build the socket address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    // create the app instance
    let app = app::build_app(run_stats);
    tracing::debug!("Starting the app in: {addr}");
    // start serving the app in the socket address
    axum::Server::bind(&addr).serve(app).await.unwrap();
}

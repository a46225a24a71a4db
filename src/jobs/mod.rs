use std::sync::{Arc, RwLock};

use self::dispatch::{dispatch_job, RunStats};

pub mod dispatch;

#[cfg(test)]
use mockall_double::double;

#[cfg_attr(test, double)]
use crate::database::AppDatabase;

#[cfg_attr(test, double)]
use self::dispatch::fcm::FcmClient;

pub fn spawn_all_jobs(
    db_client: Arc<AppDatabase>,
    fcm_client: Arc<FcmClient>,
    run_stats: Arc<RwLock<RunStats>>,
) {
    // spawn job to periodically send out due notifications
    tokio::spawn(async {
        dispatch_job(db_client, fcm_client, run_stats).await;
    });
}

pub mod dispatch_job;
pub mod fcm;
pub mod google_auth_token;
pub mod queue_entry;

pub use dispatch_job::{dispatch_job, RunStats};

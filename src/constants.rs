pub const MONGO_MIN_POOL_SIZE: u32 = 5;
pub const MONGO_MAX_POOL_SIZE: u32 = 10;
pub const MONGO_CONN_TIMEOUT: u64 = 10;

// DISPATCH_JOB_INTERVAL is mentioned in seconds
pub const DISPATCH_JOB_INTERVAL: u64 = 60;
// maximum queue entries picked up in one run, overflow waits for the next tick
pub const DISPATCH_BATCH_LIMIT: i64 = 50;

pub const DB_NAME: &str = "taskreminders";

pub const COLL_USERS: &str = "users";
pub const COLL_NOTIFICATION_QUEUE: &str = "notificationQueue";

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const FIREBASE_MESSAGE_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const FCM_SEND_BASE_URL: &str = "https://fcm.googleapis.com/v1/projects";

pub const DEFAULT_PUSH_TITLE: &str = "Recordatorio";
pub const PUSH_BODY_TEXT: &str = "Tienes una tarea pendiente.";
pub const DEFAULT_ENTRY_TYPE: &str = "task";
pub const ANDROID_CHANNEL_ID: &str = "tareas_channel";

// gateway error codes after which a token will never succeed again,
// any other code is treated as transient and the token is kept
pub const INVALID_TOKEN_ERROR_CODES: [&str; 4] = [
    "messaging/registration-token-not-registered",
    "messaging/invalid-registration-token",
    "messaging/mismatched-credential",
    "messaging/invalid-argument",
];

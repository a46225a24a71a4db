use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::google_auth_token::GoogleAuthToken;
use crate::constants::*;

#[cfg(test)]
use mockall::automock;

/// One logical multicast: the same notification fanned out to every
/// token of one user
#[derive(Debug, Clone, PartialEq)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendError {
    pub code: String,
    pub message: String,
}

/// Per token outcome of a multicast send, same order as the token list
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<SendError>,
}

impl SendOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(code: &str, message: &str) -> Self {
        Self {
            success: false,
            error: Some(SendError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MulticastResponse {
    pub success_count: usize,
    pub responses: Vec<SendOutcome>,
}

impl MulticastResponse {
    /// First failing per-token error, used as the lastError diagnostic
    pub fn first_error(&self) -> Option<&SendError> {
        self.responses
            .iter()
            .find(|outcome| !outcome.success)
            .and_then(|outcome| outcome.error.as_ref())
    }
}

/// True when the gateway reported the token as permanently dead and it
/// should be pruned from the user record
pub fn is_permanent_failure(code: &str) -> bool {
    INVALID_TOKEN_ERROR_CODES.contains(&code)
}

// request payload shapes for the FCM HTTP v1 send endpoint

#[derive(Debug, Serialize)]
struct PushNotification {
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushAndroidNotification {
    channel_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushAndroid {
    priority: String,
    notification: PushAndroidNotification,
}

#[derive(Debug, Serialize)]
struct ApnsAlert {
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct ApnsAps {
    #[serde(rename = "content-available")]
    content_available: u8,
    sound: String,
    alert: ApnsAlert,
}

#[derive(Debug, Serialize)]
struct ApnsPayload {
    aps: ApnsAps,
}

#[derive(Debug, Serialize)]
struct PushApns {
    payload: ApnsPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    token: String,
    notification: PushNotification,
    data: HashMap<String, String>,
    android: PushAndroid,
    apns: PushApns,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
    message: PushMessage,
}

impl PushPayload {
    fn new(message: &MulticastMessage, token: &str) -> Self {
        let notification = PushNotification {
            title: message.title.to_string(),
            body: message.body.to_string(),
        };
        let android = PushAndroid {
            priority: "HIGH".to_string(),
            notification: PushAndroidNotification {
                channel_id: ANDROID_CHANNEL_ID.to_string(),
            },
        };
        let apns = PushApns {
            payload: ApnsPayload {
                aps: ApnsAps {
                    content_available: 1,
                    sound: "default".to_string(),
                    alert: ApnsAlert {
                        title: message.title.to_string(),
                        body: message.body.to_string(),
                    },
                },
            },
        };
        let push_message = PushMessage {
            token: token.to_string(),
            notification,
            data: message.data.clone(),
            android,
            apns,
        };
        Self {
            message: push_message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FcmErrorBody {
    error: Option<FcmErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct FcmErrorDetail {
    status: Option<String>,
    message: Option<String>,
}

/// Normalize the v1 API error status into the gateway error vocabulary
fn map_error_code(status: &str) -> &'static str {
    match status {
        "UNREGISTERED" | "NOT_FOUND" => "messaging/registration-token-not-registered",
        "INVALID_ARGUMENT" => "messaging/invalid-argument",
        "SENDER_ID_MISMATCH" | "PERMISSION_DENIED" => "messaging/mismatched-credential",
        "UNAVAILABLE" => "messaging/server-unavailable",
        "INTERNAL" => "messaging/internal-error",
        "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED" => "messaging/message-rate-exceeded",
        _ => "messaging/unknown-error",
    }
}

pub struct FcmClient {
    http: reqwest::Client,
    project_id: String,
    auth: Mutex<GoogleAuthToken>,
}

#[cfg_attr(test, automock)]
impl FcmClient {
    pub fn new() -> anyhow::Result<Self> {
        let project_id = std::env::var("FCM_PROJECT_ID")?;
        Ok(Self {
            http: reqwest::Client::new(),
            project_id,
            auth: Mutex::new(GoogleAuthToken::default()),
        })
    }

    /// Send one multicast message, one v1 API call per token. The call as
    /// a whole only errors when no request could be attempted at all,
    /// per token failures are reported in the response
    pub async fn send_multicast(
        &self,
        message: &MulticastMessage,
    ) -> anyhow::Result<MulticastResponse> {
        let access_token = {
            let mut auth = self.auth.lock().await;
            auth.get_access_token().await?.to_string()
        };
        let url = format!("{}/{}/messages:send", FCM_SEND_BASE_URL, self.project_id);
        let mut success_count = 0;
        let mut responses = Vec::with_capacity(message.tokens.len());
        for token in &message.tokens {
            let outcome = self
                .send_one(&url, &access_token, message, token)
                .await
                .unwrap_or_else(|e| {
                    tracing::debug!("push send failed for one token: {:?}", e);
                    SendOutcome::failure("messaging/unknown-error", &e.to_string())
                });
            if outcome.success {
                success_count += 1;
            }
            responses.push(outcome);
        }
        Ok(MulticastResponse {
            success_count,
            responses,
        })
    }
}

impl FcmClient {
    async fn send_one(
        &self,
        url: &str,
        access_token: &str,
        message: &MulticastMessage,
        token: &str,
    ) -> anyhow::Result<SendOutcome> {
        let payload = PushPayload::new(message, token);
        let bearer_token = format!("Bearer {}", access_token);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer_token.as_str().parse()?);
        headers.insert(CONTENT_TYPE, "application/json".parse()?);
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&payload)
            .send()
            .await?;
        if res.status().is_success() {
            return Ok(SendOutcome::success());
        }
        let http_status = res.status();
        let body = res.json::<FcmErrorBody>().await.unwrap_or_default();
        let detail = body.error.unwrap_or_default();
        let status = detail.status.unwrap_or_else(|| http_status.to_string());
        let message = detail.message.unwrap_or_default();
        Ok(SendOutcome::failure(map_error_code(&status), &message))
    }
}

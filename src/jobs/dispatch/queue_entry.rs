use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::fcm::{is_permanent_failure, MulticastMessage, MulticastResponse};
use crate::{
    constants::*,
    models::user::User,
    utils::{deserialize_helper, filter_valid_tokens, get_epoch_ts, parse_object_id},
};

#[cfg(test)]
use mockall_double::double;

#[cfg_attr(test, double)]
use crate::database::AppDatabase;

#[cfg_attr(test, double)]
use super::fcm::FcmClient;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Pending,
    Sent,
    Failed,
    NoTokens,
}

impl QueueEntryStatus {
    pub fn to_bson(&self) -> anyhow::Result<Bson> {
        let bson = mongodb::bson::to_bson(self)?;
        Ok(bson)
    }
}

/// One scheduled notification. Stored documents come from the producer
/// app and are not trusted to be well shaped, every field that may be
/// absent or malformed is optional here and validated during dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(rename = "_id")]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(deserialize_with = "deserialize_helper")]
    #[serde(default)]
    pub _id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub user_id: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub task_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub task_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub run_at: Option<i64>,

    pub status: QueueEntryStatus,

    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub entry_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub reminder_minutes: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sent_at: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub updated_at: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Terminal classification of one processed entry, aggregated per run
/// for observability only
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryOutcome {
    Sent,
    Failed,
    NoTokens,
    Skipped,
}

/// Decode and process one fetched queue document. Decoding happens here,
/// per document, so that a single stored document with a wrongly typed
/// field cannot poison the batch fetch for its siblings. A document that
/// does not decode is finalized as failed right away, otherwise it would
/// stay pending and be re-selected on every run.
pub async fn process_due_document(
    db: &AppDatabase,
    fcm: &FcmClient,
    document: Document,
) -> EntryOutcome {
    let oid = document.get_object_id("_id").ok();
    match mongodb::bson::from_document::<QueueEntry>(document) {
        Ok(entry) => process_due_entry(db, fcm, &entry).await,
        Err(e) => {
            tracing::debug!("malformed queue document {:?}: {:?}", oid, e);
            let Some(oid) = oid else {
                return EntryOutcome::Skipped;
            };
            update_decode_failed(db, oid, &e.to_string()).await;
            EntryOutcome::Failed
        }
    }
}

/// Process one due entry to a terminal status. Any fault is caught here
/// and written back onto the entry so that sibling entries of the same
/// batch are never affected.
pub async fn process_due_entry(
    db: &AppDatabase,
    fcm: &FcmClient,
    entry: &QueueEntry,
) -> EntryOutcome {
    match dispatch_entry(db, fcm, entry).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::debug!("dispatch fault for entry {:?}: {:?}", entry._id, e);
            update_failed(db, entry, &e.to_string(), false).await;
            EntryOutcome::Failed
        }
    }
}

async fn dispatch_entry(
    db: &AppDatabase,
    fcm: &FcmClient,
    entry: &QueueEntry,
) -> anyhow::Result<EntryOutcome> {
    let Some(entry_id) = entry._id.as_ref() else {
        // nothing addressable to write a status back to
        tracing::debug!("queue entry without _id, skipping");
        return Ok(EntryOutcome::Skipped);
    };
    let Some(user_id) = entry.user_id else {
        update_failed(db, entry, "Missing user reference", false).await;
        return Ok(EntryOutcome::Failed);
    };
    let filter = doc! {"id": user_id};
    let user = db
        .find_one::<User>(DB_NAME, COLL_USERS, Some(filter), None)
        .await?;
    let Some(user) = user else {
        update_failed(db, entry, "User document not found", false).await;
        return Ok(EntryOutcome::Failed);
    };
    let tokens = filter_valid_tokens(user.fcm_tokens.as_deref().unwrap_or_default());
    if tokens.is_empty() {
        // expected state, the user simply has no registered device
        update_no_tokens(db, entry).await;
        return Ok(EntryOutcome::NoTokens);
    }
    let message = build_message(entry, entry_id, tokens);
    let response = fcm.send_multicast(&message).await?;
    prune_invalid_tokens(db, user_id, &message.tokens, &response).await;
    if response.success_count > 0 {
        update_sent(db, entry).await;
        Ok(EntryOutcome::Sent)
    } else {
        let last_error = response
            .first_error()
            .and_then(|err| serde_json::to_string(err).ok())
            .unwrap_or_else(|| "{}".to_string());
        update_failed(db, entry, &last_error, true).await;
        Ok(EntryOutcome::Failed)
    }
}

/// Compose the multicast message with the documented fallbacks: title
/// defaults to a localized placeholder, taskId to the entry's own id and
/// type to "task"
fn build_message(entry: &QueueEntry, entry_id: &str, tokens: Vec<String>) -> MulticastMessage {
    let title = entry
        .task_title
        .clone()
        .unwrap_or_else(|| DEFAULT_PUSH_TITLE.to_string());
    let task_id = entry
        .task_id
        .clone()
        .unwrap_or_else(|| entry_id.to_string());
    let entry_type = entry
        .entry_type
        .clone()
        .unwrap_or_else(|| DEFAULT_ENTRY_TYPE.to_string());
    let data = HashMap::from([
        ("taskId".to_string(), task_id),
        ("type".to_string(), entry_type),
    ]);
    MulticastMessage {
        tokens,
        title,
        body: PUSH_BODY_TEXT.to_string(),
        data,
    }
}

/// Remove the tokens reported permanently invalid from the user record.
/// Transient codes never cause removal.
async fn prune_invalid_tokens(
    db: &AppDatabase,
    user_id: u32,
    tokens: &[String],
    response: &MulticastResponse,
) {
    let invalid: Vec<String> = response
        .responses
        .iter()
        .zip(tokens)
        .filter_map(|(outcome, token)| match outcome.error.as_ref() {
            Some(err) if is_permanent_failure(&err.code) => Some(token.to_string()),
            _ => None,
        })
        .collect();
    if invalid.is_empty() {
        return;
    }
    tracing::debug!("pruning {} invalid tokens for user {}", invalid.len(), user_id);
    let filter = doc! {"id": user_id};
    let update = doc! {"$pull": {"fcmTokens": {"$in": invalid}}};
    if let Err(e) = db
        .update_one(DB_NAME, COLL_USERS, filter, update, None)
        .await
    {
        tracing::debug!("not able to prune tokens for user {}: {:?}", user_id, e);
    }
}

async fn update_sent(db: &AppDatabase, entry: &QueueEntry) {
    let Ok(status) = QueueEntryStatus::Sent.to_bson() else {
        tracing::debug!("not able to convert QueueEntryStatus to bson");
        return;
    };
    let ts = get_epoch_ts() as i64;
    let update = doc! {
        "$set": {"status": status, "sentAt": ts, "updatedAt": ts},
        "$unset": {"lastError": ""}
    };
    update_entry(db, entry, update).await;
}

async fn update_no_tokens(db: &AppDatabase, entry: &QueueEntry) {
    let Ok(status) = QueueEntryStatus::NoTokens.to_bson() else {
        tracing::debug!("not able to convert QueueEntryStatus to bson");
        return;
    };
    let ts = get_epoch_ts() as i64;
    let update = doc! {"$set": {"status": status, "updatedAt": ts}};
    update_entry(db, entry, update).await;
}

/// sentAt is stamped only when the gateway was actually called, the
/// short circuit paths leave it untouched
async fn update_failed(db: &AppDatabase, entry: &QueueEntry, error: &str, send_attempted: bool) {
    let Ok(status) = QueueEntryStatus::Failed.to_bson() else {
        tracing::debug!("not able to convert QueueEntryStatus to bson");
        return;
    };
    let ts = get_epoch_ts() as i64;
    let mut set = doc! {"status": status, "lastError": error, "updatedAt": ts};
    if send_attempted {
        set.insert("sentAt", ts);
    }
    let update = doc! {"$set": set};
    update_entry(db, entry, update).await;
}

/// Failure write for a document that never decoded into a QueueEntry,
/// addressed by the raw _id since no typed entry exists
async fn update_decode_failed(db: &AppDatabase, oid: ObjectId, error: &str) {
    let Ok(status) = QueueEntryStatus::Failed.to_bson() else {
        tracing::debug!("not able to convert QueueEntryStatus to bson");
        return;
    };
    let ts = get_epoch_ts() as i64;
    let filter = doc! {"_id": oid};
    let update = doc! {"$set": {"status": status, "lastError": error, "updatedAt": ts}};
    if let Err(e) = db
        .update_one(DB_NAME, COLL_NOTIFICATION_QUEUE, filter, update, None)
        .await
    {
        tracing::debug!("not able to update entry {}: {:?}", oid, e);
    }
}

async fn update_entry(db: &AppDatabase, entry: &QueueEntry, update: Document) {
    let Some(id) = entry._id.as_ref() else {
        tracing::debug!("_id not present in entry");
        return;
    };
    let Ok(oid) = parse_object_id(id) else {
        tracing::debug!("not able to parse entry _id");
        return;
    };
    let filter = doc! {"_id": oid};
    if let Err(e) = db
        .update_one(DB_NAME, COLL_NOTIFICATION_QUEUE, filter, update, None)
        .await
    {
        tracing::debug!("not able to update entry {}: {:?}", id, e);
    }
}
